// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reconciler: merges new packets into stored partial files.
//!
//! Two entry points share the same settle step:
//!
//! - [`Reconciler::reconcile`] takes retransmitted packets and only accepts
//!   good packets that fill a gap of the stored file.
//! - [`Reconciler::absorb`] takes a freshly indexed file from a capture and
//!   merges all of it under the usual dedup rule.
//!
//! Settling re-runs the gap analysis. A complete file is emitted and its
//! record deleted; otherwise the record is rewritten in full. A complete
//! record left behind by a failed emit is picked up again by
//! [`Reconciler::retry_stored`].

use crate::emit::{CompletionEmitter, Materializer};
use crate::gap::{GapAnalyzer, GapReport};
use crate::index::{InsertOutcome, LengthPolicy, LogicalFile};
use crate::packet::{FileId, Packet};
use crate::store::{PartialStore, StoreError};
use serde::Serialize;
use std::path::PathBuf;

/// What happened to a file after settling.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Emitted and removed from the store.
    Completed { output: PathBuf },
    /// Still has gaps; the record was saved.
    Pending,
    /// Complete, but the materializer failed. The record was kept.
    EmitFailed { error: String },
}

/// Result of one reconcile or absorb call.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub file: LogicalFile,
    pub report: GapReport,
    pub outcome: ReconcileOutcome,
    /// New packets that filled a sequence the file did not hold.
    pub accepted: u32,
    /// New packets that replaced one already held (later arrival wins).
    pub duplicates: u32,
    /// New packets refused (flagged, not wanted, or for another file).
    pub rejected: u32,
}

#[derive(Debug, Default, Clone, Copy)]
struct MergeCounts {
    accepted: u32,
    duplicates: u32,
    rejected: u32,
}

impl MergeCounts {
    fn record(&mut self, outcome: InsertOutcome) {
        match outcome {
            InsertOutcome::Inserted => self.accepted += 1,
            InsertOutcome::Replaced => self.duplicates += 1,
            InsertOutcome::Kept => self.rejected += 1,
        }
    }
}

impl Reconciliation {
    pub fn is_complete(&self) -> bool {
        matches!(self.outcome, ReconcileOutcome::Completed { .. })
    }
}

pub struct Reconciler<S, M> {
    store: S,
    emitter: CompletionEmitter<M>,
    analyzer: GapAnalyzer,
    length_policy: LengthPolicy,
}

impl<S: PartialStore, M: Materializer> Reconciler<S, M> {
    pub fn new(
        store: S,
        emitter: CompletionEmitter<M>,
        analyzer: GapAnalyzer,
        length_policy: LengthPolicy,
    ) -> Self {
        Self {
            store,
            emitter,
            analyzer,
            length_policy,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn emitter(&self) -> &CompletionEmitter<M> {
        &self.emitter
    }

    pub fn analyzer(&self) -> &GapAnalyzer {
        &self.analyzer
    }

    /// Merge retransmitted packets into the stored record of `file_id`.
    ///
    /// A missing record counts as an empty file, whose report wants every
    /// sequence.
    pub fn reconcile(
        &mut self,
        file_id: FileId,
        new_packets: impl IntoIterator<Item = Packet>,
    ) -> Result<Reconciliation, StoreError> {
        let mut file = self.store.load_or_empty(file_id)?;
        let previous = self.analyzer.analyze(&file);

        let mut counts = MergeCounts::default();
        for packet in new_packets {
            if packet.file_id == file_id && packet.is_good() && previous.wants(packet.sequence) {
                counts.record(file.insert(packet));
            } else {
                tracing::debug!(
                    "Rejected retransmitted packet {} of {} (quality {})",
                    packet.sequence,
                    packet.file_id,
                    packet.quality_flag
                );
                counts.rejected += 1;
            }
        }

        self.settle(file, counts)
    }

    /// Merge a file indexed from a capture with its stored record, if any.
    ///
    /// Stored packets count as the earlier arrivals.
    pub fn absorb(&mut self, fresh: LogicalFile) -> Result<Reconciliation, StoreError> {
        let file_id = fresh.file_id();
        let mut file = self.store.load_or_empty(file_id)?;

        let mut counts = MergeCounts::default();
        for packet in fresh.packets().cloned() {
            counts.record(file.insert(packet));
        }

        self.settle(file, counts)
    }

    /// Settle a stored record that is already complete.
    ///
    /// Returns `None` when no record exists or it still has gaps; those are
    /// left untouched.
    pub fn retry_stored(&mut self, file_id: FileId) -> Result<Option<Reconciliation>, StoreError> {
        let Some(mut file) = self.store.load(file_id)? else {
            return Ok(None);
        };
        file.resolve(&self.length_policy);
        if !self.analyzer.analyze(&file).is_complete() {
            return Ok(None);
        }

        tracing::info!("Retrying emit of stored record {}", file_id);
        self.settle(file, MergeCounts::default()).map(Some)
    }

    fn settle(
        &mut self,
        mut file: LogicalFile,
        counts: MergeCounts,
    ) -> Result<Reconciliation, StoreError> {
        file.resolve(&self.length_policy);
        let report = self.analyzer.analyze(&file);
        let file_id = file.file_id();

        let outcome = if report.is_complete() {
            match self.emitter.emit(&file) {
                Ok(output) => {
                    self.store.delete(file_id)?;
                    ReconcileOutcome::Completed { output }
                }
                Err(e) => {
                    tracing::warn!("Materializing {} failed: {}", file_id, e);
                    self.store.save(&file)?;
                    ReconcileOutcome::EmitFailed {
                        error: e.to_string(),
                    }
                }
            }
        } else {
            self.store.save(&file)?;
            ReconcileOutcome::Pending
        };

        tracing::info!(
            "{} ({}): {} missing of {} ({:.2}%), {} accepted, {} duplicates, {} rejected",
            file_id,
            file.kind(),
            report.missing_count,
            report.universe,
            report.missing_rate,
            counts.accepted,
            counts.duplicates,
            counts.rejected
        );

        Ok(Reconciliation {
            file,
            report,
            outcome,
            accepted: counts.accepted,
            duplicates: counts.duplicates,
            rejected: counts.rejected,
        })
    }
}

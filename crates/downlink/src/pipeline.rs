// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Check and combine drivers.
//!
//! One call processes one input file start to finish. Reports are opened once
//! per call and flushed before it returns. After the input, every stored
//! record the input did not touch is checked, so a complete record whose emit
//! failed earlier is emitted by the next run.

use crate::config::{ConfigError, PipelineConfig};
use crate::emit::{CompletionEmitter, DirectoryMaterializer, Materializer};
use crate::framer::{FrameStats, FramedCapture, Framer};
use crate::gap::{GapAnalyzer, SeqRange};
use crate::index::{LengthPolicy, ReassemblyIndex};
use crate::packet::{FileId, Packet, PacketKind};
use crate::reconcile::{ReconcileOutcome, Reconciler, Reconciliation};
use crate::report::{ReportLogs, ReportRow};
use crate::request::{RetransmissionPlanner, RetransmissionRequest};
use crate::store::{DirStore, PartialStore, StoreError};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Pipeline errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No packets found in {path} ({dropped} chunks dropped)")]
    Unparseable { path: PathBuf, dropped: u32 },

    #[error("Report error: {0}")]
    Report(#[source] io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Which driver produced a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Check,
    Combine,
}

/// Result for one logical file.
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub file_id: FileId,
    pub kind: PacketKind,
    #[serde(flatten)]
    pub outcome: ReconcileOutcome,
    pub missing_rate: f64,
    pub universe: u32,
    pub missing_ranges: Vec<SeqRange>,
    pub request: RetransmissionRequest,
    pub accepted: u32,
    pub duplicates: u32,
    pub rejected: u32,
}

/// Result of one driver call.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub input: PathBuf,
    pub mode: RunMode,
    pub frames: FrameStats,
    pub files: Vec<FileOutcome>,
}

impl RunSummary {
    fn new(input: &Path, mode: RunMode, frames: FrameStats) -> Self {
        Self {
            input: input.to_path_buf(),
            mode,
            frames,
            files: Vec::new(),
        }
    }

    pub fn completed(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.outcome, ReconcileOutcome::Completed { .. }))
            .count()
    }

    pub fn pending(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.outcome == ReconcileOutcome::Pending)
            .count()
    }

    pub fn emit_failures(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.outcome, ReconcileOutcome::EmitFailed { .. }))
            .count()
    }
}

/// Downlink pipeline over a partial store and a materializer.
pub struct Pipeline<S, M> {
    framer: Framer,
    length_policy: LengthPolicy,
    planner: RetransmissionPlanner,
    reconciler: Reconciler<S, M>,
    report_dir: PathBuf,
}

impl Pipeline<DirStore, DirectoryMaterializer> {
    /// Pipeline writing to the directories named in `config`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let store = DirStore::open(&config.paths.partial_dir)?;
        let materializer = DirectoryMaterializer::new(&config.paths.output_dir);
        Ok(Self::new(config, store, materializer))
    }
}

impl<S: PartialStore, M: Materializer> Pipeline<S, M> {
    pub fn new(config: &PipelineConfig, store: S, materializer: M) -> Self {
        let reconciler = Reconciler::new(
            store,
            CompletionEmitter::new(materializer),
            GapAnalyzer::new(config.gap_policy()),
            config.length_policy(),
        );
        Self {
            framer: Framer::new(config.frame_layout()),
            length_policy: config.length_policy(),
            planner: config.planner(),
            reconciler,
            report_dir: config.paths.report_dir.clone(),
        }
    }

    pub fn reconciler(&self) -> &Reconciler<S, M> {
        &self.reconciler
    }

    /// Process a fresh capture.
    ///
    /// Each logical file found is merged with its stored record. Complete
    /// files are emitted; the rest are saved and reported for retransmission.
    pub fn check_capture<P: AsRef<Path>>(&mut self, path: P) -> Result<RunSummary, PipelineError> {
        let path = path.as_ref();
        let mut reports = ReportLogs::open(&self.report_dir).map_err(PipelineError::Report)?;
        let capture = self.frame_input(path, &mut reports)?;

        tracing::info!(
            "Framed {}: {} packets, {} dropped",
            path.display(),
            capture.packets.len(),
            capture.dropped_count()
        );

        let mut summary = RunSummary::new(path, RunMode::Check, capture.stats);
        let index = ReassemblyIndex::build(capture.packets, &self.length_policy);
        let mut visited = BTreeSet::new();
        for file in index.into_files().into_values() {
            visited.insert(file.file_id());
            let result = self.reconciler.absorb(file)?;
            self.record(result, &mut reports, &mut summary)?;
        }
        self.retry_stored(&visited, &mut reports, &mut summary)?;

        reports.finish().map_err(PipelineError::Report)?;
        Ok(summary)
    }

    /// Merge a retransmission into the stored partial records.
    pub fn combine_retransmission<P: AsRef<Path>>(
        &mut self,
        path: P,
    ) -> Result<RunSummary, PipelineError> {
        let path = path.as_ref();
        let mut reports = ReportLogs::open(&self.report_dir).map_err(PipelineError::Report)?;
        let capture = self.frame_input(path, &mut reports)?;

        tracing::info!(
            "Framed retransmission {}: {} packets, {} dropped",
            path.display(),
            capture.packets.len(),
            capture.dropped_count()
        );

        let mut summary = RunSummary::new(path, RunMode::Combine, capture.stats);
        let mut visited = BTreeSet::new();
        for (file_id, packets) in group_by_file(capture.packets) {
            visited.insert(file_id);
            let result = self.reconciler.reconcile(file_id, packets)?;
            self.record(result, &mut reports, &mut summary)?;
        }
        self.retry_stored(&visited, &mut reports, &mut summary)?;

        reports.finish().map_err(PipelineError::Report)?;
        Ok(summary)
    }

    fn frame_input(
        &self,
        path: &Path,
        reports: &mut ReportLogs,
    ) -> Result<FramedCapture, PipelineError> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(source) => {
                tracing::warn!("Cannot read {}: {}", path.display(), source);
                reports
                    .pending
                    .append(&ReportRow::error(input_name(path)))
                    .map_err(PipelineError::Report)?;
                return Err(PipelineError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let capture = self.framer.frame(&raw);
        if capture.is_empty() {
            tracing::warn!(
                "No packets in {} ({} bytes, {} chunks dropped)",
                path.display(),
                raw.len(),
                capture.dropped_count()
            );
            reports
                .pending
                .append(&ReportRow::error(input_name(path)))
                .map_err(PipelineError::Report)?;
            return Err(PipelineError::Unparseable {
                path: path.to_path_buf(),
                dropped: capture.dropped_count(),
            });
        }

        Ok(capture)
    }

    /// Settle stored records outside `visited` that are already complete.
    fn retry_stored(
        &mut self,
        visited: &BTreeSet<FileId>,
        reports: &mut ReportLogs,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let stored = self.reconciler.store().list()?;
        for file_id in stored {
            if visited.contains(&file_id) {
                continue;
            }
            match self.reconciler.retry_stored(file_id) {
                Ok(Some(result)) => self.record(result, reports, summary)?,
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping stored record {}: {}", file_id, e),
            }
        }
        Ok(())
    }

    fn record(
        &self,
        result: Reconciliation,
        reports: &mut ReportLogs,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let file_id = result.file.file_id();
        let kind = result.file.kind();

        let request = match result.outcome {
            ReconcileOutcome::Completed { .. } => {
                reports
                    .complete
                    .append(&ReportRow::ok(file_id))
                    .map_err(PipelineError::Report)?;
                RetransmissionRequest::Nothing
            }
            ReconcileOutcome::Pending => {
                let request = self.planner.plan(&result.report);
                let rows =
                    ReportRow::for_request(file_id, kind, &request, result.report.missing_rate);
                reports
                    .pending
                    .append_all(&rows)
                    .map_err(PipelineError::Report)?;
                request
            }
            ReconcileOutcome::EmitFailed { .. } => RetransmissionRequest::Nothing,
        };

        summary.files.push(FileOutcome {
            file_id,
            kind,
            outcome: result.outcome,
            missing_rate: result.report.missing_rate,
            universe: result.report.universe,
            missing_ranges: result.report.missing_ranges,
            request,
            accepted: result.accepted,
            duplicates: result.duplicates,
            rejected: result.rejected,
        });
        Ok(())
    }
}

/// Report name of an input: its file name, or the whole path.
fn input_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Group packets by file id, keeping arrival order within each group.
fn group_by_file(packets: Vec<Packet>) -> BTreeMap<FileId, Vec<Packet>> {
    let mut groups: BTreeMap<FileId, Vec<Packet>> = BTreeMap::new();
    for packet in packets {
        groups.entry(packet.file_id).or_default().push(packet);
    }
    groups
}

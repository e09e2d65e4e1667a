// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gap analysis for logical files.
//!
//! Computes the missing sequences of a file against a packet universe
//! `1..=reference_total` and collapses them into inclusive ranges.
//!
//! # Universe Bound
//!
//! 1. Expected packets = `ceil(total_declared_length / payload_size)`
//! 2. Plausible maximum = largest observed sequence not above the ceiling
//! 3. Bound = expected packets if `>=` plausible maximum, else plausible maximum
//!
//! The second branch keeps a fully absent trailing segment visible when the
//! declared length under-reports the file.

use crate::index::LogicalFile;
use crate::packet::MAX_DATA_SIZE;
use serde::Serialize;
use std::fmt;

/// Sequence used for the sentinel range of a fully missing file.
pub const SENTINEL_SEQUENCE: u32 = u32::MAX;

/// Inclusive range of sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SeqRange {
    pub start: u32,
    pub end: u32,
}

impl SeqRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn single(seq: u32) -> Self {
        Self::new(seq, seq)
    }

    pub fn len(&self) -> u32 {
        self.end - self.start + 1
    }

    pub fn contains(&self, seq: u32) -> bool {
        self.start <= seq && seq <= self.end
    }
}

impl fmt::Display for SeqRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Missing ranges and missing rate of one logical file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapReport {
    /// Ascending, disjoint, non-adjacent inclusive ranges.
    pub missing_ranges: Vec<SeqRange>,
    /// Percentage of the universe that is missing, in `[0, 100]`.
    pub missing_rate: f64,
    /// Upper bound of the universe `1..=universe`.
    pub universe: u32,
    /// Number of missing sequences.
    pub missing_count: u32,
    /// No usable packet was available.
    pub fully_missing: bool,
}

impl GapReport {
    /// Report for a file with no usable packets.
    pub fn fully_missing() -> Self {
        Self {
            missing_ranges: vec![SeqRange::single(SENTINEL_SEQUENCE)],
            missing_rate: 100.0,
            universe: 0,
            missing_count: 0,
            fully_missing: true,
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.fully_missing && self.missing_ranges.is_empty()
    }

    /// True if `seq` is a gap this report asks for.
    ///
    /// A fully missing report accepts any sequence.
    pub fn wants(&self, seq: u32) -> bool {
        if self.fully_missing {
            return true;
        }
        // ranges are sorted and disjoint
        let idx = self.missing_ranges.partition_point(|r| r.end < seq);
        self.missing_ranges
            .get(idx)
            .map(|r| r.contains(seq))
            .unwrap_or(false)
    }
}

/// Gap analysis settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapPolicy {
    /// Payload bytes per packet, used to turn the declared length into a count.
    pub payload_size: usize,
    /// Sequences above this value are treated as corrupted.
    pub sequence_ceiling: u32,
}

impl Default for GapPolicy {
    fn default() -> Self {
        Self {
            payload_size: MAX_DATA_SIZE,
            sequence_ceiling: 300_000,
        }
    }
}

/// Computes [`GapReport`]s.
#[derive(Debug, Clone, Default)]
pub struct GapAnalyzer {
    policy: GapPolicy,
}

impl GapAnalyzer {
    pub fn new(policy: GapPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &GapPolicy {
        &self.policy
    }

    /// Analyze `file` against its own reference total.
    pub fn analyze(&self, file: &LogicalFile) -> GapReport {
        if file.usable_count() == 0 {
            return GapReport::fully_missing();
        }
        let reference_total = self.reference_total(file);
        self.analyze_against(file, reference_total)
    }

    /// Packet count implied by the declared byte length.
    pub fn expected_packets(&self, file: &LogicalFile) -> u32 {
        let payload = self.policy.payload_size.max(1) as u64;
        let length = u64::from(file.total_declared_length());
        length.div_ceil(payload).min(u64::from(u32::MAX)) as u32
    }

    /// Largest observed sequence not above the sanity ceiling.
    pub fn plausible_max_sequence(&self, file: &LogicalFile) -> u32 {
        file.packets()
            .map(|p| p.sequence)
            .filter(|&seq| seq <= self.policy.sequence_ceiling)
            .max()
            .unwrap_or(0)
    }

    /// Upper bound of the universe used by [`analyze`](Self::analyze).
    pub fn reference_total(&self, file: &LogicalFile) -> u32 {
        let expected = self.expected_packets(file);
        let plausible = self.plausible_max_sequence(file);
        if expected >= plausible {
            expected
        } else {
            plausible
        }
    }

    /// Analyze `file` against the universe `1..=reference_total`.
    pub fn analyze_against(&self, file: &LogicalFile, reference_total: u32) -> GapReport {
        if reference_total == 0 {
            return GapReport::fully_missing();
        }

        let total = u64::from(reference_total);
        let mut ranges = Vec::new();
        let mut missing_count = 0u64;
        let mut next_expected = 1u64;

        for seq in file
            .good_sequences()
            .map(u64::from)
            .filter(|&seq| seq >= 1 && seq <= total)
        {
            if seq > next_expected {
                ranges.push(SeqRange::new(next_expected as u32, (seq - 1) as u32));
                missing_count += seq - next_expected;
            }
            next_expected = seq + 1;
        }

        if next_expected <= total {
            ranges.push(SeqRange::new(next_expected as u32, reference_total));
            missing_count += total - next_expected + 1;
        }

        let missing_rate = 100.0 * missing_count as f64 / total as f64;

        GapReport {
            missing_ranges: ranges,
            missing_rate,
            universe: reference_total,
            missing_count: missing_count as u32,
            fully_missing: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{FileId, Packet, PacketKind};

    const PAYLOAD: usize = 100;

    fn analyzer() -> GapAnalyzer {
        GapAnalyzer::new(GapPolicy {
            payload_size: PAYLOAD,
            sequence_ceiling: 1000,
        })
    }

    fn file(seqs: &[u32], declared_packets: u32) -> LogicalFile {
        let id = FileId::from_timestamp(1_700_000_000);
        let packets = seqs.iter().map(|&seq| Packet {
            sequence: seq,
            quality_flag: 0,
            kind: PacketKind::Binary,
            file_id: id,
            declared_length: declared_packets * PAYLOAD as u32,
            payload: vec![0; PAYLOAD],
        });
        LogicalFile::from_parts(id, PacketKind::Binary, declared_packets * PAYLOAD as u32, packets)
    }

    #[test]
    fn test_complete_file() {
        let seqs: Vec<u32> = (1..=10).collect();
        let report = analyzer().analyze(&file(&seqs, 10));

        assert!(report.is_complete());
        assert_eq!(report.missing_rate, 0.0);
        assert_eq!(report.universe, 10);
    }

    #[test]
    fn test_single_gap() {
        let seqs: Vec<u32> = (1..=10).filter(|&s| s != 5).collect();
        let report = analyzer().analyze(&file(&seqs, 10));

        assert_eq!(report.missing_ranges, vec![SeqRange::single(5)]);
        assert!((report.missing_rate - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_ranges_are_maximal() {
        let report = analyzer().analyze(&file(&[1, 4, 5, 9], 10));

        assert_eq!(
            report.missing_ranges,
            vec![
                SeqRange::new(2, 3),
                SeqRange::new(6, 8),
                SeqRange::new(10, 10)
            ]
        );
        let flattened: u32 = report.missing_ranges.iter().map(|r| r.len()).sum();
        assert_eq!(flattened, report.missing_count);
        assert_eq!(report.missing_count, 6);
        for pair in report.missing_ranges.windows(2) {
            assert!(pair[0].end + 1 < pair[1].start);
        }
    }

    #[test]
    fn test_trailing_segment_beyond_declared_length() {
        // declared covers 5 packets, but sequence 8 was observed
        let report = analyzer().analyze(&file(&[1, 2, 3, 8], 5));

        assert_eq!(report.universe, 8);
        assert_eq!(report.missing_ranges, vec![SeqRange::new(4, 7)]);
    }

    #[test]
    fn test_missing_tail_detected_from_declared_length() {
        let report = analyzer().analyze(&file(&[1, 2, 3], 6));
        assert_eq!(report.missing_ranges, vec![SeqRange::new(4, 6)]);
        assert!((report.missing_rate - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_corrupted_huge_sequence_ignored() {
        let report = analyzer().analyze(&file(&[1, 2, 3, 4, 900_000], 2));
        assert_eq!(report.universe, 4);
        assert!(report.is_complete());
    }

    #[test]
    fn test_flagged_packets_count_as_missing() {
        let good = file(&[1, 2, 3], 3);
        let packets = good.packets().cloned().map(|mut p| {
            if p.sequence == 2 {
                p.quality_flag = 1;
            }
            p
        });
        let flagged = LogicalFile::from_parts(
            good.file_id(),
            PacketKind::Binary,
            good.total_declared_length(),
            packets.collect::<Vec<_>>(),
        );

        let report = analyzer().analyze(&flagged);
        assert_eq!(report.missing_ranges, vec![SeqRange::single(2)]);
    }

    #[test]
    fn test_no_usable_packets() {
        let id = FileId::from_timestamp(1_700_000_000);
        let report = analyzer().analyze(&LogicalFile::new(id));

        assert!(report.fully_missing);
        assert!(!report.is_complete());
        assert_eq!(report.missing_rate, 100.0);
        assert_eq!(
            report.missing_ranges,
            vec![SeqRange::single(SENTINEL_SEQUENCE)]
        );
    }

    #[test]
    fn test_analyze_against_explicit_total() {
        let report = analyzer().analyze_against(&file(&[1, 2], 2), 4);
        assert_eq!(report.missing_ranges, vec![SeqRange::new(3, 4)]);
        assert!((report.missing_rate - 50.0).abs() < 1e-9);

        let empty = analyzer().analyze_against(&file(&[1, 2], 2), 0);
        assert!(empty.fully_missing);
    }

    #[test]
    fn test_wants() {
        let report = analyzer().analyze(&file(&[1, 4, 5, 9], 10));
        assert!(report.wants(2));
        assert!(report.wants(10));
        assert!(!report.wants(4));
        assert!(!report.wants(11));
        assert!(GapReport::fully_missing().wants(42));
    }

    #[test]
    fn test_expected_packets_rounds_up() {
        let f = LogicalFile::from_parts(
            FileId::from_timestamp(1),
            PacketKind::Text,
            250,
            Vec::new(),
        );
        assert_eq!(analyzer().expected_packets(&f), 3);
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Retransmission planning.
//!
//! Turns a [`GapReport`] into the set of ranges to request from the satellite.
//! A command carries a bounded number of ranges, so nearby gaps are merged
//! until the plan fits.

use crate::gap::{GapReport, SeqRange, SENTINEL_SEQUENCE};
use serde::Serialize;

/// What to ask the satellite for.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum RetransmissionRequest {
    /// The file is complete.
    Nothing,
    /// Resend these inclusive ranges.
    Ranges { ranges: Vec<SeqRange> },
    /// Resend sequences `1..=end`. `end` is the sentinel for a fully missing file.
    WholeFile { end: u32 },
}

impl RetransmissionRequest {
    pub fn is_nothing(&self) -> bool {
        matches!(self, Self::Nothing)
    }
}

/// Planning policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetransmissionPlanner {
    /// Missing rate (percent) at or above which the whole file is requested.
    pub tolerance: f64,
    /// Maximum number of ranges in one request.
    pub max_ranges: usize,
}

impl Default for RetransmissionPlanner {
    fn default() -> Self {
        Self {
            tolerance: 50.0,
            max_ranges: 5,
        }
    }
}

impl RetransmissionPlanner {
    pub fn new(tolerance: f64, max_ranges: usize) -> Self {
        Self {
            tolerance,
            max_ranges: max_ranges.max(1),
        }
    }

    pub fn plan(&self, report: &GapReport) -> RetransmissionRequest {
        if report.fully_missing {
            let end = report
                .missing_ranges
                .first()
                .map(|r| r.end)
                .unwrap_or(SENTINEL_SEQUENCE);
            return RetransmissionRequest::WholeFile { end };
        }
        if report.is_complete() {
            return RetransmissionRequest::Nothing;
        }
        if report.missing_rate >= self.tolerance {
            return RetransmissionRequest::WholeFile {
                end: report.universe,
            };
        }

        RetransmissionRequest::Ranges {
            ranges: coalesce(&report.missing_ranges, self.max_ranges),
        }
    }
}

/// Merge ranges until at most `max_ranges` remain.
///
/// Each step joins the adjacent pair with the smallest hole between them,
/// taking the first such pair on ties.
pub fn coalesce(ranges: &[SeqRange], max_ranges: usize) -> Vec<SeqRange> {
    let max_ranges = max_ranges.max(1);
    let mut out = ranges.to_vec();

    while out.len() > max_ranges {
        let Some(idx) = (0..out.len() - 1)
            .min_by_key(|&i| out[i + 1].start.saturating_sub(out[i].end))
        else {
            break;
        };
        out[idx].end = out[idx].end.max(out[idx + 1].end);
        out.remove(idx + 1);
    }

    out
}

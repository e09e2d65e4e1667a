// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Downlink Reassembly Pipeline
//!
//! Turns raw satellite downlink captures into mission files:
//! - Frame packets out of receiver captures (sync marker + fixed headers)
//! - Group them into logical files and track missing sequences
//! - Keep incomplete files as partial records until retransmissions fill them
//!
//! # Quick Start
//!
//! ```bash
//! # First pass over a capture
//! downlink-check capture_20240115.bin
//!
//! # Merge a retransmission requested from un_gen.csv
//! downlink-combine retrans_20240116.bin --config downlink.toml
//! ```
//!
//! # Data Flow
//!
//! | Stage | Complete file | Incomplete file |
//! |-------|---------------|-----------------|
//! | check | emitted, `OK` row | partial record + request rows |
//! | combine | emitted, record deleted | record rewritten + request rows |

pub mod config;
pub mod emit;
pub mod format;
pub mod framer;
pub mod gap;
pub mod index;
pub mod packet;
pub mod pipeline;
pub mod reconcile;
pub mod report;
pub mod request;
pub mod store;

pub use config::{ConfigError, PipelineConfig};
pub use emit::{assemble, CompletionEmitter, DirectoryMaterializer, MaterializeError, Materializer};
pub use format::FormatError;
pub use framer::{encode_raw_packet, DropReason, FrameLayout, FrameStats, FramedCapture, Framer};
pub use gap::{GapAnalyzer, GapPolicy, GapReport, SeqRange};
pub use index::{LengthPolicy, LogicalFile, ReassemblyIndex};
pub use packet::{FileId, Packet, PacketKind};
pub use pipeline::{FileOutcome, Pipeline, PipelineError, RunMode, RunSummary};
pub use reconcile::{ReconcileOutcome, Reconciler, Reconciliation};
pub use report::{ReportLog, ReportLogs, ReportRow};
pub use request::{RetransmissionPlanner, RetransmissionRequest};
pub use store::{DirStore, PartialStore, StoreError};

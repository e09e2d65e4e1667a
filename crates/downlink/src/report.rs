// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CSV report logs.
//!
//! Two append-only logs live in the report directory:
//!
//! - `un_gen.csv`: missing ranges, whole-file requests and errors
//! - `final_check.csv`: completed files
//!
//! Each log is opened once per run and flushed on [`ReportLog::finish`] or drop.

use crate::gap::SENTINEL_SEQUENCE;
use crate::packet::{FileId, PacketKind};
use crate::request::RetransmissionRequest;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const REPORT_HEADER: &str =
    "Filename,Type,Start_Packet_number,End_Packet_number,Incompleteness";

pub const PENDING_LOG: &str = "un_gen.csv";
pub const FINAL_LOG: &str = "final_check.csv";

/// Sentinel packet number of an error row.
const ERROR_SENTINEL: u32 = 65535;

/// One report line.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportRow {
    Missing {
        file_id: FileId,
        kind: PacketKind,
        start: u32,
        end: u32,
        rate: f64,
    },
    WholeFile {
        file_id: FileId,
        kind: PacketKind,
        end: u32,
        rate: f64,
    },
    Complete {
        file_id: FileId,
    },
    Error {
        name: String,
    },
}

impl ReportRow {
    pub fn ok(file_id: FileId) -> Self {
        Self::Complete { file_id }
    }

    pub fn error(name: impl Into<String>) -> Self {
        Self::Error { name: name.into() }
    }

    /// Rows describing a retransmission request. `Nothing` yields none.
    pub fn for_request(
        file_id: FileId,
        kind: PacketKind,
        request: &RetransmissionRequest,
        rate: f64,
    ) -> Vec<Self> {
        match request {
            RetransmissionRequest::Nothing => Vec::new(),
            RetransmissionRequest::WholeFile { end } if *end == SENTINEL_SEQUENCE => {
                vec![Self::error(file_id.to_string())]
            }
            RetransmissionRequest::WholeFile { end } => vec![Self::WholeFile {
                file_id,
                kind,
                end: *end,
                rate,
            }],
            RetransmissionRequest::Ranges { ranges } => ranges
                .iter()
                .map(|r| Self::Missing {
                    file_id,
                    kind,
                    start: r.start,
                    end: r.end,
                    rate,
                })
                .collect(),
        }
    }
}

impl fmt::Display for ReportRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing {
                file_id,
                kind,
                start,
                end,
                rate,
            } => write!(f, "{},{},{},{},{:.2}", file_id, kind, start, end, rate),
            Self::WholeFile {
                file_id,
                kind,
                end,
                rate,
            } => write!(f, "{},{},1,{},{:.2}", file_id, kind, end, rate),
            Self::Complete { file_id } => write!(f, "{},OK,0,0,0", file_id),
            Self::Error { name } => write!(
                f,
                "{},Error,{},{},100",
                name, ERROR_SENTINEL, ERROR_SENTINEL
            ),
        }
    }
}

/// Buffered append-only CSV log.
#[derive(Debug)]
pub struct ReportLog {
    path: PathBuf,
    writer: BufWriter<File>,
    rows: u32,
}

impl ReportLog {
    /// Open `path` for appending, writing the header if the file is new or empty.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let needs_header = file.metadata()?.len() == 0;
        let mut writer = BufWriter::new(file);
        if needs_header {
            writeln!(writer, "{}", REPORT_HEADER)?;
        }

        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows appended since open.
    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn append(&mut self, row: &ReportRow) -> io::Result<()> {
        writeln!(self.writer, "{}", row)?;
        self.rows += 1;
        Ok(())
    }

    pub fn append_all<'a>(&mut self, rows: impl IntoIterator<Item = &'a ReportRow>) -> io::Result<()> {
        for row in rows {
            self.append(row)?;
        }
        Ok(())
    }

    /// Flush buffered rows.
    pub fn finish(mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Drop for ReportLog {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            tracing::warn!("Failed to flush report {}: {}", self.path.display(), e);
        }
    }
}

/// The pending and final logs of one run.
#[derive(Debug)]
pub struct ReportLogs {
    pub pending: ReportLog,
    pub complete: ReportLog,
}

impl ReportLogs {
    pub fn open<P: AsRef<Path>>(report_dir: P) -> io::Result<Self> {
        let dir = report_dir.as_ref();
        Ok(Self {
            pending: ReportLog::open(dir.join(PENDING_LOG))?,
            complete: ReportLog::open(dir.join(FINAL_LOG))?,
        })
    }

    pub fn finish(self) -> io::Result<()> {
        self.pending.finish()?;
        self.complete.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gap::SeqRange;
    use tempfile::tempdir;

    fn id() -> FileId {
        FileId::from_timestamp(1_705_329_022)
    }

    #[test]
    fn test_row_formats() {
        let missing = ReportRow::Missing {
            file_id: id(),
            kind: PacketKind::Image,
            start: 5,
            end: 7,
            rate: 10.0 / 3.0,
        };
        assert_eq!(missing.to_string(), "20240115143022,JPG,5,7,3.33");
        assert_eq!(ReportRow::ok(id()).to_string(), "20240115143022,OK,0,0,0");
        assert_eq!(
            ReportRow::error("capture.bin").to_string(),
            "capture.bin,Error,65535,65535,100"
        );
        let whole = ReportRow::WholeFile {
            file_id: id(),
            kind: PacketKind::Text,
            end: 40,
            rate: 62.5,
        };
        assert_eq!(whole.to_string(), "20240115143022,TXT,1,40,62.50");
    }

    #[test]
    fn test_rows_for_request() {
        let ranges = RetransmissionRequest::Ranges {
            ranges: vec![SeqRange::single(5), SeqRange::new(8, 9)],
        };
        let rows = ReportRow::for_request(id(), PacketKind::Log, &ranges, 30.0);
        assert_eq!(rows.len(), 2);

        let sentinel = RetransmissionRequest::WholeFile {
            end: SENTINEL_SEQUENCE,
        };
        assert_eq!(
            ReportRow::for_request(id(), PacketKind::Unknown, &sentinel, 100.0),
            vec![ReportRow::error("20240115143022")]
        );
        assert!(
            ReportRow::for_request(id(), PacketKind::Log, &RetransmissionRequest::Nothing, 0.0)
                .is_empty()
        );
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("reports").join(PENDING_LOG);

        let mut log = ReportLog::open(&path).expect("open");
        log.append(&ReportRow::ok(id())).expect("append");
        log.finish().expect("finish");

        let mut log = ReportLog::open(&path).expect("reopen");
        log.append(&ReportRow::error("x")).expect("append");
        drop(log);

        let content = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                REPORT_HEADER,
                "20240115143022,OK,0,0,0",
                "x,Error,65535,65535,100"
            ]
        );
    }

    #[test]
    fn test_empty_existing_file_gets_header() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(FINAL_LOG);
        std::fs::write(&path, b"").expect("write");

        ReportLog::open(&path).expect("open").finish().expect("finish");
        assert_eq!(
            std::fs::read_to_string(&path).expect("read"),
            format!("{}\n", REPORT_HEADER)
        );
    }
}

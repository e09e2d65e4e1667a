// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Downlink packet model and protocol constants.
//!
//! # Transmitter Packet Layout
//!
//! ```text
//! +---------------------------------------------------------+
//! | frame type marker (2) | sequence (3, BE) | reserved (1)  |
//! +---------------------------------------------------------+
//! | secondary header (22)                                    |
//! |  reserved (2) | callsign (7) | uid timestamp (4, BE)     |
//! |  pad (3) | type code (1) | declared length (4, BE)       |
//! |  packet type indicator (1)                               |
//! +---------------------------------------------------------+
//! | payload (MAX_DATA_SIZE)                                  |
//! +---------------------------------------------------------+
//! ```

use chrono::{DateTime, NaiveDateTime};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Sync marker delimiting packets in captures and partial records.
pub const SYNC_MARKER: [u8; 4] = [0x1A, 0xCF, 0xFC, 0x1D];

/// Frame type marker (VCDU header) every accepted packet starts with.
pub const FRAME_TYPE_MARKER: [u8; 2] = [0x55, 0x40];

/// Bytes the optical receiver prepends to each packet.
pub const TRANSPORT_HEADER_LEN: usize = 28;

/// Bytes the optical receiver appends to each packet.
pub const TRANSPORT_TRAILER_LEN: usize = 160;

/// Secondary header length.
pub const SECONDARY_HEADER_LEN: usize = 22;

/// Transmitter header: marker (2) + sequence (3) + reserved (1) + secondary (22).
pub const TX_HEADER_LEN: usize = 2 + 3 + 1 + SECONDARY_HEADER_LEN;

/// Payload bytes carried by each packet.
pub const MAX_DATA_SIZE: usize = 1087;

/// Offset of the quality flag within the chunk following a sync marker.
pub const QUALITY_FLAG_OFFSET: usize = 1;

/// Largest value a 3-byte sequence field can hold.
pub const MAX_SEQUENCE: u32 = 0x00FF_FFFF;

const ID_FORMAT: &str = "%Y%m%d%H%M%S";

/// Declared data type of a logical file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum PacketKind {
    Binary,
    Csv,
    Mixed,
    Text,
    Log,
    Image,
    Unknown,
}

/// Type code lookup. Codes missing here decode as `Unknown`.
const KIND_TABLE: [(u8, PacketKind); 6] = [
    (0x00, PacketKind::Binary),
    (0x01, PacketKind::Csv),
    (0x02, PacketKind::Mixed),
    (0x03, PacketKind::Text),
    (0x04, PacketKind::Log),
    (0x05, PacketKind::Image),
];

/// Code written for `Unknown` in partial records.
pub const UNKNOWN_KIND_CODE: u8 = 0xFF;

impl PacketKind {
    pub fn from_code(code: u8) -> Self {
        KIND_TABLE
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, kind)| *kind)
            .unwrap_or(PacketKind::Unknown)
    }

    pub fn code(self) -> u8 {
        KIND_TABLE
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(c, _)| *c)
            .unwrap_or(UNKNOWN_KIND_CODE)
    }

    /// Label used in report rows.
    pub fn label(self) -> &'static str {
        match self {
            PacketKind::Binary => "BIN",
            PacketKind::Csv => "CSV",
            PacketKind::Mixed => "MIX",
            PacketKind::Text => "TXT",
            PacketKind::Log => "LOG",
            PacketKind::Image => "JPG",
            PacketKind::Unknown => "UNKNOWN",
        }
    }

    /// File extension of the materialized output.
    pub fn extension(self) -> &'static str {
        match self {
            PacketKind::Binary => "bin",
            PacketKind::Csv => "csv",
            PacketKind::Mixed => "mix",
            PacketKind::Text => "txt",
            PacketKind::Log => "log",
            PacketKind::Image => "jpg",
            PacketKind::Unknown => "dat",
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identity of a logical file.
///
/// Built from the 4-byte uid timestamp carried in the secondary header.
/// Equality and ordering follow the canonical bytes; `Display` renders the
/// timestamp as `YYYYMMDDhhmmss` (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId([u8; 4]);

impl FileId {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub fn from_timestamp(secs: u32) -> Self {
        Self(secs.to_be_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Unix timestamp (seconds) encoded in the id.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::from_timestamp(i64::from(self.timestamp()), 0) {
            Some(dt) => write!(f, "{}", dt.format(ID_FORMAT)),
            None => write!(f, "{:08x}", self.timestamp()),
        }
    }
}

/// Error parsing a [`FileId`] from its display form.
#[derive(Debug, Error)]
#[error("invalid file id {0:?} (expected YYYYMMDDhhmmss)")]
pub struct ParseFileIdError(String);

impl FromStr for FileId {
    type Err = ParseFileIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = NaiveDateTime::parse_from_str(s, ID_FORMAT)
            .map_err(|_| ParseFileIdError(s.to_string()))?;
        let secs = u32::try_from(dt.and_utc().timestamp())
            .map_err(|_| ParseFileIdError(s.to_string()))?;
        Ok(Self::from_timestamp(secs))
    }
}

impl Serialize for FileId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One decoded downlink packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Sequence count within the logical file.
    pub sequence: u32,
    /// Data quality flag (0 = good).
    pub quality_flag: u8,
    /// Declared data type.
    pub kind: PacketKind,
    /// Logical file this packet belongs to.
    pub file_id: FileId,
    /// Total payload length of the logical file, in bytes.
    pub declared_length: u32,
    /// Payload slot.
    pub payload: Vec<u8>,
}

impl Packet {
    /// True if the origin flagged no defect.
    pub fn is_good(&self) -> bool {
        self.quality_flag == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_table_lookup() {
        assert_eq!(PacketKind::from_code(0x03), PacketKind::Text);
        assert_eq!(PacketKind::from_code(0x05), PacketKind::Image);
        assert_eq!(PacketKind::from_code(0x06), PacketKind::Unknown);
        assert_eq!(PacketKind::from_code(0xFF), PacketKind::Unknown);
        assert_eq!(PacketKind::Csv.code(), 0x01);
        assert_eq!(PacketKind::Unknown.code(), UNKNOWN_KIND_CODE);
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(PacketKind::Log.label(), "LOG");
        assert_eq!(PacketKind::Image.extension(), "jpg");
        assert_eq!(PacketKind::Unknown.to_string(), "UNKNOWN");
    }

    #[test]
    fn test_file_id_display_roundtrip() {
        // 2024-01-15 14:30:22 UTC
        let id = FileId::from_timestamp(1_705_329_022);
        assert_eq!(id.to_string(), "20240115143022");

        let parsed: FileId = "20240115143022".parse().expect("parse");
        assert_eq!(parsed, id);
        assert_eq!(parsed.as_bytes(), &1_705_329_022u32.to_be_bytes());
    }

    #[test]
    fn test_file_id_rejects_garbage() {
        assert!("not-a-date".parse::<FileId>().is_err());
        assert!("2024".parse::<FileId>().is_err());
    }

    #[test]
    fn test_tx_header_len() {
        assert_eq!(TX_HEADER_LEN, 28);
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Partial-file record format (`tmp_<file_id>.bin`)
//!
//! # Format Overview
//!
//! ```text
//! +---------------------------------------------------------+
//! |                 Record Header (25 bytes)                 |
//! |  Magic (8) | Version (4) | FileId (4) | Kind (1)         |
//! |  DeclaredLength (4) | EntryCount (4)                     |
//! +---------------------------------------------------------+
//! |                 Entry 0                                  |
//! |  SYNC (4) | FileId (4) | Seq (3) | Type (1)              |
//! |  DeclaredLength (4) | Quality (1) | PayloadLen (2)       |
//! |  Payload (var)                                           |
//! +---------------------------------------------------------+
//! |                 Entry 1 ...                              |
//! +---------------------------------------------------------+
//! ```
//!
//! All integers are big-endian. Entries are walked sequentially; a damaged or
//! truncated entry is skipped by rescanning for the next sync marker.

use crate::framer::find_marker;
use crate::index::LogicalFile;
use crate::packet::{FileId, Packet, PacketKind, MAX_SEQUENCE, SYNC_MARKER};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Magic bytes: "DLPART\0\0"
pub const MAGIC: [u8; 8] = [0x44, 0x4C, 0x50, 0x41, 0x52, 0x54, 0x00, 0x00];

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Partial record errors.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid record format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },

    #[error("Payload of sequence {sequence} is {len} bytes (max {max})")]
    PayloadTooLarge { sequence: u32, len: usize, max: usize },

    #[error("Sequence {0} does not fit in 24 bits")]
    SequenceOverflow(u32),
}

/// Record header (25 bytes, fixed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub magic: [u8; 8],
    pub version: u32,
    pub file_id: FileId,
    pub kind_code: u8,
    pub total_declared_length: u32,
    pub entry_count: u32,
}

impl RecordHeader {
    pub const SIZE: usize = 25;

    pub fn for_file(file: &LogicalFile) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            file_id: file.file_id(),
            kind_code: file.kind().code(),
            total_declared_length: file.total_declared_length(),
            entry_count: file.len() as u32,
        }
    }

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.magic)?;
        w.write_u32::<BigEndian>(self.version)?;
        w.write_all(self.file_id.as_bytes())?;
        w.write_u8(self.kind_code)?;
        w.write_u32::<BigEndian>(self.total_declared_length)?;
        w.write_u32::<BigEndian>(self.entry_count)?;
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self, FormatError> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;

        if magic != MAGIC {
            return Err(FormatError::InvalidFormat(
                "Invalid partial record magic".into(),
            ));
        }

        let version = r.read_u32::<BigEndian>()?;
        if version != FORMAT_VERSION {
            return Err(FormatError::VersionMismatch {
                expected: FORMAT_VERSION,
                got: version,
            });
        }

        let mut id = [0u8; 4];
        r.read_exact(&mut id)?;

        Ok(Self {
            magic,
            version,
            file_id: FileId::from_bytes(id),
            kind_code: r.read_u8()?,
            total_declared_length: r.read_u32::<BigEndian>()?,
            entry_count: r.read_u32::<BigEndian>()?,
        })
    }
}

/// Fixed part of an entry, sync marker included.
pub const ENTRY_HEADER_SIZE: usize = 4 + 4 + 3 + 1 + 4 + 1 + 2;

/// Decoded record plus the number of entries that had to be skipped.
#[derive(Debug, Clone)]
pub struct DecodedRecord {
    pub file: LogicalFile,
    pub skipped: u32,
    pub expected_entries: u32,
}

/// Encode `file` into a complete record.
pub fn encode_record(file: &LogicalFile) -> Result<Vec<u8>, FormatError> {
    let mut buf = Vec::with_capacity(
        RecordHeader::SIZE
            + file
                .packets()
                .map(|p| ENTRY_HEADER_SIZE + p.payload.len())
                .sum::<usize>(),
    );
    RecordHeader::for_file(file).write(&mut buf)?;
    for packet in file.packets() {
        write_entry(&mut buf, packet)?;
    }
    Ok(buf)
}

fn write_entry(buf: &mut Vec<u8>, packet: &Packet) -> Result<(), FormatError> {
    if packet.sequence > MAX_SEQUENCE {
        return Err(FormatError::SequenceOverflow(packet.sequence));
    }
    if packet.payload.len() > u16::MAX as usize {
        return Err(FormatError::PayloadTooLarge {
            sequence: packet.sequence,
            len: packet.payload.len(),
            max: u16::MAX as usize,
        });
    }

    buf.write_all(&SYNC_MARKER)?;
    buf.write_all(packet.file_id.as_bytes())?;
    buf.write_u24::<BigEndian>(packet.sequence)?;
    buf.write_u8(packet.kind.code())?;
    buf.write_u32::<BigEndian>(packet.declared_length)?;
    buf.write_u8(packet.quality_flag)?;
    buf.write_u16::<BigEndian>(packet.payload.len() as u16)?;
    buf.write_all(&packet.payload)?;
    Ok(())
}

/// Decode a record produced by [`encode_record`].
///
/// Only the header is mandatory; damaged entries are skipped and counted.
pub fn decode_record(data: &[u8]) -> Result<DecodedRecord, FormatError> {
    let mut cursor = data;
    let header = RecordHeader::read(&mut cursor)?;
    let body = &data[RecordHeader::SIZE..];

    // entry_count is untrusted; never reserve more than the body can hold
    let hint = (header.entry_count as usize).min(body.len() / ENTRY_HEADER_SIZE);
    let mut packets = Vec::with_capacity(hint);
    let mut skipped = 0u32;
    let mut pos = 0usize;

    while pos < body.len() {
        if !body[pos..].starts_with(&SYNC_MARKER) {
            skipped += 1;
            match find_marker(body, pos) {
                Some(next) => {
                    pos = next;
                    continue;
                }
                None => break,
            }
        }

        match read_entry(&body[pos..]) {
            Some((packet, consumed)) => {
                if packet.file_id == header.file_id {
                    packets.push(packet);
                } else {
                    tracing::warn!(
                        "Skipping entry for {} inside record of {}",
                        packet.file_id,
                        header.file_id
                    );
                    skipped += 1;
                }
                pos += consumed;
            }
            None => {
                // truncated: resume at the next marker past this one
                skipped += 1;
                match find_marker(body, pos + SYNC_MARKER.len()) {
                    Some(next) => pos = next,
                    None => break,
                }
            }
        }
    }

    let file = LogicalFile::from_parts(
        header.file_id,
        PacketKind::from_code(header.kind_code),
        header.total_declared_length,
        packets,
    );

    Ok(DecodedRecord {
        file,
        skipped,
        expected_entries: header.entry_count,
    })
}

fn read_entry(entry: &[u8]) -> Option<(Packet, usize)> {
    if entry.len() < ENTRY_HEADER_SIZE {
        return None;
    }

    let mut r = &entry[SYNC_MARKER.len()..ENTRY_HEADER_SIZE];
    let mut id = [0u8; 4];
    r.read_exact(&mut id).ok()?;
    let sequence = r.read_u24::<BigEndian>().ok()?;
    let kind = PacketKind::from_code(r.read_u8().ok()?);
    let declared_length = r.read_u32::<BigEndian>().ok()?;
    let quality_flag = r.read_u8().ok()?;
    let payload_len = r.read_u16::<BigEndian>().ok()? as usize;

    let end = ENTRY_HEADER_SIZE + payload_len;
    let payload = entry.get(ENTRY_HEADER_SIZE..end)?.to_vec();

    Some((
        Packet {
            sequence,
            quality_flag,
            kind,
            file_id: FileId::from_bytes(id),
            declared_length,
            payload,
        },
        end,
    ))
}

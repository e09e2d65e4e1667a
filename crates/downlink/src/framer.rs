// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packet framer for raw demodulated captures.
//!
//! # Capture Layout
//!
//! ```text
//! +---------------------------------------------------------+
//! | SYNC (4) | transport header (28, discarded)              |
//! | transmitter packet (28 header + payload)                 |
//! | transport trailer (160, discarded)                       |
//! +---------------------------------------------------------+
//! | SYNC (4) | ...                                           |
//! +---------------------------------------------------------+
//! ```
//!
//! Bytes before the first sync marker are ignored. A defective chunk is
//! dropped and counted in [`FrameStats`]; it never aborts the capture.

use crate::packet::{
    FileId, Packet, PacketKind, FRAME_TYPE_MARKER, MAX_DATA_SIZE, QUALITY_FLAG_OFFSET,
    SYNC_MARKER, TRANSPORT_HEADER_LEN, TRANSPORT_TRAILER_LEN, TX_HEADER_LEN,
};
use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

// Offsets within the transmitter packet.
const SEQUENCE_OFFSET: usize = 2;
const SECONDARY_OFFSET: usize = 6;

// Offsets within the secondary header.
const CALLSIGN_OFFSET: usize = 2;
const UID_OFFSET: usize = 9;
const TYPE_CODE_OFFSET: usize = 16;
const LENGTH_OFFSET: usize = 17;

/// Callsign stamped into synthetic packets.
const SYNTHETIC_CALLSIGN: &[u8; 7] = b"JG6YBW\0";

/// Receiver-specific framing sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameLayout {
    /// Bytes prepended by the receiver after each sync marker.
    pub transport_header_len: usize,
    /// Bytes appended by the receiver to each packet.
    pub transport_trailer_len: usize,
    /// Payload window following the transmitter header.
    pub payload_size: usize,
}

impl FrameLayout {
    /// Smallest chunk that still holds a complete transmitter header.
    pub fn min_chunk_len(&self) -> usize {
        self.transport_header_len + TX_HEADER_LEN + self.transport_trailer_len
    }
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self {
            transport_header_len: TRANSPORT_HEADER_LEN,
            transport_trailer_len: TRANSPORT_TRAILER_LEN,
            payload_size: MAX_DATA_SIZE,
        }
    }
}

/// Why a chunk was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Chunk shorter than transport framing plus transmitter header.
    Undersized,
    /// Frame type marker mismatch.
    BadFrameMarker,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::Undersized => "undersized",
            DropReason::BadFrameMarker => "bad_frame_marker",
        }
    }
}

/// Per-call framing tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    /// Chunks found after the first sync marker.
    pub chunks: u32,
    /// Packets decoded.
    pub accepted: u32,
    /// Chunks too short to parse.
    pub undersized: u32,
    /// Chunks with a bad frame type marker.
    pub bad_frame_marker: u32,
}

impl FrameStats {
    pub fn dropped(&self) -> u32 {
        self.undersized + self.bad_frame_marker
    }

    fn record(&mut self, outcome: &Result<Packet, DropReason>) {
        self.chunks += 1;
        match outcome {
            Ok(_) => self.accepted += 1,
            Err(DropReason::Undersized) => self.undersized += 1,
            Err(DropReason::BadFrameMarker) => self.bad_frame_marker += 1,
        }
    }
}

/// Result of framing one capture.
#[derive(Debug, Clone, Default)]
pub struct FramedCapture {
    pub packets: Vec<Packet>,
    pub stats: FrameStats,
}

impl FramedCapture {
    /// Number of chunks dropped as malformed.
    pub fn dropped_count(&self) -> u32 {
        self.stats.dropped()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

/// Splits captures into packets.
#[derive(Debug, Clone, Default)]
pub struct Framer {
    layout: FrameLayout,
}

impl Framer {
    pub fn new(layout: FrameLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// Lazily decode `raw`, yielding one outcome per chunk.
    pub fn packets<'a>(&'a self, raw: &'a [u8]) -> Packets<'a> {
        Packets {
            chunks: SyncChunks::new(raw),
            layout: &self.layout,
        }
    }

    /// Decode every packet in `raw` and tally the drops.
    pub fn frame(&self, raw: &[u8]) -> FramedCapture {
        let mut capture = FramedCapture::default();
        for outcome in self.packets(raw) {
            capture.stats.record(&outcome);
            match outcome {
                Ok(packet) => capture.packets.push(packet),
                Err(reason) => tracing::debug!("Dropped chunk: {}", reason.as_str()),
            }
        }
        capture
    }
}

/// Iterator over the packets of a capture.
pub struct Packets<'a> {
    chunks: SyncChunks<'a>,
    layout: &'a FrameLayout,
}

impl Iterator for Packets<'_> {
    type Item = Result<Packet, DropReason>;

    fn next(&mut self) -> Option<Self::Item> {
        self.chunks
            .next()
            .map(|chunk| parse_chunk(self.layout, chunk))
    }
}

fn parse_chunk(layout: &FrameLayout, chunk: &[u8]) -> Result<Packet, DropReason> {
    if chunk.len() < layout.min_chunk_len() {
        return Err(DropReason::Undersized);
    }

    let quality_flag = chunk[QUALITY_FLAG_OFFSET];
    let tx = &chunk[layout.transport_header_len..chunk.len() - layout.transport_trailer_len];

    if tx[..2] != FRAME_TYPE_MARKER {
        return Err(DropReason::BadFrameMarker);
    }

    let sequence = BigEndian::read_u24(&tx[SEQUENCE_OFFSET..SEQUENCE_OFFSET + 3]);
    let secondary = &tx[SECONDARY_OFFSET..TX_HEADER_LEN];

    let mut uid = [0u8; 4];
    uid.copy_from_slice(&secondary[UID_OFFSET..UID_OFFSET + 4]);
    let kind = PacketKind::from_code(secondary[TYPE_CODE_OFFSET]);
    let declared_length = BigEndian::read_u32(&secondary[LENGTH_OFFSET..LENGTH_OFFSET + 4]);

    let payload_end = tx.len().min(TX_HEADER_LEN + layout.payload_size);
    let payload = tx[TX_HEADER_LEN..payload_end].to_vec();

    Ok(Packet {
        sequence,
        quality_flag,
        kind,
        file_id: FileId::from_bytes(uid),
        declared_length,
        payload,
    })
}

/// Encode a packet the way the receiver writes it, sync marker included.
///
/// Used to build synthetic captures and retransmissions. The payload is
/// zero-padded (or cut) to the layout's payload window.
pub fn encode_raw_packet(packet: &Packet, layout: &FrameLayout) -> Vec<u8> {
    let mut out = Vec::with_capacity(SYNC_MARKER.len() + layout.min_chunk_len() + layout.payload_size);
    out.extend_from_slice(&SYNC_MARKER);

    let mut transport_header = vec![0u8; layout.transport_header_len];
    if let Some(slot) = transport_header.get_mut(QUALITY_FLAG_OFFSET) {
        *slot = packet.quality_flag;
    }
    out.extend_from_slice(&transport_header);

    out.extend_from_slice(&FRAME_TYPE_MARKER);
    out.extend_from_slice(&packet.sequence.to_be_bytes()[1..]);
    out.push(0);

    let mut secondary = [0u8; TX_HEADER_LEN - SECONDARY_OFFSET];
    secondary[CALLSIGN_OFFSET..CALLSIGN_OFFSET + 7].copy_from_slice(SYNTHETIC_CALLSIGN);
    secondary[UID_OFFSET..UID_OFFSET + 4].copy_from_slice(packet.file_id.as_bytes());
    secondary[TYPE_CODE_OFFSET] = packet.kind.code();
    secondary[LENGTH_OFFSET..LENGTH_OFFSET + 4].copy_from_slice(&packet.declared_length.to_be_bytes());
    out.extend_from_slice(&secondary);

    let mut payload = packet.payload.clone();
    payload.resize(layout.payload_size, 0);
    out.extend_from_slice(&payload);

    out.extend(std::iter::repeat(0u8).take(layout.transport_trailer_len));
    out
}

/// Splits a byte stream on [`SYNC_MARKER`], skipping anything before the first one.
pub struct SyncChunks<'a> {
    data: &'a [u8],
    next_start: Option<usize>,
}

impl<'a> SyncChunks<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let next_start = find_marker(data, 0).map(|pos| pos + SYNC_MARKER.len());
        Self { data, next_start }
    }
}

impl<'a> Iterator for SyncChunks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next_start?;
        match find_marker(self.data, start) {
            Some(end) => {
                self.next_start = Some(end + SYNC_MARKER.len());
                Some(&self.data[start..end])
            }
            None => {
                self.next_start = None;
                Some(&self.data[start..])
            }
        }
    }
}

/// Position of the first sync marker at or after `from`.
pub(crate) fn find_marker(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(SYNC_MARKER.len())
        .position(|w| w == SYNC_MARKER)
        .map(|pos| pos + from)
}

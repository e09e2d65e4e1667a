// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reassembly index: groups packets into logical files.

use crate::packet::{FileId, Packet, PacketKind};
use std::collections::{BTreeMap, HashMap};

/// Outcome of offering a packet to a [`LogicalFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// First packet seen at this sequence.
    Inserted,
    /// Replaced the packet previously held at this sequence.
    Replaced,
    /// Discarded in favour of the good packet already held.
    Kept,
}

/// One reassembly unit, keyed by [`FileId`].
///
/// Holds at most one packet per sequence. A good packet (`quality_flag == 0`)
/// is never displaced by a flagged one; otherwise the later arrival wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalFile {
    file_id: FileId,
    packets: BTreeMap<u32, Packet>,
    kind: PacketKind,
    total_declared_length: u32,
}

impl LogicalFile {
    pub fn new(file_id: FileId) -> Self {
        Self {
            file_id,
            packets: BTreeMap::new(),
            kind: PacketKind::Unknown,
            total_declared_length: 0,
        }
    }

    /// Rebuild a file from stored parts without re-running the votes.
    pub fn from_parts(
        file_id: FileId,
        kind: PacketKind,
        total_declared_length: u32,
        packets: impl IntoIterator<Item = Packet>,
    ) -> Self {
        let mut file = Self::new(file_id);
        for packet in packets {
            file.insert(packet);
        }
        file.kind = kind;
        file.total_declared_length = total_declared_length;
        file
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    pub fn total_declared_length(&self) -> u32 {
        self.total_declared_length
    }

    pub fn packets(&self) -> impl Iterator<Item = &Packet> {
        self.packets.values()
    }

    pub fn get(&self, sequence: u32) -> Option<&Packet> {
        self.packets.get(&sequence)
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Sequences held by good packets, ascending.
    pub fn good_sequences(&self) -> impl Iterator<Item = u32> + '_ {
        self.packets
            .values()
            .filter(|p| p.is_good())
            .map(|p| p.sequence)
    }

    pub fn usable_count(&self) -> usize {
        self.packets.values().filter(|p| p.is_good()).count()
    }

    /// Offer a packet, applying the quality-first, last-arrival tie-break.
    ///
    /// Packets for another file id are ignored and reported as `Kept`.
    pub fn insert(&mut self, packet: Packet) -> InsertOutcome {
        if packet.file_id != self.file_id {
            return InsertOutcome::Kept;
        }

        match self.packets.get_mut(&packet.sequence) {
            None => {
                self.packets.insert(packet.sequence, packet);
                InsertOutcome::Inserted
            }
            Some(existing) => {
                if existing.is_good() && !packet.is_good() {
                    InsertOutcome::Kept
                } else {
                    *existing = packet;
                    InsertOutcome::Replaced
                }
            }
        }
    }

    /// Recompute `kind` and `total_declared_length` from the held packets.
    pub fn resolve(&mut self, policy: &LengthPolicy) {
        self.kind = vote_kind(self.packets.values());
        self.total_declared_length = self.vote_length(policy);
    }

    fn vote_length(&self, policy: &LengthPolicy) -> u32 {
        if self.packets.is_empty() {
            return 0;
        }

        let mut votes: HashMap<u32, usize> = HashMap::new();
        for packet in self.packets.values() {
            *votes.entry(packet.declared_length).or_default() += 1;
        }

        let total = self.packets.len();
        if let Some((&length, _)) = votes.iter().find(|&(_, &count)| count * 2 > total) {
            return length;
        }

        let contiguous = self.contiguous_payload_len();
        tracing::debug!(
            "No majority declared length for {} ({} distinct values), using {} bytes",
            self.file_id,
            votes.len(),
            contiguous.min(u64::from(policy.max_declared_length))
        );
        contiguous.min(u64::from(policy.max_declared_length)) as u32
    }

    /// Payload bytes in the unbroken run starting at the lowest sequence.
    fn contiguous_payload_len(&self) -> u64 {
        let mut total = 0u64;
        let mut expected: Option<u32> = None;
        for (&seq, packet) in &self.packets {
            if let Some(next) = expected {
                if seq != next {
                    break;
                }
            }
            total += packet.payload.len() as u64;
            expected = seq.checked_add(1);
            if expected.is_none() {
                break;
            }
        }
        total
    }
}

/// Plurality over packet kinds; `Unknown` only wins if nothing else is present.
fn vote_kind<'a>(packets: impl Iterator<Item = &'a Packet>) -> PacketKind {
    let mut counts: BTreeMap<PacketKind, usize> = BTreeMap::new();
    for packet in packets {
        *counts.entry(packet.kind).or_default() += 1;
    }

    let known = counts
        .iter()
        .filter(|(kind, _)| **kind != PacketKind::Unknown)
        .fold(None, |best: Option<(PacketKind, usize)>, (&kind, &count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((kind, count)),
        });

    known.map(|(kind, _)| kind).unwrap_or(PacketKind::Unknown)
}

/// Length resolution settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthPolicy {
    /// Upper bound on the working length when no declared length has a majority.
    pub max_declared_length: u32,
}

impl Default for LengthPolicy {
    fn default() -> Self {
        Self {
            max_declared_length: 64 * 1024 * 1024,
        }
    }
}

/// Counters gathered while indexing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub inserted: u32,
    pub replaced: u32,
    pub kept: u32,
}

impl IndexStats {
    fn record(&mut self, outcome: InsertOutcome) {
        match outcome {
            InsertOutcome::Inserted => self.inserted += 1,
            InsertOutcome::Replaced => self.replaced += 1,
            InsertOutcome::Kept => self.kept += 1,
        }
    }
}

/// Logical files built from one or more packet batches.
#[derive(Debug, Clone, Default)]
pub struct ReassemblyIndex {
    files: BTreeMap<FileId, LogicalFile>,
    stats: IndexStats,
}

impl ReassemblyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group `packets` by file id and resolve each file's kind and length.
    pub fn build(packets: impl IntoIterator<Item = Packet>, policy: &LengthPolicy) -> Self {
        let mut index = Self::new();
        for packet in packets {
            index.add(packet);
        }
        index.resolve(policy);
        index
    }

    /// Add one packet in arrival order. Call [`resolve`](Self::resolve) afterwards.
    pub fn add(&mut self, packet: Packet) -> InsertOutcome {
        let outcome = self
            .files
            .entry(packet.file_id)
            .or_insert_with(|| LogicalFile::new(packet.file_id))
            .insert(packet);
        self.stats.record(outcome);
        outcome
    }

    pub fn resolve(&mut self, policy: &LengthPolicy) {
        for file in self.files.values_mut() {
            file.resolve(policy);
        }
    }

    pub fn get(&self, file_id: &FileId) -> Option<&LogicalFile> {
        self.files.get(file_id)
    }

    pub fn files(&self) -> impl Iterator<Item = &LogicalFile> {
        self.files.values()
    }

    pub fn file_ids(&self) -> impl Iterator<Item = FileId> + '_ {
        self.files.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    pub fn into_files(self) -> BTreeMap<FileId, LogicalFile> {
        self.files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> FileId {
        FileId::from_timestamp(1_700_000_000 + n)
    }

    fn pkt(file: u32, seq: u32, quality: u8, length: u32, fill: u8) -> Packet {
        Packet {
            sequence: seq,
            quality_flag: quality,
            kind: PacketKind::Csv,
            file_id: id(file),
            declared_length: length,
            payload: vec![fill; 10],
        }
    }

    #[test]
    fn test_groups_by_file_id() {
        let index = ReassemblyIndex::build(
            vec![pkt(1, 1, 0, 20, 0), pkt(2, 1, 0, 20, 0), pkt(1, 2, 0, 20, 0)],
            &LengthPolicy::default(),
        );

        assert_eq!(index.len(), 2);
        assert_eq!(index.get(&id(1)).map(|f| f.len()), Some(2));
        assert_eq!(index.get(&id(2)).map(|f| f.len()), Some(1));
    }

    #[test]
    fn test_good_packet_beats_flagged() {
        let mut file = LogicalFile::new(id(1));
        assert_eq!(file.insert(pkt(1, 5, 0, 20, 0xA)), InsertOutcome::Inserted);
        assert_eq!(file.insert(pkt(1, 5, 1, 20, 0xB)), InsertOutcome::Kept);
        assert_eq!(file.get(5).map(|p| p.payload[0]), Some(0xA));

        let mut file = LogicalFile::new(id(1));
        file.insert(pkt(1, 5, 1, 20, 0xB));
        assert_eq!(file.insert(pkt(1, 5, 0, 20, 0xA)), InsertOutcome::Replaced);
        assert!(file.get(5).map(|p| p.is_good()).unwrap_or(false));
    }

    #[test]
    fn test_same_flag_later_arrival_wins() {
        let mut file = LogicalFile::new(id(1));
        file.insert(pkt(1, 3, 0, 20, 0x1));
        file.insert(pkt(1, 3, 0, 20, 0x2));
        assert_eq!(file.get(3).map(|p| p.payload[0]), Some(0x2));

        file.insert(pkt(1, 4, 2, 20, 0x1));
        file.insert(pkt(1, 4, 7, 20, 0x2));
        assert_eq!(file.get(4).map(|p| p.quality_flag), Some(7));
    }

    #[test]
    fn test_foreign_packet_ignored() {
        let mut file = LogicalFile::new(id(1));
        assert_eq!(file.insert(pkt(2, 1, 0, 20, 0)), InsertOutcome::Kept);
        assert!(file.is_empty());
    }

    #[test]
    fn test_majority_length() {
        let index = ReassemblyIndex::build(
            vec![
                pkt(1, 1, 0, 30, 0),
                pkt(1, 2, 0, 30, 0),
                pkt(1, 3, 0, 99_999, 0),
            ],
            &LengthPolicy::default(),
        );
        assert_eq!(index.get(&id(1)).map(|f| f.total_declared_length()), Some(30));
    }

    #[test]
    fn test_no_majority_uses_contiguous_payload() {
        // 1,2,3 contiguous (30 bytes), then a hole before 6
        let packets = vec![
            pkt(1, 1, 0, 10, 0),
            pkt(1, 2, 0, 20, 0),
            pkt(1, 3, 0, 30, 0),
            pkt(1, 6, 0, 40, 0),
        ];
        let index = ReassemblyIndex::build(packets.clone(), &LengthPolicy::default());
        assert_eq!(index.get(&id(1)).map(|f| f.total_declared_length()), Some(30));

        let capped = ReassemblyIndex::build(
            packets,
            &LengthPolicy {
                max_declared_length: 25,
            },
        );
        assert_eq!(capped.get(&id(1)).map(|f| f.total_declared_length()), Some(25));
    }

    #[test]
    fn test_kind_vote_ignores_unknown() {
        let mut packets = vec![pkt(1, 1, 0, 10, 0), pkt(1, 2, 0, 10, 0)];
        for seq in 3..6 {
            let mut p = pkt(1, seq, 0, 10, 0);
            p.kind = PacketKind::Unknown;
            packets.push(p);
        }
        let mut corrupted = pkt(1, 6, 0, 10, 0);
        corrupted.kind = PacketKind::Log;
        packets.push(corrupted);

        let index = ReassemblyIndex::build(packets, &LengthPolicy::default());
        assert_eq!(index.get(&id(1)).map(|f| f.kind()), Some(PacketKind::Csv));
    }

    #[test]
    fn test_index_stats() {
        let mut index = ReassemblyIndex::new();
        index.add(pkt(1, 1, 1, 10, 0));
        index.add(pkt(1, 1, 0, 10, 0));
        index.add(pkt(1, 1, 3, 10, 0));
        let stats = index.stats();
        assert_eq!((stats.inserted, stats.replaced, stats.kept), (1, 1, 1));
    }
}

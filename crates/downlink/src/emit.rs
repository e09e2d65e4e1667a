// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Completion emitter.
//!
//! Assembles the payload of a complete [`LogicalFile`] and hands it to a
//! [`Materializer`] chosen by the caller.

use crate::index::LogicalFile;
use crate::packet::{FileId, PacketKind};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Materializer errors.
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot materialize {file_id} as {kind}: {reason}")]
    Unsupported {
        file_id: FileId,
        kind: PacketKind,
        reason: String,
    },
}

/// Writes assembled bytes into their final typed output.
pub trait Materializer {
    /// Returns the path of the produced file.
    fn materialize(
        &mut self,
        file_id: FileId,
        kind: PacketKind,
        bytes: &[u8],
    ) -> Result<PathBuf, MaterializeError>;
}

/// Writes raw bytes to `<output_dir>/<kind>/<file_id>.<ext>`.
///
/// An output that already exists is left as is.
#[derive(Debug, Clone)]
pub struct DirectoryMaterializer {
    output_dir: PathBuf,
}

impl DirectoryMaterializer {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn output_path(&self, file_id: FileId, kind: PacketKind) -> PathBuf {
        self.output_dir
            .join(kind.label().to_ascii_lowercase())
            .join(format!("{}.{}", file_id, kind.extension()))
    }
}

impl Materializer for DirectoryMaterializer {
    fn materialize(
        &mut self,
        file_id: FileId,
        kind: PacketKind,
        bytes: &[u8],
    ) -> Result<PathBuf, MaterializeError> {
        let path = self.output_path(file_id, kind);
        if path.exists() {
            tracing::info!("Output {} already exists, leaving it", path.display());
            return Ok(path);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| MaterializeError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&path, bytes).map_err(|source| MaterializeError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// Good payloads in ascending sequence order, truncated to the declared length.
pub fn assemble(file: &LogicalFile) -> Vec<u8> {
    let limit = file.total_declared_length() as usize;
    let mut bytes = Vec::with_capacity(limit);
    for packet in file.packets().filter(|p| p.is_good()) {
        bytes.extend_from_slice(&packet.payload);
        if bytes.len() >= limit {
            break;
        }
    }
    bytes.truncate(limit);
    bytes
}

/// Hands complete files to a [`Materializer`].
#[derive(Debug)]
pub struct CompletionEmitter<M> {
    materializer: M,
    emitted: u32,
}

impl<M: Materializer> CompletionEmitter<M> {
    pub fn new(materializer: M) -> Self {
        Self {
            materializer,
            emitted: 0,
        }
    }

    /// Assemble `file` and materialize it. `file` itself is never modified.
    pub fn emit(&mut self, file: &LogicalFile) -> Result<PathBuf, MaterializeError> {
        let bytes = assemble(file);
        let path = self
            .materializer
            .materialize(file.file_id(), file.kind(), &bytes)?;
        self.emitted += 1;
        tracing::info!(
            "Emitted {} ({}, {} bytes) to {}",
            file.file_id(),
            file.kind(),
            bytes.len(),
            path.display()
        );
        Ok(path)
    }

    /// Number of successful emits.
    pub fn emitted(&self) -> u32 {
        self.emitted
    }

    pub fn materializer(&self) -> &M {
        &self.materializer
    }

    pub fn into_inner(self) -> M {
        self.materializer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use tempfile::tempdir;

    fn file(seqs: &[u32], declared: u32) -> LogicalFile {
        let id = FileId::from_timestamp(1_705_329_022);
        let packets = seqs.iter().map(|&seq| Packet {
            sequence: seq,
            quality_flag: 0,
            kind: PacketKind::Text,
            file_id: id,
            declared_length: declared,
            payload: vec![b'a' + seq as u8; 4],
        });
        LogicalFile::from_parts(id, PacketKind::Text, declared, packets)
    }

    #[test]
    fn test_assemble_orders_and_truncates() {
        let f = file(&[3, 1, 2], 10);
        assert_eq!(assemble(&f), b"bbbbccccdd".to_vec());
    }

    #[test]
    fn test_assemble_skips_flagged() {
        let base = file(&[1, 2], 8);
        let packets = base.packets().cloned().map(|mut p| {
            if p.sequence == 1 {
                p.quality_flag = 1;
            }
            p
        });
        let f = LogicalFile::from_parts(base.file_id(), PacketKind::Text, 8, packets.collect::<Vec<_>>());
        assert_eq!(assemble(&f), b"cccc".to_vec());
    }

    #[test]
    fn test_directory_materializer_layout() {
        let dir = tempdir().expect("tempdir");
        let mut emitter = CompletionEmitter::new(DirectoryMaterializer::new(dir.path()));

        let path = emitter.emit(&file(&[1, 2], 8)).expect("emit");
        assert_eq!(path, dir.path().join("txt").join("20240115143022.txt"));
        assert_eq!(std::fs::read(&path).expect("read"), b"bbbbcccc".to_vec());
        assert_eq!(emitter.emitted(), 1);
    }

    #[test]
    fn test_existing_output_left_untouched() {
        let dir = tempdir().expect("tempdir");
        let mut materializer = DirectoryMaterializer::new(dir.path());
        let id = FileId::from_timestamp(1_705_329_022);
        let path = materializer.output_path(id, PacketKind::Log);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, b"original").expect("write");

        let got = materializer
            .materialize(id, PacketKind::Log, b"replacement")
            .expect("materialize");
        assert_eq!(got, path);
        assert_eq!(std::fs::read(&path).expect("read"), b"original".to_vec());
    }

    struct Failing;

    impl Materializer for Failing {
        fn materialize(
            &mut self,
            file_id: FileId,
            kind: PacketKind,
            _bytes: &[u8],
        ) -> Result<PathBuf, MaterializeError> {
            Err(MaterializeError::Unsupported {
                file_id,
                kind,
                reason: "test".into(),
            })
        }
    }

    #[test]
    fn test_failure_is_reported_and_file_untouched() {
        let f = file(&[1, 2], 8);
        let before = f.clone();
        let mut emitter = CompletionEmitter::new(Failing);

        assert!(emitter.emit(&f).is_err());
        assert_eq!(emitter.emitted(), 0);
        assert_eq!(f, before);
    }
}

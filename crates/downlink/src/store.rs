// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Partial-file store.
//!
//! Keeps one record per incomplete logical file so it survives restarts.

use crate::format::{decode_record, encode_record, FormatError};
use crate::index::LogicalFile;
use crate::packet::FileId;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const RECORD_PREFIX: &str = "tmp_";
const RECORD_EXTENSION: &str = "bin";
const STAGING_EXTENSION: &str = "part";

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt record {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: FormatError,
    },
}

/// Partial-file store trait.
///
/// Keyed by [`FileId`]. `save` replaces any previous record in full.
pub trait PartialStore {
    /// Persist `file`, overwriting the existing record.
    fn save(&mut self, file: &LogicalFile) -> Result<(), StoreError>;

    /// Load the record for `file_id`, if one exists.
    fn load(&self, file_id: FileId) -> Result<Option<LogicalFile>, StoreError>;

    /// Remove the record for `file_id`. Missing records are not an error.
    fn delete(&mut self, file_id: FileId) -> Result<(), StoreError>;

    /// Ids of all stored records.
    fn list(&self) -> Result<Vec<FileId>, StoreError>;

    /// Load the record, or an empty file when none is stored.
    fn load_or_empty(&self, file_id: FileId) -> Result<LogicalFile, StoreError> {
        Ok(self
            .load(file_id)?
            .unwrap_or_else(|| LogicalFile::new(file_id)))
    }
}

/// Directory-backed store: `<dir>/tmp_<file_id>.bin`.
#[derive(Debug, Clone)]
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `file_id`.
    pub fn record_path(&self, file_id: FileId) -> PathBuf {
        self.dir
            .join(format!("{}{}.{}", RECORD_PREFIX, file_id, RECORD_EXTENSION))
    }

    fn staging_path(&self, file_id: FileId) -> PathBuf {
        self.dir
            .join(format!("{}{}.{}", RECORD_PREFIX, file_id, STAGING_EXTENSION))
    }
}

impl PartialStore for DirStore {
    fn save(&mut self, file: &LogicalFile) -> Result<(), StoreError> {
        let path = self.record_path(file.file_id());
        let staging = self.staging_path(file.file_id());

        let data = encode_record(file).map_err(|source| StoreError::Format {
            path: path.clone(),
            source,
        })?;

        fs::write(&staging, &data).map_err(|source| StoreError::Io {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(
            "Saved partial record {} ({} packets, {} bytes)",
            path.display(),
            file.len(),
            data.len()
        );
        Ok(())
    }

    fn load(&self, file_id: FileId) -> Result<Option<LogicalFile>, StoreError> {
        let path = self.record_path(file_id);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let decoded = decode_record(&data).map_err(|source| StoreError::Format {
            path: path.clone(),
            source,
        })?;

        if decoded.skipped > 0 || decoded.file.len() as u32 != decoded.expected_entries {
            tracing::warn!(
                "Recovered {} of {} entries from {} ({} skipped)",
                decoded.file.len(),
                decoded.expected_entries,
                path.display(),
                decoded.skipped
            );
        }

        Ok(Some(decoded.file))
    }

    fn delete(&mut self, file_id: FileId) -> Result<(), StoreError> {
        let path = self.record_path(file_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!("Deleted partial record {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn list(&self) -> Result<Vec<FileId>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let id = name
                .strip_prefix(RECORD_PREFIX)
                .and_then(|rest| rest.strip_suffix(&format!(".{}", RECORD_EXTENSION)))
                .and_then(|stem| stem.parse::<FileId>().ok());
            if let Some(id) = id {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Packet, PacketKind};
    use tempfile::tempdir;

    fn sample(id: FileId) -> LogicalFile {
        let packets = [1u32, 2, 4].into_iter().map(|seq| Packet {
            sequence: seq,
            quality_flag: 0,
            kind: PacketKind::Text,
            file_id: id,
            declared_length: 40,
            payload: vec![seq as u8; 10],
        });
        LogicalFile::from_parts(id, PacketKind::Text, 40, packets)
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().expect("tempdir");
        let mut store = DirStore::open(dir.path()).expect("open");
        let id = FileId::from_timestamp(1_705_329_022);
        let file = sample(id);

        store.save(&file).expect("save");
        assert!(store.record_path(id).exists());
        assert_eq!(
            store.record_path(id).file_name().and_then(|n| n.to_str()),
            Some("tmp_20240115143022.bin")
        );

        let loaded = store.load(id).expect("load").expect("record");
        assert_eq!(loaded, file);
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempdir().expect("tempdir");
        let store = DirStore::open(dir.path()).expect("open");
        let id = FileId::from_timestamp(7);

        assert!(store.load(id).expect("load").is_none());
        assert!(store.load_or_empty(id).expect("load").is_empty());
    }

    #[test]
    fn test_save_overwrites_in_full() {
        let dir = tempdir().expect("tempdir");
        let mut store = DirStore::open(dir.path()).expect("open");
        let id = FileId::from_timestamp(1_705_329_022);

        store.save(&sample(id)).expect("save");
        let smaller = LogicalFile::from_parts(id, PacketKind::Text, 40, Vec::new());
        store.save(&smaller).expect("save again");

        let loaded = store.load(id).expect("load").expect("record");
        assert!(loaded.is_empty());
        assert!(!dir.path().join("tmp_20240115143022.part").exists());
    }

    #[test]
    fn test_delete_and_list() {
        let dir = tempdir().expect("tempdir");
        let mut store = DirStore::open(dir.path()).expect("open");
        let a = FileId::from_timestamp(1_705_329_022);
        let b = FileId::from_timestamp(1_705_329_999);

        store.save(&sample(b)).expect("save b");
        store.save(&sample(a)).expect("save a");
        std::fs::write(dir.path().join("unrelated.txt"), b"x").expect("write");

        assert_eq!(store.list().expect("list"), vec![a, b]);

        store.delete(a).expect("delete");
        store.delete(a).expect("delete twice");
        assert_eq!(store.list().expect("list"), vec![b]);
    }

    #[test]
    fn test_corrupt_record_is_error() {
        let dir = tempdir().expect("tempdir");
        let store = DirStore::open(dir.path()).expect("open");
        let id = FileId::from_timestamp(1_705_329_022);
        std::fs::write(store.record_path(id), b"garbage").expect("write");

        assert!(matches!(store.load(id), Err(StoreError::Format { .. })));
    }
}

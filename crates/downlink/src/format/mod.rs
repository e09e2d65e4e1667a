// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! On-disk formats.
//!
//! Supports the partial-file record used to carry incomplete logical files
//! across runs.

pub mod partial;

pub use partial::{
    decode_record, encode_record, DecodedRecord, FormatError, RecordHeader, ENTRY_HEADER_SIZE,
    FORMAT_VERSION, MAGIC,
};

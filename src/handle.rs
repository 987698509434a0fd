// Copyright (c) 2024-present, caskdb
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{id::FileId, seq::SeqNo};
use byteorder::{BigEndian, ByteOrder};

/// Serialized width of a [`RecordHandle`] (4 + 4 + 4 + 8).
///
/// The key directory stores handles at exactly this width, so per-entry
/// memory stays predictable even with tens of millions of keys.
pub const HANDLE_SIZE: usize = 20;

/// A record handle points to the current on-disk location of a key's value
#[allow(clippy::module_name_repetitions)]
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RecordHandle {
    /// Data file the record lives in
    pub file_id: FileId,

    /// Offset of the value bytes inside the data file
    pub value_offset: u32,

    /// Size of the value bytes
    pub value_size: u32,

    /// Sequence number the record was written with
    pub seq: SeqNo,
}

impl RecordHandle {
    /// Serializes the handle into its fixed-width directory representation.
    // NOTE: Ranges are compile-time constants inside a fixed-size array
    #[allow(clippy::indexing_slicing)]
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HANDLE_SIZE] {
        let mut buf = [0; HANDLE_SIZE];
        BigEndian::write_u32(&mut buf[0..4], self.file_id);
        BigEndian::write_u32(&mut buf[4..8], self.value_offset);
        BigEndian::write_u32(&mut buf[8..12], self.value_size);
        BigEndian::write_u64(&mut buf[12..20], self.seq);
        buf
    }

    /// Deserializes a handle from its fixed-width directory representation.
    #[allow(clippy::indexing_slicing)]
    #[must_use]
    pub fn from_bytes(buf: &[u8; HANDLE_SIZE]) -> Self {
        Self {
            file_id: BigEndian::read_u32(&buf[0..4]),
            value_offset: BigEndian::read_u32(&buf[4..8]),
            value_size: BigEndian::read_u32(&buf[8..12]),
            seq: BigEndian::read_u64(&buf[12..20]),
        }
    }
}

// Copyright (c) 2024-present, caskdb
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Binary layout of everything that hits disk.
//!
//! All integers are big-endian. The layout is stable for [`Version::V1`]:
//!
//! ```text
//! data record:     [checksum u32][key_len u8][value_len u32][seq u64][flags u8][key][value]
//! index entry:     [key_len u8][record_size u32][record_offset u32][seq u64][flags u8][key]
//! tombstone entry: [checksum u32][key_len u8][seq u64][key]
//! ```
//!
//! A record's checksum covers key and value. A tombstone's checksum covers
//! everything after the checksum field.
//!
//! [`Version::V1`]: crate::version::Version

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    seq::SeqNo,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Maximum key size in bytes, enforced on every write path.
pub const MAX_KEY_SIZE: usize = 127;

/// Fixed size of a data record header.
pub const RECORD_HEADER_SIZE: u32 = 4 + 1 + 4 + 8 + 1;

/// Fixed size of an index entry, excluding the key.
pub const INDEX_ENTRY_SIZE: u32 = 1 + 4 + 4 + 8 + 1;

/// Fixed size of a tombstone entry, excluding the key.
pub const TOMBSTONE_HEADER_SIZE: u32 = 4 + 1 + 8;

/// Flag bit marking a record as a tombstone; remaining bits are reserved.
pub const FLAG_TOMBSTONE: u8 = 0b0000_0001;

pub(crate) fn checksum(chunks: &[&[u8]]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    hasher.finalize()
}

/// Fills `buf` completely, returning `false` on a clean EOF at the first
/// byte. A partial read is reported as an I/O error (truncation).
pub(crate) fn read_exact_or_eof<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
) -> std::io::Result<bool> {
    let mut filled = 0;

    while filled < buf.len() {
        #[allow(clippy::indexing_slicing)]
        let n = reader.read(&mut buf[filled..])?;

        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated entry",
            ));
        }

        filled += n;
    }

    Ok(true)
}

/// Header of a data record as stored on disk.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RecordHeader {
    /// crc32 over key and value bytes
    pub checksum: u32,

    /// Key length (1..=127)
    pub key_len: u8,

    /// Value length
    pub value_len: u32,

    /// Sequence number
    pub seq: SeqNo,

    /// Flag bits
    pub flags: u8,
}

impl RecordHeader {
    /// Total on-disk size of the record this header belongs to.
    #[must_use]
    pub fn record_size(&self) -> u32 {
        RECORD_HEADER_SIZE + u32::from(self.key_len) + self.value_len
    }

    /// Whether the tombstone flag is set.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.flags & FLAG_TOMBSTONE != 0
    }
}

impl Decode for RecordHeader {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let checksum = reader.read_u32::<BigEndian>()?;
        let key_len = reader.read_u8()?;
        let value_len = reader.read_u32::<BigEndian>()?;
        let seq = reader.read_u64::<BigEndian>()?;
        let flags = reader.read_u8()?;

        if key_len == 0 || key_len as usize > MAX_KEY_SIZE {
            return Err(DecodeError::InvalidLength("record key length"));
        }

        Ok(Self {
            checksum,
            key_len,
            value_len,
            seq,
            flags,
        })
    }
}

/// A fully decoded data record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    /// Record header
    pub header: RecordHeader,

    /// Key bytes
    pub key: Vec<u8>,

    /// Value bytes
    pub value: Vec<u8>,
}

impl Record {
    /// Encodes a record, computing its checksum.
    ///
    /// The caller is responsible for key/value size validation.
    #[must_use]
    pub fn encode(key: &[u8], value: &[u8], seq: SeqNo, flags: u8) -> Vec<u8> {
        debug_assert!(!key.is_empty() && key.len() <= MAX_KEY_SIZE);

        let mut buf =
            Vec::with_capacity(RECORD_HEADER_SIZE as usize + key.len() + value.len());

        buf.extend_from_slice(&checksum(&[key, value]).to_be_bytes());

        // NOTE: Truncation is OK, lengths are validated in the write path
        #[allow(clippy::cast_possible_truncation)]
        {
            buf.push(key.len() as u8);
            buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
        }

        buf.extend_from_slice(&seq.to_be_bytes());
        buf.push(flags);
        buf.extend_from_slice(key);
        buf.extend_from_slice(value);

        buf
    }
}

impl Decode for Record {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let header = RecordHeader::decode_from(reader)?;

        let mut key = vec![0; header.key_len as usize];
        reader.read_exact(&mut key)?;

        let mut value = vec![0; header.value_len as usize];
        reader.read_exact(&mut value)?;

        if checksum(&[&key, &value]) != header.checksum {
            return Err(DecodeError::ChecksumMismatch);
        }

        Ok(Self { header, key, value })
    }
}

/// One entry of a segment's paired index file.
///
/// Carries enough to rebuild a directory entry without touching value bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexEntry {
    /// Total record size in the data file
    pub record_size: u32,

    /// Offset of the record in the data file
    pub record_offset: u32,

    /// Sequence number of the record
    pub seq: SeqNo,

    /// Flag bits of the record
    pub flags: u8,

    /// Key bytes
    pub key: Vec<u8>,
}

impl IndexEntry {
    /// Offset of the value bytes inside the data file.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn value_offset(&self) -> u32 {
        self.record_offset + RECORD_HEADER_SIZE + self.key.len() as u32
    }

    /// Size of the value bytes.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn value_size(&self) -> u32 {
        self.record_size - RECORD_HEADER_SIZE - self.key.len() as u32
    }

    /// Whether the tombstone flag is set.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.flags & FLAG_TOMBSTONE != 0
    }
}

impl Encode for IndexEntry {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        debug_assert!(!self.key.is_empty() && self.key.len() <= MAX_KEY_SIZE);

        // NOTE: Truncation is OK, key size is validated in the write path
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u8(self.key.len() as u8)?;

        writer.write_u32::<BigEndian>(self.record_size)?;
        writer.write_u32::<BigEndian>(self.record_offset)?;
        writer.write_u64::<BigEndian>(self.seq)?;
        writer.write_u8(self.flags)?;
        writer.write_all(&self.key)?;
        Ok(())
    }
}

impl Decode for IndexEntry {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let key_len = reader.read_u8()?;
        let record_size = reader.read_u32::<BigEndian>()?;
        let record_offset = reader.read_u32::<BigEndian>()?;
        let seq = reader.read_u64::<BigEndian>()?;
        let flags = reader.read_u8()?;

        if key_len == 0 || key_len as usize > MAX_KEY_SIZE {
            return Err(DecodeError::InvalidLength("index entry key length"));
        }

        if record_size < RECORD_HEADER_SIZE + u32::from(key_len) {
            return Err(DecodeError::InvalidLength("index entry record size"));
        }

        let mut key = vec![0; key_len as usize];
        reader.read_exact(&mut key)?;

        Ok(Self {
            record_size,
            record_offset,
            seq,
            flags,
            key,
        })
    }
}

/// One entry of the tombstone log.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TombstoneEntry {
    /// Sequence number of the deletion
    pub seq: SeqNo,

    /// Key bytes
    pub key: Vec<u8>,
}

impl TombstoneEntry {
    /// Total on-disk size of this entry.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn entry_size(&self) -> u32 {
        TOMBSTONE_HEADER_SIZE + self.key.len() as u32
    }

    fn payload_checksum(key: &[u8], seq: SeqNo) -> u32 {
        // NOTE: Truncation is OK, key size is validated in the write path
        #[allow(clippy::cast_possible_truncation)]
        let key_len = [key.len() as u8];
        let seq = seq.to_be_bytes();
        checksum(&[&key_len, &seq, key])
    }
}

impl Encode for TombstoneEntry {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        debug_assert!(!self.key.is_empty() && self.key.len() <= MAX_KEY_SIZE);

        writer.write_u32::<BigEndian>(Self::payload_checksum(&self.key, self.seq))?;

        // NOTE: Truncation is OK, key size is validated in the write path
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u8(self.key.len() as u8)?;

        writer.write_u64::<BigEndian>(self.seq)?;
        writer.write_all(&self.key)?;
        Ok(())
    }
}

impl Decode for TombstoneEntry {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let checksum = reader.read_u32::<BigEndian>()?;
        let key_len = reader.read_u8()?;
        let seq = reader.read_u64::<BigEndian>()?;

        if key_len == 0 || key_len as usize > MAX_KEY_SIZE {
            return Err(DecodeError::InvalidLength("tombstone key length"));
        }

        let mut key = vec![0; key_len as usize];
        reader.read_exact(&mut key)?;

        if Self::payload_checksum(&key, seq) != checksum {
            return Err(DecodeError::ChecksumMismatch);
        }

        Ok(Self { seq, key })
    }
}

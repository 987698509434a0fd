// Copyright (c) 2024-present, caskdb
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

pub mod index;
pub mod stale;

use crate::{
    coding::{Decode, Encode},
    handle::RecordHandle,
    id::FileId,
    record::{IndexEntry, Record, RECORD_HEADER_SIZE},
    seq::SeqNo,
};
use stale::StaleStats;
use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::{atomic::AtomicU64, Mutex},
};

pub const DATA_FILE_EXT: &str = "data";
pub const INDEX_FILE_EXT: &str = "index";
pub const TOMBSTONE_FILE_EXT: &str = "tombstone";

/// Formats the file name for a given id and extension, e.g. `0000000007.data`.
///
/// Zero padding keeps directory listings sorted by id.
pub(crate) fn file_name(id: FileId, ext: &str) -> String {
    format!("{id:010}.{ext}")
}

/// Extracts the file id from a file name of the given extension.
pub(crate) fn parse_file_id(name: &str, ext: &str) -> Option<FileId> {
    let stem = name.strip_suffix(ext)?.strip_suffix('.')?;
    let id = stem.parse::<FileId>().ok()?;
    (id > 0).then_some(id)
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    std::os::unix::fs::FileExt::write_all_at(file, buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;

    while !buf.is_empty() {
        let n = file.seek_read(buf, offset)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "failed to fill whole buffer",
            ));
        }
        buf = &mut buf[n..];
        offset += n as u64;
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;

    while !buf.is_empty() {
        let n = file.seek_write(buf, offset)?;
        buf = &buf[n..];
        offset += n as u64;
    }
    Ok(())
}

struct Appender {
    index: File,
    offset: u64,
}

/// A data file plus its paired index file.
///
/// Created segments accept appends until the store seals them on rollover;
/// recovered segments are read-only. Reads use positioned I/O and never
/// touch bytes past the published write offset.
pub struct Segment {
    /// Segment ID
    pub id: FileId,

    /// Data file path
    pub path: PathBuf,

    /// Index file path
    pub index_path: PathBuf,

    data: File,

    /// Present for writable segments only
    appender: Option<Mutex<Appender>>,

    /// Bytes readers are allowed to see
    size: AtomicU64,

    /// Superseded-byte accounting for compaction candidacy
    pub(crate) stale: StaleStats,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Segment:{}({})", self.id, self.path.display())
    }
}

impl Segment {
    /// Creates a new, empty, writable segment (data + index file).
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn create<P: AsRef<Path>>(dir: P, id: FileId) -> crate::Result<Self> {
        let dir = dir.as_ref();
        let path = dir.join(file_name(id, DATA_FILE_EXT));
        let index_path = dir.join(file_name(id, INDEX_FILE_EXT));

        log::trace!("Creating segment #{id} at {}", path.display());

        let data = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        let index = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&index_path)?;

        Ok(Self {
            id,
            path,
            index_path,
            data,
            appender: Some(Mutex::new(Appender { index, offset: 0 })),
            size: AtomicU64::new(0),
            stale: StaleStats::default(),
        })
    }

    /// Opens an existing segment read-only.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn open_for_reading<P: AsRef<Path>>(dir: P, id: FileId) -> crate::Result<Self> {
        let dir = dir.as_ref();
        let path = dir.join(file_name(id, DATA_FILE_EXT));
        let index_path = dir.join(file_name(id, INDEX_FILE_EXT));

        let data = File::open(&path)?;
        let size = data.metadata()?.len();

        Ok(Self {
            id,
            path,
            index_path,
            data,
            appender: None,
            size: AtomicU64::new(size),
            stale: StaleStats::default(),
        })
    }

    /// Bytes written so far (file length for recovered segments).
    pub fn size(&self) -> u64 {
        self.size.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Fraction of this segment's bytes that have been superseded.
    // NOTE: Precision is not important here
    #[allow(clippy::cast_precision_loss)]
    pub fn stale_ratio(&self) -> f32 {
        let size = self.size();
        if size == 0 {
            return 0.0;
        }

        self.stale.stale_bytes() as f32 / size as f32
    }

    /// Appends a record and its index entry, returning directory metadata.
    ///
    /// Appends are serialized by the caller; the write offset is private
    /// and readers only ever see fully appended bytes.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    #[allow(clippy::expect_used)]
    pub fn append(
        &self,
        key: &[u8],
        value: &[u8],
        seq: SeqNo,
        flags: u8,
    ) -> crate::Result<RecordHandle> {
        let appender = self.appender.as_ref().expect("segment is sealed");
        let mut appender = appender.lock().expect("lock is poisoned");

        let record_offset = appender.offset;
        let buf = Record::encode(key, value, seq, flags);

        write_all_at(&self.data, &buf, record_offset)?;

        // NOTE: Truncation is OK, offsets are bounded by max_file_size < 4 GiB
        #[allow(clippy::cast_possible_truncation)]
        let entry = IndexEntry {
            record_size: buf.len() as u32,
            record_offset: record_offset as u32,
            seq,
            flags,
            key: key.to_vec(),
        };

        let mut index = &appender.index;
        entry.encode_into(&mut index)?;

        appender.offset += buf.len() as u64;
        self.size
            .store(appender.offset, std::sync::atomic::Ordering::Release);

        Ok(RecordHandle {
            file_id: self.id,
            value_offset: entry.value_offset(),
            value_size: entry.value_size(),
            seq,
        })
    }

    /// Appends raw record bytes copied from another segment, with a fresh
    /// index entry pointing at the new location.
    ///
    /// Used by the compactor; the record is not re-encoded, so its
    /// checksum and sequence number carry over bit-exact.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    #[allow(clippy::expect_used)]
    pub fn append_raw(&self, record: &[u8], entry: &IndexEntry) -> crate::Result<RecordHandle> {
        let appender = self.appender.as_ref().expect("segment is sealed");
        let mut appender = appender.lock().expect("lock is poisoned");

        let record_offset = appender.offset;

        write_all_at(&self.data, record, record_offset)?;

        // NOTE: Truncation is OK, offsets are bounded by max_file_size < 4 GiB
        #[allow(clippy::cast_possible_truncation)]
        let entry = IndexEntry {
            record_offset: record_offset as u32,
            ..entry.clone()
        };

        let mut index = &appender.index;
        entry.encode_into(&mut index)?;

        appender.offset += record.len() as u64;
        self.size
            .store(appender.offset, std::sync::atomic::Ordering::Release);

        Ok(RecordHandle {
            file_id: self.id,
            value_offset: entry.value_offset(),
            value_size: entry.value_size(),
            seq: entry.seq,
        })
    }

    /// Reads raw value bytes.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn read(&self, value_offset: u32, value_size: u32) -> crate::Result<Vec<u8>> {
        let mut buf = vec![0; value_size as usize];
        read_exact_at(&self.data, &mut buf, u64::from(value_offset))?;
        Ok(buf)
    }

    /// Reads and verifies the full record enclosing the given value.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or `Corruption` if the
    /// stored checksum does not match.
    pub fn read_record(
        &self,
        key_len: usize,
        value_offset: u32,
        value_size: u32,
    ) -> crate::Result<Record> {
        // NOTE: Truncation is OK, key size is at most 127
        #[allow(clippy::cast_possible_truncation)]
        let record_offset = value_offset - RECORD_HEADER_SIZE - key_len as u32;

        let record_size = RECORD_HEADER_SIZE as usize + key_len + value_size as usize;

        let mut buf = vec![0; record_size];
        read_exact_at(&self.data, &mut buf, u64::from(record_offset))?;

        Ok(Record::decode_from(&mut buf.as_slice())?)
    }

    /// Reads raw record bytes for a zero-parse transfer.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn read_raw(&self, record_offset: u32, record_size: u32) -> crate::Result<Vec<u8>> {
        let mut buf = vec![0; record_size as usize];
        read_exact_at(&self.data, &mut buf, u64::from(record_offset))?;
        Ok(buf)
    }

    /// Returns a reader over this segment's index file.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn index_reader(&self) -> crate::Result<index::IndexReader> {
        index::IndexReader::new(&self.index_path, self.id)
    }

    /// Flushes outstanding data (and file metadata if requested) to disk.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    #[allow(clippy::expect_used)]
    pub fn force(&self, metadata: bool) -> crate::Result<()> {
        if let Some(appender) = &self.appender {
            let appender = appender.lock().expect("lock is poisoned");
            appender.index.sync_data()?;
        }

        if metadata {
            self.data.sync_all()?;
        } else {
            self.data.sync_data()?;
        }

        Ok(())
    }

    /// Unlinks the data and index files.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn delete(&self) -> crate::Result<()> {
        log::trace!("Deleting segment #{} at {}", self.id, self.path.display());

        std::fs::remove_file(&self.path)?;
        std::fs::remove_file(&self.index_path)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn segment_file_names() {
        assert_eq!("0000000007.data", file_name(7, DATA_FILE_EXT));
        assert_eq!(Some(7), parse_file_id("0000000007.data", DATA_FILE_EXT));
        assert_eq!(Some(123), parse_file_id("123.index", INDEX_FILE_EXT));
        assert_eq!(None, parse_file_id("0000000007.data", INDEX_FILE_EXT));
        assert_eq!(None, parse_file_id("LOCK", DATA_FILE_EXT));
        assert_eq!(None, parse_file_id("0000000000.data", DATA_FILE_EXT));
    }

    #[test]
    fn segment_append_read() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let segment = Segment::create(dir.path(), 1)?;
        assert_eq!(0, segment.size());

        let handle = segment.append(b"foo", b"bar", 1, 0)?;
        assert_eq!(1, handle.file_id);
        assert_eq!(RECORD_HEADER_SIZE + 3, handle.value_offset);
        assert_eq!(3, handle.value_size);

        let handle2 = segment.append(b"foo", b"baz", 2, 0)?;
        assert_eq!(u64::from(handle2.value_offset + handle2.value_size), {
            segment.size()
        });

        assert_eq!(b"bar".to_vec(), {
            segment.read(handle.value_offset, handle.value_size)?
        });
        assert_eq!(b"baz".to_vec(), {
            segment.read(handle2.value_offset, handle2.value_size)?
        });

        let record = segment.read_record(3, handle.value_offset, handle.value_size)?;
        assert_eq!(b"foo".to_vec(), record.key);
        assert_eq!(b"bar".to_vec(), record.value);
        assert_eq!(1, record.header.seq);

        Ok(())
    }

    #[test]
    fn segment_index_entries_follow_appends() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let segment = Segment::create(dir.path(), 1)?;

        for (i, key) in [&b"a"[..], b"bb", b"ccc"].iter().enumerate() {
            segment.append(key, b"value", i as u64, 0)?;
        }
        segment.force(false)?;

        let entries = segment
            .index_reader()?
            .collect::<crate::Result<Vec<_>>>()?;

        assert_eq!(3, entries.len());
        assert_eq!(b"a".to_vec(), entries[0].key);
        assert_eq!(0, entries[0].record_offset);
        assert_eq!(b"bb".to_vec(), entries[1].key);
        assert_eq!(entries[0].record_size, entries[1].record_offset);
        assert_eq!(2, entries[2].seq);

        Ok(())
    }

    #[test]
    fn segment_reopen_read_only() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let handle = {
            let segment = Segment::create(dir.path(), 1)?;
            let handle = segment.append(b"foo", b"bar", 1, 0)?;
            segment.force(true)?;
            handle
        };

        let segment = Segment::open_for_reading(dir.path(), 1)?;
        assert!(segment.size() > 0);
        assert_eq!(b"bar".to_vec(), {
            segment.read(handle.value_offset, handle.value_size)?
        });

        Ok(())
    }

    #[test]
    fn segment_raw_transfer_keeps_record_bit_exact() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let src = Segment::create(dir.path(), 1)?;
        src.append(b"first", b"padding", 1, 0)?;
        let handle = src.append(b"foo", b"bar", 2, 0)?;
        src.force(false)?;

        let entry = src
            .index_reader()?
            .collect::<crate::Result<Vec<_>>>()?
            .into_iter()
            .nth(1)
            .unwrap();

        let dest = Segment::create(dir.path(), 2)?;
        let raw = src.read_raw(entry.record_offset, entry.record_size)?;
        let new_handle = dest.append_raw(&raw, &entry)?;

        assert_eq!(2, new_handle.file_id);
        assert_eq!(handle.seq, new_handle.seq);
        assert_eq!(handle.value_size, new_handle.value_size);

        // Record starts at offset 0 in the fresh destination
        let record = dest.read_record(3, new_handle.value_offset, new_handle.value_size)?;
        assert_eq!(b"bar".to_vec(), record.value);
        assert_eq!(2, record.header.seq);

        Ok(())
    }

    #[test]
    fn segment_delete_unlinks_both_files() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let segment = Segment::create(dir.path(), 1)?;
        segment.append(b"foo", b"bar", 1, 0)?;

        assert!(segment.path.try_exists()?);
        assert!(segment.index_path.try_exists()?);

        segment.delete()?;

        assert!(!segment.path.try_exists()?);
        assert!(!segment.index_path.try_exists()?);

        Ok(())
    }
}

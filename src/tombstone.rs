// Copyright (c) 2024-present, caskdb
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode},
    id::{FileId, IdGenerator},
    record::{read_exact_or_eof, TombstoneEntry, TOMBSTONE_HEADER_SIZE},
    segment::{file_name, TOMBSTONE_FILE_EXT},
};
use std::{
    fs::File,
    io::{BufReader, Read, Write},
    path::{Path, PathBuf},
};

/// Append-only log of deletions.
///
/// Rolls over to a fresh `<id>.tombstone` file under the same size cap as
/// data segments. Data segments are untouched by deletes; only this log
/// records them.
pub struct TombstoneLog {
    dir: PathBuf,
    max_file_size: u64,
    id_gen: IdGenerator,
    current: File,
    id: FileId,
    offset: u64,
}

impl TombstoneLog {
    /// Creates a fresh tombstone log in the given directory.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn create<P: AsRef<Path>>(
        dir: P,
        id_gen: IdGenerator,
        max_file_size: u64,
    ) -> crate::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let id = id_gen.next();
        let current = Self::create_file(&dir, id)?;

        Ok(Self {
            dir,
            max_file_size,
            id_gen,
            current,
            id,
            offset: 0,
        })
    }

    fn create_file(dir: &Path, id: FileId) -> crate::Result<File> {
        let path = dir.join(file_name(id, TOMBSTONE_FILE_EXT));
        log::trace!("Creating tombstone file #{id} at {}", path.display());

        Ok(std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?)
    }

    /// Appends a tombstone entry, rolling over first if it would not fit.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn append(&mut self, entry: &TombstoneEntry) -> crate::Result<()> {
        let entry_size = u64::from(entry.entry_size());

        if self.offset > 0 && self.offset + entry_size > self.max_file_size {
            self.roll_over()?;
        }

        entry.encode_into(&mut self.current)?;
        self.offset += entry_size;

        Ok(())
    }

    fn roll_over(&mut self) -> crate::Result<()> {
        let id = self.id_gen.next();
        log::debug!("Rolling over tombstone log #{} -> #{id}", self.id);

        self.current.sync_data()?;
        self.current = Self::create_file(&self.dir, id)?;
        self.id = id;
        self.offset = 0;

        Ok(())
    }

    /// Flushes outstanding tombstones to disk.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn force(&mut self) -> crate::Result<()> {
        self.current.flush()?;
        self.current.sync_data()?;
        Ok(())
    }

    /// Flushes and closes the log; a current file that never received an
    /// entry is removed instead.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn close(&mut self) -> crate::Result<()> {
        if self.offset == 0 {
            let path = self.dir.join(file_name(self.id, TOMBSTONE_FILE_EXT));
            log::trace!("Deleting empty tombstone file #{}", self.id);
            std::fs::remove_file(path)?;
            Ok(())
        } else {
            self.force()
        }
    }
}

/// Reads through one tombstone file in write order.
///
/// Terminates cleanly at EOF; an undecodable entry terminates the iterator
/// with an error (truncation point for recovery).
pub struct TombstoneReader {
    pub(crate) file_id: FileId,
    inner: BufReader<File>,
    is_terminated: bool,
}

impl TombstoneReader {
    /// Opens a tombstone file for sequential reading.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn new<P: AsRef<Path>>(path: P, file_id: FileId) -> crate::Result<Self> {
        let file_reader = BufReader::new(File::open(path)?);

        Ok(Self {
            file_id,
            inner: file_reader,
            is_terminated: false,
        })
    }
}

impl Iterator for TombstoneReader {
    type Item = crate::Result<TombstoneEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_terminated {
            return None;
        }

        let mut head = [0; TOMBSTONE_HEADER_SIZE as usize];

        match read_exact_or_eof(&mut self.inner, &mut head) {
            Ok(true) => {}
            Ok(false) => {
                self.is_terminated = true;
                return None;
            }
            Err(e) => {
                self.is_terminated = true;
                return Some(Err(DecodeError::from(e).into()));
            }
        }

        match TombstoneEntry::decode_from(&mut head.as_slice().chain(&mut self.inner)) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) => {
                self.is_terminated = true;
                Some(Err(e.into()))
            }
        }
    }
}

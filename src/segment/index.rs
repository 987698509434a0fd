// Copyright (c) 2024-present, caskdb
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError},
    id::FileId,
    record::{read_exact_or_eof, IndexEntry, INDEX_ENTRY_SIZE},
};
use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

/// Reads through a segment's index file in write order.
///
/// Terminates cleanly at EOF; any undecodable entry terminates the
/// iterator with an error, so callers can treat the spot as a
/// truncation point.
pub struct IndexReader {
    pub(crate) file_id: FileId,
    inner: BufReader<File>,
    is_terminated: bool,
}

impl IndexReader {
    /// Opens an index file for sequential reading.
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

impl Iterator for IndexReader {
    type Item = crate::Result<IndexEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_terminated {
            return None;
        }

        // Probing the fixed-size prefix separates clean EOF from a
        // torn final entry
        let mut head = [0; INDEX_ENTRY_SIZE as usize];

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

        match IndexEntry::decode_from(&mut head.as_slice().chain(&mut self.inner)) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) => {
                self.is_terminated = true;
                Some(Err(e.into()))
            }
        }
    }
}

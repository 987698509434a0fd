// Copyright (c) 2024-present, caskdb
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The in-memory key directory.
//!
//! Maps key bytes to a fixed-width [`RecordHandle`], so per-entry memory
//! stays predictable when holding millions of keys. The backing table is
//! sharded; writers and the compactor synchronize purely through the
//! table's atomic operations (`put`, `remove` and the compare-and-swap
//! `replace`), never through store-level locks.
//!
//! Any table with the same contract can back the directory (a memory-pool
//! or off-heap variant for very large key counts); the built-in one is a
//! shard-locked hash table sized from the embedder's record-count hint.

use crate::{
    handle::{RecordHandle, HANDLE_SIZE},
    HashMap,
};
use std::sync::RwLock;

type Shard = RwLock<HashMap<Box<[u8]>, [u8; HANDLE_SIZE]>>;

/// Sharded map from key bytes to the on-disk location of the current value
pub struct KeyDirectory {
    shards: Vec<Shard>,
    shard_mask: u64,
}

impl KeyDirectory {
    /// Creates a directory sized for the given number of records.
    ///
    /// The shard count is a power of two, at least twice the available
    /// hardware parallelism, overridable by the embedder.
    #[must_use]
    pub fn new(number_of_records: usize, shard_count: Option<usize>) -> Self {
        let default_shards = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(8)
            * 2;

        let shard_count = shard_count
            .unwrap_or(default_shards)
            .max(2)
            .next_power_of_two();

        let per_shard_capacity = number_of_records.div_ceil(shard_count);

        log::debug!(
            "Creating key directory with {shard_count} shards, {per_shard_capacity} slots each",
        );

        let shards = (0..shard_count)
            .map(|_| {
                RwLock::new(HashMap::with_capacity_and_hasher(
                    per_shard_capacity,
                    xxhash_rust::xxh3::Xxh3Builder::new(),
                ))
            })
            .collect();

        Self {
            shards,
            shard_mask: shard_count as u64 - 1,
        }
    }

    #[allow(clippy::indexing_slicing, clippy::cast_possible_truncation)]
    fn shard(&self, key: &[u8]) -> &Shard {
        let hash = xxhash_rust::xxh3::xxh3_64(key);
        &self.shards[(hash & self.shard_mask) as usize]
    }

    /// Returns the handle for a key, if present.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<RecordHandle> {
        self.shard(key)
            .read()
            .expect("lock is poisoned")
            .get(key)
            .map(RecordHandle::from_bytes)
    }

    /// Unconditionally maps a key to a new handle.
    #[allow(clippy::expect_used)]
    pub fn put(&self, key: &[u8], handle: RecordHandle) {
        self.shard(key)
            .write()
            .expect("lock is poisoned")
            .insert(key.into(), handle.to_bytes());
    }

    /// Compare-and-swap: installs `new` iff the current handle is
    /// byte-equal to `expected`.
    ///
    /// Returns `false` (leaving the entry untouched) when the key is
    /// absent or was concurrently superseded.
    #[allow(clippy::expect_used)]
    pub fn replace(&self, key: &[u8], expected: &RecordHandle, new: RecordHandle) -> bool {
        let mut shard = self.shard(key).write().expect("lock is poisoned");

        match shard.get_mut(key) {
            Some(slot) if *slot == expected.to_bytes() => {
                *slot = new.to_bytes();
                true
            }
            _ => false,
        }
    }

    /// Removes a key, returning the previous handle if it was present.
    #[allow(clippy::expect_used)]
    pub fn remove(&self, key: &[u8]) -> Option<RecordHandle> {
        self.shard(key)
            .write()
            .expect("lock is poisoned")
            .remove(key)
            .map(|bytes| RecordHandle::from_bytes(&bytes))
    }

    /// Number of live keys.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.read().expect("lock is poisoned").len())
            .sum()
    }

    /// Whether the directory holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases the table's memory.
    #[allow(clippy::expect_used)]
    pub fn close(&self) {
        for shard in &self.shards {
            let mut shard = shard.write().expect("lock is poisoned");
            *shard = HashMap::with_hasher(xxhash_rust::xxh3::Xxh3Builder::new());
        }
    }
}

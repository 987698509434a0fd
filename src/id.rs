// Copyright (c) 2024-present, caskdb
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::sync::{atomic::AtomicU32, Arc};

/// Identifies a data, index or tombstone file inside a store directory.
///
/// Ids are positive, monotonically allocated and never reused for the
/// lifetime of the directory.
#[allow(clippy::module_name_repetitions)]
pub type FileId = u32;

/// Hands out unique (monotonically increasing) file IDs.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone)]
pub struct IdGenerator(Arc<AtomicU32>);

impl std::ops::Deref for IdGenerator {
    type Target = Arc<AtomicU32>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        // File ids start at 1, 0 is reserved
        Self::new(1)
    }
}

impl IdGenerator {
    pub fn new(start: u32) -> Self {
        Self(Arc::new(AtomicU32::new(start)))
    }

    pub fn next(&self) -> FileId {
        self.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }
}

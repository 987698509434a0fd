// Copyright (c) 2024-present, caskdb
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::sync::atomic::AtomicU64;

/// Runtime accounting of superseded bytes in a segment
#[derive(Debug, Default)]
pub struct StaleStats {
    stale_bytes: AtomicU64,
}

impl StaleStats {
    /// Adds superseded bytes, returning the new total.
    pub fn add_stale_bytes(&self, x: u64) -> u64 {
        self.stale_bytes
            .fetch_add(x, std::sync::atomic::Ordering::AcqRel)
            + x
    }

    /// Clears the counter, used when the segment is enqueued for merging.
    pub fn reset(&self) {
        self.stale_bytes
            .store(0, std::sync::atomic::Ordering::Release);
    }

    /// Returns the amount of dead bytes in the segment
    pub fn stale_bytes(&self) -> u64 {
        self.stale_bytes.load(std::sync::atomic::Ordering::Acquire)
    }
}

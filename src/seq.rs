// Copyright (c) 2024-present, caskdb
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

/// Store-wide monotonic sequence number.
///
/// Every written record and tombstone carries one; it decides which of two
/// records for the same key is newer.
pub type SeqNo = u64;

/// Hands out strictly monotonic sequence numbers.
///
/// The raw source is a monotonic clock in nanoseconds. Two threads can
/// observe the same tick, so ties are broken by bumping past the last
/// issued number atomically; the result is strictly increasing across
/// all writers.
#[derive(Clone)]
pub struct SequenceGenerator {
    inner: Arc<SequenceGeneratorInner>,
}

struct SequenceGeneratorInner {
    /// Floor carried over from recovery, so a reopened store can never
    /// issue a number at or below anything already on disk
    base: u64,

    epoch: Instant,

    last: AtomicU64,
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SequenceGenerator {
    /// Creates a generator whose next number is strictly greater than `floor`.
    #[must_use]
    pub fn new(floor: SeqNo) -> Self {
        Self {
            inner: Arc::new(SequenceGeneratorInner {
                base: floor,
                epoch: Instant::now(),
                last: AtomicU64::new(floor),
            }),
        }
    }

    /// Returns the next sequence number.
    #[allow(clippy::expect_used)]
    pub fn next(&self) -> SeqNo {
        // NOTE: Truncation is OK, 2^64 ns is ~580 years of uptime
        #[allow(clippy::cast_possible_truncation)]
        let tick = self
            .inner
            .base
            .saturating_add(self.inner.epoch.elapsed().as_nanos() as u64);

        self.inner
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(tick.max(last + 1))
            })
            .expect("closure never returns None")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn seq_strictly_monotonic() {
        let gen = SequenceGenerator::default();

        let mut prev = gen.next();

        for _ in 0..10_000 {
            let next = gen.next();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn seq_respects_floor() {
        let floor = u64::MAX / 2;
        let gen = SequenceGenerator::new(floor);
        assert!(gen.next() > floor);
    }

    #[test]
    fn seq_monotonic_across_threads() {
        let gen = SequenceGenerator::default();

        let handles = (0..4)
            .map(|_| {
                let gen = gen.clone();

                std::thread::spawn(move || (0..1_000).map(|_| gen.next()).collect::<Vec<_>>())
            })
            .collect::<Vec<_>>();

        let mut all = vec![];

        for handle in handles {
            all.extend(handle.join().unwrap());
        }

        all.sort_unstable();
        all.dedup();

        assert_eq!(4_000, all.len());
    }
}

// Copyright (c) 2024-present, caskdb
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::time::{Duration, Instant};

/// Token bucket shaping the compactor's disk throughput.
///
/// Tokens are bytes. The bucket holds up to one second of budget; a caller
/// that outruns it is put to sleep for the fractional time needed to pay
/// off the debt, so sustained throughput converges on `bytes_per_sec`.
pub struct RateLimiter {
    bytes_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Creates a limiter with the given sustained rate.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn new(bytes_per_sec: u64) -> Self {
        let bytes_per_sec = bytes_per_sec as f64;

        Self {
            bytes_per_sec,
            // Start with a full second of budget
            tokens: bytes_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        self.tokens = (self.tokens + elapsed * self.bytes_per_sec).min(self.bytes_per_sec);
    }

    /// Takes `bytes` out of the bucket, sleeping if the budget is
    /// exhausted.
    #[allow(clippy::cast_precision_loss)]
    pub fn acquire(&mut self, bytes: u64) {
        self.refill();
        self.tokens -= bytes as f64;

        if self.tokens < 0.0 {
            let debt = Duration::from_secs_f64(-self.tokens / self.bytes_per_sec);
            std::thread::sleep(debt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn rate_limiter_burst_is_free() {
        let mut limiter = RateLimiter::new(1_000_000);

        let before = Instant::now();
        limiter.acquire(500_000);
        assert!(before.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn rate_limiter_shapes_throughput() {
        let mut limiter = RateLimiter::new(100_000);

        let before = Instant::now();

        // 150k over a 100k burst = at least ~0.5s of debt
        for _ in 0..5 {
            limiter.acquire(30_000);
        }

        assert!(before.elapsed() >= Duration::from_millis(300));
    }
}

// Copyright (c) 2024-present, caskdb
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    metrics::{MetricsCollector, NoopMetrics},
    Error,
};
use std::{sync::Arc, time::Duration};

/// Store configuration
#[derive(Clone)]
pub struct Config {
    /// Rollover threshold for data and tombstone files
    pub(crate) max_file_size: u64,

    /// Capacity hint for directory sizing
    pub(crate) number_of_records: usize,

    /// Compactor wake-up period
    pub(crate) merge_job_interval: Duration,

    /// Stale fraction at which a file becomes a merge candidate
    pub(crate) merge_threshold_per_file: f32,

    /// Minimum candidate count per merge batch
    pub(crate) merge_threshold_file_number: usize,

    /// Skip compaction entirely
    pub(crate) merge_disabled: bool,

    /// Compactor rewrite rate in bytes per second
    pub(crate) compaction_job_rate: u64,

    /// fsync cadence for compaction writes; `None` disables
    pub(crate) flush_data_size_bytes: Option<u64>,

    /// Directory shard count override
    pub(crate) directory_shard_count: Option<usize>,

    /// Latency collector
    pub(crate) metrics: Arc<dyn MetricsCollector>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_file_size: /* 1 GiB */ 1_024 * 1_024 * 1_024,
            number_of_records: 1_000_000,
            merge_job_interval: Duration::from_secs(10),
            merge_threshold_per_file: 0.75,
            merge_threshold_file_number: 4,
            merge_disabled: false,
            compaction_job_rate: /* 256 MiB/s */ 256 * 1_024 * 1_024,
            flush_data_size_bytes: None,
            directory_shard_count: None,
            metrics: Arc::new(NoopMetrics),
        }
    }
}

impl Config {
    /// Sets the maximum size of data and tombstone files.
    ///
    /// This heavily influences space amplification, as
    /// space reclamation works on a per-file basis.
    ///
    /// Default = 1 GiB
    #[must_use]
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Sets the expected number of records, used to size the key directory.
    ///
    /// Default = 1 million
    #[must_use]
    pub fn number_of_records(mut self, n: usize) -> Self {
        self.number_of_records = n;
        self
    }

    /// Sets how often the compactor checks for work.
    ///
    /// Default = 10 seconds
    #[must_use]
    pub fn merge_job_interval(mut self, interval: Duration) -> Self {
        self.merge_job_interval = interval;
        self
    }

    /// Sets the stale fraction (0, 1] at which a file becomes a merge
    /// candidate.
    ///
    /// Default = 0.75
    #[must_use]
    pub fn merge_threshold_per_file(mut self, ratio: f32) -> Self {
        self.merge_threshold_per_file = ratio;
        self
    }

    /// Sets the minimum number of candidates needed before a merge batch
    /// runs.
    ///
    /// Default = 4
    #[must_use]
    pub fn merge_threshold_file_number(mut self, n: usize) -> Self {
        self.merge_threshold_file_number = n;
        self
    }

    /// Disables background compaction entirely.
    #[must_use]
    pub fn merge_disabled(mut self, disabled: bool) -> Self {
        self.merge_disabled = disabled;
        self
    }

    /// Sets the compactor's rewrite rate in bytes per second.
    ///
    /// Default = 256 MiB/s
    #[must_use]
    pub fn compaction_job_rate(mut self, bytes_per_sec: u64) -> Self {
        self.compaction_job_rate = bytes_per_sec;
        self
    }

    /// Sets how many bytes the compactor writes between fsyncs of the
    /// merge destination; `None` leaves flushing to the OS.
    ///
    /// Default = `None`
    #[must_use]
    pub fn flush_data_size_bytes(mut self, bytes: Option<u64>) -> Self {
        self.flush_data_size_bytes = bytes;
        self
    }

    /// Overrides the key directory's shard count (rounded up to a power
    /// of two). By default the directory uses twice the available
    /// hardware parallelism.
    #[must_use]
    pub fn directory_shard_count(mut self, shards: usize) -> Self {
        self.directory_shard_count = Some(shards);
        self
    }

    /// Sets the latency collector invoked around every client operation.
    #[must_use]
    pub fn metrics(mut self, collector: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = collector;
        self
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.max_file_size == 0 || self.max_file_size > u64::from(u32::MAX) {
            return Err(Error::InvalidArgument(
                "max_file_size must be in 1..=u32::MAX",
            ));
        }

        if !(self.merge_threshold_per_file > 0.0 && self.merge_threshold_per_file <= 1.0) {
            return Err(Error::InvalidArgument(
                "merge_threshold_per_file must be in (0, 1]",
            ));
        }

        if self.merge_threshold_file_number == 0 {
            return Err(Error::InvalidArgument(
                "merge_threshold_file_number must be positive",
            ));
        }

        if self.compaction_job_rate == 0 {
            return Err(Error::InvalidArgument(
                "compaction_job_rate must be positive",
            ));
        }

        if self.number_of_records == 0 {
            return Err(Error::InvalidArgument(
                "number_of_records must be positive",
            ));
        }

        Ok(())
    }
}

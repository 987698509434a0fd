// Copyright (c) 2024-present, caskdb
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Embeddable, persistent key-value store for point-read-heavy workloads.
//!
//! All writes are appended to rolling segment files on disk; a compact
//! in-memory key directory maps every live key to the exact location of
//! its current value:
//!
//! [record 0][record 1][record 2][record 3][record 4]
//!
//! Each segment is paired with an index file that holds one small entry
//! per record, so the directory can be rebuilt at open without reading
//! any value bytes. Deletes append to a separate tombstone log and the
//! data segments are never touched in place.
//!
//! As keys are rewritten or deleted, old records turn into dead weight.
//! A background compactor watches per-file stale accounting and rewrites
//! segments whose live fraction has dropped below a threshold, handing
//! the directory over to the new location record by record. Readers are
//! never blocked: the write path, read path and compactor only meet at
//! the directory's atomic operations.
//!
//! The working set of keys (not values) must fit in memory. There is no
//! ordered iteration and no multi-key transactions; the trade is a flat,
//! predictable cost for point reads and writes of small-to-medium values.
//!
//! # Example usage
//!
//! ```
//! use caskdb::{Config, Store};
//!
//! # fn main() -> caskdb::Result<()> {
//! # let folder = tempfile::tempdir()?;
//! # let path = folder.path();
//! let store = Store::open(path, Config::default())?;
//!
//! store.put(b"planet", b"saturn")?;
//! assert_eq!(Some(b"saturn".to_vec()), store.get(b"planet")?);
//! assert_eq!(1, store.size());
//!
//! store.delete(b"planet")?;
//! assert_eq!(None, store.get(b"planet")?);
//!
//! store.close()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]

mod coding;
mod compactor;
mod config;
mod directory;
mod error;
mod handle;
mod id;
mod metrics;
mod path;
mod rate_limiter;
mod record;
mod recovery;
mod segment;
mod seq;
mod store;
mod tombstone;
mod version;

pub(crate) type HashMap<K, V> = std::collections::HashMap<K, V, xxhash_rust::xxh3::Xxh3Builder>;

pub use {
    config::Config,
    error::{Error, Result},
    handle::RecordHandle,
    id::FileId,
    metrics::{MetricsCollector, NoopMetrics, StoreOp},
    record::MAX_KEY_SIZE,
    seq::SeqNo,
    store::Store,
    version::Version,
};

#[doc(hidden)]
pub use {
    directory::KeyDirectory,
    record::{IndexEntry, Record, TombstoneEntry},
    segment::Segment,
};

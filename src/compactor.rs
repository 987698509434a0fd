// Copyright (c) 2024-present, caskdb
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Background space reclamation.
//!
//! A single worker thread wakes up periodically, drains merge candidates
//! and rewrites their live records into a fresh destination segment. The
//! hand-off is a per-record compare-and-swap on the directory: a record
//! whose entry was concurrently superseded is simply skipped. A source
//! file is unlinked only after its surviving records are durable in the
//! destination and the directory no longer references it, which is what
//! makes the reader's lookup-retry sufficient.

use crate::{
    id::FileId,
    rate_limiter::RateLimiter,
    record::IndexEntry,
    segment::Segment,
    store::{Store, StoreInner},
};
use std::sync::{
    atomic::Ordering,
    mpsc::{self, RecvTimeoutError},
    Arc,
};

/// Offset of the sequence number inside a record header
/// (checksum + key_len + value_len come first).
const RECORD_SEQ_OFFSET: usize = 4 + 1 + 4;

pub(crate) struct CompactorHandle {
    tx: mpsc::Sender<()>,
    thread: std::thread::JoinHandle<()>,
}

impl CompactorHandle {
    /// Signals the worker and waits for it to exit.
    pub(crate) fn stop(self) {
        let _ = self.tx.send(());

        if self.thread.join().is_err() {
            log::error!("Compactor thread panicked");
        }
    }
}

/// Starts the merge worker for a store.
///
/// The thread holds only a weak back-reference, so dropping the last
/// store handle lets it wind down on its own.
#[allow(clippy::expect_used)]
pub(crate) fn spawn(store: &Store) -> CompactorHandle {
    let weak = Arc::downgrade(&store.0);
    let interval = store.config.merge_job_interval;

    let (tx, rx) = mpsc::channel();

    let thread = std::thread::Builder::new()
        .name("caskdb-merge".into())
        .spawn(move || {
            log::debug!("Merge worker started, interval {interval:?}");

            loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}

                    // Shutdown signal, or the store is gone
                    _ => break,
                }

                let Some(store) = weak.upgrade() else {
                    break;
                };

                if store.closed.load(Ordering::Acquire) {
                    break;
                }

                if let Err(e) = store.merge_pass() {
                    log::error!("Merge pass failed: {e:?}");
                }
            }

            log::debug!("Merge worker exiting");
        })
        .expect("should spawn merge worker");

    CompactorHandle { tx, thread }
}

impl Store {
    /// Runs one merge pass synchronously.
    ///
    /// This is what the background worker runs on its timer.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs outside the per-source
    /// loop; per-source failures are logged and skipped.
    #[doc(hidden)]
    pub fn force_merge_pass(&self) -> crate::Result<()> {
        self.0.merge_pass()
    }
}

impl StoreInner {
    #[allow(clippy::expect_used)]
    pub(crate) fn merge_pass(&self) -> crate::Result<()> {
        // IMPORTANT: Only allow 1 merge at any given time
        let _guard = self.merge_lock.lock().expect("lock is poisoned");

        let batch = {
            let mut candidates = self.candidates.lock().expect("lock is poisoned");

            if candidates.len() < self.config.merge_threshold_file_number {
                return Ok(());
            }

            let current_id = self.current_id.load(Ordering::Acquire);

            let mut batch = vec![];
            let mut requeued = vec![];

            while batch.len() < self.config.merge_threshold_file_number {
                let Some(id) = candidates.pop_front() else {
                    break;
                };

                // The current write segment is never merged; it stays
                // queued until it has been sealed by rollover
                if id == current_id {
                    requeued.push(id);
                } else {
                    batch.push(id);
                }
            }

            candidates.extend(requeued);

            batch
        };

        if batch.is_empty() {
            return Ok(());
        }

        self.merge(&batch)
    }

    #[allow(clippy::expect_used)]
    fn merge(&self, batch: &[FileId]) -> crate::Result<()> {
        log::info!("Merging files {batch:?}");

        let mut dest = self.new_merge_destination()?;
        let mut limiter = RateLimiter::new(self.config.compaction_job_rate);
        let mut unflushed = 0;

        for &source_id in batch {
            if self.closed.load(Ordering::Acquire) {
                break;
            }

            match self.merge_one_file(source_id, &mut dest, &mut limiter, &mut unflushed) {
                // Cancelled mid-file; records not copied yet still live
                // in the source, which must stay on disk
                Ok(false) => break,

                Ok(true) => {}

                Err(e) => {
                    // Partial work in the destination stays; it is a
                    // normal segment the directory may already point to
                    log::error!("Merging file #{source_id} failed: {e:?}, skipping source");
                    continue;
                }
            }

            // The source may only vanish once its surviving records are
            // durable elsewhere and the directory has been swapped over
            dest.force(false)?;

            let removed = self
                .files
                .write()
                .expect("lock is poisoned")
                .remove(&source_id);

            if let Some(source) = removed {
                if let Err(e) = source.delete() {
                    log::warn!("Could not delete merged file #{source_id}: {e:?}");
                }
            }
        }

        dest.force(true)?;

        if dest.size() == 0 {
            log::debug!("Merge destination #{} stayed empty, deleting", dest.id);

            self.files
                .write()
                .expect("lock is poisoned")
                .remove(&dest.id);

            dest.delete()?;
        }

        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn new_merge_destination(&self) -> crate::Result<Arc<Segment>> {
        let id = self.id_gen.next();
        let segment = Arc::new(Segment::create(&self.path, id)?);

        // Readers must be able to resolve the id as soon as the first
        // CAS can point at it
        self.files
            .write()
            .expect("lock is poisoned")
            .insert(id, segment.clone());

        Ok(segment)
    }

    /// Copies one source file's fresh records into the destination.
    ///
    /// Returns `Ok(false)` when cancelled mid-file, in which case the
    /// source must not be deleted.
    #[allow(clippy::indexing_slicing)] // record_size >= header size, checked at decode
    fn merge_one_file(
        &self,
        source_id: FileId,
        dest: &mut Arc<Segment>,
        limiter: &mut RateLimiter,
        unflushed: &mut u64,
    ) -> crate::Result<bool> {
        let source = {
            #[allow(clippy::expect_used)]
            let files = self.files.read().expect("lock is poisoned");
            files.get(&source_id).cloned()
        };

        let Some(source) = source else {
            log::warn!("File #{source_id} was queued for merge but is gone");
            return Ok(true);
        };

        let mut copied = 0u64;

        for entry in source.index_reader()? {
            if self.closed.load(Ordering::Acquire) {
                return Ok(false);
            }

            let entry = entry?;
            let value_offset = entry.value_offset();

            let current = self.directory.get(&entry.key);

            let fresh = if entry.is_tombstone() {
                current.is_none()
            } else {
                current.is_some_and(|h| {
                    h.file_id == source_id && h.value_offset == value_offset
                })
            };

            if !fresh {
                continue;
            }

            limiter.acquire(u64::from(entry.record_size));

            if dest.size() > 0
                && dest.size() + u64::from(entry.record_size) > self.config.max_file_size
            {
                self.roll_merge_destination(dest)?;
            }

            let mut raw = source.read_raw(entry.record_offset, entry.record_size)?;

            // Rewritten records get a fresh sequence number, so that a
            // crash between writing the destination and deleting the
            // source resolves in the destination's favor at recovery.
            // The checksum covers key and value only, so patching the
            // header keeps the record valid.
            let new_seq = self.seq_gen.next();
            raw[RECORD_SEQ_OFFSET..RECORD_SEQ_OFFSET + 8]
                .copy_from_slice(&new_seq.to_be_bytes());

            let new_entry = IndexEntry {
                seq: new_seq,
                ..entry.clone()
            };

            let new_handle = dest.append_raw(&raw, &new_entry)?;

            if !entry.is_tombstone() {
                #[allow(clippy::expect_used)]
                let expected = current.expect("freshness check saw an entry");

                if !self.directory.replace(&entry.key, &expected, new_handle) {
                    // Lost the race against a concurrent write; the
                    // copied bytes are dead weight in the destination,
                    // which will itself be merged later
                    self.mark_stale(dest.id, u64::from(entry.record_size));
                }
            }

            copied += u64::from(entry.record_size);

            *unflushed += u64::from(entry.record_size);
            if let Some(cap) = self.config.flush_data_size_bytes {
                if *unflushed > cap {
                    dest.force(false)?;
                    *unflushed = 0;
                }
            }
        }

        log::debug!("Copied {copied} live bytes from file #{source_id} to #{}", dest.id);

        Ok(true)
    }

    #[allow(clippy::expect_used)]
    fn roll_merge_destination(&self, dest: &mut Arc<Segment>) -> crate::Result<()> {
        dest.force(true)?;

        let next = self.new_merge_destination()?;
        log::debug!("Rolling over merge destination #{} -> #{}", dest.id, next.id);
        *dest = next;

        Ok(())
    }
}

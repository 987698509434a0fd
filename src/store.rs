// Copyright (c) 2024-present, caskdb
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    compactor::CompactorHandle,
    config::Config,
    directory::KeyDirectory,
    handle::RecordHandle,
    id::{FileId, IdGenerator},
    metrics::StoreOp,
    path::absolute_path,
    record::{TombstoneEntry, MAX_KEY_SIZE, RECORD_HEADER_SIZE},
    recovery,
    segment::Segment,
    seq::SequenceGenerator,
    tombstone::TombstoneLog,
    version::Version,
    Error, HashMap,
};
use std::{
    collections::VecDeque,
    fs::File,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Instant,
};

/// Marker file carrying the disk format version
pub(crate) const STORE_MARKER: &str = ".caskdb";

/// Lock file guarding against concurrent opens of the same directory
pub(crate) const LOCK_FILE: &str = "LOCK";

/// An embeddable, persistent key-value store
///
/// Cheaply cloneable handle; all clones refer to the same store.
#[derive(Clone)]
pub struct Store(pub(crate) Arc<StoreInner>);

impl std::ops::Deref for Store {
    type Target = StoreInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub(crate) struct WriterState {
    pub(crate) current: Arc<Segment>,
    pub(crate) tombstones: TombstoneLog,
}

#[allow(clippy::module_name_repetitions)]
pub struct StoreInner {
    /// Base folder
    pub path: PathBuf,

    /// Store configuration
    pub(crate) config: Config,

    /// In-memory key directory
    pub(crate) directory: KeyDirectory,

    /// Segment file map, keyed by file id
    pub(crate) files: RwLock<HashMap<FileId, Arc<Segment>>>,

    /// Serializes `put` and `delete`; owns the current write segment
    /// and the tombstone log
    pub(crate) writer: Mutex<WriterState>,

    /// File ids whose stale fraction crossed the merge threshold
    pub(crate) candidates: Mutex<VecDeque<FileId>>,

    /// Id of the current write segment, visible to the compactor
    pub(crate) current_id: AtomicU32,

    /// Guards the merge process to only allow one to happen at a time
    pub(crate) merge_lock: Mutex<()>,

    pub(crate) seq_gen: SequenceGenerator,

    pub(crate) id_gen: IdGenerator,

    pub(crate) closed: AtomicBool,

    compactor: Mutex<Option<CompactorHandle>>,

    /// Exclusive directory lock, held for the store's lifetime
    lock_file: File,
}

impl Store {
    /// Creates or recovers a store in the given directory.
    ///
    /// Recovery rebuilds the key directory and stale accounting from the
    /// on-disk index and tombstone files before any operation is served.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, if another process holds
    /// the directory, or if a configuration value is out of range.
    #[allow(clippy::expect_used)]
    pub fn open<P: Into<PathBuf>>(path: P, config: Config) -> crate::Result<Self> {
        config.validate()?;

        let path = absolute_path(path.into());
        std::fs::create_dir_all(&path)?;

        let lock_file = File::create(path.join(LOCK_FILE))?;
        fs4::FileExt::try_lock_exclusive(&lock_file)?;

        let directory = KeyDirectory::new(
            config.number_of_records,
            config.directory_shard_count,
        );

        let marker_path = path.join(STORE_MARKER);

        let recovered = if marker_path.try_exists()? {
            let bytes = std::fs::read(&marker_path)?;

            match Version::parse_file_header(&bytes) {
                Some(Version::V1) => {}
                None => return Err(Error::InvalidVersion(None)),
            }

            log::info!("Recovering store at {}", path.display());
            Some(recovery::recover(&path, &directory)?)
        } else {
            log::trace!("Creating store at {}", path.display());

            // NOTE: fsync marker and folder so a half-created store
            // cannot be mistaken for a valid one
            let mut file = File::create(&marker_path)?;
            Version::V1.write_file_header(&mut file)?;
            file.sync_all()?;

            #[cfg(not(target_os = "windows"))]
            {
                let folder = File::open(&path)?;
                folder.sync_all()?;
            }

            None
        };

        let (files, id_gen, seq_gen) = match recovered {
            Some(state) => (
                state.files,
                IdGenerator::new(state.max_file_id + 1),
                SequenceGenerator::new(state.max_seq),
            ),
            None => (
                HashMap::default(),
                IdGenerator::default(),
                SequenceGenerator::default(),
            ),
        };

        let current_id = id_gen.next();
        let current = Arc::new(Segment::create(&path, current_id)?);

        let mut files = files;
        files.insert(current_id, current.clone());

        let tombstones = TombstoneLog::create(&path, id_gen.clone(), config.max_file_size)?;

        let store = Self(Arc::new(StoreInner {
            path,
            directory,
            files: RwLock::new(files),
            writer: Mutex::new(WriterState {
                current,
                tombstones,
            }),
            candidates: Mutex::new(VecDeque::new()),
            current_id: AtomicU32::new(current_id),
            merge_lock: Mutex::new(()),
            seq_gen,
            id_gen,
            closed: AtomicBool::new(false),
            compactor: Mutex::new(None),
            lock_file,
            config,
        }));

        store.enqueue_recovered_candidates();

        if !store.config.merge_disabled {
            let handle = crate::compactor::spawn(&store);
            *store.compactor.lock().expect("lock is poisoned") = Some(handle);
        }

        Ok(store)
    }

    /// Files whose stale fraction already crossed the threshold during
    /// recovery go straight into the candidate set.
    #[allow(clippy::expect_used)]
    fn enqueue_recovered_candidates(&self) {
        let files = self.files.read().expect("lock is poisoned");
        let current_id = self.current_id.load(Ordering::Acquire);

        for segment in files.values() {
            if segment.id != current_id
                && segment.stale_ratio() >= self.config.merge_threshold_per_file
            {
                self.promote_candidate(segment);
            }
        }
    }

    fn check_open(&self) -> crate::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn validate_key(key: &[u8]) -> crate::Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("key must not be empty"));
        }
        if key.len() > MAX_KEY_SIZE {
            return Err(Error::InvalidArgument("key must be at most 127 bytes"));
        }
        Ok(())
    }

    /// Writes a key-value pair.
    ///
    /// An I/O failure leaves the directory untouched, so readers keep
    /// seeing the previous value.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or `InvalidArgument` for
    /// an oversized key.
    #[allow(clippy::expect_used)]
    pub fn put(&self, key: &[u8], value: &[u8]) -> crate::Result<()> {
        self.check_open()?;
        Self::validate_key(key)?;

        let record_size = u64::from(RECORD_HEADER_SIZE) + key.len() as u64 + value.len() as u64;

        if record_size > u64::from(u32::MAX) {
            return Err(Error::InvalidArgument("value is too large"));
        }

        let start = Instant::now();

        let mut state = self.writer.lock().expect("lock is poisoned");

        // A close may have slipped in while we waited for the lock
        self.check_open()?;

        let seq = self.seq_gen.next();

        if state.current.size() > 0 && state.current.size() + record_size > self.config.max_file_size
        {
            self.roll_over(&mut state)?;
        }

        let handle = state.current.append(key, value, seq, 0)?;

        // Account the previous version's bytes as stale before the
        // directory forgets where it was
        if let Some(prev) = self.directory.get(key) {
            self.mark_stale(prev.file_id, Self::stale_record_size(key.len(), &prev));
        }

        self.directory.put(key, handle);

        drop(state);

        // NOTE: Truncation is OK, nobody watches a single op for 580 years
        #[allow(clippy::cast_possible_truncation)]
        self.config
            .metrics
            .observe(StoreOp::Put, start.elapsed().as_nanos() as u64);

        Ok(())
    }

    /// Returns the current value for a key, or `None` if there is none.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or `Corruption` if the
    /// stored record fails its checksum.
    #[allow(clippy::expect_used)]
    pub fn get(&self, key: &[u8]) -> crate::Result<Option<Vec<u8>>> {
        self.check_open()?;

        let start = Instant::now();

        let Some(mut handle) = self.directory.get(key) else {
            return Ok(None);
        };

        // The compactor deletes a source file only after CAS-ing the
        // directory away from it, so one re-lookup is enough to chase
        // the rewritten location; the bound protects against bugs, not
        // against the race itself.
        for _ in 0..3 {
            let segment = {
                let files = self.files.read().expect("lock is poisoned");
                files.get(&handle.file_id).cloned()
            };

            let Some(segment) = segment else {
                match self.directory.get(key) {
                    Some(next) => {
                        handle = next;
                        continue;
                    }
                    None => return Ok(None),
                }
            };

            let record =
                segment.read_record(key.len(), handle.value_offset, handle.value_size)?;

            if record.key != key {
                return Err(Error::Corruption(
                    crate::coding::DecodeError::InvalidHeader("record key mismatch"),
                ));
            }

            // NOTE: Truncation is OK, nobody watches a single op for 580 years
            #[allow(clippy::cast_possible_truncation)]
            self.config
                .metrics
                .observe(StoreOp::Get, start.elapsed().as_nanos() as u64);

            return Ok(Some(record.value));
        }

        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "directory entry points to a vanished segment",
        )))
    }

    /// Deletes a key.
    ///
    /// Deleting an absent key is a no-op. The data segments are untouched;
    /// the deletion is recorded in the tombstone log and the old record's
    /// bytes become stale.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or `InvalidArgument` for
    /// an oversized key.
    #[allow(clippy::expect_used)]
    pub fn delete(&self, key: &[u8]) -> crate::Result<()> {
        self.check_open()?;
        Self::validate_key(key)?;

        let start = Instant::now();

        let mut state = self.writer.lock().expect("lock is poisoned");

        // A close may have slipped in while we waited for the lock
        self.check_open()?;

        if let Some(prev) = self.directory.remove(key) {
            let seq = self.seq_gen.next();

            state.tombstones.append(&TombstoneEntry {
                seq,
                key: key.to_vec(),
            })?;

            self.mark_stale(prev.file_id, Self::stale_record_size(key.len(), &prev));
        }

        drop(state);

        // NOTE: Truncation is OK, nobody watches a single op for 580 years
        #[allow(clippy::cast_possible_truncation)]
        self.config
            .metrics
            .observe(StoreOp::Delete, start.elapsed().as_nanos() as u64);

        Ok(())
    }

    /// Number of live keys.
    #[must_use]
    pub fn size(&self) -> usize {
        self.directory.len()
    }

    /// Stops the compactor, flushes and closes all files.
    ///
    /// Operations after `close` fail with [`Error::Closed`]. Calling
    /// `close` twice is a no-op.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    #[allow(clippy::expect_used)]
    pub fn close(&self) -> crate::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        log::debug!("Closing store at {}", self.path.display());

        let compactor = self.compactor.lock().expect("lock is poisoned").take();
        if let Some(handle) = compactor {
            handle.stop();
        }

        let mut state = self.writer.lock().expect("lock is poisoned");

        // A write segment that never received a record is not sealed,
        // it is removed
        if state.current.size() == 0 {
            self.files
                .write()
                .expect("lock is poisoned")
                .remove(&state.current.id);
            state.current.delete()?;
        } else {
            state.current.force(true)?;
        }

        state.tombstones.close()?;
        drop(state);

        self.directory.close();
        fs4::FileExt::unlock(&self.lock_file)?;

        Ok(())
    }

    /// On-disk size of a record, as charged to stale accounting.
    pub(crate) fn stale_record_size(key_len: usize, handle: &RecordHandle) -> u64 {
        u64::from(RECORD_HEADER_SIZE) + key_len as u64 + u64::from(handle.value_size)
    }

    /// Looks up the current handle for a key.
    #[doc(hidden)]
    #[must_use]
    pub fn get_handle(&self, key: &[u8]) -> Option<RecordHandle> {
        self.directory.get(key)
    }

    /// Lists all file ids in the segment file map.
    #[allow(clippy::expect_used)]
    #[doc(hidden)]
    #[must_use]
    pub fn list_file_ids(&self) -> Vec<FileId> {
        let mut ids = self
            .files
            .read()
            .expect("lock is poisoned")
            .keys()
            .copied()
            .collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    /// Id of the current write segment.
    #[doc(hidden)]
    #[must_use]
    pub fn current_file_id(&self) -> FileId {
        self.current_id.load(Ordering::Acquire)
    }

    /// Accumulated stale bytes of a file.
    #[allow(clippy::expect_used)]
    #[doc(hidden)]
    #[must_use]
    pub fn stale_bytes_of(&self, id: FileId) -> Option<u64> {
        self.files
            .read()
            .expect("lock is poisoned")
            .get(&id)
            .map(|segment| segment.stale.stale_bytes())
    }

    /// Current merge candidates, in queue order.
    #[allow(clippy::expect_used)]
    #[doc(hidden)]
    #[must_use]
    pub fn candidate_ids(&self) -> Vec<FileId> {
        self.candidates
            .lock()
            .expect("lock is poisoned")
            .iter()
            .copied()
            .collect()
    }
}

impl StoreInner {
    /// Seals the current write segment and installs a fresh one.
    #[allow(clippy::expect_used)]
    pub(crate) fn roll_over(&self, state: &mut WriterState) -> crate::Result<()> {
        state.current.force(true)?;

        let id = self.id_gen.next();
        log::debug!("Rolling over write segment #{} -> #{id}", state.current.id);

        let segment = Arc::new(Segment::create(&self.path, id)?);

        self.files
            .write()
            .expect("lock is poisoned")
            .insert(id, segment.clone());

        state.current = segment;
        self.current_id.store(id, Ordering::Release);

        Ok(())
    }

    /// Adds superseded bytes to a file's stale total, promoting it to
    /// merge candidate when it crosses the configured fraction.
    #[allow(clippy::expect_used)]
    pub(crate) fn mark_stale(&self, file_id: FileId, bytes: u64) {
        let segment = {
            let files = self.files.read().expect("lock is poisoned");
            files.get(&file_id).cloned()
        };

        let Some(segment) = segment else {
            // Already merged away; its stale entry died with it
            return;
        };

        let total = segment.stale.add_stale_bytes(bytes);

        // NOTE: Precision is not important here
        #[allow(clippy::cast_precision_loss)]
        if total as f32 >= self.config.merge_threshold_per_file * segment.size() as f32 {
            self.promote_candidate(&segment);
        }
    }

    #[allow(clippy::expect_used)]
    pub(crate) fn promote_candidate(&self, segment: &Segment) {
        let mut candidates = self.candidates.lock().expect("lock is poisoned");

        if !candidates.contains(&segment.id) {
            log::debug!(
                "File #{} crossed stale threshold ({} of {} bytes), queueing for merge",
                segment.id,
                segment.stale.stale_bytes(),
                segment.size(),
            );
            candidates.push_back(segment.id);
        }

        segment.stale.reset();
    }
}

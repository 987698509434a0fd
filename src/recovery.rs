// Copyright (c) 2024-present, caskdb
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Directory reconstruction at open.
//!
//! Index files are replayed oldest-first, but records of one key can be
//! scattered across files in any order once compaction has run (a merge
//! destination has a high file id yet holds old records). Comparing
//! sequence numbers makes the replay order irrelevant: the highest
//! sequence number for a key always wins.

use crate::{
    directory::KeyDirectory,
    handle::RecordHandle,
    id::FileId,
    segment::{
        parse_file_id, Segment, DATA_FILE_EXT, INDEX_FILE_EXT, TOMBSTONE_FILE_EXT,
    },
    seq::SeqNo,
    store::Store,
    tombstone::TombstoneReader,
    HashMap,
};
use std::{path::Path, sync::Arc};

pub(crate) struct RecoveredState {
    pub files: HashMap<FileId, Arc<Segment>>,
    pub max_file_id: FileId,
    pub max_seq: SeqNo,
}

/// Rebuilds the key directory and stale accounting from the index and
/// tombstone files in `path`.
///
/// Runs strictly before any client operation is served.
pub(crate) fn recover(path: &Path, directory: &KeyDirectory) -> crate::Result<RecoveredState> {
    let mut data_ids = vec![];
    let mut index_ids = vec![];
    let mut tombstone_ids = vec![];

    for dirent in std::fs::read_dir(path)? {
        let dirent = dirent?;

        let Some(name) = dirent.file_name().to_str().map(String::from) else {
            continue;
        };

        if let Some(id) = parse_file_id(&name, DATA_FILE_EXT) {
            data_ids.push(id);
        } else if let Some(id) = parse_file_id(&name, INDEX_FILE_EXT) {
            index_ids.push(id);
        } else if let Some(id) = parse_file_id(&name, TOMBSTONE_FILE_EXT) {
            tombstone_ids.push(id);
        }
    }

    data_ids.sort_unstable();
    index_ids.sort_unstable();
    tombstone_ids.sort_unstable();

    log::debug!(
        "Recovering {} data files, {} index files, {} tombstone files",
        data_ids.len(),
        index_ids.len(),
        tombstone_ids.len(),
    );

    let max_file_id = data_ids
        .iter()
        .chain(&tombstone_ids)
        .chain(&index_ids)
        .copied()
        .max()
        .unwrap_or_default();

    let mut files: HashMap<FileId, Arc<Segment>> = HashMap::default();

    for &id in &data_ids {
        files.insert(id, Arc::new(Segment::open_for_reading(path, id)?));
    }

    let mut max_seq = 0;

    for &id in &index_ids {
        if !files.contains_key(&id) {
            log::warn!("Index file #{id} has no data file, skipping");
            continue;
        }

        let reader = crate::segment::index::IndexReader::new(
            path.join(crate::segment::file_name(id, INDEX_FILE_EXT)),
            id,
        )?;

        replay_index_file(reader, directory, &files, &mut max_seq);
    }

    for &id in &tombstone_ids {
        let reader = TombstoneReader::new(
            path.join(crate::segment::file_name(id, TOMBSTONE_FILE_EXT)),
            id,
        )?;

        replay_tombstone_file(reader, directory, &mut max_seq);
    }

    log::debug!(
        "Recovered {} live keys, highest sequence number {max_seq}",
        directory.len(),
    );

    Ok(RecoveredState {
        files,
        max_file_id,
        max_seq,
    })
}

fn replay_index_file(
    reader: crate::segment::index::IndexReader,
    directory: &KeyDirectory,
    files: &HashMap<FileId, Arc<Segment>>,
    max_seq: &mut SeqNo,
) {
    let file_id = reader.file_id;

    for entry in reader {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                // Corruption truncates this index file; later files
                // still replay
                log::warn!("Index file #{file_id} truncated at corrupt entry: {e:?}");
                break;
            }
        };

        *max_seq = (*max_seq).max(entry.seq);

        if entry.is_tombstone() {
            continue;
        }

        let handle = RecordHandle {
            file_id,
            value_offset: entry.value_offset(),
            value_size: entry.value_size(),
            seq: entry.seq,
        };

        match directory.get(&entry.key) {
            None => directory.put(&entry.key, handle),
            Some(existing) if existing.seq < entry.seq => {
                // The version we are replacing is stale wherever it lives
                if let Some(segment) = files.get(&existing.file_id) {
                    segment
                        .stale
                        .add_stale_bytes(Store::stale_record_size(entry.key.len(), &existing));
                }

                directory.put(&entry.key, handle);
            }
            // An older record appearing later is already superseded
            Some(_) => {}
        }
    }
}

fn replay_tombstone_file(
    reader: TombstoneReader,
    directory: &KeyDirectory,
    max_seq: &mut SeqNo,
) {
    let file_id = reader.file_id;

    for entry in reader {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Tombstone file #{file_id} truncated at corrupt entry: {e:?}");
                break;
            }
        };

        *max_seq = (*max_seq).max(entry.seq);

        match directory.get(&entry.key) {
            Some(existing) if existing.seq < entry.seq => {
                directory.remove(&entry.key);
            }
            _ => {}
        }
    }
}

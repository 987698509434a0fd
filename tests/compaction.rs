mod common;

use caskdb::{Config, Store};
use test_log::test;

fn config() -> Config {
    Config::default()
        .max_file_size(1_000)
        .merge_disabled(true)
        .merge_threshold_per_file(0.5)
        .merge_threshold_file_number(2)
}

/// Fills one 1000-byte file with ten 100-byte records.
fn fill_file(store: &Store, keys: &[Vec<u8>]) -> caskdb::Result<()> {
    for key in keys {
        store.put(key, &common::value_of_record_size(key, 100))?;
    }
    Ok(())
}

#[test]
fn compaction_rewrites_live_records() -> caskdb::Result<()> {
    let folder = tempfile::tempdir()?;

    let store = Store::open(folder.path(), config())?;

    let keys: Vec<Vec<u8>> = (0..10).map(|i| format!("k{i}").into_bytes()).collect();

    // File A: first version of every key
    fill_file(&store, &keys)?;
    let file_a = store.get_handle(&keys[0]).unwrap().file_id;

    // File B: overwrites of every key; A turns fully stale and crosses
    // the 0.5 threshold
    fill_file(&store, &keys)?;
    let file_b = store.get_handle(&keys[0]).unwrap().file_id;
    assert_ne!(file_a, file_b);

    // File C: overwrite k0..k7 again; B turns 80% stale
    for key in keys.iter().take(8) {
        store.put(key, &common::value_of_record_size(key, 100))?;
    }
    let file_c = store.get_handle(&keys[0]).unwrap().file_id;

    assert_eq!(vec![file_a, file_b], store.candidate_ids());

    store.force_merge_pass()?;

    // Both sources are gone, from the file map and from disk
    let remaining = store.list_file_ids();
    assert!(!remaining.contains(&file_a));
    assert!(!remaining.contains(&file_b));

    // k8 and k9 were the only live records in the batch; they moved to
    // the merge destination, everything else still points at file C
    let dest = store.get_handle(&keys[8]).unwrap().file_id;
    assert!(dest > file_c);
    assert_eq!(dest, store.get_handle(&keys[9]).unwrap().file_id);

    for key in keys.iter().take(8) {
        assert_eq!(file_c, store.get_handle(key).unwrap().file_id);
    }

    // Every key still reads its latest value
    for key in &keys {
        assert_eq!(
            Some(common::value_of_record_size(key, 100)),
            store.get(key)?,
        );
    }
    assert_eq!(10, store.size());

    store.close()?;

    Ok(())
}

#[test]
fn compaction_drops_fully_stale_files() -> caskdb::Result<()> {
    let folder = tempfile::tempdir()?;

    let store = Store::open(folder.path(), config())?;

    let keys: Vec<Vec<u8>> = (0..10).map(|i| format!("k{i}").into_bytes()).collect();

    fill_file(&store, &keys)?;
    let file_a = store.get_handle(&keys[0]).unwrap().file_id;

    fill_file(&store, &keys)?;
    let file_b = store.get_handle(&keys[0]).unwrap().file_id;

    fill_file(&store, &keys)?;

    // A and B are both fully stale
    assert_eq!(vec![file_a, file_b], store.candidate_ids());

    let before = store.list_file_ids();

    store.force_merge_pass()?;

    // Nothing was live, so no destination survives either
    let after = store.list_file_ids();
    assert_eq!(before.len() - 2, after.len());
    assert!(!after.contains(&file_a));
    assert!(!after.contains(&file_b));

    for key in &keys {
        assert_eq!(
            Some(common::value_of_record_size(key, 100)),
            store.get(key)?,
        );
    }

    store.close()?;

    Ok(())
}

#[test]
fn current_write_segment_is_never_merged() -> caskdb::Result<()> {
    let folder = tempfile::tempdir()?;

    let store = Store::open(folder.path(), config())?;

    let keys: Vec<Vec<u8>> = (0..10).map(|i| format!("k{i}").into_bytes()).collect();

    fill_file(&store, &keys)?;
    let file_a = store.get_handle(&keys[0]).unwrap().file_id;

    // First overwrite of k0..k4 rolls into a new file and stales A;
    // the second round stales that new file itself while it is still
    // the current write segment
    for _ in 0..2 {
        for key in keys.iter().take(5) {
            store.put(key, &common::value_of_record_size(key, 100))?;
        }
    }

    let current = store.current_file_id();

    let candidates = store.candidate_ids();
    assert!(candidates.contains(&file_a));
    assert!(candidates.contains(&current));

    store.force_merge_pass()?;

    // The sealed candidate was merged; the current write segment was
    // skipped and stays queued for after it is sealed
    assert!(!store.list_file_ids().contains(&file_a));
    assert!(store.list_file_ids().contains(&current));
    assert_eq!(vec![current], store.candidate_ids());

    for key in &keys {
        assert_eq!(
            Some(common::value_of_record_size(key, 100)),
            store.get(key)?,
        );
    }
    assert_eq!(10, store.size());

    store.close()?;

    Ok(())
}

#[test]
fn merge_destination_rolls_over() -> caskdb::Result<()> {
    let folder = tempfile::tempdir()?;

    let store = Store::open(folder.path(), config().merge_threshold_file_number(3))?;

    // Three full files of distinct key families
    let families: Vec<Vec<Vec<u8>>> = [b'a', b'b', b'c']
        .iter()
        .map(|family| {
            (0..10)
                .map(|i| format!("{}{i}", *family as char).into_bytes())
                .collect()
        })
        .collect();

    for family in &families {
        fill_file(&store, family)?;
    }

    // Overwrite half of each family; all three files cross 0.5 and
    // fifteen records (1500 bytes) stay live in the batch
    for family in &families {
        for key in family.iter().take(5) {
            store.put(key, &common::value_of_record_size(key, 100))?;
        }
    }

    assert_eq!(3, store.candidate_ids().len());

    store.force_merge_pass()?;

    // 1500 live bytes cannot fit one 1000-byte destination, so the
    // merge rolled over mid-batch
    let dest_first = store.get_handle(&families[0][5]).unwrap().file_id;
    let dest_last = store.get_handle(&families[2][9]).unwrap().file_id;
    assert_ne!(dest_first, dest_last);

    for family in &families {
        for key in family {
            assert_eq!(
                Some(common::value_of_record_size(key, 100)),
                store.get(key)?,
            );
        }
    }
    assert_eq!(30, store.size());

    store.close()?;

    Ok(())
}

#[test]
fn compacted_store_survives_reopen() -> caskdb::Result<()> {
    let folder = tempfile::tempdir()?;

    {
        let store = Store::open(folder.path(), config())?;

        let keys: Vec<Vec<u8>> = (0..10).map(|i| format!("k{i}").into_bytes()).collect();

        fill_file(&store, &keys)?;
        fill_file(&store, &keys)?;
        for key in keys.iter().take(8) {
            store.put(key, &common::value_of_record_size(key, 100))?;
        }

        store.force_merge_pass()?;
        store.close()?;
    }

    {
        let store = Store::open(folder.path(), config())?;

        assert_eq!(10, store.size());

        for i in 0..10 {
            let key = format!("k{i}").into_bytes();
            assert_eq!(
                Some(common::value_of_record_size(&key, 100)),
                store.get(&key)?,
            );
        }

        store.close()?;
    }

    Ok(())
}

#[test]
fn background_compactor_kicks_in() -> caskdb::Result<()> {
    let folder = tempfile::tempdir()?;

    let store = Store::open(
        folder.path(),
        config()
            .merge_disabled(false)
            .merge_job_interval(std::time::Duration::from_millis(50)),
    )?;

    let keys: Vec<Vec<u8>> = (0..10).map(|i| format!("k{i}").into_bytes()).collect();

    fill_file(&store, &keys)?;
    let file_a = store.get_handle(&keys[0]).unwrap().file_id;

    fill_file(&store, &keys)?;
    let file_b = store.get_handle(&keys[0]).unwrap().file_id;

    fill_file(&store, &keys)?;

    // Wait for the worker to pick up the two candidates
    for _ in 0..100 {
        std::thread::sleep(std::time::Duration::from_millis(20));

        let remaining = store.list_file_ids();
        if !remaining.contains(&file_a) && !remaining.contains(&file_b) {
            break;
        }
    }

    let remaining = store.list_file_ids();
    assert!(!remaining.contains(&file_a));
    assert!(!remaining.contains(&file_b));

    for key in &keys {
        assert_eq!(
            Some(common::value_of_record_size(key, 100)),
            store.get(key)?,
        );
    }

    store.close()?;

    Ok(())
}

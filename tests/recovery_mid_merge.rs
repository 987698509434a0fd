mod common;

use caskdb::{Segment, Store};
use test_log::test;

/// Simulates a crash in the middle of a merge: the destination segment
/// and its index entries are fully written, but the source file was not
/// deleted yet. Recovery must prefer the destination entries (they carry
/// strictly higher sequence numbers) and still read the same values.
#[test]
fn recovery_prefers_destination_after_interrupted_merge() -> caskdb::Result<()> {
    let folder = tempfile::tempdir()?;

    let keys: [&[u8]; 3] = [b"a", b"b", b"c"];

    let originals = {
        let store = Store::open(folder.path(), common::tiny_config())?;

        for key in keys {
            store.put(key, &common::value_of_record_size(key, 60))?;
        }
        store.put(b"untouched", b"still here")?;

        let originals = keys.map(|key| store.get_handle(key).unwrap());
        store.close()?;
        originals
    };

    // Hand-write the merge destination the compactor would have left
    // behind: same values, rewritten under fresh (higher) sequence
    // numbers, while the source file stays on disk
    {
        let dest = Segment::create(folder.path(), 99)?;

        for (i, key) in keys.iter().enumerate() {
            let seq = originals[i].seq + 1_000;
            dest.append(key, &common::value_of_record_size(key, 60), seq, 0)?;
        }

        dest.force(true)?;
    }

    {
        let store = Store::open(folder.path(), common::tiny_config())?;

        // The destination's entries won the sequence number comparison
        for (i, key) in keys.iter().enumerate() {
            let handle = store.get_handle(key).unwrap();
            assert_eq!(99, handle.file_id);
            assert!(handle.seq > originals[i].seq);

            assert_eq!(Some(common::value_of_record_size(key, 60)), store.get(key)?);
        }

        assert_eq!(Some(b"still here".to_vec()), store.get(b"untouched")?);
        assert_eq!(4, store.size());

        // The superseded source records were counted as stale during
        // replay; the mostly-dead source is already a merge candidate
        assert!(store.candidate_ids().contains(&originals[0].file_id));

        store.close()?;
    }

    Ok(())
}

/// The mirror case: the merge wrote only part of its index entries
/// before the crash. Keys it reached resolve to the destination, keys
/// it did not reach still resolve to the source.
#[test]
fn partially_written_destination_is_safe() -> caskdb::Result<()> {
    let folder = tempfile::tempdir()?;

    let originals = {
        let store = Store::open(folder.path(), common::tiny_config())?;

        store.put(b"a", b"value-a")?;
        store.put(b"b", b"value-b")?;

        let originals = [
            store.get_handle(b"a").unwrap(),
            store.get_handle(b"b").unwrap(),
        ];
        store.close()?;
        originals
    };

    // Only "a" made it into the destination before the crash
    {
        let dest = Segment::create(folder.path(), 99)?;
        dest.append(b"a", b"value-a", originals[0].seq + 1_000, 0)?;
        dest.force(true)?;
    }

    {
        let store = Store::open(folder.path(), common::tiny_config())?;

        assert_eq!(99, store.get_handle(b"a").unwrap().file_id);
        assert_eq!(originals[1].file_id, store.get_handle(b"b").unwrap().file_id);

        assert_eq!(Some(b"value-a".to_vec()), store.get(b"a")?);
        assert_eq!(Some(b"value-b".to_vec()), store.get(b"b")?);

        store.close()?;
    }

    Ok(())
}

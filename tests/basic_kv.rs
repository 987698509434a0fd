mod common;

use caskdb::{Config, Error, Store};
use test_log::test;

#[test]
fn basic_kv() -> caskdb::Result<()> {
    let folder = tempfile::tempdir()?;

    let store = Store::open(folder.path(), Config::default())?;

    assert_eq!(0, store.size());
    assert_eq!(None, store.get(b"a")?);

    store.put(b"a", b"1")?;
    store.put(b"b", b"2")?;

    assert_eq!(Some(b"1".to_vec()), store.get(b"a")?);
    assert_eq!(Some(b"2".to_vec()), store.get(b"b")?);
    assert_eq!(2, store.size());

    // Overwrite: the last write wins
    store.put(b"a", b"one")?;
    assert_eq!(Some(b"one".to_vec()), store.get(b"a")?);
    assert_eq!(2, store.size());

    store.close()?;

    Ok(())
}

#[test]
fn basic_persistence() -> caskdb::Result<()> {
    let folder = tempfile::tempdir()?;

    {
        let store = Store::open(folder.path(), Config::default())?;
        store.put(b"a", b"1")?;
        store.put(b"b", b"2")?;
        store.close()?;
    }

    {
        let store = Store::open(folder.path(), Config::default())?;

        assert_eq!(Some(b"1".to_vec()), store.get(b"a")?);
        assert_eq!(Some(b"2".to_vec()), store.get(b"b")?);
        assert_eq!(2, store.size());

        store.close()?;
    }

    Ok(())
}

#[test]
fn repeated_identical_puts() -> caskdb::Result<()> {
    let folder = tempfile::tempdir()?;

    // Default merge threshold, so the 50% stale ratio below does not
    // already promote the file and reset its counter
    let store = Store::open(folder.path(), Config::default())?;

    store.put(b"a", b"same")?;
    let first = store.get_handle(b"a").unwrap();

    store.put(b"a", b"same")?;
    let second = store.get_handle(b"a").unwrap();

    assert_eq!(Some(b"same".to_vec()), store.get(b"a")?);
    assert_eq!(1, store.size());

    // The second put superseded the first record and bumped the
    // file's stale total by exactly that record's size
    assert!(second.seq > first.seq);
    assert_eq!(
        Some(common::RECORD_HEADER_SIZE + 1 + 4),
        store.stale_bytes_of(first.file_id),
    );

    store.close()?;

    Ok(())
}

#[test]
fn operations_after_close() -> caskdb::Result<()> {
    let folder = tempfile::tempdir()?;

    let store = Store::open(folder.path(), Config::default())?;
    store.put(b"a", b"1")?;
    store.close()?;

    assert!(matches!(store.put(b"a", b"2"), Err(Error::Closed)));
    assert!(matches!(store.get(b"a"), Err(Error::Closed)));
    assert!(matches!(store.delete(b"a"), Err(Error::Closed)));

    // Closing twice is fine
    store.close()?;

    Ok(())
}

#[test]
fn double_open_is_rejected() -> caskdb::Result<()> {
    let folder = tempfile::tempdir()?;

    let store = Store::open(folder.path(), Config::default())?;

    assert!(matches!(
        Store::open(folder.path(), Config::default()),
        Err(Error::Io(_)),
    ));

    store.close()?;

    // The lock is released on close
    let store = Store::open(folder.path(), Config::default())?;
    store.close()?;

    Ok(())
}

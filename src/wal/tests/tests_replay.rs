use tempfile::tempdir;

use crate::wal::Wal;

#[test]
fn read_entries_returns_puts_and_deletes_in_order() {
    let dir = tempdir().unwrap();
    let wal = Wal::open(dir.path().join("wal.log")).unwrap();

    wal.put(b"a", b"1").unwrap();
    wal.put(b"b", b"2").unwrap();
    wal.delete(b"a").unwrap();
    wal.persist().unwrap();

    let entries = wal.read_entries().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].key, b"a");
    assert_eq!(entries[0].value, b"1");
    assert!(!entries[0].tombstone);
    assert_eq!(entries[2].key, b"a");
    assert!(entries[2].tombstone);
    assert!(entries[2].value.is_empty());
}

#[test]
fn replay_applies_records_via_callback() {
    let dir = tempdir().unwrap();
    let wal = Wal::open(dir.path().join("wal.log")).unwrap();

    wal.put(b"a", b"1").unwrap();
    wal.put(b"a", b"2").unwrap();
    wal.persist().unwrap();

    let mut seen = Vec::new();
    wal.replay(|entry| seen.push(entry)).unwrap();

    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].value, b"2");
}

#[test]
fn malformed_trailing_line_is_skipped_not_fatal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");
    let wal = Wal::open(&path).unwrap();

    wal.put(b"a", b"1").unwrap();
    wal.persist().unwrap();

    // Simulate a crash mid-write: an incomplete trailing record with no
    // terminating newline.
    use std::io::Write;
    let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    f.write_all(b"+|b|2").unwrap();

    let entries = wal.read_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, b"a");
}

#[test]
fn empty_wal_replays_nothing() {
    let dir = tempdir().unwrap();
    let wal = Wal::open(dir.path().join("wal.log")).unwrap();
    assert!(wal.read_entries().unwrap().is_empty());
}

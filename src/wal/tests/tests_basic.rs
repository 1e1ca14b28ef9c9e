use tempfile::tempdir;

use crate::wal::Wal;

#[test]
fn write_is_not_visible_until_persist() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");
    let wal = Wal::open(&path).unwrap();

    wal.put(b"a", b"1").unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

    wal.persist().unwrap();
    assert!(std::fs::metadata(&path).unwrap().len() > 0);
}

#[test]
fn on_disk_format_matches_spec() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");
    let wal = Wal::open(&path).unwrap();

    wal.put(b"a", b"1").unwrap();
    wal.delete(b"b").unwrap();
    wal.persist().unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents, "+|a|1|\n-|b|\n");
}

#[test]
fn rejects_fields_with_reserved_bytes() {
    let dir = tempdir().unwrap();
    let wal = Wal::open(dir.path().join("wal.log")).unwrap();

    assert!(wal.put(b"a|b", b"1").is_err());
    assert!(wal.put(b"a", b"1\n2").is_err());
}

#[test]
fn persist_with_no_pending_writes_is_a_no_op() {
    let dir = tempdir().unwrap();
    let wal = Wal::open(dir.path().join("wal.log")).unwrap();
    wal.persist().unwrap();
    assert_eq!(wal.read_entries().unwrap().len(), 0);
}

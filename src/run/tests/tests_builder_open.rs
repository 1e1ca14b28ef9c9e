use tempfile::tempdir;

use crate::ordered_index::Entry;
use crate::run::{Run, RunBuilder};

fn entry(key: &str, value: &str) -> Entry {
    Entry {
        key: key.as_bytes().to_vec(),
        value: value.as_bytes().to_vec(),
        tombstone: false,
    }
}

#[test]
fn round_trips_entries_in_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.run");

    let mut builder = RunBuilder::new();
    for i in 0..25u32 {
        builder.push(&entry(&format!("k{i:03}"), &format!("v{i}")));
    }
    builder.build(&path).unwrap();

    let run = Run::open(&path).unwrap();
    assert_eq!(run.entry_count(), 25);

    let enumerated = run.enumerate().unwrap();
    assert_eq!(enumerated.len(), 25);
    for (i, e) in enumerated.iter().enumerate() {
        assert_eq!(e.key, format!("k{i:03}").into_bytes());
    }
}

#[test]
fn open_rejects_truncated_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.run");

    let mut builder = RunBuilder::new();
    builder.push(&entry("a", "1"));
    builder.build(&path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();

    assert!(Run::open(&path).is_err());
}

#[test]
fn open_remembers_its_path_and_reports_file_size() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.run");

    let mut builder = RunBuilder::new();
    builder.push(&entry("a", "1"));
    builder.build(&path).unwrap();

    let run = Run::open(&path).unwrap();
    assert_eq!(run.path(), path.as_path());
    assert_eq!(run.file_size(), std::fs::metadata(&path).unwrap().len());
}

#[test]
fn empty_run_has_no_entries() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.run");

    RunBuilder::new().build(&path).unwrap();

    let run = Run::open(&path).unwrap();
    assert_eq!(run.entry_count(), 0);
    assert!(run.enumerate().unwrap().is_empty());
    assert_eq!(run.lookup(b"anything").unwrap(), None);
}

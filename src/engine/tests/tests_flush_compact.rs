use std::time::{Duration, Instant};

use tempfile::tempdir;

use crate::engine::{Engine, EngineConfig};

fn config(threshold: usize) -> EngineConfig {
    EngineConfig {
        memtable_threshold: threshold,
        compaction_interval: Duration::from_secs(3600),
        filter_capacity: 1_000,
        filter_error_rate: 0.01,
    }
}

fn wait_until_not_frozen(engine: &Engine) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if !engine.stats().unwrap().frozen {
            return;
        }
        if Instant::now() > deadline {
            panic!("flush did not complete in time");
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn tombstone_survives_flush() {
    // S2
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path(), config(2)).unwrap();

    engine.put(b"x", b"1").unwrap();
    engine.put(b"y", b"2").unwrap(); // crosses threshold, flushes {x, y}
    engine.put(b"z", b"3").unwrap();

    wait_until_not_frozen(&engine);

    engine.delete(b"x").unwrap();
    assert_eq!(engine.get(b"x").unwrap(), None);
    assert_eq!(engine.get(b"y").unwrap(), Some(b"2".to_vec()));
    assert_eq!(engine.get(b"z").unwrap(), Some(b"3".to_vec()));
}

#[test]
fn compaction_keeps_the_newest_value_on_key_collision() {
    // S3
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path(), config(1)).unwrap();

    engine.put(b"a", b"1").unwrap();
    wait_until_not_frozen(&engine);
    engine.put(b"a", b"2").unwrap();
    wait_until_not_frozen(&engine);

    assert_eq!(engine.stats().unwrap().run_count, 2);

    engine.compact_now().unwrap();
    assert_eq!(engine.stats().unwrap().run_count, 1);
    assert_eq!(engine.get(b"a").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn compaction_removes_the_superseded_run_files() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path(), config(1)).unwrap();

    engine.put(b"a", b"1").unwrap();
    wait_until_not_frozen(&engine);
    engine.put(b"a", b"2").unwrap();
    wait_until_not_frozen(&engine);

    let run_files_before: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("run"))
        .collect();
    assert_eq!(run_files_before.len(), 2);

    engine.compact_now().unwrap();

    let run_files_after: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("run"))
        .collect();
    assert_eq!(
        run_files_after.len(),
        1,
        "the two merged input files must be unlinked once the replacement is published"
    );
    engine.close().unwrap();

    // A restart must not rediscover the unlinked files and inflate the
    // run count back up.
    let reopened = Engine::open(dir.path(), config(1_000)).unwrap();
    assert_eq!(reopened.stats().unwrap().run_count, 1);
    assert_eq!(reopened.get(b"a").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn compaction_with_fewer_than_two_runs_is_a_no_op() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path(), config(1_000)).unwrap();

    engine.put(b"a", b"1").unwrap();
    engine.compact_now().unwrap();
    assert_eq!(engine.stats().unwrap().run_count, 0);
    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn filter_negative_shortcuts_the_run_scan() {
    // S5
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path(), config(1)).unwrap();

    engine.put(b"a", b"1").unwrap();
    wait_until_not_frozen(&engine);
    assert_eq!(engine.stats().unwrap().run_count, 1);

    assert_eq!(engine.get(b"zz").unwrap(), None);
    assert_eq!(engine.stats().unwrap().runs_consulted_last_get, 0);
}

#[test]
fn lookup_after_flush_still_consults_the_run() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path(), config(1)).unwrap();

    engine.put(b"a", b"1").unwrap();
    wait_until_not_frozen(&engine);

    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert!(engine.stats().unwrap().runs_consulted_last_get >= 1);
}

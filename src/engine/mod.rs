//! LSM Engine — coordinates the ordered index, the probabilistic filter,
//! and the on-disk run sequence behind one `put`/`delete`/`get` surface.
//!
//! ## Recovery
//!
//! [`Engine::open`] is the synchronous constructor: it creates the data
//! directory if needed, opens the write-ahead log, replays it into a
//! fresh memtable (rebuilding the filter from the replayed keys as it
//! goes), discovers any Run files already on disk (ordered by the
//! monotonic sequence number embedded in their filename) and registers
//! every key found in them with the filter too, and returns ready to
//! serve requests. Registering both sources matters because the WAL is
//! not guaranteed to still hold every key a Run does — an external
//! mirror store can truncate it after externalizing its entries — so
//! skipping either source would reintroduce a false negative for a key
//! recovered purely from disk. That return is this crate's "recovery
//! completed" signal.
//!
//! ## Background actors
//!
//! A flush is handed to a dedicated, short-lived thread per occurrence.
//! A single long-lived compactor thread wakes on a `crossbeam` tick
//! channel and also listens for a shutdown signal. Both hold only a
//! [`std::sync::Weak`] (compactor) or transient `Arc` (flusher) reference
//! to the shared engine state, so neither keeps the engine alive past its
//! last external handle.

#[cfg(test)]
mod tests;

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering as AtomicOrdering},
        Arc, Mutex, RwLock, Weak,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{self, select};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::filter::{Filter, FilterConfig};
use crate::ordered_index::{Entry, OrderedIndex};
use crate::run::{Run, RunBuilder, RunError};
use crate::wal::{Wal, WalError};

/// Tunables a boundary layer (out of scope here) would normally load from
/// a configuration file; this crate only exposes the struct, not the file
/// format.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Element count at which the memtable is promoted to the flushing
    /// buffer.
    pub memtable_threshold: usize,
    /// Interval between compaction attempts.
    pub compaction_interval: Duration,
    /// Nominal element count used for filter sizing.
    pub filter_capacity: usize,
    /// Target false-positive rate for the filter.
    pub filter_error_rate: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memtable_threshold: 1_000,
            compaction_interval: Duration::from_secs(60),
            filter_capacity: 1_000_000,
            filter_error_rate: 0.01,
        }
    }
}

/// A point-in-time snapshot of engine state, useful for tests and
/// operational visibility.
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// `true` if a flushing buffer is currently installed.
    pub frozen: bool,
    pub run_count: usize,
    pub total_run_bytes: u64,
    /// Number of Runs consulted during the most recently completed
    /// `get` call — exists so a filter-negative shortcut (zero Runs
    /// visited) is mechanically testable.
    pub runs_consulted_last_get: u64,
}

/// Errors surfaced by [`Engine`] operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Wal(#[from] WalError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("internal error: {0}")]
    Internal(String),
}

struct MemtableSlot {
    memtable: OrderedIndex,
    flushing: Option<Arc<Mutex<OrderedIndex>>>,
}

struct Inner {
    data_dir: PathBuf,
    memtable_slot: RwLock<MemtableSlot>,
    runs: RwLock<Arc<Vec<Arc<Run>>>>,
    filter: RwLock<Filter>,
    wal: Wal,
    next_seq: AtomicU64,
    config: EngineConfig,
    runs_consulted_last_get: AtomicU64,
    compactor_shutdown: Mutex<Option<channel::Sender<()>>>,
    compactor_handle: Mutex<Option<JoinHandle<()>>>,
}

/// An embeddable, persistent key-value store backed by a log-structured
/// merge tree.
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    /// Opens (creating if absent) the store rooted at `data_dir`.
    pub fn open<P: AsRef<Path>>(data_dir: P, config: EngineConfig) -> Result<Self, EngineError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;

        let wal = Wal::open(data_dir.join("wal.log"))?;
        let mut memtable = OrderedIndex::new();
        let mut filter = Filter::new(FilterConfig {
            capacity: config.filter_capacity,
            error_rate: config.filter_error_rate,
        });

        let mut replayed = 0u64;
        wal.replay(|entry| {
            if entry.tombstone {
                memtable.mark_deleted(&entry.key);
            } else {
                memtable.insert(entry.key.clone(), entry.value.clone());
            }
            filter.add(&entry.key);
            replayed += 1;
        })?;
        if replayed > 0 {
            info!(records = replayed, "replayed WAL into fresh memtable");
        }

        let runs = discover_runs(&data_dir)?;
        let next_seq = runs
            .last()
            .map(|(seq, _)| seq + 1)
            .unwrap_or(0);
        let runs: Vec<Arc<Run>> = runs.into_iter().map(|(_, run)| Arc::new(run)).collect();

        // The external mirror store may already have truncated the WAL by
        // the time it gets replayed, so a run can hold keys with zero WAL
        // evidence at restart. Walk every discovered run into the filter
        // too, or `get` would false-negative on a key whose only evidence
        // is on disk.
        let mut run_keys_registered = 0u64;
        for run in &runs {
            for entry in run.enumerate()? {
                filter.add(&entry.key);
                run_keys_registered += 1;
            }
        }
        if run_keys_registered > 0 {
            debug!(keys = run_keys_registered, "registered on-disk run keys with filter");
        }

        info!(runs = runs.len(), path = %data_dir.display(), "engine opened");

        let inner = Arc::new(Inner {
            data_dir,
            memtable_slot: RwLock::new(MemtableSlot {
                memtable,
                flushing: None,
            }),
            runs: RwLock::new(Arc::new(runs)),
            filter: RwLock::new(filter),
            wal,
            next_seq: AtomicU64::new(next_seq),
            config,
            runs_consulted_last_get: AtomicU64::new(0),
            compactor_shutdown: Mutex::new(None),
            compactor_handle: Mutex::new(None),
        });

        spawn_compactor(&inner);

        Ok(Self { inner })
    }

    /// Appends `+|key|value|` to the WAL, installs the entry in the
    /// memtable, registers the key with the filter, and — if the
    /// memtable has crossed its threshold and no flush is already in
    /// flight — hands it off to a background flusher.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        self.inner.wal.put(key, value)?;

        let mut to_flush = None;
        {
            let mut slot = self.lock_memtable_write()?;
            slot.memtable.insert(key.to_vec(), value.to_vec());
            if slot.memtable.size() >= self.inner.config.memtable_threshold && slot.flushing.is_none()
            {
                let frozen = std::mem::take(&mut slot.memtable);
                let frozen = Arc::new(Mutex::new(frozen));
                slot.flushing = Some(Arc::clone(&frozen));
                to_flush = Some(frozen);
            }
        }
        self.lock_filter_write()?.add(key);

        if let Some(buffer) = to_flush {
            debug!("memtable threshold crossed, spawning flusher");
            spawn_flusher(Arc::clone(&self.inner), buffer);
        }
        Ok(())
    }

    /// Appends `-|key|` to the WAL and marks `key` deleted in the
    /// memtable and, if present, the flushing buffer — a tombstone is
    /// written regardless of prior presence so it shadows older Runs.
    pub fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
        self.inner.wal.delete(key)?;

        let flushing = {
            let mut slot = self.lock_memtable_write()?;
            slot.memtable.mark_deleted(key);
            slot.flushing.clone()
        };

        if let Some(flushing) = flushing {
            flushing
                .lock()
                .map_err(|_| EngineError::Internal("flushing buffer mutex poisoned".into()))?
                .mark_deleted(key);
        }
        Ok(())
    }

    /// Reads the current value for `key`, or `None` if absent or
    /// tombstoned. Calls [`Wal::persist`] first so every write this
    /// caller could have observed complete is durable before the read is
    /// answered.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        self.inner.wal.persist()?;

        {
            let slot = self.lock_memtable_read()?;
            if let Some(entry) = slot.memtable.find(key) {
                return Ok(live_value(entry));
            }
            if let Some(flushing) = &slot.flushing {
                let guard = flushing
                    .lock()
                    .map_err(|_| EngineError::Internal("flushing buffer mutex poisoned".into()))?;
                if let Some(entry) = guard.find(key) {
                    return Ok(live_value(entry));
                }
            }
        }

        if !self.lock_filter_read()?.contains(key) {
            self.inner.runs_consulted_last_get.store(0, AtomicOrdering::SeqCst);
            return Ok(None);
        }

        let runs = Arc::clone(&*self.lock_runs_read()?);
        let mut consulted = 0u64;
        for run in runs.iter().rev() {
            consulted += 1;
            match run.lookup(key) {
                Ok(Some(entry)) => {
                    self.inner
                        .runs_consulted_last_get
                        .store(consulted, AtomicOrdering::SeqCst);
                    return Ok(live_value(&entry));
                }
                Ok(None) => continue,
                Err(err) => {
                    warn!(error = %err, "decode failure scanning run, treating as end-of-range");
                    continue;
                }
            }
        }
        self.inner
            .runs_consulted_last_get
            .store(consulted, AtomicOrdering::SeqCst);
        Ok(None)
    }

    /// Snapshot of current engine state, useful for tests and operators.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let frozen = self.lock_memtable_read()?.flushing.is_some();
        let runs = self.lock_runs_read()?;
        let total_run_bytes = runs.iter().map(|r| run_file_size(r)).sum();
        Ok(EngineStats {
            frozen,
            run_count: runs.len(),
            total_run_bytes,
            runs_consulted_last_get: self
                .inner
                .runs_consulted_last_get
                .load(AtomicOrdering::SeqCst),
        })
    }

    /// Runs one compaction pass synchronously, out of band from the
    /// periodic background compactor. Exists so tests can pin compaction
    /// behavior without waiting out a real `compaction_interval`.
    pub fn compact_now(&self) -> Result<(), EngineError> {
        compact(&self.inner)
    }

    /// Persists the WAL and stops the background compactor. Safe to call
    /// more than once.
    pub fn close(&self) -> Result<(), EngineError> {
        self.inner.wal.persist()?;
        if let Some(tx) = self
            .inner
            .compactor_shutdown
            .lock()
            .map_err(|_| EngineError::Internal("compactor shutdown mutex poisoned".into()))?
            .take()
        {
            let _ = tx.send(());
        }
        if let Some(handle) = self
            .inner
            .compactor_handle
            .lock()
            .map_err(|_| EngineError::Internal("compactor handle mutex poisoned".into()))?
            .take()
        {
            let _ = handle.join();
        }
        info!("engine closed");
        Ok(())
    }

    fn lock_memtable_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemtableSlot>, EngineError> {
        self.inner
            .memtable_slot
            .write()
            .map_err(|_| EngineError::Internal("memtable lock poisoned".into()))
    }

    fn lock_memtable_read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemtableSlot>, EngineError> {
        self.inner
            .memtable_slot
            .read()
            .map_err(|_| EngineError::Internal("memtable lock poisoned".into()))
    }

    fn lock_filter_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Filter>, EngineError> {
        self.inner
            .filter
            .write()
            .map_err(|_| EngineError::Internal("filter lock poisoned".into()))
    }

    fn lock_filter_read(&self) -> Result<std::sync::RwLockReadGuard<'_, Filter>, EngineError> {
        self.inner
            .filter
            .read()
            .map_err(|_| EngineError::Internal("filter lock poisoned".into()))
    }

    fn lock_runs_read(&self) -> Result<std::sync::RwLockReadGuard<'_, Arc<Vec<Arc<Run>>>>, EngineError> {
        self.inner
            .runs
            .read()
            .map_err(|_| EngineError::Internal("runs lock poisoned".into()))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.inner.wal.persist();
    }
}

fn live_value(entry: &Entry) -> Option<Vec<u8>> {
    if entry.tombstone {
        None
    } else {
        Some(entry.value.clone())
    }
}

fn run_file_size(run: &Run) -> u64 {
    run.file_size()
}

fn run_path(data_dir: &Path, seq: u64) -> PathBuf {
    data_dir.join(format!("{seq:010}.run"))
}

fn discover_runs(data_dir: &Path) -> Result<Vec<(u64, Run)>, EngineError> {
    let mut found = Vec::new();
    for entry in fs::read_dir(data_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("run") {
            continue;
        }
        let Some(seq) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
        else {
            warn!(path = %path.display(), "ignoring run file with unparsable name");
            continue;
        };
        let run = Run::open(&path)?;
        found.push((seq, run));
    }
    found.sort_by_key(|(seq, _)| *seq);
    Ok(found)
}

fn spawn_flusher(inner: Arc<Inner>, buffer: Arc<Mutex<OrderedIndex>>) {
    thread::spawn(move || {
        if let Err(err) = flush(&inner, &buffer) {
            error!(error = %err, "flush failed, flushing buffer remains installed");
        }
    });
}

fn flush(inner: &Arc<Inner>, buffer: &Arc<Mutex<OrderedIndex>>) -> Result<(), EngineError> {
    let entries = {
        let guard = buffer
            .lock()
            .map_err(|_| EngineError::Internal("flushing buffer mutex poisoned".into()))?;
        guard.enumerate()
    };

    let seq = inner.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
    let path = run_path(&inner.data_dir, seq);

    let mut builder = RunBuilder::new();
    for entry in &entries {
        builder.push(entry);
    }
    builder.build(&path)?;
    let run = Arc::new(Run::open(&path)?);

    {
        let mut runs = inner
            .runs
            .write()
            .map_err(|_| EngineError::Internal("runs lock poisoned".into()))?;
        let mut next = (**runs).clone();
        next.push(run);
        *runs = Arc::new(next);
    }

    {
        let mut slot = inner
            .memtable_slot
            .write()
            .map_err(|_| EngineError::Internal("memtable lock poisoned".into()))?;
        slot.flushing = None;
    }

    info!(seq, entries = entries.len(), "flush published new run");
    Ok(())
}

fn spawn_compactor(inner: &Arc<Inner>) {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    let interval = inner.config.compaction_interval;
    let (shutdown_tx, shutdown_rx) = channel::bounded(1);

    let handle = thread::spawn(move || {
        let ticker = channel::tick(interval);
        loop {
            select! {
                recv(ticker) -> _ => {
                    let Some(inner) = weak.upgrade() else { break };
                    if let Err(err) = compact(&inner) {
                        error!(error = %err, "compaction attempt failed, existing runs left intact");
                    }
                }
                recv(shutdown_rx) -> _ => break,
            }
        }
        trace!("compactor thread exiting");
    });

    *inner.compactor_shutdown.lock().expect("lock poisoned") = Some(shutdown_tx);
    *inner.compactor_handle.lock().expect("lock poisoned") = Some(handle);
}

/// Merges the two newest runs into one, replacing them at the tail.
/// Tombstones are never elided here — eliding is only safe if a key is
/// known absent from every older run, which a two-run merge cannot prove.
fn compact(inner: &Arc<Inner>) -> Result<(), EngineError> {
    let snapshot = {
        let runs = inner
            .runs
            .read()
            .map_err(|_| EngineError::Internal("runs lock poisoned".into()))?;
        Arc::clone(&runs)
    };
    if snapshot.len() < 2 {
        trace!("compaction skipped, fewer than two runs");
        return Ok(());
    }

    let older = snapshot[snapshot.len() - 2].clone();
    let newer = snapshot[snapshot.len() - 1].clone();
    let merged = merge_entries(older.enumerate()?, newer.enumerate()?);

    let seq = inner.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
    let path = run_path(&inner.data_dir, seq);
    let mut builder = RunBuilder::new();
    for entry in &merged {
        builder.push(entry);
    }
    builder.build(&path)?;
    let replacement = Arc::new(Run::open(&path)?);

    let mut runs = inner
        .runs
        .write()
        .map_err(|_| EngineError::Internal("runs lock poisoned".into()))?;
    // A flush may have published a new tail run while the merge above ran
    // without holding the lock. Only apply the swap if the pair we merged
    // is still exactly the tail pair; otherwise skip this cycle rather
    // than risk dropping a concurrently published run.
    let len = runs.len();
    if len < 2 || !Arc::ptr_eq(&runs[len - 2], &older) || !Arc::ptr_eq(&runs[len - 1], &newer) {
        trace!("compaction target changed underneath us, skipping this cycle");
        return Ok(());
    }
    let mut next: Vec<Arc<Run>> = runs[..len - 2].to_vec();
    next.push(replacement);
    *runs = Arc::new(next);
    drop(runs);

    // The merged pair is no longer referenced by `runs`; their files are
    // superseded and must go, or a restart's `discover_runs` would reload
    // them and grow the run count right back up.
    for stale in [&older, &newer] {
        if let Err(err) = fs::remove_file(stale.path()) {
            warn!(path = %stale.path().display(), error = %err, "failed to remove superseded run file");
        }
    }

    info!(seq, merged = merged.len(), "compaction applied");
    Ok(())
}

/// Two-way merge of entries already in ascending key order. On equal
/// keys `newer` wins.
fn merge_entries(older: Vec<Entry>, newer: Vec<Entry>) -> Vec<Entry> {
    let mut out = Vec::with_capacity(older.len() + newer.len());
    let mut a = older.into_iter().peekable();
    let mut b = newer.into_iter().peekable();

    loop {
        match (a.peek(), b.peek()) {
            (Some(x), Some(y)) => match x.key.cmp(&y.key) {
                std::cmp::Ordering::Less => out.push(a.next().unwrap()),
                std::cmp::Ordering::Greater => out.push(b.next().unwrap()),
                std::cmp::Ordering::Equal => {
                    a.next();
                    out.push(b.next().unwrap());
                }
            },
            (Some(_), None) => out.push(a.next().unwrap()),
            (None, Some(_)) => out.push(b.next().unwrap()),
            (None, None) => break,
        }
    }
    out
}

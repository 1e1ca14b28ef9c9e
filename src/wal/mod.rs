//! Write-Ahead Log — durable, append-only, line-delimited operation log.
//!
//! ## On-disk format
//!
//! Each record is one line, fields pipe-delimited with a trailing `|` on
//! every field:
//!
//! ```text
//! +|<key>|<value>|\n      (put)
//! -|<key>|\n              (delete)
//! ```
//!
//! Keys and values are arbitrary bytes that must not themselves contain
//! `|` or `\n` — that's the only constraint the line format imposes.
//!
//! ## Durability contract
//!
//! [`Wal::write`] only appends to an in-process buffer; it does **not**
//! touch the disk. [`Wal::persist`] flushes that buffer to the file and
//! issues an `fsync`. The engine's `get` path calls `persist()` before any
//! read, so any write the caller has observed complete is durable by the
//! time a subsequent read returns (see `crate::engine`).
//!
//! ## Concurrency
//!
//! All mutating operations serialize through a single [`std::sync::Mutex`]
//! so that record boundaries (and the buffer/file relationship) are never
//! torn by concurrent writers.

#[cfg(test)]
mod tests;

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::ordered_index::Entry;

/// Errors returned by [`Wal`] operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A key or value contained a reserved byte (`|` or `\n`).
    #[error("field contains a reserved byte ('|' or newline)")]
    InvalidField,

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

struct WalInner {
    file: File,
    buffer: Vec<u8>,
}

/// Append-only write-ahead log backing one engine's durability guarantee.
pub struct Wal {
    path: PathBuf,
    inner: Mutex<WalInner>,
}

impl Wal {
    /// Opens (creating if absent) the WAL file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        debug!(path = %path.display(), "WAL opened");

        Ok(Self {
            path,
            inner: Mutex::new(WalInner {
                file,
                buffer: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, WalInner>, WalError> {
        self.inner
            .lock()
            .map_err(|_| WalError::Internal("WAL mutex poisoned".into()))
    }

    /// Appends one record: each field followed by `|`, then a trailing
    /// `\n`. Buffered only — does not touch disk.
    pub fn write(&self, fields: &[&[u8]]) -> Result<(), WalError> {
        for field in fields {
            if field.contains(&b'|') || field.contains(&b'\n') {
                return Err(WalError::InvalidField);
            }
        }

        let mut guard = self.lock()?;
        for field in fields {
            guard.buffer.extend_from_slice(field);
            guard.buffer.push(b'|');
        }
        guard.buffer.push(b'\n');

        trace!(fields = fields.len(), "WAL record buffered");
        Ok(())
    }

    /// Buffers a `+|key|value|` put record.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), WalError> {
        self.write(&[b"+", key, value])
    }

    /// Buffers a `-|key|` delete record.
    pub fn delete(&self, key: &[u8]) -> Result<(), WalError> {
        self.write(&[b"-", key])
    }

    /// Flushes the buffered records to the file and `fsync`s it.
    pub fn persist(&self) -> Result<(), WalError> {
        let mut guard = self.lock()?;
        if guard.buffer.is_empty() {
            return Ok(());
        }
        guard.file.write_all(&guard.buffer)?;
        guard.file.sync_all()?;
        guard.buffer.clear();
        trace!("WAL persisted");
        Ok(())
    }

    /// Reads every well-formed record currently on disk, in file order.
    /// Malformed or truncated trailing lines are skipped, not errors.
    pub fn read_entries(&self) -> Result<Vec<Entry>, WalError> {
        let guard = self.lock()?;
        let mut file = guard.file.try_clone()?;
        drop(guard);

        file.seek(SeekFrom::Start(0))?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let mut out = Vec::new();
        for line in contents.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            match parse_line(line) {
                Some(entry) => out.push(entry),
                None => warn!("skipping malformed WAL record"),
            }
        }
        Ok(out)
    }

    /// Replays every well-formed record on disk through `apply`, in file
    /// order — used at startup to rebuild the memtable (and, in this
    /// crate, the filter; see `crate::engine::Engine::open`).
    pub fn replay<F: FnMut(Entry)>(&self, mut apply: F) -> Result<(), WalError> {
        for entry in self.read_entries()? {
            apply(entry);
        }
        Ok(())
    }

    /// Truncates the backing file to zero length and resets the buffer and
    /// write position.
    pub fn truncate(&self) -> Result<(), WalError> {
        let mut guard = self.lock()?;
        guard.file.set_len(0)?;
        guard.file.seek(SeekFrom::Start(0))?;
        guard.buffer.clear();
        debug!(path = %self.path.display(), "WAL truncated");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parses one `\n`-delimited line (without the trailing newline) into an
/// [`Entry`]. Returns `None` for anything that doesn't match a known,
/// well-formed record shape.
fn parse_line(line: &[u8]) -> Option<Entry> {
    let mut fields = line.split(|&b| b == b'|');
    let op = fields.next()?;

    match op {
        b"+" => {
            let key = fields.next()?.to_vec();
            let value = fields.next()?.to_vec();
            let trailer = fields.next()?;
            if !trailer.is_empty() || fields.next().is_some() || key.is_empty() {
                return None;
            }
            Some(Entry {
                key,
                value,
                tombstone: false,
            })
        }
        b"-" => {
            let key = fields.next()?.to_vec();
            let trailer = fields.next()?;
            if !trailer.is_empty() || fields.next().is_some() || key.is_empty() {
                return None;
            }
            Some(Entry {
                key,
                value: Vec::new(),
                tombstone: true,
            })
        }
        _ => None,
    }
}

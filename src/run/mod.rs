//! Immutable on-disk Run — a sorted, length-prefixed sequence of entries
//! with a sparse secondary index.
//!
//! A Run is built once (by flush or by compaction) and never mutated
//! afterward. There is no in-place delete or overwrite path: updates and
//! deletes are represented by building a replacement Run at compaction
//! time instead.
//!
//! ## On-disk layout
//!
//! ```text
//! [HEADER: magic(4) version(u32) header_crc32(u32)]
//! [PAYLOAD: entry record, entry record, ...]
//! [SPARSE INDEX: count(u32) (key_len(u32) key_bytes offset(u64))*]
//! [FOOTER: payload_len(u64) sparse_index_offset(u64) sparse_index_len(u64)
//!          entry_count(u64) footer_crc32(u32)]
//! ```
//!
//! Each payload entry is self-delimiting:
//!
//! ```text
//! [key_len(u32) value_len(u32) tombstone(u8) key_bytes value_bytes crc32(u32)]
//! ```
//!
//! `crc32` covers everything in the record before it, so a corrupted or
//! truncated record is detected without needing to know its length up
//! front — the reader only trusts the length prefix once the checksum
//! confirms it.
//!
//! Runs are read through a memory map ([`memmap2`]), so reads never copy
//! the whole file and multiple readers can share one Run lock-free.

pub mod builder;
pub mod iterator;

#[cfg(test)]
mod tests;

use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
};

use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;

use crate::ordered_index::Entry;

pub use builder::RunBuilder;
use iterator::RunIter;

/// Number of payload entries between consecutive sparse index entries.
pub const SPARSE_INDEX_STRIDE: usize = 10;

const MAGIC: [u8; 4] = *b"RUN0";
const VERSION: u32 = 1;
const HEADER_SIZE: usize = 4 + 4 + 4; // magic + version + crc32
const FOOTER_SIZE: usize = 8 + 8 + 8 + 8 + 4; // 4 u64s + crc32

/// Errors returned by [`Run`] construction and lookup.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("corrupt run: {0}")]
    Corrupt(String),
}

/// A sparse secondary index entry: a key and the payload byte offset at
/// which the sorted region beginning with that key starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseIndexEntry {
    pub key: Vec<u8>,
    pub offset: u64,
}

/// An immutable, disk-backed, sorted sequence of entries.
pub struct Run {
    path: PathBuf,
    mmap: Mmap,
    sparse_index: Vec<SparseIndexEntry>,
    payload_range: (usize, usize),
    entry_count: u64,
}

impl Run {
    /// Opens an already-built Run file, validating its header and footer
    /// checksums and loading the sparse index into memory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RunError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEADER_SIZE + FOOTER_SIZE {
            return Err(RunError::Corrupt("file too small".into()));
        }

        verify_header(&mmap[..HEADER_SIZE])?;

        let footer_start = mmap.len() - FOOTER_SIZE;
        let footer = &mmap[footer_start..];
        let (payload_len, sparse_offset, sparse_len, entry_count) = read_footer(footer)?;

        let payload_start = HEADER_SIZE;
        let payload_end = payload_start + payload_len as usize;
        if payload_end > footer_start {
            return Err(RunError::Corrupt("payload overruns footer".into()));
        }

        let sparse_start = sparse_offset as usize;
        let sparse_end = sparse_start + sparse_len as usize;
        if sparse_end > footer_start {
            return Err(RunError::Corrupt("sparse index overruns footer".into()));
        }
        let sparse_index = decode_sparse_index(&mmap[sparse_start..sparse_end])?;

        Ok(Self {
            path,
            mmap,
            sparse_index,
            payload_range: (payload_start, payload_end),
            entry_count,
        })
    }

    /// The file this Run was opened from, so callers (compaction) can
    /// unlink it once it has been superseded.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size in bytes of the backing file.
    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn payload(&self) -> &[u8] {
        &self.mmap[self.payload_range.0..self.payload_range.1]
    }

    /// Finds the first entry matching `key`, using the sparse index to
    /// bound a linear scan to a single `SPARSE_INDEX_STRIDE`-sized window.
    pub fn lookup(&self, key: &[u8]) -> Result<Option<Entry>, RunError> {
        let Some(lo_idx) = self.sparse_lower_bound(key) else {
            return Ok(None);
        };
        let lo_offset = self.sparse_index[lo_idx].offset as usize;
        let hi_offset = self
            .sparse_index
            .get(lo_idx + 1)
            .map(|e| e.offset as usize)
            .unwrap_or(self.payload().len());

        let window = &self.payload()[lo_offset..hi_offset];
        for result in RunIter::new(window) {
            let entry = result?;
            if entry.key == key {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Index of the sparse entry with the greatest key `<= key`, or `None`
    /// if `key` is strictly less than every sparse key (in which case the
    /// run cannot contain it at all).
    fn sparse_lower_bound(&self, key: &[u8]) -> Option<usize> {
        if self.sparse_index.is_empty() || key < self.sparse_index[0].key.as_slice() {
            return None;
        }
        match self
            .sparse_index
            .binary_search_by(|e| e.key.as_slice().cmp(key))
        {
            Ok(idx) => Some(idx),
            Err(insert_at) => Some(insert_at - 1),
        }
    }

    /// Decodes the full payload in ascending key order.
    pub fn enumerate(&self) -> Result<Vec<Entry>, RunError> {
        RunIter::new(self.payload()).collect()
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }
}

fn verify_header(header: &[u8]) -> Result<(), RunError> {
    let magic: [u8; 4] = header[0..4].try_into().unwrap();
    let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
    let stored_crc = u32::from_le_bytes(header[8..12].try_into().unwrap());

    let mut hasher = Crc32::new();
    hasher.update(&header[0..8]);
    if hasher.finalize() != stored_crc {
        return Err(RunError::ChecksumMismatch);
    }
    if magic != MAGIC {
        return Err(RunError::Corrupt("bad magic".into()));
    }
    if version != VERSION {
        return Err(RunError::Corrupt(format!("unsupported version {version}")));
    }
    Ok(())
}

fn read_footer(footer: &[u8]) -> Result<(u64, u64, u64, u64), RunError> {
    let payload_len = u64::from_le_bytes(footer[0..8].try_into().unwrap());
    let sparse_offset = u64::from_le_bytes(footer[8..16].try_into().unwrap());
    let sparse_len = u64::from_le_bytes(footer[16..24].try_into().unwrap());
    let entry_count = u64::from_le_bytes(footer[24..32].try_into().unwrap());
    let stored_crc = u32::from_le_bytes(footer[32..36].try_into().unwrap());

    let mut hasher = Crc32::new();
    hasher.update(&footer[0..32]);
    if hasher.finalize() != stored_crc {
        return Err(RunError::ChecksumMismatch);
    }
    Ok((payload_len, sparse_offset, sparse_len, entry_count))
}

fn decode_sparse_index(buf: &[u8]) -> Result<Vec<SparseIndexEntry>, RunError> {
    if buf.len() < 4 {
        return Err(RunError::Corrupt("truncated sparse index".into()));
    }
    let count = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    let mut pos = 4;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        if pos + 4 > buf.len() {
            return Err(RunError::Corrupt("truncated sparse index entry".into()));
        }
        let key_len = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        if pos + key_len + 8 > buf.len() {
            return Err(RunError::Corrupt("truncated sparse index entry".into()));
        }
        let key = buf[pos..pos + key_len].to_vec();
        pos += key_len;
        let offset = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
        pos += 8;
        out.push(SparseIndexEntry { key, offset });
    }
    Ok(out)
}

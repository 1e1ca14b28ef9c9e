//! Builds a new immutable Run file from a sorted sequence of entries.

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use crc32fast::Hasher as Crc32;
use tracing::debug;

use super::{iterator::encode_entry, RunError, FOOTER_SIZE, HEADER_SIZE, MAGIC, SPARSE_INDEX_STRIDE, VERSION};
use crate::ordered_index::Entry;

/// Accumulates entries (which must already be in ascending key order,
/// typically via [`crate::ordered_index::OrderedIndex::enumerate`] or a
/// merge of several Runs) and writes them out as a single immutable file.
pub struct RunBuilder {
    payload: Vec<u8>,
    sparse_index: Vec<(Vec<u8>, u64)>,
    entry_count: u64,
}

impl Default for RunBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RunBuilder {
    pub fn new() -> Self {
        Self {
            payload: Vec::new(),
            sparse_index: Vec::new(),
            entry_count: 0,
        }
    }

    /// Appends the next entry. Entries must be supplied in ascending key
    /// order; this is not re-checked here (callers already hold a sorted
    /// source).
    pub fn push(&mut self, entry: &Entry) {
        if self.entry_count as usize % SPARSE_INDEX_STRIDE == 0 {
            self.sparse_index
                .push((entry.key.clone(), self.payload.len() as u64));
        }
        self.payload.extend_from_slice(&encode_entry(entry));
        self.entry_count += 1;
    }

    /// Consumes the builder and atomically writes the Run to `path`.
    pub fn build<P: AsRef<Path>>(self, path: P) -> Result<(), RunError> {
        let path = path.as_ref();
        let tmp_path = tmp_path_for(path);

        let mut header = Vec::with_capacity(HEADER_SIZE);
        header.extend_from_slice(&MAGIC);
        header.extend_from_slice(&VERSION.to_le_bytes());
        let mut header_crc = Crc32::new();
        header_crc.update(&header);
        header.extend_from_slice(&header_crc.finalize().to_le_bytes());

        let sparse_index_bytes = encode_sparse_index(&self.sparse_index);

        let sparse_index_offset = (HEADER_SIZE + self.payload.len()) as u64;
        let mut footer = Vec::with_capacity(FOOTER_SIZE);
        footer.extend_from_slice(&(self.payload.len() as u64).to_le_bytes());
        footer.extend_from_slice(&sparse_index_offset.to_le_bytes());
        footer.extend_from_slice(&(sparse_index_bytes.len() as u64).to_le_bytes());
        footer.extend_from_slice(&self.entry_count.to_le_bytes());
        let mut footer_crc = Crc32::new();
        footer_crc.update(&footer);
        footer.extend_from_slice(&footer_crc.finalize().to_le_bytes());

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&header)?;
            file.write_all(&self.payload)?;
            file.write_all(&sparse_index_bytes)?;
            file.write_all(&footer)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;

        debug!(
            path = %path.display(),
            entries = self.entry_count,
            sparse_entries = self.sparse_index.len(),
            "built run"
        );
        Ok(())
    }
}

fn encode_sparse_index(entries: &[(Vec<u8>, u64)]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for (key, offset) in entries {
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&offset.to_le_bytes());
    }
    buf
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

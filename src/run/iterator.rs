//! Decoding of the self-delimiting payload record format.

use crc32fast::Hasher as Crc32;

use super::RunError;
use crate::ordered_index::Entry;

/// Encodes a single entry into its on-disk record form, returning the
/// bytes to append to the payload.
pub(super) fn encode_entry(entry: &Entry) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9 + entry.key.len() + entry.value.len() + 4);
    buf.extend_from_slice(&(entry.key.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(entry.value.len() as u32).to_le_bytes());
    buf.push(entry.tombstone as u8);
    buf.extend_from_slice(&entry.key);
    buf.extend_from_slice(&entry.value);

    let mut hasher = Crc32::new();
    hasher.update(&buf);
    buf.extend_from_slice(&hasher.finalize().to_le_bytes());
    buf
}

/// Forward-only decoder over a payload slice (or a bounded window of
/// one), yielding entries in the order they were written.
pub struct RunIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> RunIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
}

impl<'a> Iterator for RunIter<'a> {
    type Item = Result<Entry, RunError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        Some(self.decode_one())
    }
}

impl<'a> RunIter<'a> {
    fn decode_one(&mut self) -> Result<Entry, RunError> {
        let rest = &self.buf[self.pos..];
        if rest.len() < 9 {
            return Err(RunError::Corrupt("truncated record header".into()));
        }
        let key_len = u32::from_le_bytes(rest[0..4].try_into().unwrap()) as usize;
        let value_len = u32::from_le_bytes(rest[4..8].try_into().unwrap()) as usize;
        let tombstone = rest[8] != 0;

        let body_len = 9 + key_len + value_len;
        if rest.len() < body_len + 4 {
            return Err(RunError::Corrupt("truncated record body".into()));
        }

        let mut hasher = Crc32::new();
        hasher.update(&rest[..body_len]);
        let stored_crc = u32::from_le_bytes(rest[body_len..body_len + 4].try_into().unwrap());
        if hasher.finalize() != stored_crc {
            return Err(RunError::ChecksumMismatch);
        }

        let key = rest[9..9 + key_len].to_vec();
        let value = rest[9 + key_len..body_len].to_vec();
        self.pos += body_len + 4;

        Ok(Entry {
            key,
            value,
            tombstone,
        })
    }
}

//! Probabilistic membership filter — a fast negative shortcut for the
//! engine's `get` path.
//!
//! This is a hand-rolled Bloom filter rather than a library one: the total
//! bit array is fixed at exactly 1,000,000 64-bit words regardless of
//! configured capacity (only the hash count `k` is derived from
//! `{capacity, error_rate}`), which doesn't match the sizing behavior of
//! general-purpose Bloom filter crates.
//!
//! ## Guarantees
//!
//! - [`Filter::contains`] never returns `false` for a key that was ever
//!   passed to [`Filter::add`] since this filter was constructed.
//! - [`Filter::contains`] may return `true` for a key that was never added
//!   (a false positive) — callers must still fall through to an
//!   authoritative scan.

#[cfg(test)]
mod tests;

use rand::Rng;

/// Total bit array size: 1,000,000 64-bit words = 64,000,000 bits.
const NUM_WORDS: usize = 1_000_000;
const NUM_BITS: u64 = (NUM_WORDS * 64) as u64;

/// Tuning knobs for a [`Filter`]: nominal element count and target
/// false-positive rate, from which the hash count is derived.
#[derive(Debug, Clone, Copy)]
pub struct FilterConfig {
    pub capacity: usize,
    pub error_rate: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000_000,
            error_rate: 0.01,
        }
    }
}

/// A fixed-size bit array plus `k` independently-seeded hash functions.
pub struct Filter {
    bits: Vec<u64>,
    seeds: Vec<u64>,
}

impl Filter {
    /// Builds a filter for the given configuration, seeding each of the `k`
    /// hash functions with a distinct random 64-bit seed.
    ///
    /// `k = ceil(bits_per_element * ln(2))`, where
    /// `bits_per_element = -ln(error_rate) / ln(2)^2`.
    pub fn new(config: FilterConfig) -> Self {
        let ln2 = std::f64::consts::LN_2;
        let bits_per_element = -config.error_rate.ln() / (ln2 * ln2);
        let k = (bits_per_element * ln2).ceil().max(1.0) as usize;

        let mut rng = rand::rng();
        let seeds = (0..k).map(|_| rng.random::<u64>()).collect();

        Self {
            bits: vec![0u64; NUM_WORDS],
            seeds,
        }
    }

    /// Number of hash functions in use.
    pub fn hash_count(&self) -> usize {
        self.seeds.len()
    }

    /// Registers `key` as present.
    pub fn add(&mut self, key: &[u8]) {
        for seed in &self.seeds {
            let idx = murmur64(key, *seed) % NUM_BITS;
            set_bit(&mut self.bits, idx);
        }
    }

    /// Returns `true` if `key` may have been added (possible false
    /// positive); `false` only if `key` was definitely never added.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.seeds
            .iter()
            .all(|seed| has_bit(&self.bits, murmur64(key, *seed) % NUM_BITS))
    }

    /// Clears every bit, forgetting every previously-added key.
    ///
    /// Not used during normal operation (the engine's filter is never
    /// cleared mid-process); exposed for tests and for a full rebuild from
    /// a known-complete key set (see recovery in [`crate::engine`]).
    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|w| *w = 0);
    }
}

fn set_bit(bits: &mut [u64], idx: u64) {
    let word = (idx >> 6) as usize;
    let bit = idx & 63;
    bits[word] |= 1 << bit;
}

fn has_bit(bits: &[u64], idx: u64) -> bool {
    let word = (idx >> 6) as usize;
    let bit = idx & 63;
    bits[word] & (1 << bit) != 0
}

/// A murmur-class, non-cryptographic 64-bit hash (the 64-bit finalizer from
/// MurmurHash3), seeded so that distinct seeds behave as independent hash
/// functions over the same key.
fn murmur64(key: &[u8], seed: u64) -> u64 {
    let mut h = seed ^ (key.len() as u64).wrapping_mul(0xff51afd7ed558ccd);
    for chunk in key.chunks(8) {
        let mut buf = [0u8; 8];
        buf[..chunk.len()].copy_from_slice(chunk);
        let k = u64::from_le_bytes(buf);
        h ^= fmix64(k);
        h = h.wrapping_mul(0xc4ceb9fe1a85ec53);
    }
    fmix64(h)
}

fn fmix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51afd7ed558ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ceb9fe1a85ec53);
    h ^= h >> 33;
    h
}

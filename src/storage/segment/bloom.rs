//! Bloom filter for negative lookups
//!
//! A plain bit array probed at three positions derived from two seeded CRC32
//! hashes. False positives cost one sparse-index probe; false negatives are
//! impossible.

use crc32fast::Hasher;

/// Minimum bit-array size, so tiny segments still get a usable filter
const MIN_BITS: usize = 64;

/// Bloom filter over the keys of one segment
pub struct BloomFilter {
    bits: Vec<u8>,
}

impl BloomFilter {
    /// Create an empty filter sized for `expected_keys` at `bits_per_key`
    pub fn with_capacity(expected_keys: usize, bits_per_key: usize) -> Self {
        let nbits = (expected_keys * bits_per_key).max(MIN_BITS);
        let nbytes = nbits.div_ceil(8);
        Self { bits: vec![0u8; nbytes] }
    }

    /// Reconstruct a filter from its serialized bit array
    pub fn from_bytes(bits: Vec<u8>) -> Self {
        Self { bits }
    }

    /// Record a key
    pub fn insert(&mut self, key: &[u8]) {
        for index in self.probe_indexes(key) {
            self.bits[index / 8] |= 1 << (index % 8);
        }
    }

    /// Whether a key may have been inserted (false means definitely not)
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.probe_indexes(key)
            .iter()
            .all(|&index| (self.bits[index / 8] >> (index % 8)) & 1 == 1)
    }

    /// The raw bit array, for serialization
    pub fn data(&self) -> &[u8] {
        &self.bits
    }

    fn probe_indexes(&self, key: &[u8]) -> [usize; 3] {
        let hash1 = hash_key(key, 0);
        let hash2 = hash_key(key, 1);
        let bits_len = (self.bits.len() * 8) as u64;

        [
            (hash1 % bits_len) as usize,
            (hash2 % bits_len) as usize,
            (hash1.wrapping_add(hash2) % bits_len) as usize,
        ]
    }
}

fn hash_key(key: &[u8], seed: u32) -> u64 {
    let mut hasher = Hasher::new();
    hasher.update(&seed.to_le_bytes());
    hasher.update(key);
    hasher.finalize() as u64
}

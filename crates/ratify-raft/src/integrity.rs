//! Chain hashing for log integrity.
//!
//! Each stored entry carries
//!
//! ```text
//! entry_hash = blake3(prev_hash || index || term || entry_bytes)
//! ```
//!
//! so rewriting any entry invalidates every hash after it. The persistent
//! store verifies the whole chain when a replica starts.
//!
//! # Tiger Style
//!
//! - Fixed 32-byte hashes
//! - Constant-time comparison
//! - Deterministic, no I/O

/// Blake3 hash (32 bytes).
pub type ChainHash = [u8; 32];

/// `prev_hash` of the entry at index 0.
pub const GENESIS_HASH: ChainHash = [0u8; 32];

/// Compute the chain hash for one serialized entry.
pub fn compute_entry_hash(prev_hash: &ChainHash, index: u64, term: u64, entry_bytes: &[u8]) -> ChainHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(prev_hash);
    hasher.update(&index.to_le_bytes());
    hasher.update(&term.to_le_bytes());
    hasher.update(entry_bytes);
    *hasher.finalize().as_bytes()
}

/// Recompute and compare against `expected` in constant time.
pub fn verify_entry_hash(prev_hash: &ChainHash, index: u64, term: u64, entry_bytes: &[u8], expected: &ChainHash) -> bool {
    let computed = compute_entry_hash(prev_hash, index, term, entry_bytes);
    constant_time_compare(&computed, expected)
}

#[inline]
pub fn constant_time_compare(a: &ChainHash, b: &ChainHash) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn hash_to_hex(hash: &ChainHash) -> String {
    hex::encode(hash)
}

/// Parse a stored hash, rejecting values of the wrong length.
pub fn hash_from_slice(bytes: &[u8]) -> Option<ChainHash> {
    ChainHash::try_from(bytes).ok()
}

/// Hash and index of the last stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTip {
    pub hash: ChainHash,
    pub index: Option<u64>,
}

impl Default for ChainTip {
    fn default() -> Self {
        Self {
            hash: GENESIS_HASH,
            index: None,
        }
    }
}

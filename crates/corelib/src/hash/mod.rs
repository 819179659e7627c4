//! Hash functions shared by every member of the cluster.
//!
//! A consistent hash only agrees across nodes if every node hashes keys and
//! node ids the same way, so the function travels with the hash by value: a
//! closed, serializable identifier rather than a trait object.

pub mod sip;
pub mod xxh3;

use serde::{Deserialize, Serialize};

/// A stateless 32-bit hash function identified by name on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashFunction {
    /// SipHash-1-3 with zero keys, folded to 32 bits.
    #[default]
    SipHash13,
    /// XXH3 (64-bit), folded to 32 bits.
    Xxh3,
}

impl HashFunction {
    /// Hashes arbitrary bytes.
    pub fn hash(&self, data: &[u8]) -> i32 {
        match self {
            HashFunction::SipHash13 => sip::hash32(data),
            HashFunction::Xxh3 => xxh3::hash32(data),
        }
    }

    /// Hashes a 32-bit integer (little-endian bytes).
    ///
    /// Used to rehash a node's hash code when deriving virtual node positions.
    pub fn hash_int(&self, value: i32) -> i32 {
        self.hash(&value.to_le_bytes())
    }

    /// Non-negative hash in `[0, i32::MAX]`.
    ///
    /// Masking the sign bit (rather than `abs`) keeps `i32::MIN` in range.
    #[inline]
    pub fn normalized_hash(&self, data: &[u8]) -> u32 {
        normalize(self.hash(data))
    }

    /// Returns the name of this hash function.
    pub fn name(&self) -> &'static str {
        match self {
            HashFunction::SipHash13 => "SipHash13",
            HashFunction::Xxh3 => "Xxh3",
        }
    }
}

/// Clears the sign bit of a 32-bit hash.
#[inline]
pub fn normalize(hash: i32) -> u32 {
    (hash as u32) & 0x7fff_ffff
}

/// Folds a 64-bit digest into 32 bits, keeping entropy from both halves.
#[inline]
pub(crate) fn fold64(value: u64) -> i32 {
    (value ^ (value >> 32)) as u32 as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        for f in [HashFunction::SipHash13, HashFunction::Xxh3] {
            assert_eq!(f.hash(b"key"), f.hash(b"key"));
            assert_ne!(f.hash(b"key-1"), f.hash(b"key-2"));
        }
    }

    #[test]
    fn test_normalize_never_negative() {
        assert_eq!(normalize(i32::MIN), 0);
        assert_eq!(normalize(-1), i32::MAX as u32);
        assert_eq!(normalize(42), 42);
    }

    #[test]
    fn test_functions_differ() {
        assert_ne!(
            HashFunction::SipHash13.hash(b"same input"),
            HashFunction::Xxh3.hash(b"same input")
        );
    }
}

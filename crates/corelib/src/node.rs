//! Node identity for cache members.
//!
//! Members are identified by a compact `NodeId` that is cheap to compare and
//! hash. The ordering of ids is the tie-break every placement algorithm falls
//! back to, so it must be the same on every member.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compact identifier for a node in the cluster.
///
/// Newtype over `u128` so comparisons and hashing are very fast while giving
/// plenty of space for uniqueness (a UUID fits as-is).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(pub u128);

impl NodeId {
    /// Derive a stable id from a human-readable name.
    ///
    /// Every member computes the same id for the same name, which makes this
    /// suitable for tests and for clusters that address nodes by hostname.
    pub fn from_name(name: &str) -> Self {
        let digest = blake3::hash(name.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest.as_bytes()[..16]);
        NodeId(u128::from_be_bytes(bytes))
    }

    /// Big-endian bytes, the input used when hashing a node onto the wheel.
    #[inline]
    pub fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl From<u128> for NodeId {
    fn from(value: u128) -> Self {
        NodeId(value)
    }
}

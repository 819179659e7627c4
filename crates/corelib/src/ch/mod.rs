//! Segment-based consistent hashes.
//!
//! A consistent hash splits the key space into a fixed number of segments and
//! maps every segment to an ordered owner list: index 0 is the primary owner,
//! the rest are backups. Instances are immutable once built; the placement
//! algorithms that produce them live in the `replication` crate.

pub mod default;
pub mod replicated;
pub mod union;

pub use default::DefaultConsistentHash;
pub use replicated::ReplicatedConsistentHash;
pub use union::UnionConsistentHash;

use crate::hash::{normalize, HashFunction};
use crate::node::NodeId;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

/// Relative weight of each member. `0.0` means the member holds no data.
pub type CapacityFactors = BTreeMap<NodeId, f32>;

/// Maps a key hash to a segment in `[0, num_segments)`.
#[inline]
pub fn segment_for_hash(hash: i32, num_segments: usize) -> usize {
    normalize(hash) as usize % num_segments
}

/// Read-side view of a published consistent hash.
///
/// Implementations are immutable, so any number of threads may query the
/// same instance without synchronization.
pub trait ConsistentHash: Send + Sync + Debug {
    /// Number of segments; fixed for the lifetime of the instance.
    fn num_segments(&self) -> usize;

    /// Target number of owners per segment.
    fn num_owners(&self) -> usize;

    /// Hash function used to map keys to segments.
    fn hash_function(&self) -> HashFunction;

    /// Ordered, duplicate-free member list.
    fn members(&self) -> &[NodeId];

    /// Capacity factor of `node`, `1.0` when the hash carries no factors.
    fn capacity_factor(&self, node: &NodeId) -> Option<f32>;

    /// Owners of `segment`, primary first.
    ///
    /// # Panics
    /// If `segment >= num_segments()`.
    fn locate_owners_for_segment(&self, segment: usize) -> Vec<NodeId>;

    /// Primary owner of `segment`, `None` only if the segment has no owners.
    fn locate_primary_owner_for_segment(&self, segment: usize) -> Option<NodeId> {
        self.locate_owners_for_segment(segment).first().copied()
    }

    /// Segment a key belongs to. Depends only on the hash function and
    /// `num_segments`, never on ownership.
    fn segment(&self, key: &[u8]) -> usize {
        segment_for_hash(self.hash_function().hash(key), self.num_segments())
    }

    fn locate_owners(&self, key: &[u8]) -> Vec<NodeId> {
        self.locate_owners_for_segment(self.segment(key))
    }

    fn locate_primary_owner(&self, key: &[u8]) -> Option<NodeId> {
        self.locate_primary_owner_for_segment(self.segment(key))
    }

    /// First `repl_count` owners of the key's segment.
    fn locate(&self, key: &[u8], repl_count: usize) -> Vec<NodeId> {
        let mut owners = self.locate_owners(key);
        owners.truncate(repl_count);
        owners
    }

    fn is_key_local_to_node(&self, node: &NodeId, key: &[u8]) -> bool {
        self.locate_owners(key).contains(node)
    }

    /// Segments where `node` is an owner. O(num_segments).
    fn segments_for_owner(&self, node: &NodeId) -> BTreeSet<usize> {
        (0..self.num_segments())
            .filter(|&segment| self.locate_owners_for_segment(segment).contains(node))
            .collect()
    }

    /// Segments where `node` is the primary owner. O(num_segments).
    fn primary_segments_for_owner(&self, node: &NodeId) -> BTreeSet<usize> {
        (0..self.num_segments())
            .filter(|&segment| self.locate_primary_owner_for_segment(segment) == Some(*node))
            .collect()
    }
}

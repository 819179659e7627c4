//! Per-node ownership counters.

use corelib::{ConsistentHash, NodeId};
use std::collections::HashMap;

/// Primary-owned and owned segment counts for every member.
///
/// Counters are indexed by the member's position in the member list the
/// statistics were created for. Builders keep one of these in step with
/// their owner lists; it is never shared outside a single build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipStatistics {
    members: Vec<NodeId>,
    index: HashMap<NodeId, usize>,
    primary_owned: Vec<usize>,
    owned: Vec<usize>,
}

impl OwnershipStatistics {
    /// All counters at zero.
    pub fn new(members: &[NodeId]) -> Self {
        Self {
            members: members.to_vec(),
            index: members.iter().enumerate().map(|(i, node)| (*node, i)).collect(),
            primary_owned: vec![0; members.len()],
            owned: vec![0; members.len()],
        }
    }

    /// Counts taken from index-based owner lists.
    pub fn from_owner_indices(members: &[NodeId], segment_owners: &[Vec<usize>]) -> Self {
        let mut stats = Self::new(members);
        for owners in segment_owners {
            if let Some(&primary) = owners.first() {
                stats.primary_owned[primary] += 1;
            }
            for &owner in owners {
                stats.owned[owner] += 1;
            }
        }
        stats
    }

    /// Counts for the members of a published hash.
    pub fn for_hash<C: ConsistentHash + ?Sized>(ch: &C) -> Self {
        let mut stats = Self::new(ch.members());
        for segment in 0..ch.num_segments() {
            let owners = ch.locate_owners_for_segment(segment);
            if let Some(idx) = owners.first().and_then(|n| stats.index_of(n)) {
                stats.primary_owned[idx] += 1;
            }
            for owner in &owners {
                if let Some(idx) = stats.index_of(owner) {
                    stats.owned[idx] += 1;
                }
            }
        }
        stats
    }

    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    pub fn index_of(&self, node: &NodeId) -> Option<usize> {
        self.index.get(node).copied()
    }

    #[inline]
    pub fn primary_owned(&self, idx: usize) -> usize {
        self.primary_owned[idx]
    }

    #[inline]
    pub fn owned(&self, idx: usize) -> usize {
        self.owned[idx]
    }

    /// Primary-owned count of `node`, `None` for non-members.
    pub fn primary_owned_by(&self, node: &NodeId) -> Option<usize> {
        self.index_of(node).map(|idx| self.primary_owned[idx])
    }

    /// Owned count of `node`, `None` for non-members.
    pub fn owned_by(&self, node: &NodeId) -> Option<usize> {
        self.index_of(node).map(|idx| self.owned[idx])
    }

    pub(crate) fn inc_primary_owned(&mut self, idx: usize) {
        self.primary_owned[idx] += 1;
    }

    pub(crate) fn dec_primary_owned(&mut self, idx: usize) {
        self.primary_owned[idx] -= 1;
    }

    pub(crate) fn inc_owned(&mut self, idx: usize) {
        self.owned[idx] += 1;
    }

    pub(crate) fn dec_owned(&mut self, idx: usize) {
        self.owned[idx] -= 1;
    }

    /// Sum of all owned counters.
    pub fn sum_owned(&self) -> usize {
        self.owned.iter().sum()
    }
}

//! Factory for fully replicated hashes.

use crate::error::Result;
use crate::strategy::{self, ConsistentHashFactory};
use corelib::{CapacityFactors, ConsistentHash, HashFunction, NodeId, ReplicatedConsistentHash};
use std::sync::Arc;
use tracing::debug;

/// Every member owns the single segment; there is nothing to balance.
///
/// Capacity factors are validated but otherwise ignored: a replicated hash
/// keeps a full copy on every member.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicatedConsistentHashFactory;

impl ReplicatedConsistentHashFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ConsistentHashFactory for ReplicatedConsistentHashFactory {
    type Hash = ReplicatedConsistentHash;

    /// `num_owners` and `num_segments` are ignored.
    fn create(
        &self,
        hash_function: HashFunction,
        _num_owners: usize,
        _num_segments: usize,
        members: &[NodeId],
        capacity_factors: Option<&CapacityFactors>,
    ) -> Result<Arc<ReplicatedConsistentHash>> {
        strategy::check_members(members, capacity_factors)?;
        debug!(members = members.len(), "created replicated hash");
        Ok(Arc::new(ReplicatedConsistentHash::new(hash_function, members.to_vec())?))
    }

    fn update_members(
        &self,
        base: &Arc<ReplicatedConsistentHash>,
        new_members: &[NodeId],
        capacity_factors: Option<&CapacityFactors>,
    ) -> Result<Arc<ReplicatedConsistentHash>> {
        strategy::check_members(new_members, capacity_factors)?;
        if base.members() == new_members {
            return Ok(Arc::clone(base));
        }
        let joined = new_members.iter().filter(|node| !base.members().contains(node)).count();
        strategy::record_owner_changes(self.name(), joined);
        Ok(Arc::new(ReplicatedConsistentHash::new(
            base.hash_function(),
            new_members.to_vec(),
        )?))
    }

    fn rebalance(
        &self,
        base: &Arc<ReplicatedConsistentHash>,
    ) -> Result<Arc<ReplicatedConsistentHash>> {
        Ok(Arc::clone(base))
    }

    fn union(
        &self,
        first: &ReplicatedConsistentHash,
        second: &ReplicatedConsistentHash,
    ) -> Result<Arc<ReplicatedConsistentHash>> {
        Ok(Arc::new(first.union(second)?))
    }

    fn name(&self) -> &'static str {
        "replicated"
    }
}

//! Mutable owner lists used while computing a new hash.

use crate::error::{ReplicationError, Result};
use crate::stats::OwnershipStatistics;
use corelib::{CapacityFactors, ConsistentHash, DefaultConsistentHash, HashFunction, NodeId};

/// Single-use, single-threaded working copy of a segment → owners mapping.
///
/// Owners are stored as indices into `members`, and the ownership counters
/// are updated on every change, so the algorithms can ask "how loaded is
/// this node" in O(1). Consumed by [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct SegmentBuilder {
    hash_function: HashFunction,
    initial_num_owners: usize,
    actual_num_owners: usize,
    members: Vec<NodeId>,
    capacity_factors: Option<CapacityFactors>,
    /// `true` for members with a positive capacity factor.
    loaded: Vec<bool>,
    nodes_with_load: usize,
    segment_owners: Vec<Vec<usize>>,
    stats: OwnershipStatistics,
}

fn load_flags(members: &[NodeId], capacity_factors: Option<&CapacityFactors>) -> Vec<bool> {
    members
        .iter()
        .map(|node| {
            capacity_factors.map_or(true, |factors| {
                factors.get(node).copied().unwrap_or(0.0) > 0.0
            })
        })
        .collect()
}

impl SegmentBuilder {
    /// A builder where no segment has any owner yet.
    pub fn new(
        hash_function: HashFunction,
        num_owners: usize,
        num_segments: usize,
        members: &[NodeId],
        capacity_factors: Option<&CapacityFactors>,
    ) -> Self {
        let loaded = load_flags(members, capacity_factors);
        let nodes_with_load = loaded.iter().filter(|&&l| l).count();
        let actual_num_owners = num_owners.min(nodes_with_load);
        Self {
            hash_function,
            initial_num_owners: num_owners,
            actual_num_owners,
            members: members.to_vec(),
            capacity_factors: capacity_factors.cloned(),
            loaded,
            nodes_with_load,
            segment_owners: vec![Vec::with_capacity(actual_num_owners); num_segments],
            stats: OwnershipStatistics::new(members),
        }
    }

    /// A builder seeded with the owners of `base`, keeping only owners that
    /// are in `members` and have a positive capacity factor.
    pub fn from_hash(
        base: &DefaultConsistentHash,
        members: &[NodeId],
        capacity_factors: Option<&CapacityFactors>,
    ) -> Self {
        let mut builder = Self::new(
            base.hash_function(),
            base.num_owners(),
            base.num_segments(),
            members,
            capacity_factors,
        );
        let segment_owners: Vec<Vec<usize>> = base
            .segment_owners()
            .iter()
            .map(|owners| {
                owners
                    .iter()
                    .filter_map(|node| builder.stats.index_of(node))
                    .filter(|&idx| builder.loaded[idx])
                    .collect()
            })
            .collect();
        builder.stats = OwnershipStatistics::from_owner_indices(members, &segment_owners);
        builder.segment_owners = segment_owners;
        builder
    }

    pub fn hash_function(&self) -> HashFunction {
        self.hash_function
    }

    pub fn num_segments(&self) -> usize {
        self.segment_owners.len()
    }

    pub fn actual_num_owners(&self) -> usize {
        self.actual_num_owners
    }

    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    pub fn member(&self, idx: usize) -> NodeId {
        self.members[idx]
    }

    pub fn num_nodes_with_load(&self) -> usize {
        self.nodes_with_load
    }

    pub fn has_load(&self, idx: usize) -> bool {
        self.loaded[idx]
    }

    /// Capacity factor of member `idx`, `1.0` when no factors were given.
    pub fn capacity_factor(&self, idx: usize) -> f32 {
        match &self.capacity_factors {
            Some(factors) => factors.get(&self.members[idx]).copied().unwrap_or(0.0),
            None => 1.0,
        }
    }

    /// Indices of members that may own segments, in member order.
    pub fn loaded_members(&self) -> impl Iterator<Item = usize> + '_ {
        self.loaded
            .iter()
            .enumerate()
            .filter(|(_, &loaded)| loaded)
            .map(|(idx, _)| idx)
    }

    pub fn owners(&self, segment: usize) -> &[usize] {
        &self.segment_owners[segment]
    }

    pub fn primary_owner(&self, segment: usize) -> Option<usize> {
        self.segment_owners[segment].first().copied()
    }

    pub fn backup_owners(&self, segment: usize) -> &[usize] {
        let owners = &self.segment_owners[segment];
        if owners.is_empty() {
            owners
        } else {
            &owners[1..]
        }
    }

    pub fn primary_owned(&self, idx: usize) -> usize {
        self.stats.primary_owned(idx)
    }

    pub fn owned(&self, idx: usize) -> usize {
        self.stats.owned(idx)
    }

    pub fn stats(&self) -> &OwnershipStatistics {
        &self.stats
    }

    /// Appends `owner`; becomes primary if the segment had no owners.
    /// Returns `false` if it already owns the segment.
    pub fn add_owner(&mut self, segment: usize, owner: usize) -> bool {
        let owners = &mut self.segment_owners[segment];
        if owners.contains(&owner) {
            return false;
        }
        owners.push(owner);
        self.stats.inc_owned(owner);
        if owners.len() == 1 {
            self.stats.inc_primary_owned(owner);
        }
        true
    }

    pub fn add_owners(&mut self, segment: usize, new_owners: &[usize]) -> bool {
        let mut modified = false;
        for &owner in new_owners {
            modified |= self.add_owner(segment, owner);
        }
        modified
    }

    /// Removes `owner` from `segment`. If it was the primary, the first
    /// backup is promoted.
    pub fn remove_owner(&mut self, segment: usize, owner: usize) -> Result<()> {
        let owners = &mut self.segment_owners[segment];
        let pos = owners.iter().position(|&o| o == owner).ok_or_else(|| {
            ReplicationError::InconsistentState(format!(
                "segment {segment}: {} is not an owner",
                self.members[owner]
            ))
        })?;
        owners.remove(pos);
        self.stats.dec_owned(owner);
        if pos == 0 {
            self.stats.dec_primary_owned(owner);
            if let Some(&promoted) = owners.first() {
                self.stats.inc_primary_owned(promoted);
            }
        }
        Ok(())
    }

    /// Puts `replacement` in the slot held by `owner`, keeping the slot's
    /// position in the owner list.
    pub fn replace_owner(
        &mut self,
        segment: usize,
        owner: usize,
        replacement: usize,
    ) -> Result<()> {
        let owners = &mut self.segment_owners[segment];
        if owners.contains(&replacement) {
            return Err(ReplicationError::InconsistentState(format!(
                "segment {segment}: {} already owns the segment",
                self.members[replacement]
            )));
        }
        let pos = owners.iter().position(|&o| o == owner).ok_or_else(|| {
            ReplicationError::InconsistentState(format!(
                "segment {segment}: {} is not an owner",
                self.members[owner]
            ))
        })?;
        owners[pos] = replacement;
        self.stats.dec_owned(owner);
        self.stats.inc_owned(replacement);
        if pos == 0 {
            self.stats.dec_primary_owned(owner);
            self.stats.inc_primary_owned(replacement);
        }
        Ok(())
    }

    /// Makes `new_primary` the primary owner of `segment`.
    ///
    /// A backup is moved to the front; a non-owner is inserted in front,
    /// growing the owner list by one. The old primary becomes a backup.
    pub fn replace_primary_owner(&mut self, segment: usize, new_primary: usize) -> Result<()> {
        let owners = &mut self.segment_owners[segment];
        let pos = owners.iter().position(|&o| o == new_primary);
        if pos == Some(0) {
            return Err(ReplicationError::InconsistentState(format!(
                "segment {segment}: can't replace a primary owner with itself"
            )));
        }

        let old_primary = owners.first().copied();
        match pos {
            Some(pos) => {
                owners.remove(pos);
            }
            None => self.stats.inc_owned(new_primary),
        }
        owners.insert(0, new_primary);
        self.stats.inc_primary_owned(new_primary);
        if let Some(old_primary) = old_primary {
            self.stats.dec_primary_owned(old_primary);
        }
        Ok(())
    }

    /// Converts the owner indices back to node ids.
    pub fn build(self) -> Result<DefaultConsistentHash> {
        let segment_owners = self
            .segment_owners
            .iter()
            .map(|owners| owners.iter().map(|&idx| self.members[idx]).collect())
            .collect();
        Ok(DefaultConsistentHash::new(
            self.hash_function,
            self.initial_num_owners,
            self.members,
            self.capacity_factors.as_ref(),
            segment_owners,
        )?)
    }
}

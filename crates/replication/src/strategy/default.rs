//! Balanced, minimal-movement owner assignment.
//!
//! # Algorithm
//!
//! 1. Primary owners: first make an existing backup the primary of segments
//!    whose primary is overloaded (no data moves), then bring in new primary
//!    owners, first without and then with one extra owner per segment.
//! 2. Backup owners: drop surplus owners from overloaded nodes, fill every
//!    segment up to the owner count from the least loaded nodes, then
//!    replace backups on overloaded nodes with underloaded ones.
//!
//! Ties always go to the first candidate in member order, so the result
//! depends only on the inputs.
//!
//! After a run every node with load primary-owns `floor(S/N)` or
//! `ceil(S/N)` segments and owns `floor(K*S/N)` or `ceil(K*S/N)`, where `N`
//! counts the members with a positive capacity factor.

use crate::builder::SegmentBuilder;
use crate::error::{ReplicationError, Result};
use crate::strategy::{self, ConsistentHashFactory, OrphanSource};
use corelib::topology::{Diversity, Locations};
use corelib::{CapacityFactors, ConsistentHash, DefaultConsistentHash, HashFunction, NodeId};
use std::sync::Arc;
use tracing::trace;

/// Factory for [`DefaultConsistentHash`] that moves as few owners as it can.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConsistentHashFactory;

impl DefaultConsistentHashFactory {
    pub fn new() -> Self {
        Self
    }

    fn assign(builder: &mut SegmentBuilder) -> Result<()> {
        Rebalancer::plain().run(builder)
    }
}

impl ConsistentHashFactory for DefaultConsistentHashFactory {
    type Hash = DefaultConsistentHash;

    fn create(
        &self,
        hash_function: HashFunction,
        num_owners: usize,
        num_segments: usize,
        members: &[NodeId],
        capacity_factors: Option<&CapacityFactors>,
    ) -> Result<Arc<DefaultConsistentHash>> {
        strategy::create_segments(
            self.name(),
            &Self::assign,
            hash_function,
            num_owners,
            num_segments,
            members,
            capacity_factors,
        )
    }

    fn update_members(
        &self,
        base: &Arc<DefaultConsistentHash>,
        new_members: &[NodeId],
        capacity_factors: Option<&CapacityFactors>,
    ) -> Result<Arc<DefaultConsistentHash>> {
        strategy::update_segment_members(
            self.name(),
            &Self::assign,
            OrphanSource::Rebalanced,
            base,
            new_members,
            capacity_factors,
        )
    }

    fn rebalance(&self, base: &Arc<DefaultConsistentHash>) -> Result<Arc<DefaultConsistentHash>> {
        let factors = base.capacity_factors();
        let mut builder = SegmentBuilder::from_hash(base, base.members(), factors.as_ref());
        Self::assign(&mut builder)?;
        Ok(strategy::publish_rebalance(self.name(), base, builder.build()?))
    }

    fn union(
        &self,
        first: &DefaultConsistentHash,
        second: &DefaultConsistentHash,
    ) -> Result<Arc<DefaultConsistentHash>> {
        strategy::union_segments(first, second)
    }

    fn name(&self) -> &'static str {
        "default"
    }
}

/// The rebalance passes, optionally steering backup choices towards
/// distinct failure domains.
///
/// `locations` must be aligned with the builder's member list.
pub(crate) struct Rebalancer<'a> {
    locations: Option<&'a Locations>,
}

impl<'a> Rebalancer<'a> {
    pub(crate) fn plain() -> Self {
        Self { locations: None }
    }

    pub(crate) fn topology_aware(locations: &'a Locations) -> Self {
        Self {
            locations: Some(locations),
        }
    }

    pub(crate) fn run(&self, builder: &mut SegmentBuilder) -> Result<()> {
        if builder.num_nodes_with_load() == 0 {
            return Err(ReplicationError::InvalidConfiguration(
                "no member has a non-zero capacity factor".into(),
            ));
        }
        self.add_primary_owners(builder)?;
        self.add_backup_owners(builder)?;
        Ok(())
    }

    fn add_primary_owners(&self, builder: &mut SegmentBuilder) -> Result<()> {
        let min_segments = builder.num_segments() / builder.num_nodes_with_load();

        // The second pass at min + 1 picks up swaps enabled by the pass at min
        for max in [min_segments + 1, min_segments, min_segments + 1] {
            self.swap_primary_owners_with_backups(builder, max)?;
        }

        let actual = builder.actual_num_owners();
        for max_owners in [actual, actual + 1] {
            for max in [min_segments + 1, min_segments, min_segments + 1] {
                self.do_add_primary_owners(builder, max, max_owners)?;
            }
        }
        Ok(())
    }

    fn swap_primary_owners_with_backups(
        &self,
        builder: &mut SegmentBuilder,
        max_segments: usize,
    ) -> Result<()> {
        for segment in (0..builder.num_segments()).rev() {
            let Some(primary) = builder.primary_owner(segment) else {
                continue;
            };
            if builder.primary_owned(primary) <= max_segments {
                continue;
            }
            let backups = builder.backup_owners(segment).to_vec();
            if let Some(new_primary) = find_new_primary_owner(builder, &backups, max_segments) {
                trace!(segment, from = primary, to = new_primary, "swap primary with backup");
                builder.replace_primary_owner(segment, new_primary)?;
            }
        }
        Ok(())
    }

    fn do_add_primary_owners(
        &self,
        builder: &mut SegmentBuilder,
        max_segments: usize,
        max_owners: usize,
    ) -> Result<()> {
        let candidates: Vec<usize> = builder.loaded_members().collect();
        for segment in (0..builder.num_segments()).rev() {
            if builder.owners(segment).len() >= max_owners {
                continue;
            }
            // Segments without owners always need a primary
            if let Some(primary) = builder.primary_owner(segment) {
                if builder.primary_owned(primary) <= max_segments {
                    continue;
                }
            }
            if let Some(new_primary) = find_new_primary_owner(builder, &candidates, max_segments) {
                trace!(segment, to = new_primary, "new primary owner");
                builder.replace_primary_owner(segment, new_primary)?;
            }
        }
        Ok(())
    }

    fn add_backup_owners(&self, builder: &mut SegmentBuilder) -> Result<()> {
        let min_segments =
            builder.actual_num_owners() * builder.num_segments() / builder.num_nodes_with_load();

        self.remove_extra_backup_owners(builder, min_segments)?;

        let mut max_segments = min_segments;
        while self.do_add_backup_owners(builder, max_segments)? {
            max_segments += 1;
            if max_segments > builder.num_segments() + 1 {
                return Err(ReplicationError::InconsistentState(
                    "unable to find enough backup owners".into(),
                ));
            }
        }

        for max in (min_segments..builder.num_segments()).rev() {
            self.replace_backup_owners(builder, max)?;
        }
        // K*S may not divide evenly by N, so one node can legitimately end
        // up with an extra segment after the sweep above.
        self.replace_backup_owners(builder, min_segments + 1)?;
        self.level_owned(builder)
    }

    fn remove_extra_backup_owners(
        &self,
        builder: &mut SegmentBuilder,
        min_segments: usize,
    ) -> Result<()> {
        let mut max_segments = min_segments + 1;
        while self.do_remove_extra_backup_owners(builder, max_segments)? {
            if max_segments == 0 {
                return Err(ReplicationError::InconsistentState(
                    "unable to remove extra owners".into(),
                ));
            }
            max_segments -= 1;
        }
        Ok(())
    }

    fn do_remove_extra_backup_owners(
        &self,
        builder: &mut SegmentBuilder,
        max_segments: usize,
    ) -> Result<bool> {
        let actual = builder.actual_num_owners();
        let mut too_many_owners = false;
        for segment in 0..builder.num_segments() {
            let mut idx = builder.owners(segment).len();
            while idx > 1 {
                idx -= 1;
                if builder.owners(segment).len() <= actual {
                    break;
                }
                let owner = builder.owners(segment)[idx];
                if builder.owned(owner) > max_segments {
                    builder.remove_owner(segment, owner)?;
                }
            }
            too_many_owners |= builder.owners(segment).len() > actual;
        }
        Ok(too_many_owners)
    }

    /// Returns `true` if some segment is still short of owners.
    fn do_add_backup_owners(
        &self,
        builder: &mut SegmentBuilder,
        max_segments: usize,
    ) -> Result<bool> {
        let actual = builder.actual_num_owners();
        let mut insufficient_owners = false;
        for segment in 0..builder.num_segments() {
            while builder.owners(segment).len() < actual {
                match self.find_new_backup_owner(builder, segment, None, max_segments) {
                    Some(owner) => {
                        builder.add_owner(segment, owner);
                    }
                    None => {
                        insufficient_owners = true;
                        break;
                    }
                }
            }
        }
        Ok(insufficient_owners)
    }

    fn replace_backup_owners(
        &self,
        builder: &mut SegmentBuilder,
        max_segments: usize,
    ) -> Result<()> {
        // Owner position in the outer loop keeps changes per segment low
        for owner_idx in (1..builder.actual_num_owners()).rev() {
            for segment in (0..builder.num_segments()).rev() {
                let Some(&owner) = builder.owners(segment).get(owner_idx) else {
                    continue;
                };
                if builder.owned(owner) <= max_segments {
                    continue;
                }
                let replacement =
                    self.find_new_backup_owner(builder, segment, Some(owner), max_segments);
                if let Some(replacement) = replacement {
                    trace!(segment, from = owner, to = replacement, "replace backup owner");
                    builder.replace_owner(segment, owner, replacement)?;
                }
            }
        }
        Ok(())
    }

    /// Moves backups from a node to one owning at least two segments fewer
    /// until no such move is left. Every move lowers the spread of owned
    /// counts, so this terminates.
    pub(crate) fn level_owned(&self, builder: &mut SegmentBuilder) -> Result<()> {
        loop {
            let mut moved = false;
            for segment in (0..builder.num_segments()).rev() {
                for owner_idx in 1..builder.owners(segment).len() {
                    let owner = builder.owners(segment)[owner_idx];
                    let max = builder.owned(owner).saturating_sub(1);
                    let replacement =
                        self.find_new_backup_owner(builder, segment, Some(owner), max);
                    if let Some(replacement) = replacement {
                        trace!(segment, from = owner, to = replacement, "level backup owner");
                        builder.replace_owner(segment, owner, replacement)?;
                        moved = true;
                    }
                }
            }
            if !moved && self.locations.is_none() {
                moved = self.chain_move(builder)?;
            }
            if !moved {
                return Ok(());
            }
        }
    }

    /// Moves one backup from the most to the least loaded node through an
    /// intermediate node, for when the two share every segment that would
    /// allow a direct move.
    fn chain_move(&self, builder: &mut SegmentBuilder) -> Result<bool> {
        let loaded: Vec<usize> = builder.loaded_members().collect();
        let (Some(&over), Some(&under)) = (
            loaded.iter().rev().max_by_key(|&&idx| builder.owned(idx)),
            loaded.iter().min_by_key(|&&idx| builder.owned(idx)),
        ) else {
            return Ok(false);
        };
        if builder.owned(over) < builder.owned(under) + 2 {
            return Ok(false);
        }

        for first in (0..builder.num_segments()).rev() {
            if !builder.backup_owners(first).contains(&over) {
                continue;
            }
            for &via in &loaded {
                if via == under || builder.owners(first).contains(&via) {
                    continue;
                }
                let second = (0..builder.num_segments()).rev().find(|&s| {
                    s != first
                        && builder.backup_owners(s).contains(&via)
                        && !builder.owners(s).contains(&under)
                });
                if let Some(second) = second {
                    trace!(first, second, from = over, via, to = under, "chain backup move");
                    builder.replace_owner(first, over, via)?;
                    builder.replace_owner(second, via, under)?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// The loaded non-owner of `segment` owning the fewest segments, below
    /// `max_segments`.
    ///
    /// `replacing` names the owner the candidate would take over from. With
    /// locations, candidates are ranked by the diversity the segment would
    /// reach first, and a replacement may never lower it.
    fn find_new_backup_owner(
        &self,
        builder: &SegmentBuilder,
        segment: usize,
        replacing: Option<usize>,
        max_segments: usize,
    ) -> Option<usize> {
        let owners = builder.owners(segment);
        let Some(locations) = self.locations else {
            let mut best = None;
            let mut found_owned = max_segments;
            for candidate in builder.loaded_members() {
                if builder.owned(candidate) >= found_owned || owners.contains(&candidate) {
                    continue;
                }
                best = Some(candidate);
                found_owned = builder.owned(candidate);
            }
            return best;
        };

        let kept: Vec<usize> = owners
            .iter()
            .copied()
            .filter(|owner| Some(*owner) != replacing)
            .collect();
        let floor = replacing.map(|_| locations.diversity(owners.iter().copied()));
        let mut best: Option<(usize, Diversity)> = None;
        for candidate in builder.loaded_members() {
            if builder.owned(candidate) >= max_segments || owners.contains(&candidate) {
                continue;
            }
            let score = locations.diversity(kept.iter().copied().chain([candidate]));
            if floor.is_some_and(|floor| score < floor) {
                continue;
            }
            let better = match best {
                None => true,
                Some((current, current_score)) => {
                    score > current_score
                        || (score == current_score
                            && builder.owned(candidate) < builder.owned(current))
                }
            };
            if better {
                best = Some((candidate, score));
            }
        }
        best.map(|(candidate, _)| candidate)
    }
}

/// The candidate with the fewest primary-owned segments, below `max_segments`.
fn find_new_primary_owner(
    builder: &SegmentBuilder,
    candidates: &[usize],
    max_segments: usize,
) -> Option<usize> {
    let mut best = None;
    let mut found_owned = max_segments;
    for &candidate in candidates {
        if !builder.has_load(candidate) {
            continue;
        }
        if builder.primary_owned(candidate) < found_owned {
            best = Some(candidate);
            found_owned = builder.primary_owned(candidate);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::OwnershipStatistics;

    fn nodes(n: u128) -> Vec<NodeId> {
        (1..=n).map(NodeId).collect()
    }

    #[test]
    fn test_single_member_owns_everything() {
        let ch = DefaultConsistentHashFactory
            .create(HashFunction::SipHash13, 2, 4, &nodes(1), None)
            .unwrap();
        for segment in 0..4 {
            assert_eq!(ch.locate_owners_for_segment(segment), vec![NodeId(1)]);
        }
    }

    #[test]
    fn test_more_segments_than_nodes() {
        let ch = DefaultConsistentHashFactory
            .create(HashFunction::SipHash13, 2, 10, &nodes(3), None)
            .unwrap();
        let stats = OwnershipStatistics::for_hash(&*ch);
        for idx in 0..3 {
            assert!((3..=4).contains(&stats.primary_owned(idx)));
            assert!((6..=7).contains(&stats.owned(idx)));
        }
    }

    #[test]
    fn test_fewer_segments_than_nodes() {
        let ch = DefaultConsistentHashFactory
            .create(HashFunction::SipHash13, 2, 2, &nodes(5), None)
            .unwrap();
        let stats = OwnershipStatistics::for_hash(&*ch);
        for idx in 0..5 {
            assert!(stats.primary_owned(idx) <= 1);
            assert!(stats.owned(idx) <= 1);
        }
        assert_eq!(stats.sum_owned(), 4);
    }

    #[test]
    fn test_zero_owners_rejected() {
        assert!(matches!(
            DefaultConsistentHashFactory.create(HashFunction::SipHash13, 0, 4, &nodes(2), None),
            Err(ReplicationError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_zero_capacity_member_never_owns() {
        let members = nodes(3);
        let factors: CapacityFactors = [(NodeId(1), 1.0), (NodeId(2), 0.0), (NodeId(3), 1.0)]
            .into_iter()
            .collect();
        let ch = DefaultConsistentHashFactory
            .create(HashFunction::SipHash13, 2, 8, &members, Some(&factors))
            .unwrap();
        assert!(ch.segments_for_owner(&NodeId(2)).is_empty());
        assert_eq!(ch.segments_for_owner(&NodeId(1)).len(), 8);
    }
}

//! Topology-aware variant of the default factory.
//!
//! Primary owners are balanced exactly as in the default factory. Backups
//! are placed so that each segment's owners cover as many sites, then racks,
//! then machines as the members offer, and diversity wins over balance: a
//! node alone on its site takes a backup of every segment that needs that
//! site, however many segments it already owns. Within that constraint
//! owned counts are levelled as far as they go.

use crate::builder::SegmentBuilder;
use crate::error::{ReplicationError, Result};
use crate::strategy::default::Rebalancer;
use crate::strategy::{self, ConsistentHashFactory, OrphanSource};
use corelib::topology::{Diversity, Locations};
use corelib::{
    CapacityFactors, ConsistentHash, DefaultConsistentHash, HashFunction, NodeId, TopologyInfo,
};
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::trace;

/// Default factory that also spreads owners across failure domains.
///
/// Every member must have an entry in the topology; a missing entry fails
/// the operation instead of being treated as co-located.
#[derive(Debug, Clone)]
pub struct TopologyAwareConsistentHashFactory {
    topology: Arc<TopologyInfo>,
}

impl TopologyAwareConsistentHashFactory {
    pub fn new(topology: Arc<TopologyInfo>) -> Self {
        Self { topology }
    }

    pub fn topology(&self) -> &Arc<TopologyInfo> {
        &self.topology
    }

    fn assign(&self, builder: &mut SegmentBuilder) -> Result<()> {
        let locations = self.topology.locations_for(builder.members())?;
        let rebalancer = Rebalancer::topology_aware(&locations);
        rebalancer.run(builder)?;
        improve_diversity(builder, &locations)?;
        spread_owners(builder, &locations)?;
        rebalancer.level_owned(builder)
    }
}

impl ConsistentHashFactory for TopologyAwareConsistentHashFactory {
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
            &|builder: &mut SegmentBuilder| self.assign(builder),
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
            &|builder: &mut SegmentBuilder| self.assign(builder),
            OrphanSource::Rebalanced,
            base,
            new_members,
            capacity_factors,
        )
    }

    fn rebalance(&self, base: &Arc<DefaultConsistentHash>) -> Result<Arc<DefaultConsistentHash>> {
        let factors = base.capacity_factors();
        let mut builder = SegmentBuilder::from_hash(base, base.members(), factors.as_ref());
        self.assign(&mut builder)?;
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
        "topology-aware"
    }
}

fn sum(a: Diversity, b: Diversity) -> Diversity {
    Diversity {
        sites: a.sites + b.sites,
        racks: a.racks + b.racks,
        machines: a.machines + b.machines,
    }
}

/// Diversity of `owners` with `from` swapped for `to`.
fn diversity_with(locations: &Locations, owners: &[usize], from: usize, to: usize) -> Diversity {
    locations.diversity(owners.iter().map(|&owner| if owner == from { to } else { owner }))
}

/// Balance-neutral moves that raise diversity, repeated until none is left.
///
/// Two kinds of move are tried, both touching backups only:
/// - swap a backup for a non-owner that owns fewer segments, when the
///   segment's diversity strictly improves;
/// - exchange backups between two segments, when the summed diversity of
///   both segments strictly improves.
///
/// Owned counts never move apart and the summed diversity of all segments
/// grows with every move, so the loop ends.
fn improve_diversity(builder: &mut SegmentBuilder, locations: &Locations) -> Result<()> {
    let num_segments = builder.num_segments();
    loop {
        let mut moved = false;

        for segment in 0..num_segments {
            for owner_idx in 1..builder.owners(segment).len() {
                let owners = builder.owners(segment).to_vec();
                let owner = owners[owner_idx];
                let current = locations.diversity(owners.iter().copied());
                let mut best: Option<(usize, Diversity)> = None;
                for candidate in builder.loaded_members() {
                    if owners.contains(&candidate)
                        || builder.owned(candidate) >= builder.owned(owner)
                    {
                        continue;
                    }
                    let score = diversity_with(locations, &owners, owner, candidate);
                    if score > current && best.map_or(true, |(_, s)| score > s) {
                        best = Some((candidate, score));
                    }
                }
                if let Some((candidate, _)) = best {
                    trace!(segment, from = owner, to = candidate, "swap backup for diversity");
                    builder.replace_owner(segment, owner, candidate)?;
                    moved = true;
                }
            }
        }

        for first in 0..num_segments {
            for second in (first + 1)..num_segments {
                if exchange_backups(builder, locations, first, second)? {
                    moved = true;
                }
            }
        }

        if !moved {
            return Ok(());
        }
    }
}

/// Diversity every segment can reach: one domain per owner at each level,
/// capped by the domains the loaded members span.
fn reachable_diversity(builder: &SegmentBuilder, locations: &Locations) -> Diversity {
    let all = locations.diversity(builder.loaded_members());
    let owners = builder.actual_num_owners();
    Diversity {
        sites: all.sites.min(owners),
        racks: all.racks.min(owners),
        machines: all.machines.min(owners),
    }
}

/// Swaps backups until every segment reaches [`reachable_diversity`], even
/// onto nodes that already own more than their share.
///
/// While a segment falls short at some level, two of its owners share a
/// domain at that level and one of them is a backup. Moving that backup to
/// an uncovered domain raises the segment's diversity, so each segment
/// reaches the target in a bounded number of swaps. Among the raising swaps
/// the one reaching the highest diversity wins, then the least loaded
/// candidate, then the most loaded backup.
fn spread_owners(builder: &mut SegmentBuilder, locations: &Locations) -> Result<()> {
    let target = reachable_diversity(builder, locations);
    for segment in 0..builder.num_segments() {
        loop {
            let owners = builder.owners(segment).to_vec();
            let current = locations.diversity(owners.iter().copied());
            if current >= target {
                break;
            }
            let mut best: Option<((Diversity, Reverse<usize>, usize), usize, usize)> = None;
            for &owner in owners.iter().skip(1) {
                for candidate in builder.loaded_members() {
                    if owners.contains(&candidate) {
                        continue;
                    }
                    let score = diversity_with(locations, &owners, owner, candidate);
                    if score <= current {
                        continue;
                    }
                    let rank = (score, Reverse(builder.owned(candidate)), builder.owned(owner));
                    if best.as_ref().map_or(true, |(best_rank, _, _)| rank > *best_rank) {
                        best = Some((rank, owner, candidate));
                    }
                }
            }
            let Some((_, owner, candidate)) = best else {
                return Err(ReplicationError::InconsistentState(format!(
                    "segment {segment}: no backup move raises diversity"
                )));
            };
            trace!(segment, from = owner, to = candidate, "spread backup to a new domain");
            builder.replace_owner(segment, owner, candidate)?;
        }
    }
    Ok(())
}

/// Exchanges one backup of `first` with one backup of `second` if that
/// raises their summed diversity. Returns `true` if an exchange was made.
fn exchange_backups(
    builder: &mut SegmentBuilder,
    locations: &Locations,
    first: usize,
    second: usize,
) -> Result<bool> {
    let a_owners = builder.owners(first).to_vec();
    let b_owners = builder.owners(second).to_vec();
    let current = sum(
        locations.diversity(a_owners.iter().copied()),
        locations.diversity(b_owners.iter().copied()),
    );

    for &a in a_owners.iter().skip(1) {
        if b_owners.contains(&a) {
            continue;
        }
        for &b in b_owners.iter().skip(1) {
            if a_owners.contains(&b) {
                continue;
            }
            let exchanged = sum(
                diversity_with(locations, &a_owners, a, b),
                diversity_with(locations, &b_owners, b, a),
            );
            if exchanged > current {
                trace!(first, second, a, b, "exchange backups for diversity");
                builder.replace_owner(first, a, b)?;
                builder.replace_owner(second, b, a)?;
                return Ok(true);
            }
        }
    }
    Ok(false)
}

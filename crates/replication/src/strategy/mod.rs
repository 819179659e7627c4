//! Consistent hash factories.
//!
//! A factory turns a member list into a published hash and keeps it in
//! shape as membership changes:
//!
//! - **DefaultConsistentHashFactory**: moves as few owners as possible
//!   while keeping every node within one segment of its fair share
//! - **TopologyAwareConsistentHashFactory**: the same, preferring owners on
//!   distinct sites, racks and machines
//! - **SyncConsistentHashFactory**: derives owners purely from member
//!   hashes, so independent nodes compute identical hashes
//! - **ReplicatedConsistentHashFactory**: one segment owned by everybody

pub mod default;
pub mod replicated;
pub mod sync;
pub mod topology_aware;

pub use default::DefaultConsistentHashFactory;
pub use replicated::ReplicatedConsistentHashFactory;
pub use sync::SyncConsistentHashFactory;
pub use topology_aware::TopologyAwareConsistentHashFactory;

use crate::builder::SegmentBuilder;
use crate::error::{ReplicationError, Result};
use corelib::{CapacityFactors, ConsistentHash, DefaultConsistentHash, HashFunction, NodeId};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Builds and maintains hashes of one concrete type.
///
/// All operations are pure: given the same inputs they return structurally
/// equal hashes. Operations that find nothing to change hand back the base
/// `Arc` itself, so callers can detect a no-op with [`Arc::ptr_eq`].
///
/// # Thread Safety
///
/// Factories hold only immutable configuration and may be shared freely.
pub trait ConsistentHashFactory: Send + Sync + 'static {
    type Hash: ConsistentHash + Clone + PartialEq;

    /// A fresh, balanced hash for `members`.
    ///
    /// # Errors
    /// `InvalidConfiguration` for zero owners or segments, an empty or
    /// duplicated member list, or unusable capacity factors.
    fn create(
        &self,
        hash_function: HashFunction,
        num_owners: usize,
        num_segments: usize,
        members: &[NodeId],
        capacity_factors: Option<&CapacityFactors>,
    ) -> Result<Arc<Self::Hash>>;

    /// Drops leavers from `base` and gives owners to segments that lost all
    /// of theirs. Joiners only receive such orphaned segments; spreading
    /// load onto them is left to [`rebalance`](Self::rebalance).
    fn update_members(
        &self,
        base: &Arc<Self::Hash>,
        new_members: &[NodeId],
        capacity_factors: Option<&CapacityFactors>,
    ) -> Result<Arc<Self::Hash>>;

    /// A balanced hash for the members of `base`, or `base` itself if it is
    /// already balanced.
    fn rebalance(&self, base: &Arc<Self::Hash>) -> Result<Arc<Self::Hash>>;

    /// Merge used while state moves from `first` to `second`: the owners of
    /// `first` keep their order and those of `second` are appended.
    fn union(&self, first: &Self::Hash, second: &Self::Hash) -> Result<Arc<Self::Hash>>;

    /// Factory name (for logging/metrics).
    fn name(&self) -> &'static str;
}

/// Rejects inputs no factory can build a hash from.
pub(crate) fn check_config(
    num_owners: usize,
    num_segments: usize,
    members: &[NodeId],
    capacity_factors: Option<&CapacityFactors>,
) -> Result<()> {
    if num_owners == 0 {
        return Err(ReplicationError::InvalidConfiguration(
            "the number of owners should be greater than 0".into(),
        ));
    }
    if num_segments == 0 {
        return Err(ReplicationError::InvalidConfiguration(
            "the number of segments should be greater than 0".into(),
        ));
    }
    check_members(members, capacity_factors)
}

pub(crate) fn check_members(
    members: &[NodeId],
    capacity_factors: Option<&CapacityFactors>,
) -> Result<()> {
    if members.is_empty() {
        return Err(ReplicationError::InvalidConfiguration(
            "can't construct a consistent hash without any members".into(),
        ));
    }
    let mut seen = HashSet::with_capacity(members.len());
    if let Some(dup) = members.iter().find(|node| !seen.insert(**node)) {
        return Err(ReplicationError::InvalidConfiguration(format!(
            "member {dup} is listed twice"
        )));
    }
    if let Some(factors) = capacity_factors {
        let mut any_load = false;
        for node in members {
            match factors.get(node) {
                Some(factor) if factor.is_finite() && *factor >= 0.0 => any_load |= *factor > 0.0,
                Some(factor) => {
                    return Err(ReplicationError::InvalidConfiguration(format!(
                        "invalid capacity factor {factor} for member {node}"
                    )))
                }
                None => {
                    return Err(ReplicationError::InvalidConfiguration(format!(
                        "no capacity factor for member {node}"
                    )))
                }
            }
        }
        if !any_load {
            return Err(ReplicationError::InvalidConfiguration(
                "there must be at least one member with a non-zero capacity factor".into(),
            ));
        }
    }
    Ok(())
}

/// Factors of `members` only, so hashes compare equal regardless of extra
/// entries in the caller's map.
pub(crate) fn restrict_factors(
    members: &[NodeId],
    capacity_factors: Option<&CapacityFactors>,
) -> Option<CapacityFactors> {
    capacity_factors.map(|factors| {
        members
            .iter()
            .filter_map(|node| factors.get(node).map(|factor| (*node, *factor)))
            .collect()
    })
}

/// Number of (segment, owner) pairs present in `new` but not in `old`.
pub(crate) fn owner_changes(old: &DefaultConsistentHash, new: &DefaultConsistentHash) -> usize {
    old.segment_owners()
        .iter()
        .zip(new.segment_owners())
        .map(|(before, after)| after.iter().filter(|node| !before.contains(node)).count())
        .sum()
}

pub(crate) fn record_owner_changes(factory: &'static str, changes: usize) {
    metrics::counter!("chash_owner_changes_total", "factory" => factory).increment(changes as u64);
}

/// Fills an empty or partially filled builder.
pub(crate) type Assign<'a> = dyn Fn(&mut SegmentBuilder) -> Result<()> + 'a;

pub(crate) fn create_segments(
    factory: &'static str,
    assign: &Assign<'_>,
    hash_function: HashFunction,
    num_owners: usize,
    num_segments: usize,
    members: &[NodeId],
    capacity_factors: Option<&CapacityFactors>,
) -> Result<Arc<DefaultConsistentHash>> {
    check_config(num_owners, num_segments, members, capacity_factors)?;
    let factors = restrict_factors(members, capacity_factors);
    let mut builder =
        SegmentBuilder::new(hash_function, num_owners, num_segments, members, factors.as_ref());
    assign(&mut builder)?;
    let ch = builder.build()?;
    debug!(
        factory,
        members = members.len(),
        segments = num_segments,
        owners = num_owners,
        "created consistent hash"
    );
    Ok(Arc::new(ch))
}

/// Where segments that lost every owner get new owners from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OrphanSource {
    /// The assignment run over a copy of the surviving owners, so the next
    /// rebalance keeps the owners it hands out.
    Rebalanced,
    /// The assignment run over an empty builder for the new members.
    Fresh,
}

/// Shared leaver handling of the segment-list factories.
///
/// Segments that lost every owner take their owners from one extra
/// assignment picked by `source`; it is computed at most once, and only if
/// some segment needs it.
pub(crate) fn update_segment_members(
    factory: &'static str,
    assign: &Assign<'_>,
    source: OrphanSource,
    base: &Arc<DefaultConsistentHash>,
    new_members: &[NodeId],
    capacity_factors: Option<&CapacityFactors>,
) -> Result<Arc<DefaultConsistentHash>> {
    check_members(new_members, capacity_factors)?;
    let factors = restrict_factors(new_members, capacity_factors);
    if base.members() == new_members && base.capacity_factors() == factors {
        return Ok(Arc::clone(base));
    }

    let mut builder = SegmentBuilder::from_hash(base, new_members, factors.as_ref());
    let mut balanced: Option<SegmentBuilder> = None;
    for segment in 0..builder.num_segments() {
        if !builder.owners(segment).is_empty() {
            continue;
        }
        if balanced.is_none() {
            let mut filled = match source {
                OrphanSource::Rebalanced => builder.clone(),
                OrphanSource::Fresh => SegmentBuilder::new(
                    builder.hash_function(),
                    base.num_owners(),
                    builder.num_segments(),
                    new_members,
                    factors.as_ref(),
                ),
            };
            assign(&mut filled)?;
            balanced = Some(filled);
        }
        if let Some(balanced) = &balanced {
            let owners = balanced.owners(segment).to_vec();
            builder.add_owners(segment, &owners);
        }
    }

    let ch = builder.build()?;
    let changes = owner_changes(base, &ch);
    record_owner_changes(factory, changes);
    debug!(
        factory,
        members = new_members.len(),
        owner_changes = changes,
        "updated consistent hash members"
    );
    Ok(Arc::new(ch))
}

/// Returns `candidate` unless it equals `base`, in which case `base` is
/// handed back unchanged.
pub(crate) fn publish_rebalance(
    factory: &'static str,
    base: &Arc<DefaultConsistentHash>,
    candidate: DefaultConsistentHash,
) -> Arc<DefaultConsistentHash> {
    if candidate == **base {
        debug!(factory, "consistent hash already balanced");
        return Arc::clone(base);
    }
    let changes = owner_changes(base, &candidate);
    record_owner_changes(factory, changes);
    debug!(
        factory,
        members = candidate.members().len(),
        owner_changes = changes,
        "rebalanced consistent hash"
    );
    Arc::new(candidate)
}

pub(crate) fn union_segments(
    first: &DefaultConsistentHash,
    second: &DefaultConsistentHash,
) -> Result<Arc<DefaultConsistentHash>> {
    Ok(Arc::new(first.union(second)?))
}

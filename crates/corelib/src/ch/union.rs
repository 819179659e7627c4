//! Transitional view over the hashes before and after a rebalance.
//!
//! While state transfer is in flight a key must be considered present on
//! every node that owns it in either hash. The union is only a read view:
//! it does not implement [`ConsistentHash`], so it can never be nested
//! inside another union.

use super::ConsistentHash;
use crate::error::{Error, Result};
use crate::node::NodeId;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Owners in the old hash followed by the new owners not already listed.
#[derive(Debug)]
pub struct UnionConsistentHash<C: ConsistentHash> {
    old: Arc<C>,
    new: Arc<C>,
}

fn merge(mut first: Vec<NodeId>, second: Vec<NodeId>) -> Vec<NodeId> {
    for node in second {
        if !first.contains(&node) {
            first.push(node);
        }
    }
    first
}

impl<C: ConsistentHash> Clone for UnionConsistentHash<C> {
    fn clone(&self) -> Self {
        Self {
            old: Arc::clone(&self.old),
            new: Arc::clone(&self.new),
        }
    }
}

impl<C: ConsistentHash> UnionConsistentHash<C> {
    /// Both hashes must agree on the key → segment mapping.
    pub fn new(old: Arc<C>, new: Arc<C>) -> Result<Self> {
        if old.hash_function() != new.hash_function() || old.num_segments() != new.num_segments() {
            return Err(Error::InvalidConfiguration(
                "old and new hashes map keys to segments differently".into(),
            ));
        }
        Ok(Self { old, new })
    }

    pub fn old_hash(&self) -> &Arc<C> {
        &self.old
    }

    pub fn new_hash(&self) -> &Arc<C> {
        &self.new
    }

    pub fn segment(&self, key: &[u8]) -> usize {
        self.old.segment(key)
    }

    /// Members of either hash, old members first.
    pub fn members(&self) -> Vec<NodeId> {
        merge(self.old.members().to_vec(), self.new.members().to_vec())
    }

    pub fn locate_owners_for_segment(&self, segment: usize) -> Vec<NodeId> {
        merge(
            self.old.locate_owners_for_segment(segment),
            self.new.locate_owners_for_segment(segment),
        )
    }

    pub fn locate_owners(&self, key: &[u8]) -> Vec<NodeId> {
        self.locate_owners_for_segment(self.segment(key))
    }

    /// Set union of `old.locate(key, repl_count)` and `new.locate(key, repl_count)`,
    /// in insertion order.
    pub fn locate(&self, key: &[u8], repl_count: usize) -> Vec<NodeId> {
        merge(self.old.locate(key, repl_count), self.new.locate(key, repl_count))
    }

    /// The old primary stays primary until the transition completes.
    pub fn locate_primary_owner(&self, key: &[u8]) -> Option<NodeId> {
        self.old
            .locate_primary_owner(key)
            .or_else(|| self.new.locate_primary_owner(key))
    }

    pub fn is_key_local_to_node(&self, node: &NodeId, key: &[u8]) -> bool {
        self.old.is_key_local_to_node(node, key) || self.new.is_key_local_to_node(node, key)
    }

    /// Not defined while two hashes are live.
    pub fn hash_id(&self, _key: &[u8]) -> Result<i32> {
        Err(Error::Unsupported("hash_id on a union hash"))
    }

    /// Not defined while two hashes are live.
    pub fn state_providers_on_leave(
        &self,
        _leaver: &NodeId,
        _repl_count: usize,
    ) -> Result<BTreeSet<NodeId>> {
        Err(Error::Unsupported("state_providers_on_leave on a union hash"))
    }

    /// Not defined while two hashes are live.
    pub fn state_providers_on_join(
        &self,
        _joiner: &NodeId,
        _repl_count: usize,
    ) -> Result<BTreeSet<NodeId>> {
        Err(Error::Unsupported("state_providers_on_join on a union hash"))
    }
}

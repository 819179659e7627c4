//! Occupied positions of the hash wheel.

use crate::error::{Error, Result};
use crate::hash::HashFunction;
use crate::vnode::NodeRef;
use std::collections::BTreeMap;

/// Sorted map of wheel position → holder.
///
/// Positions live in `[0, hash_space)`. A reference whose preferred position
/// is taken probes forward (wrapping) to the next free one, so insertion
/// order matters: callers insert in a fixed order to stay deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingPositions {
    hash_space: u32,
    positions: BTreeMap<u32, NodeRef>,
}

impl RingPositions {
    pub fn new(hash_space: u32) -> Self {
        Self {
            hash_space,
            positions: BTreeMap::new(),
        }
    }

    pub fn hash_space(&self) -> u32 {
        self.hash_space
    }

    /// Places `node`, returning the position it ended up on.
    pub fn insert(&mut self, hash_function: HashFunction, node: NodeRef) -> Result<u32> {
        if self.positions.len() as u64 >= u64::from(self.hash_space) {
            return Err(Error::RingFull(self.hash_space));
        }
        let mut position = node.preferred_position(hash_function, self.hash_space);
        while self.positions.contains_key(&position) {
            position = (position + 1) % self.hash_space;
        }
        self.positions.insert(position, node);
        Ok(position)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, position: u32) -> Option<&NodeRef> {
        self.positions.get(&position)
    }

    /// All holders clockwise, starting at `position` (inclusive) and
    /// wrapping around once.
    pub fn clockwise_from(&self, position: u32) -> impl Iterator<Item = (u32, &NodeRef)> + '_ {
        self.positions
            .range(position..)
            .chain(self.positions.range(..position))
            .map(|(pos, node)| (*pos, node))
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &NodeRef)> + '_ {
        self.positions.iter().map(|(pos, node)| (*pos, node))
    }
}

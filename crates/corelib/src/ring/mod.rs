//! Consistent hash wheel implementation.
//!
//! The wheel manages member positions and walks them clockwise to find the
//! owners of a key.

pub mod position;
pub mod ring;

pub use position::RingPositions;
pub use ring::{RingBuilder, WheelConsistentHash, HASH_SPACE};

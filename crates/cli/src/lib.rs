//! `chash`: inspect segment ownership produced by the consistent hash
//! factories.
//!
//! Provides commands for:
//! - Creating a hash and reporting per-node ownership
//! - Simulating members leaving or joining, followed by a rebalance
//! - Dumping a hash in its serialized form

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult};
pub use config::CliConfig;

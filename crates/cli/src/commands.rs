//! `chash` subcommands.

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use corelib::{ConsistentHash, HashFunction, NodeId, NodeTopologyInfo, TopologyInfo};
use replication::{
    ConsistentHashFactory, DefaultConsistentHashFactory, OwnershipStatistics,
    ReplicatedConsistentHashFactory, SyncConsistentHashFactory, TopologyAwareConsistentHashFactory,
};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Which factory builds the hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FactoryKind {
    Default,
    Sync,
    Topology,
    Replicated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HashKind {
    Sip,
    Xxh3,
}

impl From<HashKind> for HashFunction {
    fn from(kind: HashKind) -> Self {
        match kind {
            HashKind::Sip => HashFunction::SipHash13,
            HashKind::Xxh3 => HashFunction::Xxh3,
        }
    }
}

/// Shape of the cluster and hash to build.
#[derive(Debug, Clone, Args)]
pub struct HashArgs {
    /// Number of members, named node-0, node-1, ...
    #[arg(long, default_value_t = 4)]
    pub nodes: usize,
    #[arg(long, default_value_t = 64)]
    pub segments: usize,
    #[arg(long, default_value_t = 2)]
    pub owners: usize,
    #[arg(long, value_enum, default_value_t = FactoryKind::Default)]
    pub factory: FactoryKind,
    #[arg(long, value_enum, default_value_t = HashKind::Sip)]
    pub hash: HashKind,
    /// Sites to spread the members over (round-robin); used by `topology`.
    #[arg(long, default_value_t = 1)]
    pub sites: usize,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Build a hash and print per-node ownership.
    Create {
        #[command(flatten)]
        hash: HashArgs,
        /// Print the hash itself as JSON instead of the report.
        #[arg(long)]
        json: bool,
    },
    /// Remove the last `count` members, then rebalance.
    Leave {
        #[command(flatten)]
        hash: HashArgs,
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Add `count` new members, then rebalance.
    Join {
        #[command(flatten)]
        hash: HashArgs,
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
}

/// Ownership of one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub name: String,
    pub primary: usize,
    pub owned: usize,
}

/// Output of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Report {
        factory: FactoryKind,
        segments: usize,
        rows: Vec<Row>,
        /// Owner slots that changed, for leave/join.
        owner_changes: Option<usize>,
    },
    Json(String),
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandResult::Json(json) => write!(f, "{json}"),
            CommandResult::Report {
                factory,
                segments,
                rows,
                owner_changes,
            } => {
                writeln!(f, "factory: {factory:?}, segments: {segments}")?;
                writeln!(f, "{:<12} {:>8} {:>8}", "node", "primary", "owned")?;
                for row in rows {
                    writeln!(f, "{:<12} {:>8} {:>8}", row.name, row.primary, row.owned)?;
                }
                if let Some(changes) = owner_changes {
                    writeln!(f, "owner changes: {changes}")?;
                }
                Ok(())
            }
        }
    }
}

fn member_names(range: std::ops::Range<usize>) -> Vec<(NodeId, String)> {
    range
        .map(|i| {
            let name = format!("node-{i}");
            (NodeId::from_name(&name), name)
        })
        .collect()
}

fn topology_for(names: &[(NodeId, String)], sites: usize) -> TopologyInfo {
    let mut topology = TopologyInfo::new();
    for (i, (node, _)) in names.iter().enumerate() {
        let site = i % sites.max(1);
        topology.insert(
            *node,
            NodeTopologyInfo::new(
                Some(format!("machine-{i}")),
                Some(format!("rack-{site}")),
                Some(format!("site-{site}")),
            ),
        );
    }
    topology
}

fn report<C: ConsistentHash>(
    factory: FactoryKind,
    ch: &C,
    names: &HashMap<NodeId, String>,
    owner_changes: Option<usize>,
) -> CommandResult {
    let stats = OwnershipStatistics::for_hash(ch);
    let rows = ch
        .members()
        .iter()
        .enumerate()
        .map(|(idx, node)| Row {
            name: names.get(node).cloned().unwrap_or_else(|| node.to_string()),
            primary: stats.primary_owned(idx),
            owned: stats.owned(idx),
        })
        .collect();
    CommandResult::Report {
        factory,
        segments: ch.num_segments(),
        rows,
        owner_changes,
    }
}

fn owner_changes<C: ConsistentHash>(before: &C, after: &C) -> usize {
    (0..after.num_segments())
        .map(|segment| {
            let old = before.locate_owners_for_segment(segment);
            after
                .locate_owners_for_segment(segment)
                .iter()
                .filter(|node| !old.contains(node))
                .count()
        })
        .sum()
}

impl Command {
    pub fn hash_args(&self) -> &HashArgs {
        match self {
            Command::Create { hash, .. }
            | Command::Leave { hash, .. }
            | Command::Join { hash, .. } => hash,
        }
    }

    pub fn execute(&self) -> Result<CommandResult> {
        let args = self.hash_args();
        if args.nodes == 0 {
            bail!("--nodes must be at least 1");
        }
        let joiners = match self {
            Command::Join { count, .. } => *count,
            _ => 0,
        };
        let names = member_names(0..args.nodes + joiners);
        let topology = Arc::new(topology_for(&names, args.sites));

        match args.factory {
            FactoryKind::Default => self.run(DefaultConsistentHashFactory::new(), &names),
            FactoryKind::Sync => self.run(SyncConsistentHashFactory::new(), &names),
            FactoryKind::Topology => {
                self.run(TopologyAwareConsistentHashFactory::new(topology), &names)
            }
            FactoryKind::Replicated => self.run(ReplicatedConsistentHashFactory::new(), &names),
        }
    }

    fn run<F>(&self, factory: F, names: &[(NodeId, String)]) -> Result<CommandResult>
    where
        F: ConsistentHashFactory,
        F::Hash: Serialize,
    {
        let args = self.hash_args();
        let lookup: HashMap<NodeId, String> = names.iter().cloned().collect();
        let initial: Vec<NodeId> = names[..args.nodes].iter().map(|(node, _)| *node).collect();
        let ch = factory
            .create(args.hash.into(), args.owners, args.segments, &initial, None)
            .with_context(|| format!("creating a {} hash", factory.name()))?;

        let next_members: Vec<NodeId> = match self {
            Command::Create { json: true, .. } => {
                return Ok(CommandResult::Json(serde_json::to_string_pretty(&*ch)?));
            }
            Command::Create { .. } => return Ok(report(args.factory, &*ch, &lookup, None)),
            Command::Leave { count, .. } => {
                if *count >= initial.len() {
                    bail!("at least one member must stay");
                }
                initial[..initial.len() - count].to_vec()
            }
            Command::Join { .. } => names.iter().map(|(node, _)| *node).collect(),
        };

        let updated = factory.update_members(&ch, &next_members, None)?;
        let balanced = factory.rebalance(&updated)?;
        let changes = owner_changes(&*ch, &*balanced);
        info!(factory = factory.name(), owner_changes = changes, "membership change applied");
        Ok(report(args.factory, &*balanced, &lookup, Some(changes)))
    }
}

//! Command-line configuration.

use crate::commands::Command;
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::Level;

/// Inspect how consistent hash factories assign segments.
#[derive(Debug, Parser)]
#[command(name = "chash", version)]
pub struct CliConfig {
    /// trace, debug, info, warn or error
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    /// Installs logging to stderr, runs the command and prints its result.
    pub fn run(self) -> Result<()> {
        let level: Level = self
            .log_level
            .parse()
            .with_context(|| format!("invalid log level {:?}", self.log_level))?;
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|err| anyhow!("failed to install logging: {err}"))?;

        let result = self.command.execute()?;
        print!("{result}");
        Ok(())
    }
}

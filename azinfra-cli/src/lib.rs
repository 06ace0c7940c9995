//! Command line surface for `azinfra`.
//!
//! Parses flags, loads credentials, installs logging and turns ctrl-c into a cancellation of
//! the running orchestrator. Everything that talks to the cloud lives in `azinfra-core`.

pub mod commands;
pub mod credentials;
pub mod logging;

use anyhow::Result;
use azinfra_core::CancellationToken;
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::commands::infra::{InfraCommands, handle_infra_command};

#[derive(Debug, Parser)]
#[clap(name = "azinfra", version, about = "Provision Azure infrastructure for a hosted cluster")]
pub struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[clap(short, long, global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage cluster infrastructure
    #[clap(subcommand)]
    Infra(InfraCommands),
}

/// Runs `cli` until it finishes or ctrl-c cancels it.
pub async fn run(cli: Cli) -> Result<()> {
    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping at the next request boundary");
            watcher.cancel();
        }
    });

    match cli.command {
        Commands::Infra(cmd) => handle_infra_command(cmd, cancel).await,
    }
}

//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod pipeline;
mod trace;

pub use pipeline::PipelineCommands;
pub use trace::TraceCommands;

use anyhow::{Result, bail};
use clap::Subcommand;
use colored::*;
use pipewright_client::DaemonClient;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Pipeline management
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Installation and run traces
    Trace {
        #[command(subcommand)]
        command: TraceCommands,
    },
    /// Check that the daemon is reachable
    Health,
}

/// Routes a command to its handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Pipeline { command } => pipeline::handle_pipeline_command(command, config).await,
        Commands::Trace { command } => trace::handle_trace_command(command, config).await,
        Commands::Health => check_health(config).await,
    }
}

async fn check_health(config: &Config) -> Result<()> {
    let client = DaemonClient::new(&config.daemon_url);

    if client.health().await? {
        println!("{} {}", "✓".green().bold(), client.base_url().cyan());
        Ok(())
    } else {
        bail!("Daemon at {} is unhealthy", client.base_url())
    }
}

//! Pipewright CLI
//!
//! Command-line interface for interacting with the Pipewright daemon.

mod commands;
mod config;
mod id_resolver;
mod types;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "pipewright")]
#[command(about = "Pipewright ML pipeline CLI", long_about = None)]
struct Cli {
    /// Daemon URL
    #[arg(long, env = "PIPEWRIGHT_URL", default_value = "http://localhost:6927")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        daemon_url: cli.url,
    };

    handle_command(cli.command, &config).await
}

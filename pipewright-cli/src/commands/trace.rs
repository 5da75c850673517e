//! Trace command handlers

use anyhow::{Result, bail};
use clap::Subcommand;
use colored::*;
use pipewright_client::DaemonClient;
use pipewright_core::domain::log::LogLevel;
use pipewright_core::domain::trace::{Trace, TraceState};
use uuid::Uuid;

use crate::config::{Config, POLL_INTERVAL};

/// Trace subcommands
#[derive(Subcommand)]
pub enum TraceCommands {
    /// Show a trace and its log
    Get {
        /// Trace ID
        id: Uuid,
    },
    /// Cancel a running trace
    Cancel {
        /// Trace ID
        id: Uuid,
    },
    /// Wait for a trace to finish
    Wait {
        /// Trace ID
        id: Uuid,
    },
}

pub async fn handle_trace_command(command: TraceCommands, config: &Config) -> Result<()> {
    let client = DaemonClient::new(&config.daemon_url);

    match command {
        TraceCommands::Get { id } => {
            let trace = client.get_trace(id).await?;
            print_trace_details(&trace);
            Ok(())
        }
        TraceCommands::Cancel { id } => {
            client.cancel_trace(id).await?;
            println!(
                "{}",
                format!("✓ Cancellation of trace {} requested", id)
                    .green()
                    .bold()
            );
            Ok(())
        }
        TraceCommands::Wait { id } => wait_and_report(&client, id).await,
    }
}

/// Polls a trace to completion, prints it, and fails unless it succeeded
pub(crate) async fn wait_and_report(client: &DaemonClient, trace_id: Uuid) -> Result<()> {
    println!("{}", format!("Waiting for trace {}...", trace_id).dimmed());

    let trace = client.wait_for_trace(trace_id, POLL_INTERVAL, None).await?;
    print_trace_details(&trace);

    match trace.state {
        TraceState::Success => Ok(()),
        state => bail!("Trace {} ended {}", trace_id, state),
    }
}

pub(crate) fn colored_state(state: TraceState) -> ColoredString {
    match state {
        TraceState::Running => state.to_string().yellow(),
        TraceState::Success => state.to_string().green(),
        TraceState::Failed => state.to_string().red(),
        TraceState::Cancelled => state.to_string().magenta(),
    }
}

/// Print a one-line trace summary
pub(crate) fn print_trace_summary(trace: &Trace) {
    println!(
        "  {} {} {} {}",
        "▸".cyan(),
        trace.id.to_string().dimmed(),
        trace.kind.to_string().bold(),
        colored_state(trace.state)
    );
}

fn print_trace_details(trace: &Trace) {
    println!("{}", "Trace Details:".bold());
    println!("  ID:       {}", trace.id.to_string().cyan());
    println!("  Pipeline: {}", trace.target_id.to_string().dimmed());
    println!("  Kind:     {}", trace.kind);
    println!("  State:    {}", colored_state(trace.state));
    println!(
        "  Started:  {}",
        trace.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(finished) = trace.finished_at {
        println!("  Finished: {}", finished.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(error) = &trace.error {
        println!("  Error:    {}", error.red());
    }

    if !trace.log.is_empty() {
        println!("\n{}", "Log:".bold());
        for entry in &trace.log {
            let level = match entry.level {
                LogLevel::Debug => "debug".dimmed(),
                LogLevel::Info => "info".normal(),
                LogLevel::Warning => "warn".yellow(),
                LogLevel::Error => "error".red(),
            };
            println!(
                "  {} {:>5} {}",
                entry.timestamp.format("%H:%M:%S").to_string().dimmed(),
                level,
                entry.message
            );
        }
    }
}

//! Pipeline command handlers
//!
//! Handles all pipeline-related CLI commands including creation, listing,
//! viewing, updating, deletion, installation and runs.

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use colored::*;
use pipewright_client::DaemonClient;
use pipewright_core::domain::pipeline::PipelineStatus;
use pipewright_core::domain::plugin::PluginRole;
use pipewright_core::dto::pipeline::{
    CreatePipeline, PipelineConfig, PipelineRecord, UpdatePipeline,
};
use pipewright_core::dto::trace::TraceReference;

use crate::commands::trace::{colored_state, print_trace_summary, wait_and_report};
use crate::config::Config;
use crate::id_resolver::resolve_pipeline_id;
use crate::types::IdOrPrefix;

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Create a new pipeline from a JSON config file
    Create {
        /// Path to the pipeline config (JSON with a `plugins` section)
        #[arg(short, long)]
        config: String,

        /// Override the name from the config file
        #[arg(short, long)]
        name: Option<String>,
    },
    /// List all pipelines
    List,
    /// Get pipeline details
    Get {
        /// Pipeline ID or unambiguous prefix
        id: String,
    },
    /// Replace a pipeline's configuration
    Update {
        /// Pipeline ID or unambiguous prefix
        id: String,

        /// Path to the new pipeline config
        #[arg(short, long)]
        config: String,
    },
    /// Delete a pipeline
    Delete {
        /// Pipeline ID or unambiguous prefix
        id: String,
    },
    /// Delete every pipeline
    DeleteAll {
        /// Confirm deleting every pipeline
        #[arg(long)]
        yes: bool,
    },
    /// Install the plugins of a pipeline
    Install {
        /// Pipeline ID or unambiguous prefix
        id: String,

        /// Wait for the installation to finish
        #[arg(short, long)]
        wait: bool,
    },
    /// Run an installed pipeline
    Run {
        /// Pipeline ID or unambiguous prefix
        id: String,

        /// Wait for the run to finish
        #[arg(short, long)]
        wait: bool,
    },
    /// List the traces of a pipeline
    Traces {
        /// Pipeline ID or unambiguous prefix
        id: String,
    },
}

/// Routes pipeline subcommands to their handlers
pub async fn handle_pipeline_command(command: PipelineCommands, config: &Config) -> Result<()> {
    let client = DaemonClient::new(&config.daemon_url);

    match command {
        PipelineCommands::Create { config, name } => create_pipeline(&client, &config, name).await,
        PipelineCommands::List => list_pipelines(&client).await,
        PipelineCommands::Get { id } => get_pipeline(&client, &id).await,
        PipelineCommands::Update { id, config } => update_pipeline(&client, &id, &config).await,
        PipelineCommands::Delete { id } => delete_pipeline(&client, &id).await,
        PipelineCommands::DeleteAll { yes } => delete_all_pipelines(&client, yes).await,
        PipelineCommands::Install { id, wait } => install_pipeline(&client, &id, wait).await,
        PipelineCommands::Run { id, wait } => run_pipeline(&client, &id, wait).await,
        PipelineCommands::Traces { id } => list_traces(&client, &id).await,
    }
}

/// Reads and parses a pipeline config file
///
/// Shape errors are left to the daemon, which reports every missing role
/// at once.
fn read_config(path: &str) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path))?;

    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file as JSON: {}", path))
}

async fn create_pipeline(
    client: &DaemonClient,
    config_path: &str,
    name_override: Option<String>,
) -> Result<()> {
    let config = read_config(config_path)?;

    let pipeline = client
        .create_pipeline(CreatePipeline {
            config: Some(config),
            name: name_override,
        })
        .await?;

    println!("{}", "✓ Pipeline created successfully!".green().bold());
    println!("  ID:     {}", pipeline.id.to_string().cyan());
    if let Some(name) = &pipeline.name {
        println!("  Name:   {}", name.bold());
    }
    print_plugins(&pipeline);

    Ok(())
}

async fn list_pipelines(client: &DaemonClient) -> Result<()> {
    let pipelines = client.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{}", "No pipelines found.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} pipeline(s):", pipelines.len()).bold()
        );
        println!();
        for pipeline in pipelines {
            print_pipeline_summary(&pipeline);
        }
    }

    Ok(())
}

async fn get_pipeline(client: &DaemonClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, &IdOrPrefix::parse(id)).await?;

    let pipeline = client.get_pipeline(uuid).await?;

    print_pipeline_details(&pipeline);

    Ok(())
}

async fn update_pipeline(client: &DaemonClient, id: &str, config_path: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, &IdOrPrefix::parse(id)).await?;
    let config = read_config(config_path)?;

    let pipeline = client
        .update_pipeline(
            uuid,
            UpdatePipeline {
                config: Some(config),
            },
        )
        .await?;

    println!("{}", "✓ Pipeline updated successfully!".green().bold());
    println!("  ID:     {}", pipeline.id.to_string().cyan());
    println!("  Status: {}", colored_status(pipeline.status));
    print_plugins(&pipeline);

    Ok(())
}

async fn delete_pipeline(client: &DaemonClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, &IdOrPrefix::parse(id)).await?;

    client.delete_pipeline(uuid).await?;

    println!(
        "{}",
        format!("✓ Pipeline {} deleted successfully!", uuid)
            .green()
            .bold()
    );

    Ok(())
}

async fn delete_all_pipelines(client: &DaemonClient, confirmed: bool) -> Result<()> {
    if !confirmed {
        bail!("Refusing to delete every pipeline without --yes");
    }

    client.delete_all_pipelines().await?;

    println!("{}", "✓ All pipelines deleted".green().bold());

    Ok(())
}

async fn install_pipeline(client: &DaemonClient, id: &str, wait: bool) -> Result<()> {
    let uuid = resolve_pipeline_id(client, &IdOrPrefix::parse(id)).await?;

    let reference = client.install_pipeline(uuid).await?;
    print_reference("Installation started", &reference);

    if wait {
        wait_and_report(client, reference.trace_id).await?;
    }

    Ok(())
}

async fn run_pipeline(client: &DaemonClient, id: &str, wait: bool) -> Result<()> {
    let uuid = resolve_pipeline_id(client, &IdOrPrefix::parse(id)).await?;

    let reference = client.run_pipeline(uuid).await?;
    print_reference("Run started", &reference);

    if wait {
        wait_and_report(client, reference.trace_id).await?;
    }

    Ok(())
}

async fn list_traces(client: &DaemonClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, &IdOrPrefix::parse(id)).await?;

    let traces = client.list_traces(uuid).await?;

    if traces.is_empty() {
        println!("{}", "No traces found.".yellow());
    } else {
        for trace in &traces {
            print_trace_summary(trace);
        }
    }

    Ok(())
}

fn colored_status(status: PipelineStatus) -> ColoredString {
    match status {
        PipelineStatus::Created => status.as_str().normal(),
        PipelineStatus::Installing | PipelineStatus::Running => status.as_str().yellow(),
        PipelineStatus::Installed | PipelineStatus::Completed => status.as_str().green(),
        PipelineStatus::Failed => status.as_str().red(),
    }
}

fn print_reference(headline: &str, reference: &TraceReference) {
    println!("{}", format!("✓ {}", headline).green().bold());
    println!("  Trace ID:    {}", reference.trace_id.to_string().cyan());
    println!("  Pipeline ID: {}", reference.pipeline_id.to_string().dimmed());
    println!("  State:       {}", colored_state(reference.state));
}

fn print_plugins(pipeline: &PipelineRecord) {
    for role in PluginRole::ALL {
        println!(
            "    {:<14} {} {}",
            role.as_str(),
            pipeline.package(role),
            pipeline.params(role).dimmed()
        );
    }
}

fn print_pipeline_summary(pipeline: &PipelineRecord) {
    let name = pipeline.name.as_deref().unwrap_or("(unnamed)");
    println!("  {} {}", "▸".cyan(), name.bold());
    println!("    ID:      {}", pipeline.id.to_string().dimmed());
    println!("    Status:  {}", colored_status(pipeline.status));
    println!(
        "    Created: {}",
        pipeline
            .created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

fn print_pipeline_details(pipeline: &PipelineRecord) {
    println!("{}", "Pipeline Details:".bold());
    println!("  ID:      {}", pipeline.id.to_string().cyan());
    if let Some(name) = &pipeline.name {
        println!("  Name:    {}", name.bold());
    }
    println!("  Status:  {}", colored_status(pipeline.status));
    if let Some(reason) = &pipeline.failure_reason {
        println!("  Reason:  {}", reason.red());
    }
    println!(
        "  Created: {}",
        pipeline.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "  Updated: {}",
        pipeline.updated_at.format("%Y-%m-%d %H:%M:%S")
    );

    println!("\n{}", "Plugins:".bold());
    print_plugins(pipeline);
}

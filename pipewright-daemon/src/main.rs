use anyhow::Context;
use pipewright_daemon::config::{Config, RuntimeMode};
use pipewright_daemon::repository::{InMemoryPipelineStore, PgPipelineStore, PipelineStore};
use pipewright_daemon::service::PipelineService;
use pipewright_daemon::{api, db};
use pipewright_runtime::{InMemoryRuntime, PluginRuntime, ProcessRuntime};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "pipewright_daemon=debug,pipewright_runtime=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Pipewright daemon...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let store: Arc<dyn PipelineStore> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");

            let pool = db::create_pool(database_url)
                .await
                .context("Failed to create database pool")?;
            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;

            Arc::new(PgPipelineStore::new(pool, config.uniqueness()))
        }
        None => {
            tracing::info!("No DATABASE_URL set, keeping pipelines in memory");
            Arc::new(InMemoryPipelineStore::new(config.uniqueness()))
        }
    };

    let runtime: Arc<dyn PluginRuntime> = match config.runtime_mode {
        RuntimeMode::Process => Arc::new(ProcessRuntime::new(config.runtime.clone())),
        RuntimeMode::Memory => Arc::new(InMemoryRuntime::new()),
    };

    runtime
        .connect()
        .await
        .with_context(|| format!("Failed to connect the {} plugin runtime", config.runtime_mode))?;

    let service = PipelineService::new(store, runtime);
    let app = api::create_router(service.clone());

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let cancelled = service.cancel_all();
    tracing::info!("Shut down ({} trace(s) cancelled)", cancelled);

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

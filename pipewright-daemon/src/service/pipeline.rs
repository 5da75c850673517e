//! Pipeline Service
//!
//! Business logic for pipelines:
//! - Validation and persistence through the [`PipelineStore`]
//! - Installing the four plugins through the [`PluginRuntime`], wrapped in a trace
//! - Running installed pipelines, chaining plugin outputs in role order
//! - Keeping pipeline status in step with trace outcomes
//!
//! Admission and status transitions of one pipeline are serialized by a
//! per-pipeline async mutex; operations on distinct pipelines run concurrently.

use pipewright_core::domain::log::LogEntry;
use pipewright_core::domain::pipeline::{Pipeline, PipelineStatus};
use pipewright_core::domain::plugin::{PackageRef, PluginInstallSpec, PluginRole};
use pipewright_core::domain::trace::{Trace, TraceKind, TraceState};
use pipewright_core::dto::pipeline::{CreatePipeline, UpdatePipeline};
use pipewright_core::dto::trace::TraceReference;
use pipewright_core::validation::ValidationError;
use pipewright_runtime::{InstallError, PluginRuntime};
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::repository::{PipelineStore, StoreError};
use crate::service::trace::{TraceContext, TraceError, TraceFailure, TraceRegistry};

/// Method every plugin exposes for pipeline runs
const RUN_METHOD: &str = "run";

/// Service error type
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("trace {0} has already finished")]
    AlreadyTerminal(Uuid),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(e) => ServiceError::Validation(e),
            StoreError::NotFound(id) => ServiceError::NotFound(format!("pipeline {} not found", id)),
            StoreError::Conflict(msg) => ServiceError::Conflict(msg),
            StoreError::Database(e) => ServiceError::Database(e),
        }
    }
}

impl From<TraceError> for ServiceError {
    fn from(err: TraceError) -> Self {
        match err {
            TraceError::NotFound(id) => ServiceError::NotFound(format!("trace {} not found", id)),
            TraceError::AlreadyTerminal(id) => ServiceError::AlreadyTerminal(id),
            busy @ TraceError::Busy { .. } => ServiceError::Conflict(busy.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

type LockMap = Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>;

/// Per-pipeline async locks
///
/// An entry lives only while some caller holds or waits on it, so ids that
/// never existed leave nothing behind.
#[derive(Clone, Default)]
struct PipelineLocks {
    locks: LockMap,
}

impl PipelineLocks {
    async fn acquire(&self, id: Uuid) -> PipelineGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(id).or_default().clone()
        };

        PipelineGuard {
            id,
            locks: self.locks.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Holds one pipeline's lock; removes the map entry on drop when idle
struct PipelineGuard {
    id: Uuid,
    locks: LockMap,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);

        // Release first so only the map itself and waiters count below
        drop(self.guard.take());
        if locks
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

/// Pipeline service, cheap to clone
#[derive(Clone)]
pub struct PipelineService {
    store: Arc<dyn PipelineStore>,
    runtime: Arc<dyn PluginRuntime>,
    traces: TraceRegistry,
    locks: PipelineLocks,
}

impl PipelineService {
    /// Creates a service; `runtime` must already be connected
    pub fn new(store: Arc<dyn PipelineStore>, runtime: Arc<dyn PluginRuntime>) -> Self {
        Self {
            store,
            runtime,
            traces: TraceRegistry::new(),
            locks: PipelineLocks::default(),
        }
    }

    pub fn traces(&self) -> &TraceRegistry {
        &self.traces
    }

    // =============================================================================
    // Pipeline Records
    // =============================================================================

    /// Validates and stores a new pipeline
    ///
    /// `req.name` wins over the name inside the config.
    pub async fn create_pipeline(&self, req: CreatePipeline) -> Result<Pipeline> {
        let config = req
            .config
            .ok_or_else(|| ValidationError::new("missing config"))?;

        let pipeline = self.store.create(&config, req.name.as_deref()).await?;
        info!("Pipeline created: {}", pipeline.id);

        Ok(pipeline)
    }

    pub async fn get_pipeline(&self, id: Uuid) -> Result<Pipeline> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        Ok(self.store.list().await?)
    }

    /// Replaces the pipeline configuration
    ///
    /// Running traces of the pipeline are cancelled and forgotten, and the
    /// status goes back to `Created`.
    pub async fn update_pipeline(&self, id: Uuid, req: UpdatePipeline) -> Result<Pipeline> {
        let _guard = self.locks.acquire(id).await;

        // Unknown ids report NotFound before config problems
        self.store.get(id).await?;

        let config = req
            .config
            .ok_or_else(|| ValidationError::new("missing config"))?;
        let pipeline = self.store.update(id, &config).await?;

        let cleared = self.traces.clear(id);
        info!("Pipeline updated: {} ({} trace(s) cleared)", id, cleared);

        Ok(pipeline)
    }

    pub async fn delete_pipeline(&self, id: Uuid) -> Result<()> {
        let _guard = self.locks.acquire(id).await;

        self.traces.clear(id);
        self.store.delete(id).await?;
        info!("Pipeline deleted: {}", id);

        Ok(())
    }

    /// Removes every pipeline and trace
    pub async fn delete_all_pipelines(&self) -> Result<()> {
        let cleared = self.traces.clear_all();
        self.store.delete_all().await?;

        info!("All pipelines deleted ({} trace(s) cleared)", cleared);
        Ok(())
    }

    // =============================================================================
    // Installation
    // =============================================================================

    /// Starts installing the pipeline's plugins and returns at once
    ///
    /// A second request while an install is running gets the running
    /// trace back. A request while a run is active is a conflict.
    pub async fn install_pipeline(&self, id: Uuid) -> Result<TraceReference> {
        let _guard = self.locks.acquire(id).await;

        let pipeline = self.store.get(id).await?;

        let pending = match self.traces.begin(id, TraceKind::Install) {
            Ok(pending) => pending,
            Err(TraceError::Busy {
                trace_id,
                kind: TraceKind::Install,
                ..
            }) => {
                debug!("Pipeline {} already installing in trace {}", id, trace_id);
                return Ok(reference(id, trace_id, TraceKind::Install));
            }
            Err(e) => return Err(e.into()),
        };

        let specs = pipeline
            .install_specs()
            .map_err(|e| ServiceError::Validation(ValidationError::new(e)))?;

        // A stale transitional status (after a restart) has nothing to revert to
        let previous = match pipeline.status {
            PipelineStatus::Installing | PipelineStatus::Running => PipelineStatus::Created,
            status => status,
        };

        self.store
            .set_status(id, PipelineStatus::Installing, None)
            .await?;

        let service = self.clone();
        let trace_id = pending.spawn(move |ctx| async move {
            let outcome = install_plugins(service.runtime.as_ref(), &specs, &ctx).await;

            let (status, reason) = match &outcome {
                Ok(()) => (PipelineStatus::Installed, None),
                Err(TraceFailure::Cancelled) => {
                    (previous, Some("installation cancelled".to_string()))
                }
                Err(TraceFailure::Failed(message)) => (previous, Some(message.clone())),
            };
            service
                .finish(id, &ctx, PipelineStatus::Installing, status, reason)
                .await;

            outcome
        });

        info!("Installing pipeline {} in trace {}", id, trace_id);
        Ok(reference(id, trace_id, TraceKind::Install))
    }

    // =============================================================================
    // Runs
    // =============================================================================

    /// Starts a run of an installed pipeline and returns at once
    pub async fn run_pipeline(&self, id: Uuid) -> Result<TraceReference> {
        let _guard = self.locks.acquire(id).await;

        let pipeline = self.store.get(id).await?;

        if let Some(active) = self.traces.active_for(id) {
            return Err(ServiceError::Conflict(format!(
                "pipeline {} has a running {} trace {}",
                id, active.kind, active.id
            )));
        }

        if !pipeline.status.is_runnable() {
            return Err(ServiceError::Conflict(format!(
                "pipeline {} is {}; install it before running",
                id, pipeline.status
            )));
        }

        let pending = self.traces.begin(id, TraceKind::Run)?;
        self.store
            .set_status(id, PipelineStatus::Running, None)
            .await?;

        let service = self.clone();
        let trace_id = pending.spawn(move |ctx| async move {
            let outcome = run_plugins(service.runtime.as_ref(), &pipeline, &ctx).await;

            let (status, reason) = match &outcome {
                Ok(()) => (PipelineStatus::Completed, None),
                Err(TraceFailure::Cancelled) => {
                    (PipelineStatus::Failed, Some("run cancelled".to_string()))
                }
                Err(TraceFailure::Failed(message)) => {
                    (PipelineStatus::Failed, Some(message.clone()))
                }
            };
            service
                .finish(id, &ctx, PipelineStatus::Running, status, reason)
                .await;

            outcome
        });

        info!("Running pipeline {} in trace {}", id, trace_id);
        Ok(reference(id, trace_id, TraceKind::Run))
    }

    // =============================================================================
    // Traces
    // =============================================================================

    pub fn get_trace(&self, trace_id: Uuid) -> Result<Trace> {
        Ok(self.traces.get(trace_id)?)
    }

    pub fn cancel_trace(&self, trace_id: Uuid) -> Result<()> {
        Ok(self.traces.cancel(trace_id)?)
    }

    /// Traces of an existing pipeline, oldest first
    pub async fn list_traces(&self, pipeline_id: Uuid) -> Result<Vec<Trace>> {
        self.store.get(pipeline_id).await?;
        Ok(self.traces.list_for(pipeline_id))
    }

    /// Cancels every running trace, used on shutdown
    pub fn cancel_all(&self) -> usize {
        self.traces.clear_all()
    }

    /// Applies the status transition at the end of an operation
    ///
    /// Skipped when the trace was cleared (the pipeline was updated or
    /// deleted meanwhile) or the status moved on from `expected`.
    async fn finish(
        &self,
        id: Uuid,
        ctx: &TraceContext,
        expected: PipelineStatus,
        status: PipelineStatus,
        failure_reason: Option<String>,
    ) {
        let _guard = self.locks.acquire(id).await;

        if !self.traces.contains(ctx.trace_id()) {
            debug!("Trace {} was cleared, leaving pipeline {} as is", ctx.trace_id(), id);
            return;
        }

        match self.store.get(id).await {
            Ok(pipeline) if pipeline.status == expected => {}
            Ok(pipeline) => {
                debug!(
                    "Pipeline {} moved on to {}, not applying {}",
                    id, pipeline.status, status
                );
                return;
            }
            Err(StoreError::NotFound(_)) => return,
            Err(e) => {
                error!("Failed to load pipeline {}: {}", id, e);
                return;
            }
        }

        if let Err(e) = self.store.set_status(id, status, failure_reason).await {
            error!("Failed to set pipeline {} to {}: {}", id, status, e);
            ctx.log(LogEntry::error(format!("failed to record status: {}", e)));
        }
    }
}

fn reference(pipeline_id: Uuid, trace_id: Uuid, kind: TraceKind) -> TraceReference {
    TraceReference {
        pipeline_id,
        trace_id,
        kind,
        state: TraceState::Running,
    }
}

// =============================================================================
// Operations
// =============================================================================

/// Installs each role's plugin in role order
async fn install_plugins(
    runtime: &dyn PluginRuntime,
    specs: &[PluginInstallSpec],
    ctx: &TraceContext,
) -> std::result::Result<(), TraceFailure> {
    for spec in specs {
        if ctx.is_cancelled() {
            return Err(TraceFailure::Cancelled);
        }

        ctx.info(format!("Installing {} plugin {}", spec.role, spec.package));

        match runtime
            .install(spec, Arc::new(ctx.clone()), ctx.cancel_token())
            .await
        {
            Ok(result) => ctx.info(format!(
                "Installed {} {} for {}",
                result.plugin.package.name, result.plugin.version, spec.role
            )),
            Err(InstallError::AlreadyInstalled(_)) => {
                ctx.info(format!("{} is already installed", spec.package));
            }
            Err(InstallError::Cancelled(_)) => return Err(TraceFailure::Cancelled),
            Err(e) => {
                warn!("Install of {} failed: {}", spec.package, e);
                return Err(TraceFailure::Failed(e.to_string()));
            }
        }
    }

    Ok(())
}

/// Invokes each role's plugin in role order, feeding each the previous output
async fn run_plugins(
    runtime: &dyn PluginRuntime,
    pipeline: &Pipeline,
    ctx: &TraceContext,
) -> std::result::Result<(), TraceFailure> {
    let mut previous = JsonValue::Null;

    for role in PluginRole::ALL {
        if ctx.is_cancelled() {
            return Err(TraceFailure::Cancelled);
        }

        let binding = pipeline.plugin(role);
        let package = PackageRef::parse(&binding.package)
            .map_err(|e| TraceFailure::Failed(format!("{}: {}", role, e)))?;

        ctx.info(format!("Running {} plugin {}", role, package));
        let args = json!({
            "role": role,
            "params": binding.params_value(),
            "previous": previous,
        });

        let output = tokio::select! {
            _ = ctx.cancelled() => return Err(TraceFailure::Cancelled),
            output = runtime.invoke(&package, RUN_METHOD, args) => output,
        };

        previous = output.map_err(|e| TraceFailure::Failed(format!("{}: {}", role, e)))?;
        ctx.debug(format!("{} output: {}", role, previous));
    }

    ctx.info("Pipeline run completed");
    Ok(())
}

//! Trace registry
//!
//! Turns long-running operations (installing or running a pipeline) into
//! resources that can be polled and cancelled by id:
//! - Admission with single-flight per target
//! - Execution on a tokio task with a cancellation token
//! - Live log capture through [`TraceContext`]
//! - Exactly one terminal transition per trace
//!
//! The registry map sits behind a `std::sync::RwLock`; locks are never held
//! across an `.await`.

use pipewright_core::domain::log::LogEntry;
use pipewright_core::domain::trace::{Trace, TraceKind, TraceState};
use pipewright_runtime::ProgressSink;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How an operation ended, when it did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceFailure {
    /// The operation observed a cancellation request and stopped
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    #[error("trace {0} not found")]
    NotFound(Uuid),

    #[error("trace {0} has already finished")]
    AlreadyTerminal(Uuid),

    /// Another trace is still running for the same target
    #[error("{kind} trace {trace_id} is already running for {target_id}")]
    Busy {
        target_id: Uuid,
        trace_id: Uuid,
        kind: TraceKind,
    },
}

// =============================================================================
// Trace Entries
// =============================================================================

struct TraceEntry {
    id: Uuid,
    target_id: Uuid,
    kind: TraceKind,
    cancel: CancellationToken,
    progress: Mutex<TraceProgress>,
}

struct TraceProgress {
    state: TraceState,
    log: Vec<LogEntry>,
    error: Option<String>,
    started_at: chrono::DateTime<chrono::Utc>,
    finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl TraceEntry {
    fn new(target_id: Uuid, kind: TraceKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_id,
            kind,
            cancel: CancellationToken::new(),
            progress: Mutex::new(TraceProgress {
                state: TraceState::Running,
                log: Vec::new(),
                error: None,
                started_at: chrono::Utc::now(),
                finished_at: None,
            }),
        }
    }

    fn progress(&self) -> std::sync::MutexGuard<'_, TraceProgress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> TraceState {
        self.progress().state
    }

    fn append(&self, entry: LogEntry) {
        self.progress().log.push(entry);
    }

    /// Moves to a terminal state; later calls are ignored
    fn finish(&self, state: TraceState, error: Option<String>) {
        let mut progress = self.progress();
        if progress.state.is_terminal() {
            return;
        }

        let message = match (&state, &error) {
            (TraceState::Success, _) => LogEntry::info(format!("{} finished", self.kind)),
            (TraceState::Cancelled, _) => LogEntry::warning(format!("{} cancelled", self.kind)),
            (_, Some(error)) => LogEntry::error(format!("{} failed: {}", self.kind, error)),
            (_, None) => LogEntry::error(format!("{} failed", self.kind)),
        };

        progress.log.push(message);
        progress.state = state;
        progress.error = error;
        progress.finished_at = Some(chrono::Utc::now());
    }

    fn snapshot(&self) -> Trace {
        let progress = self.progress();
        Trace {
            id: self.id,
            target_id: self.target_id,
            kind: self.kind,
            state: progress.state,
            log: progress.log.clone(),
            error: progress.error.clone(),
            started_at: progress.started_at,
            finished_at: progress.finished_at,
        }
    }
}

// =============================================================================
// Trace Context
// =============================================================================

/// Handle given to a running operation
///
/// Exposes the cancellation token and appends to the trace log. Also acts
/// as the progress sink handed to the plugin runtime.
#[derive(Clone)]
pub struct TraceContext {
    entry: Arc<TraceEntry>,
}

impl TraceContext {
    pub fn trace_id(&self) -> Uuid {
        self.entry.id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.entry.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.entry.cancel.is_cancelled()
    }

    /// Completes when cancellation was requested
    pub async fn cancelled(&self) {
        self.entry.cancel.cancelled().await
    }

    pub fn log(&self, entry: LogEntry) {
        self.entry.append(entry);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogEntry::info(message));
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogEntry::debug(message));
    }
}

impl ProgressSink for TraceContext {
    fn report(&self, entry: LogEntry) {
        self.log(entry);
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Default)]
struct RegistryState {
    traces: HashMap<Uuid, Arc<TraceEntry>>,
    /// Trace ids per target, in start order
    by_target: HashMap<Uuid, Vec<Uuid>>,
}

impl RegistryState {
    fn running_for(&self, target_id: Uuid) -> Option<&Arc<TraceEntry>> {
        self.by_target
            .get(&target_id)?
            .iter()
            .filter_map(|id| self.traces.get(id))
            .find(|entry| entry.state() == TraceState::Running)
    }

    fn remove(&mut self, trace_id: Uuid) {
        if let Some(entry) = self.traces.remove(&trace_id)
            && let Some(ids) = self.by_target.get_mut(&entry.target_id)
        {
            ids.retain(|id| *id != trace_id);
            if ids.is_empty() {
                self.by_target.remove(&entry.target_id);
            }
        }
    }
}

/// Registry of traces, cheap to clone
#[derive(Clone, Default)]
pub struct TraceRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl TraceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, trace_id: Uuid) -> Result<Arc<TraceEntry>, TraceError> {
        self.read()
            .traces
            .get(&trace_id)
            .cloned()
            .ok_or(TraceError::NotFound(trace_id))
    }

    /// Admits a new trace for `target_id`
    ///
    /// The trace is registered as running right away, so a concurrent
    /// `begin` for the same target is refused with `Busy`. Dropping the
    /// returned [`PendingTrace`] without spawning unregisters it.
    pub fn begin(&self, target_id: Uuid, kind: TraceKind) -> Result<PendingTrace, TraceError> {
        let mut state = self.write();

        if let Some(running) = state.running_for(target_id) {
            return Err(TraceError::Busy {
                target_id,
                trace_id: running.id,
                kind: running.kind,
            });
        }

        let entry = Arc::new(TraceEntry::new(target_id, kind));
        state.traces.insert(entry.id, entry.clone());
        state.by_target.entry(target_id).or_default().push(entry.id);

        debug!("Admitted {} trace {} for {}", kind, entry.id, target_id);

        Ok(PendingTrace {
            registry: self.clone(),
            entry,
            spawned: false,
        })
    }

    /// Admits and starts an operation in one step
    pub fn start<F, Fut>(
        &self,
        target_id: Uuid,
        kind: TraceKind,
        operation: F,
    ) -> Result<Uuid, TraceError>
    where
        F: FnOnce(TraceContext) -> Fut,
        Fut: Future<Output = Result<(), TraceFailure>> + Send + 'static,
    {
        Ok(self.begin(target_id, kind)?.spawn(operation))
    }

    pub fn get(&self, trace_id: Uuid) -> Result<Trace, TraceError> {
        Ok(self.entry(trace_id)?.snapshot())
    }

    /// Whether the trace is still registered (not cleared)
    pub fn contains(&self, trace_id: Uuid) -> bool {
        self.read().traces.contains_key(&trace_id)
    }

    /// Requests cancellation of a running trace
    ///
    /// The trace turns `cancelled` once its operation observes the request.
    pub fn cancel(&self, trace_id: Uuid) -> Result<(), TraceError> {
        let entry = self.entry(trace_id)?;

        if entry.state().is_terminal() {
            return Err(TraceError::AlreadyTerminal(trace_id));
        }

        info!("Cancelling {} trace {}", entry.kind, trace_id);
        entry.append(LogEntry::info("Cancellation requested"));
        entry.cancel.cancel();
        Ok(())
    }

    /// All traces of a target, oldest first
    pub fn list_for(&self, target_id: Uuid) -> Vec<Trace> {
        let state = self.read();
        state
            .by_target
            .get(&target_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.traces.get(id))
                    .map(|entry| entry.snapshot())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The running trace of a target, if any
    pub fn active_for(&self, target_id: Uuid) -> Option<Trace> {
        self.read().running_for(target_id).map(|entry| entry.snapshot())
    }

    /// Cancels and forgets every trace of a target
    pub fn clear(&self, target_id: Uuid) -> usize {
        let mut state = self.write();
        let ids = state.by_target.remove(&target_id).unwrap_or_default();

        for id in &ids {
            if let Some(entry) = state.traces.remove(id) {
                entry.cancel.cancel();
            }
        }

        if !ids.is_empty() {
            debug!("Cleared {} trace(s) for {}", ids.len(), target_id);
        }
        ids.len()
    }

    /// Cancels and forgets every trace
    pub fn clear_all(&self) -> usize {
        let mut state = self.write();
        for entry in state.traces.values() {
            entry.cancel.cancel();
        }

        let count = state.traces.len();
        state.traces.clear();
        state.by_target.clear();
        count
    }
}

// =============================================================================
// Pending Trace
// =============================================================================

/// An admitted trace whose operation has not started yet
pub struct PendingTrace {
    registry: TraceRegistry,
    entry: Arc<TraceEntry>,
    spawned: bool,
}

impl PendingTrace {
    pub fn trace_id(&self) -> Uuid {
        self.entry.id
    }

    /// Runs `operation` on a tokio task and returns the trace id at once
    ///
    /// The outcome maps to the terminal state: `Ok` is `success`,
    /// `Cancelled` is `cancelled`, `Failed` and panics are `failed`.
    pub fn spawn<F, Fut>(mut self, operation: F) -> Uuid
    where
        F: FnOnce(TraceContext) -> Fut,
        Fut: Future<Output = Result<(), TraceFailure>> + Send + 'static,
    {
        self.spawned = true;

        let entry = self.entry.clone();
        let trace_id = entry.id;
        let context = TraceContext {
            entry: entry.clone(),
        };

        entry.append(LogEntry::info(format!("{} started", entry.kind)));
        let task = tokio::spawn(operation(context));

        tokio::spawn(async move {
            let (state, error) = match task.await {
                Ok(Ok(())) => (TraceState::Success, None),
                Ok(Err(TraceFailure::Cancelled)) => (TraceState::Cancelled, None),
                Ok(Err(TraceFailure::Failed(message))) => (TraceState::Failed, Some(message)),
                Err(join_error) if join_error.is_panic() => {
                    warn!("Trace {} operation panicked", entry.id);
                    (
                        TraceState::Failed,
                        Some("operation panicked".to_string()),
                    )
                }
                Err(_) => (TraceState::Cancelled, None),
            };

            info!("{} trace {} finished: {}", entry.kind, entry.id, state);
            entry.finish(state, error);
        });

        trace_id
    }
}

impl Drop for PendingTrace {
    fn drop(&mut self) {
        if !self.spawned {
            self.registry.write().remove(self.entry.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_terminal(registry: &TraceRegistry, trace_id: Uuid) -> Trace {
        for _ in 0..200 {
            let trace = registry.get(trace_id).unwrap();
            if trace.state.is_terminal() {
                return trace;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("trace {} did not finish", trace_id);
    }

    #[tokio::test]
    async fn test_outcomes_map_to_terminal_states() {
        let registry = TraceRegistry::new();

        let ok = registry
            .start(Uuid::new_v4(), TraceKind::Install, |ctx| async move {
                ctx.info("working");
                Ok(())
            })
            .unwrap();
        let failed = registry
            .start(Uuid::new_v4(), TraceKind::Install, |_| async move {
                Err(TraceFailure::Failed("registry unreachable".to_string()))
            })
            .unwrap();
        let cancelled = registry
            .start(Uuid::new_v4(), TraceKind::Run, |_| async move {
                Err(TraceFailure::Cancelled)
            })
            .unwrap();

        let ok = wait_terminal(&registry, ok).await;
        assert_eq!(ok.state, TraceState::Success);
        assert!(ok.log.iter().any(|e| e.message == "working"));
        assert!(ok.finished_at.is_some());

        let failed = wait_terminal(&registry, failed).await;
        assert_eq!(failed.state, TraceState::Failed);
        assert_eq!(failed.error.as_deref(), Some("registry unreachable"));

        assert_eq!(
            wait_terminal(&registry, cancelled).await.state,
            TraceState::Cancelled
        );
    }

    async fn exploding_operation() -> Result<(), TraceFailure> {
        panic!("plugin blew up")
    }

    #[tokio::test]
    async fn test_panic_marks_trace_failed() {
        let registry = TraceRegistry::new();
        let trace_id = registry
            .start(Uuid::new_v4(), TraceKind::Run, |_| exploding_operation())
            .unwrap();

        let trace = wait_terminal(&registry, trace_id).await;
        assert_eq!(trace.state, TraceState::Failed);
    }

    #[tokio::test]
    async fn test_single_flight_per_target() {
        let registry = TraceRegistry::new();
        let target = Uuid::new_v4();

        let first = registry
            .start(target, TraceKind::Install, |ctx| async move {
                ctx.cancelled().await;
                Err(TraceFailure::Cancelled)
            })
            .unwrap();

        match registry.begin(target, TraceKind::Run) {
            Err(TraceError::Busy { trace_id, kind, .. }) => {
                assert_eq!(trace_id, first);
                assert_eq!(kind, TraceKind::Install);
            }
            _ => panic!("expected the target to be busy"),
        }

        // Other targets are unaffected
        assert!(registry.begin(Uuid::new_v4(), TraceKind::Run).is_ok());

        registry.cancel(first).unwrap();
        assert_eq!(
            wait_terminal(&registry, first).await.state,
            TraceState::Cancelled
        );
        assert!(registry.active_for(target).is_none());
        assert!(registry.begin(target, TraceKind::Run).is_ok());
    }

    #[tokio::test]
    async fn test_cancel_errors() {
        let registry = TraceRegistry::new();
        assert!(matches!(
            registry.cancel(Uuid::new_v4()),
            Err(TraceError::NotFound(_))
        ));

        let trace_id = registry
            .start(Uuid::new_v4(), TraceKind::Install, |_| async move { Ok(()) })
            .unwrap();
        wait_terminal(&registry, trace_id).await;

        assert_eq!(
            registry.cancel(trace_id),
            Err(TraceError::AlreadyTerminal(trace_id))
        );
    }

    #[tokio::test]
    async fn test_dropped_pending_trace_is_unregistered() {
        let registry = TraceRegistry::new();
        let target = Uuid::new_v4();

        let pending = registry.begin(target, TraceKind::Install).unwrap();
        let trace_id = pending.trace_id();
        assert!(registry.contains(trace_id));

        drop(pending);
        assert!(!registry.contains(trace_id));
        assert!(registry.begin(target, TraceKind::Install).is_ok());
    }

    #[tokio::test]
    async fn test_clear_cancels_then_forgets() {
        let registry = TraceRegistry::new();
        let target = Uuid::new_v4();
        let (tx, rx) = tokio::sync::oneshot::channel();

        let trace_id = registry
            .start(target, TraceKind::Install, |ctx| async move {
                ctx.cancelled().await;
                let _ = tx.send(());
                Err(TraceFailure::Cancelled)
            })
            .unwrap();

        assert_eq!(registry.clear(target), 1);
        assert!(matches!(
            registry.get(trace_id),
            Err(TraceError::NotFound(_))
        ));
        assert!(registry.list_for(target).is_empty());

        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_for_keeps_start_order() {
        let registry = TraceRegistry::new();
        let target = Uuid::new_v4();

        let first = registry
            .start(target, TraceKind::Install, |_| async move { Ok(()) })
            .unwrap();
        wait_terminal(&registry, first).await;
        let second = registry
            .start(target, TraceKind::Run, |_| async move { Ok(()) })
            .unwrap();
        wait_terminal(&registry, second).await;

        let ids: Vec<_> = registry.list_for(target).iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![first, second]);

        assert_eq!(registry.clear_all(), 2);
        assert!(registry.list_for(target).is_empty());
    }
}

//! Trace domain types
//!
//! A trace is the inspectable handle over one long-running operation
//! (installing or running a pipeline).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::log::LogEntry;

/// Snapshot of a trace
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub id: Uuid,
    pub target_id: Uuid,
    pub kind: TraceKind,
    pub state: TraceState,
    pub log: Vec<LogEntry>,
    pub error: Option<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Operation a trace wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceKind {
    Install,
    Run,
}

impl fmt::Display for TraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceKind::Install => write!(f, "install"),
            TraceKind::Run => write!(f, "run"),
        }
    }
}

/// Trace lifecycle: `Running` then exactly one terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceState {
    Running,
    Success,
    Failed,
    Cancelled,
}

impl TraceState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TraceState::Running)
    }
}

impl fmt::Display for TraceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceState::Running => write!(f, "running"),
            TraceState::Success => write!(f, "success"),
            TraceState::Failed => write!(f, "failed"),
            TraceState::Cancelled => write!(f, "cancelled"),
        }
    }
}

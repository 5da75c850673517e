//! Trace DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::trace::{TraceKind, TraceState};

/// Returned when an installation or run is accepted
///
/// The operation continues in the background; poll or cancel it through
/// `traceId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceReference {
    pub pipeline_id: Uuid,
    pub trace_id: Uuid,
    pub kind: TraceKind,
    pub state: TraceState,
}

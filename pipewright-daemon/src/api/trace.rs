//! Trace API Handlers

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use pipewright_core::domain::trace::Trace;

use crate::api::error::{ApiResult, parse_id};
use crate::service::PipelineService;

/// GET /api/pipeline/trace/{trace_id}
pub async fn get_trace(
    State(service): State<PipelineService>,
    Path(trace_id): Path<String>,
) -> ApiResult<Json<Trace>> {
    tracing::debug!("Getting trace: {}", trace_id);
    let trace_id = parse_id(&trace_id, "trace")?;

    Ok(Json(service.get_trace(trace_id)?))
}

/// DELETE /api/pipeline/trace/{trace_id}
/// Request cancellation of a running trace
pub async fn cancel_trace(
    State(service): State<PipelineService>,
    Path(trace_id): Path<String>,
) -> ApiResult<StatusCode> {
    tracing::info!("Cancelling trace: {}", trace_id);
    let trace_id = parse_id(&trace_id, "trace")?;

    service.cancel_trace(trace_id)?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/pipeline/{id}/trace
/// List the traces of a pipeline
pub async fn list_pipeline_traces(
    State(service): State<PipelineService>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Trace>>> {
    tracing::debug!("Listing traces of pipeline: {}", id);
    let id = parse_id(&id, "pipeline")?;

    Ok(Json(service.list_traces(id).await?))
}

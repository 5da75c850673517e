//! Pipeline API Handlers
//!
//! HTTP endpoints for pipeline management, installation and runs.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use pipewright_core::dto::pipeline::{CreatePipeline, PipelineRecord, UpdatePipeline};
use pipewright_core::dto::trace::TraceReference;

use crate::api::error::{ApiResult, parse_id};
use crate::service::PipelineService;

/// POST /api/pipeline
/// Create a new pipeline
pub async fn create_pipeline(
    State(service): State<PipelineService>,
    payload: Result<Json<CreatePipeline>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<PipelineRecord>)> {
    let Json(req) = payload?;
    tracing::info!("Creating pipeline: {:?}", req.name);

    let pipeline = service.create_pipeline(req).await?;

    Ok((StatusCode::CREATED, Json(pipeline.into())))
}

/// GET /api/pipeline
/// List all pipelines
pub async fn list_pipelines(
    State(service): State<PipelineService>,
) -> ApiResult<Json<Vec<PipelineRecord>>> {
    tracing::debug!("Listing all pipelines");

    let pipelines = service.list_pipelines().await?;

    Ok(Json(pipelines.into_iter().map(Into::into).collect()))
}

/// GET /api/pipeline/{id}
/// Get pipeline by ID
pub async fn get_pipeline(
    State(service): State<PipelineService>,
    Path(id): Path<String>,
) -> ApiResult<Json<PipelineRecord>> {
    tracing::debug!("Getting pipeline: {}", id);
    let id = parse_id(&id, "pipeline")?;

    let pipeline = service.get_pipeline(id).await?;

    Ok(Json(pipeline.into()))
}

/// PUT /api/pipeline/{id}
/// Replace a pipeline's configuration
pub async fn update_pipeline(
    State(service): State<PipelineService>,
    Path(id): Path<String>,
    payload: Result<Json<UpdatePipeline>, JsonRejection>,
) -> ApiResult<Json<PipelineRecord>> {
    tracing::info!("Updating pipeline: {}", id);
    let id = parse_id(&id, "pipeline")?;
    let Json(req) = payload?;

    let pipeline = service.update_pipeline(id, req).await?;

    Ok(Json(pipeline.into()))
}

/// DELETE /api/pipeline/{id}
/// Delete a pipeline and its traces
pub async fn delete_pipeline(
    State(service): State<PipelineService>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting pipeline: {}", id);
    let id = parse_id(&id, "pipeline")?;

    service.delete_pipeline(id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/pipeline
/// Delete every pipeline and trace
pub async fn delete_all_pipelines(
    State(service): State<PipelineService>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting all pipelines");

    service.delete_all_pipelines().await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/pipeline/{id}/installation
/// Start installing the pipeline's plugins
pub async fn install_pipeline(
    State(service): State<PipelineService>,
    Path(id): Path<String>,
) -> ApiResult<Json<TraceReference>> {
    tracing::info!("Installing pipeline: {}", id);
    let id = parse_id(&id, "pipeline")?;

    let reference = service.install_pipeline(id).await?;

    Ok(Json(reference))
}

/// POST /api/pipeline/{id}/run
/// Start a run of an installed pipeline
pub async fn run_pipeline(
    State(service): State<PipelineService>,
    Path(id): Path<String>,
) -> ApiResult<Json<TraceReference>> {
    tracing::info!("Running pipeline: {}", id);
    let id = parse_id(&id, "pipeline")?;

    let reference = service.run_pipeline(id).await?;

    Ok(Json(reference))
}

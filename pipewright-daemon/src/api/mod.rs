//! API Module
//!
//! HTTP API layer for the daemon.
//! Each submodule handles endpoints for a specific resource.

pub mod error;
pub mod health;
pub mod pipeline;
pub mod trace;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::service::PipelineService;

/// Create the main API router with all endpoints
pub fn create_router(service: PipelineService) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Pipeline endpoints
        .route(
            "/api/pipeline",
            get(pipeline::list_pipelines)
                .post(pipeline::create_pipeline)
                .delete(pipeline::delete_all_pipelines),
        )
        .route(
            "/api/pipeline/{id}",
            get(pipeline::get_pipeline)
                .put(pipeline::update_pipeline)
                .delete(pipeline::delete_pipeline),
        )
        .route(
            "/api/pipeline/{id}/installation",
            post(pipeline::install_pipeline),
        )
        .route("/api/pipeline/{id}/run", post(pipeline::run_pipeline))
        .route("/api/pipeline/{id}/trace", get(trace::list_pipeline_traces))
        // Trace endpoints
        .route(
            "/api/pipeline/trace/{trace_id}",
            get(trace::get_trace).delete(trace::cancel_trace),
        )
        // Add state and middleware
        .with_state(service)
        .layer(TraceLayer::new_for_http())
}

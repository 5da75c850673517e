//! Pipewright Daemon
//!
//! Serves the pipeline HTTP API. Layers, top to bottom:
//! - `api`: axum handlers and error rendering
//! - `service`: pipeline lifecycle and the trace registry
//! - `repository`: pipeline stores (in-memory or PostgreSQL)
//!
//! Plugins are installed and invoked through a `pipewright_runtime::PluginRuntime`.

pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;

//! Repository Module
//!
//! Pipeline persistence. Stores validate and hold pipeline records; they
//! know nothing about plugin installation or traces.

mod memory;
mod postgres;

pub use memory::InMemoryPipelineStore;
pub use postgres::PgPipelineStore;

use async_trait::async_trait;
use pipewright_core::domain::pipeline::{Pipeline, PipelineStatus};
use pipewright_core::dto::pipeline::PipelineConfig;
use pipewright_core::validation::ValidationError;
use thiserror::Error;
use uuid::Uuid;

/// Whether pipeline names must be unique
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UniquenessPolicy {
    #[default]
    AllowDuplicates,
    UniqueNames,
}

/// Store error type
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("pipeline {0} not found")]
    NotFound(Uuid),

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    fn name_taken(name: &str) -> Self {
        StoreError::Conflict(format!("a pipeline named '{}' already exists", name))
    }
}

/// Pipeline persistence
#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Validates `config` and stores it under a fresh id
    ///
    /// `name` takes precedence over `config.name`.
    async fn create(
        &self,
        config: &PipelineConfig,
        name: Option<&str>,
    ) -> Result<Pipeline, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Pipeline, StoreError>;

    /// All pipelines, oldest first
    async fn list(&self) -> Result<Vec<Pipeline>, StoreError>;

    /// Replaces name and all plugin bindings; never partially applied
    async fn update(&self, id: Uuid, config: &PipelineConfig) -> Result<Pipeline, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    /// Removes every pipeline; succeeds on an empty store
    async fn delete_all(&self) -> Result<(), StoreError>;

    /// Records a lifecycle transition
    async fn set_status(
        &self,
        id: Uuid,
        status: PipelineStatus,
        failure_reason: Option<String>,
    ) -> Result<Pipeline, StoreError>;
}

//! PostgreSQL pipeline store
//!
//! Handles all database operations related to pipelines.

use async_trait::async_trait;
use pipewright_core::domain::pipeline::{Pipeline, PipelineStatus};
use pipewright_core::domain::plugin::PluginBinding;
use pipewright_core::dto::pipeline::PipelineConfig;
use pipewright_core::validation::validate_config;
use sqlx::PgPool;
use uuid::Uuid;

use super::{PipelineStore, StoreError, UniquenessPolicy};

const SELECT_COLUMNS: &str = r#"
    SELECT id, name,
           data_collect, data_collect_params, data_access, data_access_params,
           model_define, model_define_params, model_evaluate, model_evaluate_params,
           status, failure_reason, created_at, updated_at
    FROM pipelines
"#;

pub struct PgPipelineStore {
    pool: PgPool,
    policy: UniquenessPolicy,
}

impl PgPipelineStore {
    pub fn new(pool: PgPool, policy: UniquenessPolicy) -> Self {
        Self { pool, policy }
    }

    async fn check_name(
        &self,
        conn: &mut sqlx::PgConnection,
        name: Option<&str>,
        exclude: Option<Uuid>,
    ) -> Result<(), StoreError> {
        if self.policy == UniquenessPolicy::AllowDuplicates {
            return Ok(());
        }

        let Some(name) = name else {
            return Ok(());
        };

        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM pipelines WHERE name = $1 AND id IS DISTINCT FROM $2)",
        )
        .bind(name)
        .bind(exclude)
        .fetch_one(&mut *conn)
        .await?;

        if taken {
            return Err(StoreError::name_taken(name));
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineStore for PgPipelineStore {
    async fn create(
        &self,
        config: &PipelineConfig,
        name: Option<&str>,
    ) -> Result<Pipeline, StoreError> {
        let draft = validate_config(config, name)?;
        let pipeline = Pipeline::from_draft(draft);

        let mut tx = self.pool.begin().await?;
        self.check_name(&mut tx, pipeline.name.as_deref(), None).await?;

        sqlx::query(
            r#"
            INSERT INTO pipelines (
                id, name,
                data_collect, data_collect_params, data_access, data_access_params,
                model_define, model_define_params, model_evaluate, model_evaluate_params,
                status, failure_reason, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(pipeline.id)
        .bind(&pipeline.name)
        .bind(&pipeline.data_collect.package)
        .bind(&pipeline.data_collect.params)
        .bind(&pipeline.data_access.package)
        .bind(&pipeline.data_access.params)
        .bind(&pipeline.model_define.package)
        .bind(&pipeline.model_define.params)
        .bind(&pipeline.model_evaluate.package)
        .bind(&pipeline.model_evaluate.params)
        .bind(pipeline.status.as_str())
        .bind(&pipeline.failure_reason)
        .bind(pipeline.created_at)
        .bind(pipeline.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(pipeline)
    }

    async fn get(&self, id: Uuid) -> Result<Pipeline, StoreError> {
        let row = sqlx::query_as::<_, PipelineRow>(&format!("{} WHERE id = $1", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Into::into).ok_or(StoreError::NotFound(id))
    }

    async fn list(&self) -> Result<Vec<Pipeline>, StoreError> {
        let rows = sqlx::query_as::<_, PipelineRow>(&format!(
            "{} ORDER BY created_at ASC, id ASC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update(&self, id: Uuid, config: &PipelineConfig) -> Result<Pipeline, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, PipelineRow>(&format!(
            "{} WHERE id = $1 FOR UPDATE",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let mut pipeline: Pipeline = row.map(Into::into).ok_or(StoreError::NotFound(id))?;

        let draft = validate_config(config, None)?;
        self.check_name(&mut tx, draft.name.as_deref(), Some(id)).await?;
        pipeline.replace_with(draft);

        sqlx::query(
            r#"
            UPDATE pipelines
            SET name = $1,
                data_collect = $2, data_collect_params = $3,
                data_access = $4, data_access_params = $5,
                model_define = $6, model_define_params = $7,
                model_evaluate = $8, model_evaluate_params = $9,
                status = $10, failure_reason = $11, updated_at = $12
            WHERE id = $13
            "#,
        )
        .bind(&pipeline.name)
        .bind(&pipeline.data_collect.package)
        .bind(&pipeline.data_collect.params)
        .bind(&pipeline.data_access.package)
        .bind(&pipeline.data_access.params)
        .bind(&pipeline.model_define.package)
        .bind(&pipeline.model_define.params)
        .bind(&pipeline.model_evaluate.package)
        .bind(&pipeline.model_evaluate.params)
        .bind(pipeline.status.as_str())
        .bind(&pipeline.failure_reason)
        .bind(pipeline.updated_at)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(pipeline)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM pipelines WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM pipelines")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: PipelineStatus,
        failure_reason: Option<String>,
    ) -> Result<Pipeline, StoreError> {
        let row = sqlx::query_as::<_, PipelineRow>(
            r#"
            UPDATE pipelines
            SET status = $1, failure_reason = $2, updated_at = $3
            WHERE id = $4
            RETURNING id, name,
                      data_collect, data_collect_params, data_access, data_access_params,
                      model_define, model_define_params, model_evaluate, model_evaluate_params,
                      status, failure_reason, created_at, updated_at
            "#,
        )
        .bind(status.as_str())
        .bind(failure_reason)
        .bind(chrono::Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Into::into).ok_or(StoreError::NotFound(id))
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: Uuid,
    name: Option<String>,
    data_collect: String,
    data_collect_params: String,
    data_access: String,
    data_access_params: String,
    model_define: String,
    model_define_params: String,
    model_evaluate: String,
    model_evaluate_params: String,
    status: String,
    failure_reason: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<PipelineRow> for Pipeline {
    fn from(row: PipelineRow) -> Self {
        let status = row.status.parse().unwrap_or_else(|_| {
            tracing::warn!(
                "Pipeline {} has unknown status '{}', treating it as created",
                row.id,
                row.status
            );
            PipelineStatus::Created
        });

        Pipeline {
            id: row.id,
            name: row.name,
            data_collect: PluginBinding {
                package: row.data_collect,
                params: row.data_collect_params,
            },
            data_access: PluginBinding {
                package: row.data_access,
                params: row.data_access_params,
            },
            model_define: PluginBinding {
                package: row.model_define,
                params: row.model_define_params,
            },
            model_evaluate: PluginBinding {
                package: row.model_evaluate,
                params: row.model_evaluate_params,
            },
            status,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Plugin bindings are stored flattened, params as canonical JSON text
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipelines (
            id UUID PRIMARY KEY,
            name VARCHAR(255),
            data_collect TEXT NOT NULL,
            data_collect_params TEXT NOT NULL DEFAULT '{}',
            data_access TEXT NOT NULL,
            data_access_params TEXT NOT NULL DEFAULT '{}',
            model_define TEXT NOT NULL,
            model_define_params TEXT NOT NULL DEFAULT '{}',
            model_evaluate TEXT NOT NULL,
            model_evaluate_params TEXT NOT NULL DEFAULT '{}',
            status VARCHAR(50) NOT NULL,
            failure_reason TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pipelines_created_at ON pipelines(created_at)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pipelines_name ON pipelines(name)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}

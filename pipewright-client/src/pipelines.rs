//! Pipeline-related API endpoints

use crate::DaemonClient;
use crate::error::Result;
use pipewright_core::dto::pipeline::{CreatePipeline, PipelineRecord, UpdatePipeline};
use pipewright_core::dto::trace::TraceReference;
use uuid::Uuid;

impl DaemonClient {
    // =============================================================================
    // Pipeline Management
    // =============================================================================

    /// Create a new pipeline
    ///
    /// # Example
    /// ```no_run
    /// # use pipewright_client::DaemonClient;
    /// # use pipewright_core::dto::pipeline::{CreatePipeline, PipelineConfig};
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = DaemonClient::new("http://localhost:6927");
    /// let config: PipelineConfig = serde_json::from_str(r#"{
    ///     "plugins": {
    ///         "dataCollect": {"package": "text-collect"},
    ///         "dataAccess": {"package": "csv-access"},
    ///         "modelDefine": {"package": "bayes-define@1.0.0"},
    ///         "modelEvaluate": {"package": "accuracy-evaluate"}
    ///     }
    /// }"#)?;
    /// let pipeline = client.create_pipeline(CreatePipeline {
    ///     config: Some(config),
    ///     name: Some("churn".to_string()),
    /// }).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_pipeline(&self, req: CreatePipeline) -> Result<PipelineRecord> {
        let url = format!("{}/api/pipeline", self.base_url);
        let response = self.client.post(&url).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// List all pipelines, oldest first
    pub async fn list_pipelines(&self) -> Result<Vec<PipelineRecord>> {
        let url = format!("{}/api/pipeline", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Get a pipeline by ID
    pub async fn get_pipeline(&self, pipeline_id: Uuid) -> Result<PipelineRecord> {
        let url = format!("{}/api/pipeline/{}", self.base_url, pipeline_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Replace a pipeline's configuration
    pub async fn update_pipeline(
        &self,
        pipeline_id: Uuid,
        req: UpdatePipeline,
    ) -> Result<PipelineRecord> {
        let url = format!("{}/api/pipeline/{}", self.base_url, pipeline_id);
        let response = self.client.put(&url).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// Delete a pipeline
    pub async fn delete_pipeline(&self, pipeline_id: Uuid) -> Result<()> {
        let url = format!("{}/api/pipeline/{}", self.base_url, pipeline_id);
        let response = self.client.delete(&url).send().await?;

        self.handle_empty_response(response).await
    }

    /// Delete every pipeline and trace
    pub async fn delete_all_pipelines(&self) -> Result<()> {
        let url = format!("{}/api/pipeline", self.base_url);
        let response = self.client.delete(&url).send().await?;

        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Installation and Runs
    // =============================================================================

    /// Start installing a pipeline's plugins
    ///
    /// Returns as soon as the daemon accepted the request; follow progress
    /// through the returned trace id.
    pub async fn install_pipeline(&self, pipeline_id: Uuid) -> Result<TraceReference> {
        let url = format!(
            "{}/api/pipeline/{}/installation",
            self.base_url, pipeline_id
        );
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// Start a run of an installed pipeline
    pub async fn run_pipeline(&self, pipeline_id: Uuid) -> Result<TraceReference> {
        let url = format!("{}/api/pipeline/{}/run", self.base_url, pipeline_id);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }
}

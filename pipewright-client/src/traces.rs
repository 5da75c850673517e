//! Trace-related API endpoints

use crate::DaemonClient;
use crate::error::{ClientError, Result};
use pipewright_core::domain::trace::Trace;
use std::time::Duration;
use uuid::Uuid;

impl DaemonClient {
    /// Get a trace by ID
    pub async fn get_trace(&self, trace_id: Uuid) -> Result<Trace> {
        let url = format!("{}/api/pipeline/trace/{}", self.base_url, trace_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Request cancellation of a running trace
    pub async fn cancel_trace(&self, trace_id: Uuid) -> Result<()> {
        let url = format!("{}/api/pipeline/trace/{}", self.base_url, trace_id);
        let response = self.client.delete(&url).send().await?;

        self.handle_empty_response(response).await
    }

    /// List the traces of a pipeline, oldest first
    pub async fn list_traces(&self, pipeline_id: Uuid) -> Result<Vec<Trace>> {
        let url = format!("{}/api/pipeline/{}/trace", self.base_url, pipeline_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Poll a trace until it reaches a terminal state
    ///
    /// Gives up with [`ClientError::Timeout`] once `timeout` elapsed, or
    /// waits indefinitely when `timeout` is `None`.
    pub async fn wait_for_trace(
        &self,
        trace_id: Uuid,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> Result<Trace> {
        let started = tokio::time::Instant::now();

        loop {
            let trace = self.get_trace(trace_id).await?;
            if trace.state.is_terminal() {
                return Ok(trace);
            }

            if let Some(timeout) = timeout
                && started.elapsed() >= timeout
            {
                return Err(ClientError::Timeout(trace_id));
            }

            tokio::time::sleep(poll_interval).await;
        }
    }
}

//! Pipewright HTTP Client
//!
//! A simple, type-safe HTTP client for the Pipewright daemon API.
//!
//! # Example
//!
//! ```no_run
//! use pipewright_client::DaemonClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = DaemonClient::new("http://localhost:6927");
//!
//!     let pipelines = client.list_pipelines().await?;
//!     if let Some(pipeline) = pipelines.first() {
//!         let install = client.install_pipeline(pipeline.id).await?;
//!         let trace = client
//!             .wait_for_trace(install.trace_id, Duration::from_millis(500), None)
//!             .await?;
//!         println!("Installation finished: {}", trace.state);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
mod pipelines;
mod traces;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the Pipewright daemon API
///
/// Methods are organized into two groups:
/// - Pipeline management (create, list, get, update, delete, install, run)
/// - Traces (get, cancel, list per pipeline, wait)
#[derive(Debug, Clone)]
pub struct DaemonClient {
    /// Base URL of the daemon (e.g., "http://localhost:6927")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl DaemonClient {
    /// Create a new daemon client
    ///
    /// # Example
    /// ```
    /// use pipewright_client::DaemonClient;
    ///
    /// let client = DaemonClient::new("http://localhost:6927");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new daemon client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the daemon
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check whether the daemon answers its health endpoint
    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = self.check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response that returns no content (e.g., DELETE operations)
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        self.check_status(response).await?;
        Ok(())
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        tracing::debug!("Request failed with status {}: {}", status, body);

        Err(ClientError::from_body(status.as_u16(), &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = DaemonClient::new("http://localhost:6927");
        assert_eq!(client.base_url(), "http://localhost:6927");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = DaemonClient::new("http://localhost:6927/");
        assert_eq!(client.base_url(), "http://localhost:6927");
    }
}

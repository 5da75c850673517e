//! CLI configuration

use std::time::Duration;

/// How often `--wait` polls a trace
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the daemon
    pub daemon_url: String,
}

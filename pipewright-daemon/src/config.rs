//! Daemon configuration
//!
//! Selects the bind address, the pipeline store backend and the plugin
//! runtime implementation.

use pipewright_runtime::RuntimeConfig;
use std::fmt;
use std::str::FromStr;

use crate::repository::UniquenessPolicy;

/// Which plugin runtime the daemon drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeMode {
    /// Installer command plus child processes
    Process,
    /// In-process runtime, nothing touches the disk
    Memory,
}

impl fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeMode::Process => write!(f, "process"),
            RuntimeMode::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for RuntimeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "process" => Ok(RuntimeMode::Process),
            "memory" => Ok(RuntimeMode::Memory),
            other => Err(format!(
                "unknown runtime mode '{}' (expected 'process' or 'memory')",
                other
            )),
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP API listens on
    pub bind_addr: String,

    /// PostgreSQL connection string; the in-memory store is used when unset
    pub database_url: Option<String>,

    pub runtime_mode: RuntimeMode,

    /// Reject pipelines whose name is already taken
    pub unique_names: bool,

    /// Settings for the process runtime
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            database_url: None,
            runtime_mode: RuntimeMode::Process,
            unique_names: false,
            runtime: RuntimeConfig::default(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - PIPEWRIGHT_BIND_ADDR (optional, default: 0.0.0.0:6927)
    /// - DATABASE_URL (optional, enables the PostgreSQL store)
    /// - PIPEWRIGHT_RUNTIME (optional, `process` or `memory`, default: process)
    /// - PIPEWRIGHT_UNIQUE_NAMES (optional, bool, default: false)
    /// - PIPEWRIGHT_PLUGIN_DIR, PIPEWRIGHT_INSTALLER, PIPEWRIGHT_INVOKE_TIMEOUT
    ///   (see [`RuntimeConfig::from_env`])
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr =
            std::env::var("PIPEWRIGHT_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:6927".to_string());

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let runtime_mode = match std::env::var("PIPEWRIGHT_RUNTIME") {
            Ok(mode) => mode.parse().map_err(anyhow::Error::msg)?,
            Err(_) => RuntimeMode::Process,
        };

        let unique_names = std::env::var("PIPEWRIGHT_UNIQUE_NAMES")
            .ok()
            .map(|v| parse_bool(&v))
            .transpose()?
            .unwrap_or(false);

        Ok(Self {
            bind_addr,
            database_url,
            runtime_mode,
            unique_names,
            runtime: RuntimeConfig::from_env(),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.trim().is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if !self.bind_addr.contains(':') {
            anyhow::bail!("bind_addr must include a port (got '{}')", self.bind_addr);
        }

        if self.runtime_mode == RuntimeMode::Process {
            self.runtime.validate()?;
        }

        Ok(())
    }

    pub fn uniqueness(&self) -> UniquenessPolicy {
        if self.unique_names {
            UniquenessPolicy::UniqueNames
        } else {
            UniquenessPolicy::AllowDuplicates
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("0.0.0.0:6927")
    }
}

fn parse_bool(value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("invalid boolean value '{}'", other),
    }
}

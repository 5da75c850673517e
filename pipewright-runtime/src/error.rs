//! Error types for the plugin runtime

use thiserror::Error;

/// Failure to establish the runtime's execution context
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The configured installer program cannot be found
    #[error("installer '{0}' is not available")]
    InstallerUnavailable(String),

    /// The plugin directory could not be prepared or read
    #[error("plugin directory error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to install a plugin package
#[derive(Debug, Error)]
pub enum InstallError {
    /// The package could not be resolved or fetched
    #[error("failed to fetch {package}: {message}")]
    NetworkFailure { package: String, message: String },

    /// The fetched package does not implement the expected plugin contract
    #[error("plugin {package} is incompatible: {reason}")]
    IncompatiblePlugin { package: String, reason: String },

    /// The package is already linked in this runtime
    #[error("plugin {0} is already installed")]
    AlreadyInstalled(String),

    /// The wrapping trace asked the installation to stop
    #[error("installation of {0} was cancelled")]
    Cancelled(String),

    /// Staging or linking on disk failed
    #[error("plugin directory error: {0}")]
    Io(#[from] std::io::Error),

    #[error("plugin runtime is not connected")]
    NotConnected,
}

impl InstallError {
    pub fn network(package: impl ToString, message: impl Into<String>) -> Self {
        Self::NetworkFailure {
            package: package.to_string(),
            message: message.into(),
        }
    }

    pub fn incompatible(package: impl ToString, reason: impl Into<String>) -> Self {
        Self::IncompatiblePlugin {
            package: package.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure to call into an installed plugin
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("plugin {0} is not installed")]
    NotInstalled(String),

    /// The plugin process failed or produced unusable output
    #[error("plugin runtime fault: {0}")]
    RuntimeFault(String),

    #[error("plugin runtime is not connected")]
    NotConnected,
}

/// Failure to remove an installed plugin
#[derive(Debug, Error)]
pub enum UninstallError {
    #[error("plugin {0} is not installed")]
    NotFound(String),

    #[error("failed to remove plugin files: {0}")]
    Io(#[from] std::io::Error),

    #[error("plugin runtime is not connected")]
    NotConnected,
}

//! The plugin runtime capability

use async_trait::async_trait;
use pipewright_core::domain::plugin::{PackageRef, PluginInstallSpec, PluginRole};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{ConnectError, InstallError, InvocationError, UninstallError};
use crate::progress::ProgressSink;

/// Runtime that installs and invokes plugin packages
///
/// Two-phase construction: build the runtime, then call [`connect`] before
/// any other method. Every other method fails with a `NotConnected` error
/// until `connect` has completed. After that, calls may run concurrently.
///
/// [`connect`]: PluginRuntime::connect
#[async_trait]
pub trait PluginRuntime: Send + Sync {
    /// Establishes the execution context
    ///
    /// Idempotent. Concurrent first calls perform initialization once.
    async fn connect(&self) -> Result<(), ConnectError>;

    /// Resolves, fetches, verifies and links a package
    ///
    /// Progress is streamed to `progress`. `cancel` is observed between the
    /// fetch, verify and link steps; a cancelled or failed install leaves
    /// nothing visible to [`invoke`](PluginRuntime::invoke).
    async fn install(
        &self,
        spec: &PluginInstallSpec,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<InstallResult, InstallError>;

    /// Removes an installed package
    async fn uninstall(&self, package: &PackageRef) -> Result<(), UninstallError>;

    /// Calls `method` on an installed plugin
    async fn invoke(
        &self,
        package: &PackageRef,
        method: &str,
        args: JsonValue,
    ) -> Result<JsonValue, InvocationError>;

    /// Lists linked packages
    async fn installed(&self) -> Vec<InstalledPlugin>;
}

/// Outcome of a successful install
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallResult {
    pub plugin: InstalledPlugin,
}

/// A package linked into a runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledPlugin {
    /// Package as it was requested
    pub package: PackageRef,
    pub role: PluginRole,
    /// Version reported by the package itself
    pub version: String,
    /// Command used to invoke the plugin
    pub entry: Vec<String>,
    /// Directory the plugin was linked into, for on-disk runtimes
    pub location: Option<PathBuf>,
    pub installed_at: chrono::DateTime<chrono::Utc>,
}

/// Key under which a package is tracked
///
/// Unpinned references resolve to `latest`, so `pkg` and `pkg@latest` name
/// the same installation.
pub fn package_key(package: &PackageRef) -> String {
    format!("{}@{}", package.name, package.version_or_latest())
}

/// Error for a package that is already linked
///
/// A linked package only satisfies the request when it implements the
/// requested role; otherwise it is incompatible.
pub(crate) fn already_installed(
    existing: &InstalledPlugin,
    spec: &PluginInstallSpec,
    key: String,
) -> InstallError {
    if existing.role != spec.role {
        return InstallError::incompatible(
            &spec.package,
            format!("implements {} but {} is required", existing.role, spec.role),
        );
    }
    InstallError::AlreadyInstalled(key)
}

/// Fails with `Cancelled` once the token has fired
pub(crate) fn checkpoint(cancel: &CancellationToken, package: &str) -> Result<(), InstallError> {
    if cancel.is_cancelled() {
        return Err(InstallError::Cancelled(package.to_string()));
    }
    Ok(())
}

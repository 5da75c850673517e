//! Process plugin runtime
//!
//! Handles the plugin lifecycle on the local machine:
//! - Checking that the installer program is available
//! - Fetching packages into a staging directory with the installer
//! - Verifying the plugin manifest against the requested role
//! - Linking verified packages into the plugin directory
//! - Invoking plugins as child processes
//!
//! Layout of the plugin directory:
//!
//! ```text
//! <plugin_dir>/.staging/<uuid>/          in-flight installs
//! <plugin_dir>/<name>/<version>/         linked packages
//! <plugin_dir>/<name>/<version>/.pipewright-link.json
//! ```

use async_trait::async_trait;
use pipewright_core::domain::log::LogEntry;
use pipewright_core::domain::plugin::{PackageRef, PluginInstallSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{OnceCell, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::error::{ConnectError, InstallError, InvocationError, UninstallError};
use crate::manifest::{PluginManifest, find_manifest};
use crate::progress::ProgressSink;
use crate::runtime::{
    InstallResult, InstalledPlugin, PluginRuntime, already_installed, checkpoint, package_key,
};

const STAGING_DIR: &str = ".staging";
const LINK_FILE: &str = ".pipewright-link.json";

/// Record written next to a linked package so it survives restarts
#[derive(Debug, Serialize, Deserialize)]
struct LinkRecord {
    plugin: InstalledPlugin,
    /// Manifest directory relative to the link directory
    manifest_dir: PathBuf,
}

/// Plugin runtime backed by an installer command and child processes
pub struct ProcessRuntime {
    config: RuntimeConfig,
    connected: OnceCell<()>,
    plugins: RwLock<HashMap<String, InstalledPlugin>>,
    /// Serializes install/uninstall of the same package
    package_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProcessRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            connected: OnceCell::new(),
            plugins: RwLock::new(HashMap::new()),
            package_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn staging_root(&self) -> PathBuf {
        self.config.plugin_dir.join(STAGING_DIR)
    }

    fn link_dir(&self, package: &PackageRef) -> PathBuf {
        self.config
            .plugin_dir
            .join(encode_path_segment(&package.name))
            .join(encode_path_segment(package.version_or_latest()))
    }

    fn package_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .package_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(key.to_string()).or_default().clone()
    }

    /// Removes leftovers of installs interrupted by a crash
    async fn clear_staging(&self) -> std::io::Result<()> {
        let staging = self.staging_root();
        if tokio::fs::try_exists(&staging).await? {
            tokio::fs::remove_dir_all(&staging).await?;
        }
        tokio::fs::create_dir_all(&staging).await
    }

    /// Rebuilds the in-memory index from link records on disk
    async fn reload_linked(&self) -> std::io::Result<usize> {
        let mut loaded = HashMap::new();
        let mut names = tokio::fs::read_dir(&self.config.plugin_dir).await?;

        while let Some(name_entry) = names.next_entry().await? {
            if name_entry.file_name() == STAGING_DIR || !name_entry.file_type().await?.is_dir() {
                continue;
            }

            let mut versions = tokio::fs::read_dir(name_entry.path()).await?;
            while let Some(version_entry) = versions.next_entry().await? {
                let version_dir = version_entry.path();
                match read_link_record(&version_dir.join(LINK_FILE)).await {
                    Some(record) => {
                        let mut plugin = record.plugin;
                        plugin.location = Some(version_dir.join(&record.manifest_dir));
                        loaded.insert(package_key(&plugin.package), plugin);
                    }
                    None => warn!("Ignoring {}: no link record", version_dir.display()),
                }
            }
        }

        let count = loaded.len();
        *self.plugins.write().await = loaded;
        Ok(count)
    }

    /// Runs the installer into the staging directory, streaming its output
    async fn fetch(
        &self,
        spec: &PluginInstallSpec,
        staging: &Path,
        progress: &Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<(), InstallError> {
        let package = spec.package.to_string();
        let command = self
            .config
            .installer_command(&staging.to_string_lossy(), &package);
        let (program, args) = command
            .split_first()
            .ok_or_else(|| InstallError::network(&package, "installer command is empty"))?;

        progress.report(LogEntry::info(format!("Fetching {}", package)));
        debug!("Running installer: {}", command.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| InstallError::network(&package, format!("failed to start installer: {}", e)))?;

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = child.kill().await;
                        stderr_task.abort();
                        return Err(InstallError::Cancelled(package));
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) if !line.trim().is_empty() => {
                            progress.report(LogEntry::debug(line));
                        }
                        Ok(Some(_)) => {}
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Failed to read installer output for {}: {}", package, e);
                            break;
                        }
                    }
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                stderr_task.abort();
                return Err(InstallError::Cancelled(package));
            }
            status = child.wait() => status.map_err(|e| {
                InstallError::network(&package, format!("installer did not finish: {}", e))
            })?,
        };

        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let exit_code = status.code().unwrap_or(-1);
            let message = format!(
                "installer exited with code {}: {}",
                exit_code,
                stderr.trim()
            );
            error!("Failed to fetch {}: {}", package, message);
            progress.report(LogEntry::error(message.clone()));
            return Err(InstallError::network(&package, message));
        }

        Ok(())
    }

    /// Checks the fetched package implements the requested role
    async fn verify(
        &self,
        spec: &PluginInstallSpec,
        staging: &Path,
    ) -> Result<(PathBuf, PluginManifest), InstallError> {
        let package = spec.package.to_string();

        let (dir, manifest) = find_manifest(staging, &spec.package.name)
            .await
            .map_err(|e| InstallError::incompatible(&package, e))?
            .ok_or_else(|| InstallError::incompatible(&package, "no plugin.json manifest found"))?;

        if manifest.role != spec.role {
            return Err(InstallError::incompatible(
                &package,
                format!("implements {} but {} is required", manifest.role, spec.role),
            ));
        }

        if manifest.entry.is_empty() {
            return Err(InstallError::incompatible(
                &package,
                "manifest has an empty entry command",
            ));
        }

        Ok((dir, manifest))
    }

    /// Fetches and verifies a package in staging, then links it
    async fn stage_and_link(
        &self,
        spec: &PluginInstallSpec,
        staging: &mut StagingDir,
        progress: &Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<InstalledPlugin, InstallError> {
        let package = spec.package.to_string();

        checkpoint(cancel, &package)?;
        self.fetch(spec, staging.path(), progress, cancel).await?;

        checkpoint(cancel, &package)?;
        let (manifest_dir, manifest) = self.verify(spec, staging.path()).await?;
        progress.report(LogEntry::info(format!(
            "Verified {} {} implements {}",
            manifest.name, manifest.version, spec.role
        )));

        checkpoint(cancel, &package)?;
        self.link(spec, staging, &manifest_dir, manifest).await
    }

    /// Moves a verified staging directory into place
    ///
    /// The link record is written into the staging directory first, so the
    /// rename is the single step that makes the package visible.
    async fn link(
        &self,
        spec: &PluginInstallSpec,
        staging: &mut StagingDir,
        manifest_dir: &Path,
        manifest: PluginManifest,
    ) -> Result<InstalledPlugin, InstallError> {
        let link_dir = self.link_dir(&spec.package);
        let relative = manifest_dir
            .strip_prefix(staging.path())
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let plugin = InstalledPlugin {
            package: spec.package.clone(),
            role: spec.role,
            version: manifest.version,
            entry: manifest.entry,
            location: Some(link_dir.join(&relative)),
            installed_at: chrono::Utc::now(),
        };

        let record = LinkRecord {
            plugin: plugin.clone(),
            manifest_dir: relative,
        };
        let record = serde_json::to_vec_pretty(&record).map_err(std::io::Error::other)?;
        tokio::fs::write(staging.path().join(LINK_FILE), record).await?;

        // Leftovers of a link that is not in the index
        if tokio::fs::try_exists(&link_dir).await? {
            tokio::fs::remove_dir_all(&link_dir).await?;
        }
        if let Some(parent) = link_dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::rename(staging.path(), &link_dir).await?;
        staging.disarm();

        Ok(plugin)
    }
}

#[async_trait]
impl PluginRuntime for ProcessRuntime {
    async fn connect(&self) -> Result<(), ConnectError> {
        self.connected
            .get_or_try_init(|| async {
                let program = self.config.installer.first().cloned().unwrap_or_default();
                if !program_available(&program) {
                    return Err(ConnectError::InstallerUnavailable(program));
                }

                tokio::fs::create_dir_all(&self.config.plugin_dir).await?;
                self.clear_staging().await?;
                let count = self.reload_linked().await?;

                info!(
                    "Plugin runtime connected: {} plugin(s) linked in {}",
                    count,
                    self.config.plugin_dir.display()
                );
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn install(
        &self,
        spec: &PluginInstallSpec,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<InstallResult, InstallError> {
        if !self.connected.initialized() {
            return Err(InstallError::NotConnected);
        }

        let package = spec.package.to_string();
        let key = package_key(&spec.package);
        let lock = self.package_lock(&key);
        let _guard = lock.lock().await;

        if let Some(existing) = self.plugins.read().await.get(&key) {
            return Err(already_installed(existing, spec, key));
        }

        info!("Installing {} for role {}", package, spec.role);
        progress.report(LogEntry::info(format!(
            "Resolving {} for role {}",
            package, spec.role
        )));

        let mut staging = StagingDir::create(&self.staging_root()).await?;
        let linked = self
            .stage_and_link(spec, &mut staging, &progress, &cancel)
            .await;
        staging.remove().await;
        let plugin = linked?;
        progress.report(LogEntry::info(format!("Linked {}", package)));

        self.plugins.write().await.insert(key, plugin.clone());
        info!("Installed {}", package);

        Ok(InstallResult { plugin })
    }

    async fn uninstall(&self, package: &PackageRef) -> Result<(), UninstallError> {
        if !self.connected.initialized() {
            return Err(UninstallError::NotConnected);
        }

        let key = package_key(package);
        let lock = self.package_lock(&key);
        let _guard = lock.lock().await;

        let plugin = self
            .plugins
            .write()
            .await
            .remove(&key)
            .ok_or_else(|| UninstallError::NotFound(package.to_string()))?;

        let link_dir = self.link_dir(&plugin.package);
        if tokio::fs::try_exists(&link_dir).await? {
            tokio::fs::remove_dir_all(&link_dir).await?;
        }

        info!("Uninstalled {}", package);
        Ok(())
    }

    async fn invoke(
        &self,
        package: &PackageRef,
        method: &str,
        args: JsonValue,
    ) -> Result<JsonValue, InvocationError> {
        if !self.connected.initialized() {
            return Err(InvocationError::NotConnected);
        }

        let plugin = self
            .plugins
            .read()
            .await
            .get(&package_key(package))
            .cloned()
            .ok_or_else(|| InvocationError::NotInstalled(package.to_string()))?;

        let (program, entry_args) = plugin
            .entry
            .split_first()
            .ok_or_else(|| InvocationError::RuntimeFault("empty entry command".to_string()))?;

        debug!("Invoking {} method {}", package, method);

        let mut command = Command::new(program);
        command
            .args(entry_args)
            .arg(method)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &plugin.location {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            InvocationError::RuntimeFault(format!("failed to start plugin {}: {}", package, e))
        })?;

        let input = serde_json::to_vec(&args)
            .map_err(|e| InvocationError::RuntimeFault(format!("invalid arguments: {}", e)))?;
        if let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(&input).await
        {
            // Plugins that ignore their input may exit before reading it
            debug!("Plugin {} did not read its input: {}", package, e);
        }

        let output = tokio::time::timeout(self.config.invoke_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                InvocationError::RuntimeFault(format!(
                    "plugin {} timed out after {:?}",
                    package, self.config.invoke_timeout
                ))
            })?
            .map_err(|e| InvocationError::RuntimeFault(format!("plugin {} failed: {}", package, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(InvocationError::RuntimeFault(format!(
                "plugin {} exited with code {}: {}",
                package,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(JsonValue::Null);
        }

        serde_json::from_str(stdout.trim()).map_err(|e| {
            InvocationError::RuntimeFault(format!("plugin {} returned invalid JSON: {}", package, e))
        })
    }

    async fn installed(&self) -> Vec<InstalledPlugin> {
        let plugins = self.plugins.read().await;
        let mut installed: Vec<_> = plugins.values().cloned().collect();
        installed.sort_by_key(|p| package_key(&p.package));
        installed
    }
}

/// Staging directory removed on drop unless it was linked
struct StagingDir {
    path: PathBuf,
    armed: bool,
}

impl StagingDir {
    async fn create(root: &Path) -> std::io::Result<Self> {
        let path = root.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path, armed: true })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    /// Removes the directory unless it was linked
    async fn remove(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;

        if let Err(e) = tokio::fs::remove_dir_all(&self.path).await {
            warn!("Failed to remove staging directory {}: {}", self.path.display(), e);
        }
    }
}

/// Cleanup for installs abandoned mid-await
///
/// The removal runs on the blocking pool when a runtime is around.
impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_staging_blocking(&path));
            }
            Err(_) => remove_staging_blocking(&path),
        }
    }
}

fn remove_staging_blocking(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        warn!("Failed to remove staging directory {}: {}", path.display(), e);
    }
}

async fn read_link_record(path: &Path) -> Option<LinkRecord> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    serde_json::from_str(&content).ok()
}

/// Checks if a program can be started, either by path or through `PATH`
fn program_available(program: &str) -> bool {
    if program.is_empty() {
        return false;
    }

    if program.contains(std::path::MAIN_SEPARATOR) {
        return Path::new(program).is_file();
    }

    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

/// Makes a package name or version usable as a single path segment
fn encode_path_segment(segment: &str) -> String {
    segment.replace(['/', '\\'], "+")
}

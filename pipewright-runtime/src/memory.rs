//! In-memory plugin runtime
//!
//! Keeps installed packages in a map and answers invocations by echoing
//! their input. Failures are scripted per package name, so the daemon's
//! trace and state-machine behavior can be exercised without an installer.

use async_trait::async_trait;
use pipewright_core::domain::log::LogEntry;
use pipewright_core::domain::plugin::{PackageRef, PluginInstallSpec};
use serde_json::{Value as JsonValue, json};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ConnectError, InstallError, InvocationError, UninstallError};
use crate::progress::ProgressSink;
use crate::runtime::{
    InstallResult, InstalledPlugin, PluginRuntime, already_installed, checkpoint, package_key,
};

/// A recorded call to [`PluginRuntime::invoke`]
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub package: String,
    pub method: String,
    pub args: JsonValue,
}

#[derive(Default)]
pub struct InMemoryRuntime {
    connected: OnceCell<()>,
    connect_count: AtomicUsize,
    plugins: RwLock<HashMap<String, InstalledPlugin>>,
    invocations: Mutex<Vec<Invocation>>,

    // Scripted behavior, keyed by package name
    network_failures: HashSet<String>,
    incompatible: HashSet<String>,
    invoke_faults: HashSet<String>,
    step_delay: Duration,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetching `name` fails with a network error
    pub fn with_network_failure(mut self, name: impl Into<String>) -> Self {
        self.network_failures.insert(name.into());
        self
    }

    /// `name` fails verification
    pub fn with_incompatible(mut self, name: impl Into<String>) -> Self {
        self.incompatible.insert(name.into());
        self
    }

    /// Invoking `name` fails with a runtime fault
    pub fn with_invoke_fault(mut self, name: impl Into<String>) -> Self {
        self.invoke_faults.insert(name.into());
        self
    }

    /// Time spent in each of the fetch, verify and link steps
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// How many times initialization actually ran
    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn step(&self, cancel: &CancellationToken, package: &str) -> Result<(), InstallError> {
        if !self.step_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.step_delay) => {}
            }
        }
        checkpoint(cancel, package)
    }
}

#[async_trait]
impl PluginRuntime for InMemoryRuntime {
    async fn connect(&self) -> Result<(), ConnectError> {
        self.connected
            .get_or_init(|| async {
                self.connect_count.fetch_add(1, Ordering::SeqCst);
                info!("In-memory plugin runtime connected");
            })
            .await;
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
        let name = spec.package.name.as_str();

        if let Some(existing) = self.plugins.read().await.get(&key) {
            return Err(already_installed(existing, spec, key));
        }

        progress.report(LogEntry::info(format!("Fetching {}", package)));
        self.step(&cancel, &package).await?;
        if self.network_failures.contains(name) {
            progress.report(LogEntry::error(format!("Registry unreachable for {}", package)));
            return Err(InstallError::network(&package, "package registry unreachable"));
        }

        progress.report(LogEntry::info(format!("Verifying {}", package)));
        self.step(&cancel, &package).await?;
        if self.incompatible.contains(name) {
            return Err(InstallError::incompatible(
                &package,
                format!("does not implement {}", spec.role),
            ));
        }

        progress.report(LogEntry::info(format!("Linking {}", package)));
        self.step(&cancel, &package).await?;

        let plugin = InstalledPlugin {
            package: spec.package.clone(),
            role: spec.role,
            version: spec.package.version_or_latest().to_string(),
            entry: Vec::new(),
            location: None,
            installed_at: chrono::Utc::now(),
        };

        let mut plugins = self.plugins.write().await;
        if let Some(existing) = plugins.get(&key) {
            return Err(already_installed(existing, spec, key));
        }
        plugins.insert(key, plugin.clone());
        debug!("Linked {} in memory", package);

        Ok(InstallResult { plugin })
    }

    async fn uninstall(&self, package: &PackageRef) -> Result<(), UninstallError> {
        if !self.connected.initialized() {
            return Err(UninstallError::NotConnected);
        }

        self.plugins
            .write()
            .await
            .remove(&package_key(package))
            .map(|_| ())
            .ok_or_else(|| UninstallError::NotFound(package.to_string()))
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

        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Invocation {
                package: package.to_string(),
                method: method.to_string(),
                args: args.clone(),
            });

        if self.invoke_faults.contains(&package.name) {
            return Err(InvocationError::RuntimeFault(format!(
                "plugin {} crashed",
                package
            )));
        }

        Ok(json!({
            "package": package.to_string(),
            "method": method,
            "role": plugin.role,
            "input": args,
        }))
    }

    async fn installed(&self) -> Vec<InstalledPlugin> {
        let plugins = self.plugins.read().await;
        let mut installed: Vec<_> = plugins.values().cloned().collect();
        installed.sort_by_key(|p| package_key(&p.package));
        installed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::InMemoryProgress;
    use pipewright_core::domain::plugin::PluginRole;

    fn spec(package: &str, role: PluginRole) -> PluginInstallSpec {
        PluginInstallSpec {
            role,
            package: PackageRef::parse(package).unwrap(),
            params: json!({}),
        }
    }

    #[tokio::test]
    async fn test_concurrent_connect_initializes_once() {
        let runtime = Arc::new(InMemoryRuntime::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let runtime = runtime.clone();
                tokio::spawn(async move { runtime.connect().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(runtime.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_not_connected() {
        let runtime = InMemoryRuntime::new();
        let package = PackageRef::parse("text-collect").unwrap();

        let install = runtime
            .install(
                &spec("text-collect", PluginRole::DataCollect),
                Arc::new(InMemoryProgress::new()),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(install, Err(InstallError::NotConnected)));
        assert!(matches!(
            runtime.invoke(&package, "run", JsonValue::Null).await,
            Err(InvocationError::NotConnected)
        ));
        assert!(matches!(
            runtime.uninstall(&package).await,
            Err(UninstallError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_install_then_invoke() {
        let runtime = InMemoryRuntime::new();
        runtime.connect().await.unwrap();
        let progress = InMemoryProgress::new();

        runtime
            .install(
                &spec("text-collect@1.0.0", PluginRole::DataCollect),
                Arc::new(progress.clone()),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            progress.messages(),
            vec![
                "Fetching text-collect@1.0.0",
                "Verifying text-collect@1.0.0",
                "Linking text-collect@1.0.0",
            ]
        );

        let package = PackageRef::parse("text-collect@1.0.0").unwrap();
        let output = runtime
            .invoke(&package, "run", json!({"rows": 2}))
            .await
            .unwrap();
        assert_eq!(output["role"], "dataCollect");
        assert_eq!(output["input"]["rows"], 2);
        assert_eq!(runtime.invocations().len(), 1);

        let again = runtime
            .install(
                &spec("text-collect@1.0.0", PluginRole::DataCollect),
                Arc::new(InMemoryProgress::new()),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(again, Err(InstallError::AlreadyInstalled(_))));
    }

    #[tokio::test]
    async fn test_linked_package_requested_for_another_role() {
        let runtime = InMemoryRuntime::new();
        runtime.connect().await.unwrap();

        runtime
            .install(
                &spec("text-collect", PluginRole::DataCollect),
                Arc::new(InMemoryProgress::new()),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let other_role = runtime
            .install(
                &spec("text-collect", PluginRole::ModelDefine),
                Arc::new(InMemoryProgress::new()),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(other_role, Err(InstallError::IncompatiblePlugin { .. })));

        let installed = runtime.installed().await;
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].role, PluginRole::DataCollect);
    }

    #[tokio::test]
    async fn test_incompatible_plugin_leaves_nothing_invokable() {
        let runtime = InMemoryRuntime::new().with_incompatible("bayes-define");
        runtime.connect().await.unwrap();

        let result = runtime
            .install(
                &spec("bayes-define", PluginRole::ModelDefine),
                Arc::new(InMemoryProgress::new()),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(InstallError::IncompatiblePlugin { .. })));

        let package = PackageRef::parse("bayes-define").unwrap();
        assert!(matches!(
            runtime.invoke(&package, "run", JsonValue::Null).await,
            Err(InvocationError::NotInstalled(_))
        ));
        assert!(runtime.installed().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_step() {
        let runtime = InMemoryRuntime::new().with_step_delay(Duration::from_secs(30));
        runtime.connect().await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            runtime.install(
                &spec("text-collect", PluginRole::DataCollect),
                Arc::new(InMemoryProgress::new()),
                cancel,
            ),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(InstallError::Cancelled(_))));
        assert!(runtime.installed().await.is_empty());
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let runtime = InMemoryRuntime::new()
            .with_network_failure("offline-pkg")
            .with_invoke_fault("crashy");
        runtime.connect().await.unwrap();

        let fetch = runtime
            .install(
                &spec("offline-pkg", PluginRole::DataAccess),
                Arc::new(InMemoryProgress::new()),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(fetch, Err(InstallError::NetworkFailure { .. })));

        runtime
            .install(
                &spec("crashy", PluginRole::ModelEvaluate),
                Arc::new(InMemoryProgress::new()),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let invoke = runtime
            .invoke(&PackageRef::parse("crashy").unwrap(), "run", JsonValue::Null)
            .await;
        assert!(matches!(invoke, Err(InvocationError::RuntimeFault(_))));
    }
}

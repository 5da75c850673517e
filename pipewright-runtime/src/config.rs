//! Runtime configuration
//!
//! Defines where plugins are linked, how packages are fetched and how long
//! a single plugin invocation may take.

use std::path::PathBuf;
use std::time::Duration;

/// Placeholder replaced by the staging directory in the installer template
pub const TARGET_PLACEHOLDER: &str = "{target}";

/// Placeholder replaced by the package reference in the installer template
pub const PACKAGE_PLACEHOLDER: &str = "{package}";

/// Process runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Directory plugins are linked into
    pub plugin_dir: PathBuf,

    /// Installer command template, e.g. `npm install --prefix {target} {package}`
    pub installer: Vec<String>,

    /// Maximum time a single plugin invocation may run
    pub invoke_timeout: Duration,
}

impl RuntimeConfig {
    /// Creates a configuration with the default installer
    pub fn new(plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
            installer: default_installer(),
            invoke_timeout: Duration::from_secs(600),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - PIPEWRIGHT_PLUGIN_DIR (optional, default: ./plugins)
    /// - PIPEWRIGHT_INSTALLER (optional, whitespace separated template)
    /// - PIPEWRIGHT_INVOKE_TIMEOUT (optional, seconds, default: 600)
    pub fn from_env() -> Self {
        let plugin_dir = std::env::var("PIPEWRIGHT_PLUGIN_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./plugins"));

        let installer = std::env::var("PIPEWRIGHT_INSTALLER")
            .ok()
            .map(|s| s.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|parts| !parts.is_empty())
            .unwrap_or_else(default_installer);

        let invoke_timeout = std::env::var("PIPEWRIGHT_INVOKE_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(600));

        Self {
            plugin_dir,
            installer,
            invoke_timeout,
        }
    }

    /// Replaces the installer command template
    pub fn with_installer<I, S>(mut self, installer: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.installer = installer.into_iter().map(Into::into).collect();
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.plugin_dir.as_os_str().is_empty() {
            anyhow::bail!("plugin_dir cannot be empty");
        }

        if self.installer.is_empty() {
            anyhow::bail!("installer command cannot be empty");
        }

        if !self.installer.iter().any(|part| part.contains(TARGET_PLACEHOLDER)) {
            anyhow::bail!("installer command must contain {}", TARGET_PLACEHOLDER);
        }

        if !self.installer.iter().any(|part| part.contains(PACKAGE_PLACEHOLDER)) {
            anyhow::bail!("installer command must contain {}", PACKAGE_PLACEHOLDER);
        }

        if self.invoke_timeout.is_zero() {
            anyhow::bail!("invoke_timeout must be greater than 0");
        }

        Ok(())
    }

    /// Expands the installer template for one package
    pub fn installer_command(&self, target: &str, package: &str) -> Vec<String> {
        self.installer
            .iter()
            .map(|part| {
                part.replace(TARGET_PLACEHOLDER, target)
                    .replace(PACKAGE_PLACEHOLDER, package)
            })
            .collect()
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new("./plugins")
    }
}

fn default_installer() -> Vec<String> {
    ["npm", "install", "--no-save", "--prefix", TARGET_PLACEHOLDER, PACKAGE_PLACEHOLDER]
        .into_iter()
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.plugin_dir, PathBuf::from("./plugins"));
        assert_eq!(config.installer[0], "npm");
        assert_eq!(config.invoke_timeout, Duration::from_secs(600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RuntimeConfig::default();

        config.installer = vec!["npm".to_string(), "install".to_string()];
        assert!(config.validate().is_err());

        config.installer = vec!["fetch".to_string(), "{target}".to_string()];
        assert!(config.validate().is_err());

        config = config.with_installer(["fetch", "--into={target}", "{package}"]);
        assert!(config.validate().is_ok());

        config.invoke_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_installer_command_expansion() {
        let config = RuntimeConfig::new("/tmp/plugins")
            .with_installer(["fetch", "--into={target}", "{package}"]);

        assert_eq!(
            config.installer_command("/tmp/stage", "text-collect@1.0.0"),
            vec!["fetch", "--into=/tmp/stage", "text-collect@1.0.0"]
        );
    }
}

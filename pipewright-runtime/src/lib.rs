//! Pipewright Plugin Runtime
//!
//! Installs, uninstalls and invokes plugin packages inside an isolated
//! execution context, independent of any particular pipeline.
//!
//! Architecture:
//! - [`PluginRuntime`]: the capability the daemon depends on
//! - [`ProcessRuntime`]: fetches packages with an external installer command
//!   into a plugin directory and invokes them as child processes
//! - [`InMemoryRuntime`]: an in-process implementation with scripted
//!   failures, used by tests and by the daemon's `memory` mode
//!
//! Both implementations require an explicit [`PluginRuntime::connect`]
//! before first use.

pub mod config;
pub mod error;
pub mod manifest;
pub mod memory;
pub mod process;
pub mod progress;
mod runtime;

pub use config::RuntimeConfig;
pub use error::{ConnectError, InstallError, InvocationError, UninstallError};
pub use memory::InMemoryRuntime;
pub use process::ProcessRuntime;
pub use progress::{InMemoryProgress, ProgressSink};
pub use runtime::{InstallResult, InstalledPlugin, PluginRuntime, package_key};

pub use tokio_util::sync::CancellationToken;

//! Plugin manifest
//!
//! Every plugin package ships a `plugin.json` describing which role it
//! implements and how to invoke it:
//!
//! ```json
//! { "name": "text-collect", "version": "1.0.0", "role": "dataCollect",
//!   "entry": ["node", "index.js"] }
//! ```

use pipewright_core::domain::plugin::PluginRole;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "plugin.json";

/// How deep below a staging directory a manifest is searched for
///
/// Enough for `<target>/node_modules/@scope/name/plugin.json`.
const MAX_SEARCH_DEPTH: usize = 3;

/// Contents of `plugin.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    pub role: PluginRole,
    pub entry: Vec<String>,
}

/// Finds the manifest of package `name` below `root`
///
/// Returns the directory holding the manifest and its parsed contents.
/// Manifests of other packages (dependencies fetched alongside) are
/// skipped; unreadable or malformed manifests are reported as errors.
pub async fn find_manifest(
    root: &Path,
    name: &str,
) -> Result<Option<(PathBuf, PluginManifest)>, String> {
    let mut queue = VecDeque::from([(root.to_path_buf(), 0usize)]);

    while let Some((dir, depth)) = queue.pop_front() {
        let candidate = dir.join(MANIFEST_FILE);
        if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            let manifest = read_manifest(&candidate).await?;
            if manifest.name == name {
                return Ok(Some((dir, manifest)));
            }
        }

        if depth >= MAX_SEARCH_DEPTH {
            continue;
        }

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => continue,
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                queue.push_back((entry.path(), depth + 1));
            }
        }
    }

    Ok(None)
}

async fn read_manifest(path: &Path) -> Result<PluginManifest, String> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;

    serde_json::from_str(&content).map_err(|e| format!("malformed {}: {}", path.display(), e))
}

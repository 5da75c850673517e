//! Plugin domain types
//!
//! A pipeline binds one plugin package to each of four roles. The package
//! string is parsed into a [`PackageRef`] before it is handed to a runtime.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four roles a pipeline binds, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PluginRole {
    DataCollect,
    DataAccess,
    ModelDefine,
    ModelEvaluate,
}

impl PluginRole {
    /// All roles in the order they are installed and run
    pub const ALL: [PluginRole; 4] = [
        PluginRole::DataCollect,
        PluginRole::DataAccess,
        PluginRole::ModelDefine,
        PluginRole::ModelEvaluate,
    ];

    /// Wire name of the role (also the flattened record field name)
    pub fn as_str(self) -> &'static str {
        match self {
            PluginRole::DataCollect => "dataCollect",
            PluginRole::DataAccess => "dataAccess",
            PluginRole::ModelDefine => "modelDefine",
            PluginRole::ModelEvaluate => "modelEvaluate",
        }
    }
}

impl fmt::Display for PluginRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PluginRole::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("unknown plugin role '{}'", s))
    }
}

/// Reference to a plugin package, optionally pinned to a version or tag
///
/// Accepted forms: `name`, `name@1.2.0`, `@scope/name` and `@scope/name@tag`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRef {
    pub name: String,
    pub version: Option<String>,
}

impl PackageRef {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Parses a package string
    pub fn parse(input: &str) -> Result<Self, String> {
        let input = input.trim();

        if input.is_empty() {
            return Err("package name cannot be empty".to_string());
        }

        // A leading '@' belongs to the scope, not to the version separator
        let (name, version) = match input.rfind('@') {
            Some(idx) if idx > 0 => (&input[..idx], Some(&input[idx + 1..])),
            _ => (input, None),
        };

        if name.is_empty() || name == "@" {
            return Err(format!("package '{}' has an empty name", input));
        }

        if name.chars().any(char::is_whitespace) {
            return Err(format!("package name '{}' contains whitespace", name));
        }

        match version {
            Some(v) if v.trim().is_empty() => {
                Err(format!("package '{}' has an empty version", input))
            }
            _ => Ok(Self::new(name, version.map(|v| v.trim().to_string()))),
        }
    }

    /// Version used for on-disk layout when none was requested
    pub fn version_or_latest(&self) -> &str {
        self.version.as_deref().unwrap_or("latest")
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for PackageRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PackageRef::parse(s)
    }
}

/// A plugin bound to a role, as stored on a pipeline
///
/// `params` holds the canonical JSON string of the plugin parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginBinding {
    pub package: String,
    pub params: String,
}

impl PluginBinding {
    /// Parsed parameters; the stored string is always a JSON object
    pub fn params_value(&self) -> serde_json::Value {
        serde_json::from_str(&self.params)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()))
    }
}

/// Unit of work handed to a plugin runtime (derived, never persisted)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInstallSpec {
    pub role: PluginRole,
    pub package: PackageRef,
    pub params: serde_json::Value,
}

/// Serializes plugin params into their canonical stored form
///
/// Absent or `null` params become `"{}"`. Anything other than a JSON object
/// is rejected. Keys keep the order they were submitted in, so the stored
/// string matches a compact serialization of the submitted mapping.
pub fn canonical_params(params: Option<&serde_json::Value>) -> Result<String, String> {
    match params {
        None | Some(serde_json::Value::Null) => Ok("{}".to_string()),
        Some(value @ serde_json::Value::Object(_)) => {
            serde_json::to_string(value).map_err(|e| format!("params cannot be serialized: {}", e))
        }
        Some(other) => Err(format!(
            "params must be a mapping, got {}",
            json_type_name(other)
        )),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

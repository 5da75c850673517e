//! Pipeline domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::plugin::{PackageRef, PluginBinding, PluginInstallSpec, PluginRole};

/// Pipeline record
///
/// Structure shared between the store (persists) and the service (drives
/// installation and runs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub name: Option<String>,
    pub data_collect: PluginBinding,
    pub data_access: PluginBinding,
    pub model_define: PluginBinding,
    pub model_evaluate: PluginBinding,
    pub status: PipelineStatus,
    pub failure_reason: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Pipeline {
    /// Builds a fresh pipeline from a validated draft
    pub fn from_draft(draft: PipelineDraft) -> Self {
        let now = chrono::Utc::now();

        Self {
            id: Uuid::new_v4(),
            name: draft.name,
            data_collect: draft.data_collect,
            data_access: draft.data_access,
            model_define: draft.model_define,
            model_evaluate: draft.model_evaluate,
            status: PipelineStatus::Created,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces name and all four plugin bindings at once
    ///
    /// The plugin set changed, so any previous installation no longer
    /// applies and the status goes back to `Created`.
    pub fn replace_with(&mut self, draft: PipelineDraft) {
        self.name = draft.name;
        self.data_collect = draft.data_collect;
        self.data_access = draft.data_access;
        self.model_define = draft.model_define;
        self.model_evaluate = draft.model_evaluate;
        self.status = PipelineStatus::Created;
        self.failure_reason = None;
        self.updated_at = chrono::Utc::now();
    }

    pub fn plugin(&self, role: PluginRole) -> &PluginBinding {
        match role {
            PluginRole::DataCollect => &self.data_collect,
            PluginRole::DataAccess => &self.data_access,
            PluginRole::ModelDefine => &self.model_define,
            PluginRole::ModelEvaluate => &self.model_evaluate,
        }
    }

    /// Derives one install spec per role, in role order
    pub fn install_specs(&self) -> Result<Vec<PluginInstallSpec>, String> {
        PluginRole::ALL
            .into_iter()
            .map(|role| {
                let binding = self.plugin(role);
                let package = PackageRef::parse(&binding.package)
                    .map_err(|e| format!("{}: {}", role, e))?;
                Ok(PluginInstallSpec {
                    role,
                    package,
                    params: binding.params_value(),
                })
            })
            .collect()
    }
}

/// A validated pipeline configuration, ready to be stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDraft {
    pub name: Option<String>,
    pub data_collect: PluginBinding,
    pub data_access: PluginBinding,
    pub model_define: PluginBinding,
    pub model_evaluate: PluginBinding,
}

/// Pipeline lifecycle
///
/// `Created -> Installing -> Installed -> Running -> Completed | Failed`.
/// Deletion removes the record rather than setting a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Created,
    Installing,
    Installed,
    Running,
    Completed,
    Failed,
}

impl PipelineStatus {
    /// Whether the plugins are linked and a run may start
    pub fn is_runnable(self) -> bool {
        matches!(
            self,
            PipelineStatus::Installed | PipelineStatus::Completed | PipelineStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStatus::Created => "created",
            PipelineStatus::Installing => "installing",
            PipelineStatus::Installed => "installed",
            PipelineStatus::Running => "running",
            PipelineStatus::Completed => "completed",
            PipelineStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(PipelineStatus::Created),
            "installing" => Ok(PipelineStatus::Installing),
            "installed" => Ok(PipelineStatus::Installed),
            "running" => Ok(PipelineStatus::Running),
            "completed" => Ok(PipelineStatus::Completed),
            "failed" => Ok(PipelineStatus::Failed),
            _ => Err(format!("unknown pipeline status '{}'", s)),
        }
    }
}

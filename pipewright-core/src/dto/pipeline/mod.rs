//! Pipeline DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::{Pipeline, PipelineStatus};
use crate::domain::plugin::PluginRole;

/// Pipeline configuration as submitted by users
///
/// Every field is optional at the serde level so that an incomplete config
/// reaches validation and is rejected with one aggregated message instead
/// of a deserializer error about the first missing field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<PluginsConfig>,
}

/// The `plugins` section of a pipeline config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_collect: Option<PluginConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_access: Option<PluginConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_define: Option<PluginConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_evaluate: Option<PluginConfig>,
}

impl PluginsConfig {
    pub fn get(&self, role: PluginRole) -> Option<&PluginConfig> {
        match role {
            PluginRole::DataCollect => self.data_collect.as_ref(),
            PluginRole::DataAccess => self.data_access.as_ref(),
            PluginRole::ModelDefine => self.model_define.as_ref(),
            PluginRole::ModelEvaluate => self.model_evaluate.as_ref(),
        }
    }

    pub fn get_mut(&mut self, role: PluginRole) -> &mut Option<PluginConfig> {
        match role {
            PluginRole::DataCollect => &mut self.data_collect,
            PluginRole::DataAccess => &mut self.data_access,
            PluginRole::ModelDefine => &mut self.model_define,
            PluginRole::ModelEvaluate => &mut self.model_evaluate,
        }
    }
}

/// One plugin entry of a pipeline config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl PluginConfig {
    pub fn new(package: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            package: Some(package.into()),
            params,
        }
    }
}

/// Body of `POST /api/pipeline`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePipeline {
    #[serde(default)]
    pub config: Option<PipelineConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Body of `PUT /api/pipeline/{id}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePipeline {
    #[serde(default)]
    pub config: Option<PipelineConfig>,
}

/// Pipeline as returned by the HTTP surface
///
/// Plugin bindings are flattened into `<role>` and `<role>Params` fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRecord {
    pub id: Uuid,
    pub name: Option<String>,
    pub data_collect: String,
    pub data_collect_params: String,
    pub data_access: String,
    pub data_access_params: String,
    pub model_define: String,
    pub model_define_params: String,
    pub model_evaluate: String,
    pub model_evaluate_params: String,
    pub status: PipelineStatus,
    pub failure_reason: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl PipelineRecord {
    /// Package bound to a role
    pub fn package(&self, role: PluginRole) -> &str {
        match role {
            PluginRole::DataCollect => &self.data_collect,
            PluginRole::DataAccess => &self.data_access,
            PluginRole::ModelDefine => &self.model_define,
            PluginRole::ModelEvaluate => &self.model_evaluate,
        }
    }

    /// Canonical params string bound to a role
    pub fn params(&self, role: PluginRole) -> &str {
        match role {
            PluginRole::DataCollect => &self.data_collect_params,
            PluginRole::DataAccess => &self.data_access_params,
            PluginRole::ModelDefine => &self.model_define_params,
            PluginRole::ModelEvaluate => &self.model_evaluate_params,
        }
    }
}

impl From<Pipeline> for PipelineRecord {
    fn from(pipeline: Pipeline) -> Self {
        Self {
            id: pipeline.id,
            name: pipeline.name,
            data_collect: pipeline.data_collect.package,
            data_collect_params: pipeline.data_collect.params,
            data_access: pipeline.data_access.package,
            data_access_params: pipeline.data_access.params,
            model_define: pipeline.model_define.package,
            model_define_params: pipeline.model_define.params,
            model_evaluate: pipeline.model_evaluate.package,
            model_evaluate_params: pipeline.model_evaluate.params,
            status: pipeline.status,
            failure_reason: pipeline.failure_reason,
            created_at: pipeline.created_at,
            updated_at: pipeline.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pipeline::PipelineDraft;
    use crate::domain::plugin::PluginBinding;

    #[test]
    fn test_config_deserializes_partial_input() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"plugins": {"dataCollect": {"package": "a"}, "datasetProcess": {"package": "x"}}}"#,
        )
        .unwrap();

        let plugins = config.plugins.unwrap();
        assert_eq!(
            plugins.get(PluginRole::DataCollect).unwrap().package.as_deref(),
            Some("a")
        );
        assert!(plugins.get(PluginRole::ModelEvaluate).is_none());

        let empty: CreatePipeline = serde_json::from_str("{}").unwrap();
        assert!(empty.config.is_none());
    }

    #[test]
    fn test_record_flattens_roles() {
        let bind = |p: &str| PluginBinding {
            package: p.to_string(),
            params: "{}".to_string(),
        };
        let pipeline = Pipeline::from_draft(PipelineDraft {
            name: Some("n".to_string()),
            data_collect: bind("a"),
            data_access: bind("b"),
            model_define: bind("c"),
            model_evaluate: bind("d"),
        });

        let value = serde_json::to_value(PipelineRecord::from(pipeline)).unwrap();
        assert_eq!(value["dataCollect"], "a");
        assert_eq!(value["dataCollectParams"], "{}");
        assert_eq!(value["modelEvaluate"], "d");
        assert_eq!(value["status"], "created");
        assert!(value.get("failureReason").is_some());
    }
}

//! In-memory pipeline store

use async_trait::async_trait;
use pipewright_core::domain::pipeline::{Pipeline, PipelineStatus};
use pipewright_core::dto::pipeline::PipelineConfig;
use pipewright_core::validation::validate_config;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{PipelineStore, StoreError, UniquenessPolicy};

/// Store keeping pipelines in insertion order
#[derive(Default)]
pub struct InMemoryPipelineStore {
    pipelines: RwLock<Vec<Pipeline>>,
    policy: UniquenessPolicy,
}

impl InMemoryPipelineStore {
    pub fn new(policy: UniquenessPolicy) -> Self {
        Self {
            pipelines: RwLock::new(Vec::new()),
            policy,
        }
    }

    fn check_name(
        &self,
        pipelines: &[Pipeline],
        name: Option<&str>,
        exclude: Option<Uuid>,
    ) -> Result<(), StoreError> {
        if self.policy == UniquenessPolicy::AllowDuplicates {
            return Ok(());
        }

        let Some(name) = name else {
            return Ok(());
        };

        let taken = pipelines
            .iter()
            .any(|p| Some(p.id) != exclude && p.name.as_deref() == Some(name));

        if taken {
            return Err(StoreError::name_taken(name));
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineStore for InMemoryPipelineStore {
    async fn create(
        &self,
        config: &PipelineConfig,
        name: Option<&str>,
    ) -> Result<Pipeline, StoreError> {
        let draft = validate_config(config, name)?;

        let mut pipelines = self.pipelines.write().await;
        self.check_name(&pipelines, draft.name.as_deref(), None)?;

        let pipeline = Pipeline::from_draft(draft);
        pipelines.push(pipeline.clone());
        Ok(pipeline)
    }

    async fn get(&self, id: Uuid) -> Result<Pipeline, StoreError> {
        self.pipelines
            .read()
            .await
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self) -> Result<Vec<Pipeline>, StoreError> {
        Ok(self.pipelines.read().await.clone())
    }

    async fn update(&self, id: Uuid, config: &PipelineConfig) -> Result<Pipeline, StoreError> {
        let mut pipelines = self.pipelines.write().await;

        let index = pipelines
            .iter()
            .position(|p| p.id == id)
            .ok_or(StoreError::NotFound(id))?;

        let draft = validate_config(config, None)?;
        self.check_name(&pipelines, draft.name.as_deref(), Some(id))?;

        let pipeline = &mut pipelines[index];
        pipeline.replace_with(draft);
        Ok(pipeline.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut pipelines = self.pipelines.write().await;
        let index = pipelines
            .iter()
            .position(|p| p.id == id)
            .ok_or(StoreError::NotFound(id))?;

        pipelines.remove(index);
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        self.pipelines.write().await.clear();
        Ok(())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: PipelineStatus,
        failure_reason: Option<String>,
    ) -> Result<Pipeline, StoreError> {
        let mut pipelines = self.pipelines.write().await;
        let pipeline = pipelines
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(StoreError::NotFound(id))?;

        pipeline.status = status;
        pipeline.failure_reason = failure_reason;
        pipeline.updated_at = chrono::Utc::now();
        Ok(pipeline.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipewright_core::domain::plugin::PluginRole;
    use pipewright_core::dto::pipeline::{PluginConfig, PluginsConfig};
    use serde_json::json;

    fn config(name: Option<&str>, collect: &str) -> PipelineConfig {
        PipelineConfig {
            name: name.map(str::to_string),
            plugins: Some(PluginsConfig {
                data_collect: Some(PluginConfig::new(collect, Some(json!({"b": 1, "a": 2})))),
                data_access: Some(PluginConfig::new("access", None)),
                model_define: Some(PluginConfig::new("define@1.0.0", None)),
                model_evaluate: Some(PluginConfig::new("evaluate", Some(json!(null)))),
            }),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryPipelineStore::default();
        let created = store
            .create(&config(Some("from-config"), "collect"), Some("override"))
            .await
            .unwrap();

        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(fetched.name.as_deref(), Some("override"));
        assert_eq!(fetched.plugin(PluginRole::DataCollect).params, r#"{"b":1,"a":2}"#);
        assert_eq!(fetched.plugin(PluginRole::ModelEvaluate).params, "{}");
        assert_eq!(fetched.status, PipelineStatus::Created);
    }

    #[tokio::test]
    async fn test_list_keeps_insertion_order() {
        let store = InMemoryPipelineStore::default();
        let first = store.create(&config(None, "one"), None).await.unwrap();
        let second = store.create(&config(None, "two"), None).await.unwrap();

        let ids: Vec<_> = store.list().await.unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_invalid_update_leaves_record_untouched() {
        let store = InMemoryPipelineStore::default();
        let created = store.create(&config(Some("a"), "collect"), None).await.unwrap();

        let mut invalid = config(Some("b"), "");
        invalid.plugins.as_mut().unwrap().model_define = None;
        let result = store.update(created.id, &invalid).await;
        assert!(matches!(result, Err(StoreError::Validation(_))));

        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(fetched.name.as_deref(), Some("a"));
        assert_eq!(fetched.data_collect.package, "collect");
    }

    #[tokio::test]
    async fn test_update_replaces_all_bindings() {
        let store = InMemoryPipelineStore::default();
        let created = store.create(&config(Some("a"), "collect"), None).await.unwrap();
        store
            .set_status(created.id, PipelineStatus::Installed, None)
            .await
            .unwrap();

        let updated = store
            .update(created.id, &config(Some("b"), "collect-v2"))
            .await
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.name.as_deref(), Some("b"));
        assert_eq!(updated.data_collect.package, "collect-v2");
        assert_eq!(updated.status, PipelineStatus::Created);
    }

    #[tokio::test]
    async fn test_unique_names_policy() {
        let store = InMemoryPipelineStore::new(UniquenessPolicy::UniqueNames);
        let first = store.create(&config(Some("same"), "a"), None).await.unwrap();

        let duplicate = store.create(&config(Some("same"), "b"), None).await;
        assert!(matches!(duplicate, Err(StoreError::Conflict(_))));

        // Renaming a pipeline to its own name is not a conflict
        assert!(store.update(first.id, &config(Some("same"), "c")).await.is_ok());

        let lenient = InMemoryPipelineStore::default();
        lenient.create(&config(Some("same"), "a"), None).await.unwrap();
        assert!(lenient.create(&config(Some("same"), "b"), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_and_delete_all() {
        let store = InMemoryPipelineStore::default();
        let created = store.create(&config(None, "a"), None).await.unwrap();

        store.delete(created.id).await.unwrap();
        assert!(matches!(store.get(created.id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete(created.id).await, Err(StoreError::NotFound(_))));

        store.create(&config(None, "b"), None).await.unwrap();
        store.delete_all().await.unwrap();
        store.delete_all().await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}

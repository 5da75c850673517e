//! HTTP surface tests
//!
//! Each test serves the router on an ephemeral port with the in-memory
//! store and runtime, then drives it through the client crate or raw
//! reqwest calls.

use pipewright_client::DaemonClient;
use pipewright_core::domain::pipeline::PipelineStatus;
use pipewright_core::domain::plugin::PluginRole;
use pipewright_core::domain::trace::{Trace, TraceKind, TraceState};
use pipewright_core::dto::pipeline::{CreatePipeline, PipelineConfig, UpdatePipeline};
use pipewright_daemon::api::create_router;
use pipewright_daemon::repository::InMemoryPipelineStore;
use pipewright_daemon::service::PipelineService;
use pipewright_runtime::{InMemoryRuntime, PluginRuntime};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(10);
const POLL: Duration = Duration::from_millis(20);

struct TestDaemon {
    base_url: String,
    client: DaemonClient,
    http: reqwest::Client,
}

impl TestDaemon {
    async fn spawn(runtime: InMemoryRuntime) -> Self {
        runtime.connect().await.expect("runtime connects");

        let store = Arc::new(InMemoryPipelineStore::default());
        let service = PipelineService::new(store, Arc::new(runtime));
        let app = create_router(service);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let base_url = format!("http://{}", addr);
        Self {
            client: DaemonClient::new(&base_url),
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn create(&self, config: PipelineConfig) -> Uuid {
        self.client
            .create_pipeline(CreatePipeline {
                config: Some(config),
                name: None,
            })
            .await
            .expect("pipeline created")
            .id
    }

    async fn wait(&self, trace_id: Uuid) -> Trace {
        self.client
            .wait_for_trace(trace_id, POLL, Some(WAIT))
            .await
            .expect("trace finishes")
    }
}

fn config(packages: [&str; 4]) -> PipelineConfig {
    serde_json::from_value(json!({
        "name": "churn",
        "plugins": {
            "dataCollect": {"package": packages[0], "params": {"url": "s3://bucket/raw", "limit": 10}},
            "dataAccess": {"package": packages[1]},
            "modelDefine": {"package": packages[2], "params": null},
            "modelEvaluate": {"package": packages[3], "params": {"metric": "accuracy"}}
        }
    }))
    .unwrap()
}

fn default_config() -> PipelineConfig {
    config([
        "text-collect",
        "csv-access",
        "bayes-define@1.0.0",
        "accuracy-evaluate",
    ])
}

// =============================================================================
// Pipeline Records
// =============================================================================

#[tokio::test]
async fn test_delete_all_twice_returns_no_content() {
    let daemon = TestDaemon::spawn(InMemoryRuntime::new()).await;
    daemon.create(default_config()).await;

    for _ in 0..2 {
        let response = daemon
            .http
            .delete(daemon.url("/api/pipeline"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);
    }

    assert!(daemon.client.list_pipelines().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_list_is_json_array() {
    let daemon = TestDaemon::spawn(InMemoryRuntime::new()).await;

    let response = daemon.http.get(daemon.url("/api/pipeline")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    assert_eq!(response.text().await.unwrap(), "[]");
}

#[tokio::test]
async fn test_unknown_and_malformed_ids_are_not_found() {
    let daemon = TestDaemon::spawn(InMemoryRuntime::new()).await;

    let err = daemon.client.get_pipeline(Uuid::new_v4()).await.unwrap_err();
    assert!(err.is_not_found());

    let response = daemon
        .http
        .get(daemon.url("/api/pipeline/not-a-uuid"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "not_found");

    let err = daemon.client.install_pipeline(Uuid::new_v4()).await.unwrap_err();
    assert!(err.is_not_found());
    let err = daemon.client.delete_pipeline(Uuid::new_v4()).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_create_requires_config() {
    let daemon = TestDaemon::spawn(InMemoryRuntime::new()).await;

    let response = daemon
        .http
        .post(daemon.url("/api/pipeline"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "validation");

    let response = daemon
        .http
        .post(daemon.url("/api/pipeline"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = daemon
        .http
        .post(daemon.url("/api/pipeline"))
        .json(&json!({"config": {"plugins": {"dataCollect": {"package": "text-collect"}}}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    assert!(daemon.client.list_pipelines().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_then_get_returns_same_record() {
    let daemon = TestDaemon::spawn(InMemoryRuntime::new()).await;

    let created = daemon
        .client
        .create_pipeline(CreatePipeline {
            config: Some(default_config()),
            name: None,
        })
        .await
        .unwrap();
    let fetched = daemon.client.get_pipeline(created.id).await.unwrap();

    assert_eq!(created, fetched);
    assert_eq!(fetched.name.as_deref(), Some("churn"));
    assert_eq!(fetched.status, PipelineStatus::Created);
    assert_eq!(fetched.package(PluginRole::ModelDefine), "bayes-define@1.0.0");
    assert_eq!(
        fetched.params(PluginRole::DataCollect),
        r#"{"url":"s3://bucket/raw","limit":10}"#
    );
    assert_eq!(fetched.params(PluginRole::DataAccess), "{}");
    assert_eq!(fetched.params(PluginRole::ModelDefine), "{}");
}

#[tokio::test]
async fn test_update_replaces_all_bindings() {
    let daemon = TestDaemon::spawn(InMemoryRuntime::new()).await;
    let id = daemon.create(default_config()).await;

    let updated = daemon
        .client
        .update_pipeline(
            id,
            UpdatePipeline {
                config: Some(config(["a-collect", "b-access", "c-define", "d-evaluate"])),
            },
        )
        .await
        .unwrap();

    let fetched = daemon.client.get_pipeline(id).await.unwrap();
    assert_eq!(updated, fetched);
    assert_eq!(fetched.package(PluginRole::DataCollect), "a-collect");
    assert_eq!(fetched.package(PluginRole::DataAccess), "b-access");
    assert_eq!(fetched.package(PluginRole::ModelDefine), "c-define");
    assert_eq!(fetched.package(PluginRole::ModelEvaluate), "d-evaluate");

    // An invalid update changes nothing
    let response = daemon
        .http
        .put(daemon.url(&format!("/api/pipeline/{}", id)))
        .json(&json!({"config": {"plugins": {"dataCollect": {"package": "x"}}}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(daemon.client.get_pipeline(id).await.unwrap(), fetched);
}

// =============================================================================
// Traces
// =============================================================================

#[tokio::test]
async fn test_cancel_unknown_trace_is_not_found() {
    let daemon = TestDaemon::spawn(InMemoryRuntime::new()).await;

    let err = daemon.client.cancel_trace(Uuid::new_v4()).await.unwrap_err();
    assert!(err.is_not_found());

    let response = daemon
        .http
        .delete(daemon.url("/api/pipeline/trace/bogus"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_back_to_back_installs_share_one_trace() {
    let runtime = InMemoryRuntime::new().with_step_delay(Duration::from_millis(50));
    let daemon = TestDaemon::spawn(runtime).await;
    let id = daemon.create(default_config()).await;

    let (first, second) = tokio::join!(
        daemon.client.install_pipeline(id),
        daemon.client.install_pipeline(id)
    );
    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.trace_id, second.trace_id);
    assert_eq!(first.kind, TraceKind::Install);

    let third = daemon.client.install_pipeline(id).await.unwrap();
    assert_eq!(third.trace_id, first.trace_id);

    let trace = daemon.wait(first.trace_id).await;
    assert_eq!(trace.state, TraceState::Success);
    assert_eq!(daemon.client.list_traces(id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_traces_unreachable_after_delete_all() {
    let runtime = InMemoryRuntime::new().with_step_delay(Duration::from_millis(200));
    let daemon = TestDaemon::spawn(runtime).await;
    let id = daemon.create(default_config()).await;

    let reference = daemon.client.install_pipeline(id).await.unwrap();
    daemon.client.delete_all_pipelines().await.unwrap();

    let err = daemon.client.get_trace(reference.trace_id).await.unwrap_err();
    assert!(err.is_not_found());
    let err = daemon.client.cancel_trace(reference.trace_id).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_install_then_run_end_to_end() {
    let daemon = TestDaemon::spawn(InMemoryRuntime::new()).await;
    let id = daemon.create(default_config()).await;

    let install = daemon.client.install_pipeline(id).await.unwrap();
    assert_eq!(install.pipeline_id, id);

    let trace = daemon.wait(install.trace_id).await;
    assert_eq!(trace.state, TraceState::Success);
    assert_eq!(trace.target_id, id);
    assert!(trace.finished_at.is_some());
    assert!(trace.log.iter().any(|e| e.message.contains("bayes-define")));
    assert_eq!(
        daemon.client.get_pipeline(id).await.unwrap().status,
        PipelineStatus::Installed
    );

    let run = daemon.client.run_pipeline(id).await.unwrap();
    assert_eq!(run.kind, TraceKind::Run);
    let trace = daemon.wait(run.trace_id).await;
    assert_eq!(trace.state, TraceState::Success);

    let pipeline = daemon.client.get_pipeline(id).await.unwrap();
    assert_eq!(pipeline.status, PipelineStatus::Completed);
    assert!(pipeline.failure_reason.is_none());

    let kinds: Vec<TraceKind> = daemon
        .client
        .list_traces(id)
        .await
        .unwrap()
        .iter()
        .map(|t| t.kind)
        .collect();
    assert_eq!(kinds, vec![TraceKind::Install, TraceKind::Run]);
}

#[tokio::test]
async fn test_run_requires_installation() {
    let daemon = TestDaemon::spawn(InMemoryRuntime::new()).await;
    let id = daemon.create(default_config()).await;

    let err = daemon.client.run_pipeline(id).await.unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_cancelled_install_reverts_status() {
    let runtime = InMemoryRuntime::new().with_step_delay(Duration::from_millis(200));
    let daemon = TestDaemon::spawn(runtime).await;
    let id = daemon.create(default_config()).await;

    let reference = daemon.client.install_pipeline(id).await.unwrap();
    assert_eq!(
        daemon.client.get_pipeline(id).await.unwrap().status,
        PipelineStatus::Installing
    );

    daemon.client.cancel_trace(reference.trace_id).await.unwrap();
    let trace = daemon.wait(reference.trace_id).await;
    assert_eq!(trace.state, TraceState::Cancelled);

    let pipeline = daemon.client.get_pipeline(id).await.unwrap();
    assert_eq!(pipeline.status, PipelineStatus::Created);
    assert!(pipeline.failure_reason.is_some());

    // A finished trace cannot be cancelled again
    let err = daemon.client.cancel_trace(reference.trace_id).await.unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_failed_install_keeps_record_intact() {
    let runtime = InMemoryRuntime::new().with_network_failure("csv-access");
    let daemon = TestDaemon::spawn(runtime).await;
    let id = daemon.create(default_config()).await;
    let before = daemon.client.get_pipeline(id).await.unwrap();

    let reference = daemon.client.install_pipeline(id).await.unwrap();
    let trace = daemon.wait(reference.trace_id).await;
    assert_eq!(trace.state, TraceState::Failed);
    assert!(trace.error.as_deref().unwrap_or_default().contains("csv-access"));

    let after = daemon.client.get_pipeline(id).await.unwrap();
    assert_eq!(after.status, PipelineStatus::Created);
    assert!(after.failure_reason.is_some());
    for role in PluginRole::ALL {
        assert_eq!(after.package(role), before.package(role));
        assert_eq!(after.params(role), before.params(role));
    }
}

#[tokio::test]
async fn test_package_reused_for_another_role_fails_install() {
    let daemon = TestDaemon::spawn(InMemoryRuntime::new()).await;
    let first = daemon
        .create(config(["shared-plugin", "csv-access", "bayes-define", "accuracy-evaluate"]))
        .await;
    let second = daemon
        .create(config(["text-collect", "csv-access", "shared-plugin", "accuracy-evaluate"]))
        .await;

    let install = daemon.client.install_pipeline(first).await.unwrap();
    assert_eq!(daemon.wait(install.trace_id).await.state, TraceState::Success);

    let install = daemon.client.install_pipeline(second).await.unwrap();
    let trace = daemon.wait(install.trace_id).await;
    assert_eq!(trace.state, TraceState::Failed);
    assert!(trace.error.as_deref().unwrap_or_default().contains("incompatible"));
    assert_eq!(
        daemon.client.get_pipeline(second).await.unwrap().status,
        PipelineStatus::Created
    );
}

#[tokio::test]
async fn test_create_install_update_delete_scenario() {
    let daemon = TestDaemon::spawn(InMemoryRuntime::new()).await;
    let pipeline_body = |collect: &str| {
        json!({
            "config": {
                "plugins": {
                    "dataCollect": {"package": collect, "params": {"path": "raw.csv", "rows": 100}},
                    "dataAccess": {"package": "pkgB", "params": {"split": 0.8}},
                    "modelDefine": {"package": "pkgC"},
                    "modelEvaluate": {"package": "pkgD", "params": {"metric": "f1"}}
                }
            }
        })
    };

    let response = daemon
        .http
        .post(daemon.url("/api/pipeline"))
        .json(&pipeline_body("pkgA"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let created: Value = response.json().await.unwrap();
    assert_eq!(created["dataCollect"], "pkgA");
    assert_eq!(created["dataCollectParams"], r#"{"path":"raw.csv","rows":100}"#);
    assert_eq!(created["dataAccess"], "pkgB");
    assert_eq!(created["modelDefine"], "pkgC");
    assert_eq!(created["modelDefineParams"], "{}");
    assert_eq!(created["modelEvaluate"], "pkgD");
    let id = created["id"].as_str().unwrap().to_string();

    let response = daemon
        .http
        .post(daemon.url(&format!("/api/pipeline/{}/installation", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let reference: Value = response.json().await.unwrap();
    assert_eq!(reference["pipelineId"], id.as_str());
    let trace_id = Uuid::parse_str(reference["traceId"].as_str().unwrap()).unwrap();
    let response = daemon
        .http
        .get(daemon.url(&format!("/api/pipeline/trace/{}", trace_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(daemon.wait(trace_id).await.state, TraceState::Success);

    let response = daemon
        .http
        .put(daemon.url(&format!("/api/pipeline/{}", id)))
        .json(&pipeline_body("pkgE"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let updated: Value = response.json().await.unwrap();
    assert_eq!(updated["id"], created["id"]);
    assert_eq!(updated["dataCollect"], "pkgE");
    for field in [
        "dataCollectParams",
        "dataAccess",
        "dataAccessParams",
        "modelDefine",
        "modelDefineParams",
        "modelEvaluate",
        "modelEvaluateParams",
    ] {
        assert_eq!(updated[field], created[field], "{} changed", field);
    }

    let fetched: Value = daemon
        .http
        .get(daemon.url(&format!("/api/pipeline/{}", id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["dataCollect"], "pkgE");
    assert_eq!(fetched["dataAccessParams"], created["dataAccessParams"]);

    let response = daemon
        .http
        .delete(daemon.url("/api/pipeline"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let response = daemon
        .http
        .get(daemon.url(&format!("/api/pipeline/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_health() {
    let daemon = TestDaemon::spawn(InMemoryRuntime::new()).await;
    assert!(daemon.client.health().await.unwrap());
}

//! Integration tests for the orchestrator pipeline
//!
//! These tests drive `execute` end-to-end against a mock inference
//! backend and verify the documented workflow scenarios: simple
//! pass-through, cross-domain decomposition, backend failure handling,
//! idempotence, explicit sequence chains, and cancellation.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use foreman_engine::conductor::{
    Domain, Environment, ExecuteOptions, Orchestrator, SubtaskState, WorkflowStatus,
};
use foreman_engine::config::Config;
use foreman_engine::inference::OllamaClient;
use foreman_engine::message_bus::EventKind;

fn test_config(dir: &TempDir, inference_host: &str) -> Config {
    let mut config = Config::default();
    config.core.data_dir = dir.path().to_path_buf();
    config.core.base_dir = dir.path().to_path_buf();
    config.inference.host = inference_host.to_string();
    config.inference.connect_timeout_secs = 2;
    config.inference.request_timeout_secs = 5;
    config
}

fn orchestrator(dir: &TempDir, inference_host: &str) -> Orchestrator {
    let config = test_config(dir, inference_host);
    let client = Arc::new(OllamaClient::new(&config.inference).unwrap());
    let env = Environment::from_config(config, client).unwrap();
    Orchestrator::new(env)
}

async fn mock_backend(content: &str) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                {"name": "qwen2.5:latest"},
                {"name": "qwen2.5-coder:latest"},
                {"name": "deepseek-r1:latest"},
                {"name": "llama3.2:3b"}
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "qwen2.5:latest",
            "message": {"role": "assistant", "content": content},
            "done": true
        })))
        .mount(&server)
        .await;

    server
}

async fn execute(
    orchestrator: &Orchestrator,
    text: &str,
    context: BTreeMap<String, String>,
) -> foreman_engine::conductor::WorkflowRecord {
    orchestrator
        .execute(text, context, ExecuteOptions::default(), CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_simple_task_single_subtask() {
    let backend = mock_backend("Hello! How can I help?").await;
    let dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&dir, &backend.uri());

    let record = execute(&orchestrator, "say hi", BTreeMap::new()).await;

    assert_eq!(record.status, WorkflowStatus::Ok);
    assert_eq!(record.results.len(), 1);
    assert_eq!(record.results[0].state, SubtaskState::Completed);
    assert!(!record.final_output.is_empty());
    assert_eq!(record.plan.stages.len(), 1);
}

#[tokio::test]
async fn test_complex_task_cross_domain_plan() {
    let backend = mock_backend("Step complete.").await;
    let dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&dir, &backend.uri());

    let record = execute(
        &orchestrator,
        "Build a REST API with authentication and deploy it to AWS",
        BTreeMap::new(),
    )
    .await;

    assert!(record.results.len() >= 4, "expected >= 4 subtasks");
    assert!(record.plan.stages.len() >= 2, "expected >= 2 stages");
    assert!(record.plan.can_parallelize);
    assert_eq!(record.status, WorkflowStatus::Ok);

    let domains: Vec<Domain> = record.results.iter().map(|r| r.domain).collect();
    assert!(domains.contains(&Domain::Development));
    assert!(domains.contains(&Domain::Devops));
}

#[tokio::test]
async fn test_unreachable_backend_yields_partial_record() {
    // Nothing listens on port 9; the connection is refused immediately.
    let dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&dir, "http://127.0.0.1:9");

    let record = execute(&orchestrator, "say hi", BTreeMap::new()).await;

    assert_eq!(record.status, WorkflowStatus::Partial);
    assert_eq!(record.results.len(), 1);
    assert_eq!(record.results[0].state, SubtaskState::Failed);

    let reason = record.results[0].failure.as_deref().unwrap();
    assert!(
        reason.contains("InferenceUnreachable"),
        "unexpected failure reason: {}",
        reason
    );
}

#[tokio::test]
async fn test_idempotent_execution_per_task_id() {
    let backend = mock_backend("done").await;
    let dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&dir, &backend.uri());

    let mut context = BTreeMap::new();
    context.insert("task_id".to_string(), "task-fixed".to_string());

    let first = execute(&orchestrator, "say hi", context.clone()).await;
    let second = execute(&orchestrator, "say hi", context).await;

    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );

    // Only one workflow record was ever written.
    assert_eq!(orchestrator.env().workflows.len(), 1);
}

#[tokio::test]
async fn test_sequence_chain_runs_in_five_stages() {
    let backend = mock_backend("segment finished").await;
    let dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&dir, &backend.uri());

    let record = execute(
        &orchestrator,
        "A and then B and then C and then D and then E",
        BTreeMap::new(),
    )
    .await;

    assert_eq!(record.results.len(), 5);
    assert_eq!(record.plan.stages.len(), 5);
    assert!(record.plan.stages.iter().all(|s| s.len() == 1));
    assert!(!record.plan.can_parallelize);
    assert_eq!(record.plan.critical_path.len(), 5);
    assert!((record.plan.critical_path_length - 5.0).abs() < 1e-9);
    assert_eq!(record.status, WorkflowStatus::Ok);
}

#[tokio::test]
async fn test_cancelled_before_dispatch() {
    let backend = mock_backend("never used").await;
    let dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&dir, &backend.uri());

    let cancel = CancellationToken::new();
    cancel.cancel();

    let record = orchestrator
        .execute("say hi", BTreeMap::new(), ExecuteOptions::default(), cancel)
        .await
        .unwrap();

    assert_eq!(record.status, WorkflowStatus::Cancelled);
    assert!(record
        .results
        .iter()
        .all(|r| r.state == SubtaskState::Failed));
}

#[tokio::test]
async fn test_events_published_in_lifecycle_order() {
    let backend = mock_backend("hello").await;
    let dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&dir, &backend.uri());

    let subscription = orchestrator.env().bus.subscribe_all();

    execute(&orchestrator, "say hi", BTreeMap::new()).await;

    let mut kinds = Vec::new();
    while let Some(event) = subscription.try_recv() {
        kinds.push(event.kind());
    }

    assert_eq!(kinds.first(), Some(&EventKind::TaskStarted));
    assert_eq!(kinds.last(), Some(&EventKind::TaskFinished));
    assert!(kinds.contains(&EventKind::SubtaskAssigned));
    assert!(kinds.contains(&EventKind::SubtaskStarted));
    assert!(kinds.contains(&EventKind::SubtaskCompleted));
    assert!(kinds.contains(&EventKind::PersonaCreated));

    let started = kinds.iter().position(|k| *k == EventKind::SubtaskStarted);
    let completed = kinds.iter().position(|k| *k == EventKind::SubtaskCompleted);
    assert!(started < completed);
}

#[tokio::test]
async fn test_upstream_failure_skips_dependents() {
    // First chat call fails, the rest would succeed; with a sequential
    // chain the remaining segments must be skipped, not executed.
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model exploded"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&dir, &server.uri());

    let record = execute(&orchestrator, "A and then B and then C", BTreeMap::new()).await;

    assert_eq!(record.status, WorkflowStatus::Partial);
    assert_eq!(record.results.len(), 3);
    assert!(record.results.iter().all(|r| r.state == SubtaskState::Failed));

    // The first subtask failed on the backend; the rest were skipped.
    let first_reason = record.results[0].failure.as_deref().unwrap();
    assert!(first_reason.contains("InferenceBackend"));

    for result in &record.results[1..] {
        let reason = result.failure.as_deref().unwrap();
        assert!(
            reason.contains("upstream failure"),
            "expected an upstream skip, got: {}",
            reason
        );
    }

    assert!(record.final_output.contains("Skipped due to upstream failures"));
}

#[tokio::test]
async fn test_personas_are_reused_across_workflows() {
    let backend = mock_backend("fine").await;
    let dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&dir, &backend.uri());

    execute(&orchestrator, "say hi", BTreeMap::new()).await;
    let after_first = orchestrator.env().personas.len();

    execute(&orchestrator, "say hello again", BTreeMap::new()).await;
    let after_second = orchestrator.env().personas.len();

    assert!(after_first >= 1);
    // The generalist persona matched and was reused, not regenerated.
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn test_feedback_loop_updates_scores() {
    let backend = mock_backend("useful output with sections").await;
    let dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&dir, &backend.uri());

    execute(&orchestrator, "say hi", BTreeMap::new()).await;

    let performance = orchestrator.env().optimizer.performance();
    assert_eq!(performance.len(), 1);
    assert_eq!(performance[0].uses, 1);
    assert!(performance[0].score > 0.0);

    let personas = orchestrator.env().personas.list();
    assert_eq!(personas[0].uses, 1);
    assert!(personas[0].last_used.is_some());
}

//! HTTP Front-end
//!
//! The request-scoped surface that fronts the orchestration pipeline.
//! All endpoints live under `/api`, every response is JSON, and the
//! streaming chat endpoint uses `text/event-stream` semantics with one
//! JSON object per chunk.
//!
//! Domain failures inside a workflow still answer 200 with a record that
//! describes what went wrong; only malformed requests and infrastructure
//! failures produce non-2xx responses.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{request::Parts, HeaderValue, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::conductor::{AggregateFormat, ExecuteOptions, Orchestrator};
use crate::errors::EngineError;
use crate::inference::{GenerationOptions, TaskClass};
use crate::memory::ConversationTurn;

pub mod validate;

/// Shared handler state
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// JSON error envelope with the taxonomy's machine code
struct ApiError(EngineError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::Decomposition(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::InferenceTimeout
            | EngineError::InferenceUnreachable(_)
            | EngineError::InferenceBackend(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        });

        (status, Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

/// Build the `/api` router with the CORS policy applied
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            |origin: &HeaderValue, _parts: &Parts| {
                origin
                    .to_str()
                    .map(validate::origin_allowed)
                    .unwrap_or(false)
            },
        ))
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/task", post(run_task))
        .route("/api/stream/chat", post(stream_chat))
        .route("/api/conversation/history", get(conversation_history))
        .route("/api/stats", get(stats))
        .route("/api/personas", get(personas))
        .route("/api/progress", get(progress))
        .route("/api/models", get(models))
        .route("/api/workflows", get(workflows))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until the shutdown token fires
///
/// Bind failures surface as the returned `io::Error`; the caller maps
/// them onto the bind-error exit code.
pub async fn serve(
    state: Arc<AppState>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP front-end listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

// ---------------------------------------------------------------------------
// Handlers

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let reachable = state.orchestrator.env().client.check_health().await;

    Json(json!({
        "status": "ok",
        "backend": if reachable { "reachable" } else { "unreachable" },
        "timestamp": Utc::now(),
    }))
}

#[derive(Debug, Deserialize)]
struct TaskRequest {
    task: String,

    #[serde(default)]
    context: BTreeMap<String, String>,

    /// `false` runs the task as a single subtask without decomposition
    use_orchestrator: Option<bool>,

    /// Aggregation format: summary, detailed, json
    format: Option<String>,

    session_id: Option<String>,
}

async fn run_task(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TaskRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate::validate_text("task", &request.task)?;

    let base_dir = &state.orchestrator.env().config.core.base_dir;
    validate::validate_context(&request.context, base_dir)?;

    if let Some(session) = &request.session_id {
        validate::validate_text("session_id", session)?;
    }

    let format = match &request.format {
        Some(format) => AggregateFormat::parse(format)?,
        None => AggregateFormat::default(),
    };

    let options = ExecuteOptions {
        format,
        force_simple: request.use_orchestrator == Some(false),
        session_id: request.session_id.clone(),
    };

    let record = state
        .orchestrator
        .execute(&request.task, request.context, options, CancellationToken::new())
        .await?;

    Ok(Json(serde_json::to_value(record).map_err(|e| {
        EngineError::Validation(format!("record serialization failed: {}", e))
    })?))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    session_id: Option<String>,
}

/// Single-turn streaming chat
///
/// Emits `{delta}` chunks as the model produces text, terminated by a
/// `{done, final}` chunk. The turn pair is recorded in the session's
/// short-term memory.
async fn stream_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, std::convert::Infallible>>>, ApiError> {
    validate::validate_text("message", &request.message)?;
    let session = request.session_id.unwrap_or_else(|| "default".to_string());
    validate::validate_text("session_id", &session)?;

    let env = state.orchestrator.env();
    let sessions = env.sessions.clone();
    let client = env.client.clone();

    sessions.append(&session, ConversationTurn::user(&request.message));

    let stream = async_stream::stream! {
        let history = sessions.messages(&session);

        let mut tokens = match client
            .chat_stream(TaskClass::Conversation, &history, &GenerationOptions::default())
            .await
        {
            Ok(tokens) => tokens,
            Err(e) => {
                yield Ok(SseEvent::default()
                    .json_data(json!({"error": e.to_string(), "code": e.code(), "done": true}))
                    .unwrap());
                return;
            }
        };

        let mut full = String::new();
        while let Some(chunk) = tokens.next().await {
            match chunk {
                Ok(delta) => {
                    full.push_str(&delta);
                    yield Ok(SseEvent::default()
                        .json_data(json!({"delta": delta}))
                        .unwrap());
                }
                Err(e) => {
                    yield Ok(SseEvent::default()
                        .json_data(json!({"error": e.to_string(), "code": e.code()}))
                        .unwrap());
                    break;
                }
            }
        }

        sessions.append(&session, ConversationTurn::assistant(&full));

        yield Ok(SseEvent::default()
            .json_data(json!({"done": true, "final": full}))
            .unwrap());
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session: String,
}

async fn conversation_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate::validate_text("session", &query.session)?;

    let turns = state.orchestrator.env().sessions.turns(&query.session);
    Ok(Json(json!({
        "session": query.session,
        "turns": turns,
    })))
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let env = state.orchestrator.env();

    Json(json!({
        "personas": env.personas.stats(),
        "persona_performance": env.optimizer.performance(),
        "workflows": {
            "completed_in_memory": env.workflows.len(),
        },
        "bus": env.bus.stats(),
    }))
}

async fn personas(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let listed: Vec<serde_json::Value> = state
        .orchestrator
        .env()
        .personas
        .list()
        .into_iter()
        .map(|p| {
            json!({
                "id": p.id,
                "role": p.dna.role,
                "seniority": p.dna.seniority,
                "domain": p.dna.domain,
                "score": p.score,
                "uses": p.uses,
            })
        })
        .collect();

    Json(json!(listed))
}

#[derive(Debug, Deserialize)]
struct ProgressQuery {
    task: Option<String>,
}

async fn progress(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProgressQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let env = state.orchestrator.env();

    let snapshots: Vec<_> = match &query.task {
        Some(task_id) => env.tracker.snapshot(task_id).into_iter().collect(),
        None => {
            let mut ids = env.tracker.task_ids();
            ids.sort();
            ids.iter().filter_map(|id| env.tracker.snapshot(id)).collect()
        }
    };

    Ok(Json(json!({
        "tasks": snapshots,
        "bus": env.bus.stats(),
    })))
}

async fn models(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let models = state.orchestrator.env().client.list_models().await?;
    Ok(Json(json!({ "models": models })))
}

#[derive(Debug, Deserialize)]
struct WorkflowQuery {
    #[serde(default)]
    query: String,
    limit: Option<usize>,
}

async fn workflows(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WorkflowQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !query.query.is_empty() {
        validate::validate_text("query", &query.query)?;
    }

    let limit = query.limit.unwrap_or(20).min(100);
    let records = state.orchestrator.env().workflows.search(&query.query, limit);

    Ok(Json(json!({ "workflows": records })))
}

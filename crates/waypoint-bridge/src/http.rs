//! HTTP surface: health, the SSE event stream, and run submission.

use crate::hub::BridgeHub;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;
use waypoint_contract::{AgentRunResult, JsonMap, TaskNode, TaskStatus};
use waypoint_runtime::AgentRuntime;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (code, body).into_response()
    }
}

/// The run task itself fell over: a collaborator panicked or the task was
/// torn down. Distinct from agent-level failures, which the machine absorbs
/// and reports inside `AgentRunResult`.
#[derive(Debug, thiserror::Error)]
#[error("agent run failed: {0}")]
pub struct RunError(pub String);

/// Serialises agent runs: at most one run is in progress per process, and
/// a second submission waits for the first to finish.
pub struct RunGate {
    runtime: AgentRuntime,
    lock: tokio::sync::Mutex<()>,
}

impl RunGate {
    pub fn new(runtime: AgentRuntime) -> Self {
        Self {
            runtime,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Run one agent end to end. The run executes on its own task so that a
    /// panicking collaborator surfaces as a [`RunError`] rather than tearing
    /// down the connection handler.
    pub async fn run(
        &self,
        root_task: TaskNode,
        metadata: JsonMap,
    ) -> Result<AgentRunResult, RunError> {
        let _serial = self.lock.lock().await;
        let runtime = self.runtime.clone();
        let handle = tokio::spawn(async move { runtime.run_task(root_task, metadata).await });
        handle.await.map_err(|e| match e.try_into_panic() {
            Ok(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "run panicked".to_string());
                RunError(message)
            }
            Err(e) => RunError(e.to_string()),
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<BridgeHub>,
    pub gate: Arc<RunGate>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/events", get(events))
        .route("/run", post(run))
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Open the event stream: full snapshot history, then full event history,
/// then live frames until the client disconnects (which detaches it).
async fn events(State(st): State<AppState>) -> Response {
    let (replay, mut rx) = st.hub.attach();
    let stream = async_stream::stream! {
        for frame in replay {
            yield Ok::<Bytes, Infallible>(frame);
        }
        while let Some(frame) = rx.recv().await {
            yield Ok::<Bytes, Infallible>(frame);
        }
    };
    sse_response(stream)
}

/// Root-task spec accepted by `/run`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootTaskSpec {
    #[serde(default)]
    pub task_id: Option<String>,
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub metadata: JsonMap,
}

impl RootTaskSpec {
    fn into_node(self) -> TaskNode {
        let task_id = self
            .task_id
            .unwrap_or_else(|| format!("t-{}", Uuid::new_v4().simple()));
        let mut node = TaskNode::new(task_id, self.description).with_status(self.status);
        node.parent_id = self.parent_id;
        node.children = self.children;
        node.metadata = self.metadata;
        node
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub root_task: RootTaskSpec,
    #[serde(default)]
    pub metadata: JsonMap,
}

async fn run(
    State(st): State<AppState>,
    Json(req): Json<RunRequest>,
) -> Result<Json<AgentRunResult>, ApiError> {
    if req.root_task.description.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "rootTask.description cannot be empty".to_string(),
        ));
    }
    let result = st
        .gate
        .run(req.root_task.into_node(), req.metadata)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(result))
}

fn sse_response<S>(stream: S) -> Response
where
    S: futures::Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    (headers, Body::from_stream(stream)).into_response()
}

//! HTTP intake handlers.
//!
//! The intake path is storage-only: every handler does exactly one store
//! operation and returns. No network I/O, no LLM calls — the workers pick the
//! rows up later. Field names mirror the hook payloads verbatim, which is
//! why the casing is mixed.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use mem_procs::ScanReport;
use mem_store::queue::{NewToolEvent, QueueStats};
use mem_store::summary_queue::NewSummaryRequest;
use mem_store::StoreError;

use crate::server::AppState;

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Validation(message) => {
                warn!(%message, "rejected intake request");
                (StatusCode::BAD_REQUEST, message)
            }
            Self::Store(StoreError::DuplicateSummaryPending(session)) => (
                StatusCode::CONFLICT,
                format!("a summary request is already pending for session {session}"),
            ),
            Self::Store(StoreError::NotFound(what)) => {
                (StatusCode::NOT_FOUND, format!("not found: {what}"))
            }
            Self::Store(err) => {
                error!(error = %err, "storage failure on intake path");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage unavailable".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct InitSessionBody {
    #[serde(rename = "contentSessionId")]
    pub content_session_id: String,
    pub project: String,
    /// First user prompt; accepted for hook compatibility, not stored.
    #[serde(default)]
    #[allow(dead_code)]
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InitSessionResponse {
    #[serde(rename = "sessionDbId")]
    pub session_db_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ObservationBody {
    #[serde(rename = "sessionDbId")]
    pub session_db_id: i64,
    #[serde(rename = "contentSessionId")]
    pub content_session_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,
    #[serde(default)]
    pub tool_response: serde_json::Value,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub prompt_number: i64,
    #[serde(default)]
    pub project: String,
}

#[derive(Debug, Deserialize)]
pub struct SummaryBody {
    #[serde(rename = "sessionDbId")]
    pub session_db_id: i64,
    #[serde(rename = "contentSessionId")]
    pub content_session_id: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub user_prompt: String,
    #[serde(default)]
    pub last_assistant_message: String,
    #[serde(default)]
    pub memory_session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub id: i64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub events: QueueStats,
    pub summaries: QueueStats,
    pub tracked_processes: usize,
    pub orphan_scan: ScanReport,
}

/// POST /api/sessions/init
pub async fn init_session(
    State(state): State<AppState>,
    Json(body): Json<InitSessionBody>,
) -> Result<Json<InitSessionResponse>, ApiError> {
    if body.content_session_id.is_empty() {
        return Err(ApiError::Validation("contentSessionId is required".into()));
    }
    let session = state
        .sessions
        .init_session(&body.content_session_id, &body.project)?;
    Ok(Json(InitSessionResponse {
        session_db_id: session.session_db_id,
    }))
}

/// POST /api/sessions/observations
pub async fn insert_observation(
    State(state): State<AppState>,
    Json(body): Json<ObservationBody>,
) -> Result<Json<QueuedResponse>, ApiError> {
    if body.tool_name.is_empty() {
        return Err(ApiError::Validation("tool_name is required".into()));
    }
    if body.content_session_id.is_empty() {
        return Err(ApiError::Validation("contentSessionId is required".into()));
    }

    let id = state.events.insert_raw(&NewToolEvent {
        session_db_id: body.session_db_id,
        content_session_id: body.content_session_id,
        tool_name: body.tool_name,
        tool_input: body.tool_input.to_string(),
        tool_response: body.tool_response.to_string(),
        cwd: body.cwd,
        prompt_number: body.prompt_number,
        project: body.project,
    })?;
    Ok(Json(QueuedResponse { id }))
}

/// POST /api/sessions/summary
pub async fn insert_summary(
    State(state): State<AppState>,
    Json(body): Json<SummaryBody>,
) -> Result<Json<QueuedResponse>, ApiError> {
    if body.content_session_id.is_empty() {
        return Err(ApiError::Validation("contentSessionId is required".into()));
    }

    let id = state.summaries.insert_raw(&NewSummaryRequest {
        session_db_id: body.session_db_id,
        content_session_id: body.content_session_id,
        memory_session_id: body.memory_session_id,
        project: body.project,
        user_prompt: body.user_prompt,
        last_assistant_message: body.last_assistant_message,
    })?;
    Ok(Json(QueuedResponse { id }))
}

/// GET /api/stats
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    Ok(Json(StatsResponse {
        events: state.events.stats()?,
        summaries: state.summaries.stats()?,
        tracked_processes: state.tracker.len(),
        orphan_scan: state
            .reaper
            .as_ref()
            .map(|reaper| reaper.last_report())
            .unwrap_or_default(),
    }))
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

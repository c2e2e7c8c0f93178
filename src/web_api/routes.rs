//! API Routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::event_log::EventInput;
use crate::evidence::CaptureOutcome;
use crate::models::ApiResponse;
use crate::state::AppState;
use crate::stream_session::ModelConfig;
use crate::violation::ViolationStatus;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Events (inference result ingestion)
        .route("/api/events", post(ingest_event))
        .route("/api/events/recent", get(recent_events))
        // Violations
        .route("/api/violations", get(list_violations))
        .route("/api/violations/:id", get(get_violation))
        .route("/api/violations/:id/transition", post(transition_violation))
        .route("/api/violations/:id/snapshot", post(create_snapshot))
        .route("/api/violations/:id/video", post(get_or_create_video))
        .route("/api/violations/:id/evidence", get(list_evidence))
        // Stream sessions
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/start", post(start_session))
        .route("/api/sessions/stop", post(stop_session))
        .with_state(state)
}

// ========================================
// Event Handlers
// ========================================

/// Ingest acknowledgement: the event id plus its violation link, if any
#[derive(Debug, Serialize)]
struct IngestResponse {
    id: i64,
    violation_id: Option<i64>,
}

async fn ingest_event(
    State(state): State<AppState>,
    Json(input): Json<EventInput>,
) -> impl IntoResponse {
    match state.ingest.ingest(input).await {
        Ok(event) => (
            StatusCode::CREATED,
            Json(ApiResponse::success(IngestResponse {
                id: event.id,
                violation_id: event.violation_id,
            })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    50
}

async fn recent_events(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> impl IntoResponse {
    match state.events.recent(query.limit).await {
        Ok(events) => Json(ApiResponse::success(events)).into_response(),
        Err(e) => e.into_response(),
    }
}

// ========================================
// Violation Handlers
// ========================================

#[derive(Debug, Deserialize)]
struct ViolationListQuery {
    status: Option<ViolationStatus>,
    device_id: Option<i64>,
    #[serde(default = "default_limit")]
    limit: u32,
}

async fn list_violations(
    State(state): State<AppState>,
    Query(query): Query<ViolationListQuery>,
) -> impl IntoResponse {
    match state
        .violations
        .list(query.status, query.device_id, query.limit)
        .await
    {
        Ok(violations) => Json(ApiResponse::success(violations)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_violation(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.violations.get(id).await {
        Ok(Some(violation)) => Json(ApiResponse::success(violation)).into_response(),
        Ok(None) => crate::error::Error::NotFound(format!("violation {id}")).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct TransitionRequest {
    status: ViolationStatus,
    reviewed_by: Option<String>,
    notes: Option<String>,
}

async fn transition_violation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<TransitionRequest>,
) -> impl IntoResponse {
    match state
        .state_machine
        .transition(id, req.status, req.reviewed_by.as_deref(), req.notes.as_deref())
        .await
    {
        Ok(violation) => Json(ApiResponse::success(violation)).into_response(),
        Err(e) => e.into_response(),
    }
}

// ========================================
// Evidence Handlers
// ========================================

#[derive(Debug, Deserialize, Default)]
struct SnapshotRequest {
    created_by: Option<String>,
}

/// Explicit operator request: capture failures ARE surfaced here, unlike
/// the automatic trigger inside ingestion.
async fn create_snapshot(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    req: Option<Json<SnapshotRequest>>,
) -> impl IntoResponse {
    let created_by = req
        .and_then(|Json(r)| r.created_by)
        .unwrap_or_else(|| "operator".to_string());

    match state.evidence.create_snapshot(id, &created_by).await {
        Ok(outcome) => capture_response(outcome),
        Err(e) => e.into_response(),
    }
}

async fn get_or_create_video(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.evidence.get_or_create_video(id).await {
        Ok(outcome) => capture_response(outcome),
        Err(e) => e.into_response(),
    }
}

/// 201 for a newly claimed slot, 200 for the idempotent replay
fn capture_response(outcome: CaptureOutcome) -> axum::response::Response {
    let status = if outcome.is_new() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    (status, Json(ApiResponse::success(outcome.into_evidence()))).into_response()
}

async fn list_evidence(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.evidence.list_for_violation(id).await {
        Ok(rows) => Json(ApiResponse::success(rows)).into_response(),
        Err(e) => e.into_response(),
    }
}

// ========================================
// Stream Session Handlers
// ========================================

#[derive(Debug, Deserialize)]
struct StartSessionRequest {
    device_external_id: String,
    model_id: String,
    model_version: String,
    inference_params: Option<serde_json::Value>,
}

async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> impl IntoResponse {
    let device = match state.devices.resolve_or_stub(&req.device_external_id).await {
        Ok(device) => device,
        Err(e) => return e.into_response(),
    };

    let config = ModelConfig {
        model_id: req.model_id,
        model_version: req.model_version,
        inference_params: req.inference_params,
    };

    match state.sessions.start(&device, config).await {
        Ok(session) => (StatusCode::CREATED, Json(ApiResponse::success(session))).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct StopSessionRequest {
    device_external_id: String,
}

async fn stop_session(
    State(state): State<AppState>,
    Json(req): Json<StopSessionRequest>,
) -> impl IntoResponse {
    let device = match state.devices.get_by_external_id(&req.device_external_id).await {
        Ok(Some(device)) => device,
        Ok(None) => {
            return crate::error::Error::NotFound(format!(
                "device {}",
                req.device_external_id
            ))
            .into_response()
        }
        Err(e) => return e.into_response(),
    };

    match state.sessions.stop(&device).await {
        // None is success: nothing was live.
        Ok(session) => Json(ApiResponse::success(session)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct SessionListQuery {
    device_id: Option<i64>,
    #[serde(default = "default_limit")]
    limit: u32,
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionListQuery>,
) -> impl IntoResponse {
    match state
        .sessions
        .repository()
        .list(query.device_id, query.limit)
        .await
    {
        Ok(sessions) => Json(ApiResponse::success(sessions)).into_response(),
        Err(e) => e.into_response(),
    }
}

//! Operator-facing HTTP surface
//!
//! Thin handlers over the services; no business logic here.

pub mod routes;

pub use routes::create_router;

use axum::{extract::State, response::IntoResponse, Json};

use crate::models::HealthResponse;
use crate::state::AppState;

/// Liveness + dependency probe
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_connected = sqlx::query("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .is_ok();
    let video_service_connected = state.video.health_check().await;

    Json(HealthResponse {
        status: if db_connected { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        db_connected,
        video_service_connected,
    })
}

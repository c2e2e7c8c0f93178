//! Error handling for visionguard
//!
//! One taxonomy for the whole crate; the swallow-vs-surface decisions live
//! at the call sites. External video-service failures carry their own typed
//! family and are wrapped here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::video_service::VideoServiceError;
use crate::violation::ViolationStatus;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found (device/session/violation/evidence)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error (malformed event input)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Illegal violation status transition
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: ViolationStatus,
        to: ViolationStatus,
    },

    /// Transition attempted on a terminal violation
    #[error("Violation is in terminal state: {status}")]
    TerminalState { status: ViolationStatus },

    /// Reopen refused: another open violation holds the window
    #[error("Window conflict: {0}")]
    WindowConflict(String),

    /// No live stream session for the device
    #[error("No active stream: {0}")]
    NoActiveStream(String),

    /// External video service failure
    #[error("Video service error: {0}")]
    VideoService(#[from] VideoServiceError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLx database error
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::InvalidTransition { .. } => {
                (StatusCode::CONFLICT, "INVALID_TRANSITION", self.to_string())
            }
            Error::TerminalState { .. } => {
                (StatusCode::CONFLICT, "TERMINAL_STATE", self.to_string())
            }
            Error::WindowConflict(msg) => (StatusCode::CONFLICT, "WINDOW_CONFLICT", msg.clone()),
            Error::NoActiveStream(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "NO_ACTIVE_STREAM",
                msg.clone(),
            ),
            // "stream not live" is a service-unavailable condition; everything
            // else from the video service is an upstream failure.
            Error::VideoService(VideoServiceError::StreamNotLive(msg)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "STREAM_NOT_LIVE",
                msg.clone(),
            ),
            Error::VideoService(e) => (
                StatusCode::BAD_GATEWAY,
                "VIDEO_SERVICE_ERROR",
                e.to_string(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Sqlx(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                e.to_string(),
            ),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}

//! StreamSessionLifecycle - inference session tracking
//!
//! ## Responsibilities
//!
//! - Track start/stop of the inference session per device
//! - Supply the live stream handle evidence capture needs
//! - Enforce at-most-one-live-session-per-device
//!
//! The media-plane action is delegated to the external video service; the
//! local state transition commits only after that call succeeds. For stop,
//! "already stopped upstream" counts as success.

mod repository;

pub use repository::StreamSessionRepository;

use crate::device_registry::Device;
use crate::error::{Error, Result};
use crate::video_service::{VideoService, VideoServiceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stream session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    Live,
    Stopping,
    Stopped,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Starting => "starting",
            SessionState::Live => "live",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
            SessionState::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "starting" => Some(SessionState::Starting),
            "live" => Some(SessionState::Live),
            "stopping" => Some(SessionState::Stopping),
            "stopped" => Some(SessionState::Stopped),
            "error" => Some(SessionState::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model configuration for a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_id: String,
    pub model_version: String,
    #[serde(default)]
    pub inference_params: Option<serde_json::Value>,
}

/// Persisted stream session (matches stream_sessions table)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSession {
    pub id: i64,
    pub device_id: i64,
    pub model_id: String,
    pub model_version: String,
    pub inference_params: Option<serde_json::Value>,
    pub state: SessionState,
    pub stream_handle: Option<String>,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub frames_processed: i64,
    pub events_emitted: i64,
    pub error_message: Option<String>,
}

/// StreamSessionLifecycle instance
pub struct StreamSessionLifecycle {
    repo: StreamSessionRepository,
    video: Arc<dyn VideoService>,
}

impl StreamSessionLifecycle {
    pub fn new(repo: StreamSessionRepository, video: Arc<dyn VideoService>) -> Self {
        Self { repo, video }
    }

    pub fn repository(&self) -> &StreamSessionRepository {
        &self.repo
    }

    /// Start a session for the device. Idempotent: an existing live session
    /// is returned unchanged.
    pub async fn start(&self, device: &Device, config: ModelConfig) -> Result<StreamSession> {
        if let Some(existing) = self.repo.find_live(device.id).await? {
            tracing::debug!(
                device_id = device.id,
                session_id = existing.id,
                "Live session already exists, returning it"
            );
            return Ok(existing);
        }

        let session = self.repo.insert_starting(device.id, &config).await?;

        match self.video.start_stream(&device.external_id).await {
            Ok(handle) => match self.repo.mark_live(session.id, &handle).await {
                Ok(live) => {
                    tracing::info!(
                        device_id = device.id,
                        session_id = live.id,
                        stream_handle = %handle,
                        "Stream session live"
                    );
                    Ok(live)
                }
                // Lost the live-uniqueness race to a concurrent start; the
                // winner's session is the truth.
                Err(Error::Sqlx(e))
                    if e.as_database_error()
                        .is_some_and(|db| db.is_unique_violation()) =>
                {
                    self.repo
                        .mark_error(session.id, "lost live-session race")
                        .await?;
                    self.repo.find_live(device.id).await?.ok_or_else(|| {
                        Error::Internal(format!(
                            "live session for device {} vanished after race",
                            device.id
                        ))
                    })
                }
                Err(e) => Err(e),
            },
            Err(e) => {
                self.repo.mark_error(session.id, &e.to_string()).await?;
                tracing::warn!(
                    device_id = device.id,
                    session_id = session.id,
                    error = %e,
                    "Stream start failed upstream"
                );
                Err(e.into())
            }
        }
    }

    /// Stop the device's live session. Idempotent: `None` when nothing is
    /// live.
    pub async fn stop(&self, device: &Device) -> Result<Option<StreamSession>> {
        let Some(session) = self.repo.find_live(device.id).await? else {
            tracing::debug!(device_id = device.id, "No live session to stop");
            return Ok(None);
        };

        self.repo.mark_stopping(session.id).await?;

        match self.video.stop_stream(&device.external_id).await {
            // Already stopped upstream counts as success.
            Ok(()) | Err(VideoServiceError::NotFound(_)) => {
                let stopped = self.repo.mark_stopped(session.id).await?;
                tracing::info!(
                    device_id = device.id,
                    session_id = session.id,
                    "Stream session stopped"
                );
                Ok(Some(stopped))
            }
            Err(e) => {
                self.repo.mark_error(session.id, &e.to_string()).await?;
                Err(e.into())
            }
        }
    }
}

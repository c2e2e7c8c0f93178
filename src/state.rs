//! Application state
//!
//! Configuration plus every shared component, constructed once at startup
//! and injected; no ambient globals.

use crate::device_registry::DeviceRegistry;
use crate::event_log::EventRepository;
use crate::evidence::EvidenceOrchestrator;
use crate::ingest::IngestionFacade;
use crate::stream_session::StreamSessionLifecycle;
use crate::video_service::VideoService;
use crate::violation::{ViolationRepository, ViolationStateMachine};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database URL
    pub database_url: String,
    /// External video service URL
    pub video_service_url: String,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Seconds between evidence readiness refresh ticks
    pub evidence_refresh_secs: u64,
    /// Upstream failures tolerated before evidence capture gives up
    pub evidence_max_retries: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://visionguard.db?mode=rwc".to_string()),
            video_service_url: std::env::var("VIDEO_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:1984".to_string()),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            evidence_refresh_secs: std::env::var("EVIDENCE_REFRESH_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            evidence_max_retries: std::env::var("EVIDENCE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database pool
    pub pool: SqlitePool,
    /// Application config
    pub config: AppConfig,
    /// Local device resolution
    pub devices: DeviceRegistry,
    /// Event persistence
    pub events: EventRepository,
    /// Violation queries
    pub violations: ViolationRepository,
    /// Review lifecycle transitions
    pub state_machine: ViolationStateMachine,
    /// Session lifecycle (start/stop)
    pub sessions: Arc<StreamSessionLifecycle>,
    /// Evidence capture and readiness
    pub evidence: Arc<EvidenceOrchestrator>,
    /// Single ingestion entry point
    pub ingest: Arc<IngestionFacade>,
    /// External video service client
    pub video: Arc<dyn VideoService>,
}

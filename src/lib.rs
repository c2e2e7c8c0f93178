//! visionguard - Safety Violation Lifecycle Server
//!
//! Ingests detection events from a video-analytics inference layer,
//! aggregates qualifying events into durable safety violations, enforces
//! the review lifecycle under concurrent operator actions, and drives a
//! best-effort evidence side-pipeline against the external video service.
//!
//! ## Components
//!
//! 1. IngestionFacade - single entry point per inference result
//! 2. ViolationAggregator - attach-or-create against the open window
//! 3. ViolationStateMachine - review lifecycle transition table
//! 4. EvidenceOrchestrator - snapshot/bookmark capture with durable retries
//! 5. StreamSessionLifecycle - at-most-one-live-session-per-device
//! 6. DeviceRegistry - local device rows, stub creation for unknowns
//! 7. VideoService - external media-plane adapter
//! 8. WebApi - operator-facing REST endpoints
//!
//! ## Design Principles
//!
//! - The relational store is the sole serialization point; no in-process
//!   lock is held across a suspension point
//! - Closed enumerations for every persisted status/type field
//! - Explicit swallow-vs-surface decisions at call sites

pub mod device_registry;
pub mod error;
pub mod event_log;
pub mod evidence;
pub mod ingest;
pub mod models;
pub mod schema;
pub mod state;
pub mod stream_session;
pub mod video_service;
pub mod violation;
pub mod web_api;

pub use error::{Error, Result};
pub use state::{AppConfig, AppState};

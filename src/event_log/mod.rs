//! EventLog - Detection event persistence
//!
//! ## Responsibilities
//!
//! - Validate raw inference results at the ingestion boundary
//! - Persist EventRecord rows (immutable except the set-once violation link)
//! - Query interface for the operator UI
//!
//! Event types are a closed enumeration. Unknown type strings are rejected
//! hard; known-but-non-actionable types (`no_fall`, `person_detected`) are
//! accepted and simply never map to a violation.

mod repository;

pub use repository::EventRepository;

use crate::error::{Error, Result};
use crate::models::BoundingBox;
use crate::violation::ViolationKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Detection event type emitted by the inference layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    FallDetected,
    NoFall,
    PpeViolation,
    PersonDetected,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::FallDetected => "fall_detected",
            EventType::NoFall => "no_fall",
            EventType::PpeViolation => "ppe_violation",
            EventType::PersonDetected => "person_detected",
        }
    }

    /// Parse a wire string; `None` means the type is unknown to this system
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fall_detected" => Some(EventType::FallDetected),
            "no_fall" => Some(EventType::NoFall),
            "ppe_violation" => Some(EventType::PpeViolation),
            "person_detected" => Some(EventType::PersonDetected),
            _ => None,
        }
    }

    /// Violation kind this event type aggregates into, if any.
    ///
    /// Non-actionable observations (`no_fall`, `person_detected`) map to
    /// nothing and never create violations.
    pub fn violation_kind(&self) -> Option<ViolationKind> {
        match self {
            EventType::FallDetected => Some(ViolationKind::FallDetected),
            EventType::PpeViolation => Some(ViolationKind::PpeViolation),
            EventType::NoFall | EventType::PersonDetected => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One raw inference result, as received from the event producer
#[derive(Debug, Clone, Deserialize)]
pub struct EventInput {
    pub device_external_id: String,
    /// Existing session id, if the producer knows it
    pub stream_session_id: Option<i64>,
    /// External stream handle, as an alternative session reference
    pub stream_handle: Option<String>,
    pub event_type: String,
    pub confidence: f64,
    pub occurred_at: DateTime<Utc>,
    pub model_id: String,
    pub model_version: String,
    pub bboxes: Option<Vec<BoundingBox>>,
}

impl EventInput {
    /// Boundary validation. Unknown event-type strings and out-of-range
    /// confidence are hard errors; everything else is the caller's problem.
    pub fn validate(&self) -> Result<EventType> {
        if self.device_external_id.trim().is_empty() {
            return Err(Error::Validation("device_external_id is empty".to_string()));
        }

        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::Validation(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }

        EventType::parse(&self.event_type).ok_or_else(|| {
            Error::Validation(format!("unknown event type: {}", self.event_type))
        })
    }
}

/// Persisted detection event (matches events table)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub device_id: i64,
    pub stream_session_id: Option<i64>,
    /// Set at most once, by the aggregator
    pub violation_id: Option<i64>,
    pub event_type: EventType,
    pub confidence: f64,
    pub occurred_at: DateTime<Utc>,
    pub model_id: String,
    pub model_version: String,
    pub bboxes: Option<Vec<BoundingBox>>,
    pub created_at: DateTime<Utc>,
}

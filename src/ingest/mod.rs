//! IngestionFacade - single entry point for inference results
//!
//! ## Responsibilities
//!
//! - Called once per inference result
//! - Composes device/session resolution, event persistence, aggregation,
//!   and the best-effort evidence trigger
//!
//! Failure policy per step: device and session resolution never fail
//! ingestion (stub/null fallback); event persistence is the only fatal
//! step; the automatic snapshot trigger is logged and swallowed so it can
//! never roll back the event or violation.

use crate::device_registry::DeviceRegistry;
use crate::error::Result;
use crate::event_log::{EventInput, EventRecord, EventRepository};
use crate::evidence::EvidenceOrchestrator;
use crate::stream_session::StreamSessionRepository;
use crate::violation::ViolationAggregator;
use std::sync::Arc;

/// IngestionFacade instance
pub struct IngestionFacade {
    devices: DeviceRegistry,
    sessions: StreamSessionRepository,
    events: EventRepository,
    aggregator: ViolationAggregator,
    evidence: Arc<EvidenceOrchestrator>,
}

impl IngestionFacade {
    pub fn new(
        devices: DeviceRegistry,
        sessions: StreamSessionRepository,
        events: EventRepository,
        aggregator: ViolationAggregator,
        evidence: Arc<EvidenceOrchestrator>,
    ) -> Self {
        Self {
            devices,
            sessions,
            events,
            aggregator,
            evidence,
        }
    }

    /// Ingest one inference result. Returns the persisted event, with its
    /// violation link set when the event aggregated into one.
    pub async fn ingest(&self, input: EventInput) -> Result<EventRecord> {
        // Boundary validation is the one hard gate: unknown type strings
        // and malformed confidence never enter the store.
        let event_type = input.validate()?;

        let device = self.devices.resolve_or_stub(&input.device_external_id).await?;

        let stream_session_id = self.resolve_session(&input).await;

        let event = self
            .events
            .insert(
                device.id,
                stream_session_id,
                event_type,
                input.confidence,
                input.occurred_at,
                &input.model_id,
                &input.model_version,
                input.bboxes.as_deref(),
            )
            .await?;

        if let Some(session_id) = stream_session_id {
            // Counter bump only; not worth failing ingestion over.
            if let Err(e) = self.sessions.record_activity(session_id, 0, 1).await {
                tracing::warn!(session_id = session_id, error = %e, "Session counter update failed");
            }
        }

        let outcome = self.aggregator.process_event(&event).await?;

        let Some(outcome) = outcome else {
            return Ok(event);
        };

        if outcome.is_created() {
            // Best effort: a violation without a snapshot is still a
            // violation. Operators can re-request capture explicitly.
            if let Err(e) = self
                .evidence
                .create_snapshot(outcome.violation().id, "system")
                .await
            {
                tracing::warn!(
                    violation_id = outcome.violation().id,
                    event_id = event.id,
                    error = %e,
                    "Automatic snapshot capture failed, continuing"
                );
            }
        }

        // Re-read so the caller sees the committed violation link.
        self.events.get(event.id).await.map(|refreshed| {
            refreshed.unwrap_or(event)
        })
    }

    /// Resolve the session reference: explicit id wins, then the external
    /// stream handle. Resolution errors degrade to a null session; they
    /// never fail ingestion.
    async fn resolve_session(&self, input: &EventInput) -> Option<i64> {
        if let Some(id) = input.stream_session_id {
            match self.sessions.get(id).await {
                Ok(Some(session)) => return Some(session.id),
                Ok(None) => {
                    tracing::warn!(session_id = id, "Unknown session reference on event");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(session_id = id, error = %e, "Session lookup failed");
                    return None;
                }
            }
        }

        if let Some(handle) = &input.stream_handle {
            match self.sessions.find_by_handle(handle).await {
                Ok(Some(session)) => return Some(session.id),
                Ok(None) => {
                    tracing::debug!(stream_handle = %handle, "No live session for handle");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(stream_handle = %handle, error = %e, "Handle lookup failed");
                    return None;
                }
            }
        }

        None
    }
}

//! ViolationAggregator - event-to-violation aggregation
//!
//! Decides per event whether to attach to the existing open-window
//! violation or create a new one. Re-delivered events (violation link
//! already set) and non-actionable event types are no-ops.

use super::{Violation, ViolationRepository};
use crate::device_registry::DeviceRegistry;
use crate::error::{Error, Result};
use crate::event_log::{EventRecord, EventRepository};

/// What the aggregator did with an event
#[derive(Debug, Clone)]
pub enum AggregationOutcome {
    /// A new violation was created for this event's window
    Created(Violation),
    /// The event was absorbed into an existing open-window violation
    Attached(Violation),
}

impl AggregationOutcome {
    pub fn violation(&self) -> &Violation {
        match self {
            AggregationOutcome::Created(v) | AggregationOutcome::Attached(v) => v,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, AggregationOutcome::Created(_))
    }
}

/// ViolationAggregator instance
#[derive(Clone)]
pub struct ViolationAggregator {
    violations: ViolationRepository,
    events: EventRepository,
    devices: DeviceRegistry,
}

impl ViolationAggregator {
    pub fn new(
        violations: ViolationRepository,
        events: EventRepository,
        devices: DeviceRegistry,
    ) -> Self {
        Self {
            violations,
            events,
            devices,
        }
    }

    /// Process one persisted event. Returns `None` when the event is a
    /// re-delivery or its type has no violation mapping.
    ///
    /// The duplicate-window race is closed by the partial unique index:
    /// a losing insert re-reads and attaches to the winner's row.
    pub async fn process_event(&self, event: &EventRecord) -> Result<Option<AggregationOutcome>> {
        if event.violation_id.is_some() {
            tracing::debug!(event_id = event.id, "Event already aggregated, skipping");
            return Ok(None);
        }

        let Some(kind) = event.event_type.violation_kind() else {
            return Ok(None);
        };

        // Two passes at most: miss -> create can lose the insert race to a
        // concurrent writer, in which case the re-read finds their row.
        for _ in 0..2 {
            if let Some(existing) = self
                .violations
                .find_open_window(event.device_id, event.stream_session_id, kind)
                .await?
            {
                return self.attach(event, existing).await.map(Some);
            }

            let device_name = match self.devices.get(event.device_id).await? {
                Some(device) => device.name,
                None => format!("device #{}", event.device_id),
            };

            if let Some(id) = self
                .violations
                .try_insert_open(
                    event.device_id,
                    event.stream_session_id,
                    kind,
                    event.confidence,
                    event.occurred_at,
                    &device_name,
                )
                .await?
            {
                self.events.link_to_violation(event.id, id).await?;
                let violation = self.violations.get(id).await?.ok_or_else(|| {
                    Error::Internal(format!("violation {id} vanished after insert"))
                })?;

                tracing::info!(
                    violation_id = id,
                    event_id = event.id,
                    violation_type = %kind,
                    confidence = event.confidence,
                    "Violation created"
                );
                return Ok(Some(AggregationOutcome::Created(violation)));
            }

            tracing::debug!(
                event_id = event.id,
                "Lost open-window insert race, re-reading"
            );
        }

        Err(Error::Internal(
            "open-window lookup and insert both failed twice".to_string(),
        ))
    }

    /// Attach the event to an existing violation: set-once link plus
    /// monotonic confidence raise. Status and timestamp are untouched.
    async fn attach(&self, event: &EventRecord, violation: Violation) -> Result<AggregationOutcome> {
        let linked = self
            .events
            .link_to_violation(event.id, violation.id)
            .await?;

        if linked {
            self.violations
                .raise_confidence(violation.id, event.confidence)
                .await?;
        }

        let violation = self
            .violations
            .get(violation.id)
            .await?
            .ok_or_else(|| Error::Internal(format!("violation {} vanished", violation.id)))?;

        tracing::debug!(
            violation_id = violation.id,
            event_id = event.id,
            confidence = violation.confidence,
            "Event attached to violation"
        );
        Ok(AggregationOutcome::Attached(violation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::EventType;
    use crate::schema::testing::test_pool;
    use crate::violation::{ViolationStateMachine, ViolationStatus};
    use chrono::Utc;
    use sqlx::SqlitePool;

    struct Fixture {
        aggregator: ViolationAggregator,
        events: EventRepository,
        device_id: i64,
    }

    async fn fixture(pool: &SqlitePool) -> Fixture {
        let devices = DeviceRegistry::new(pool.clone());
        let device = devices.resolve_or_stub("cam-1").await.unwrap();
        let events = EventRepository::new(pool.clone());
        let aggregator = ViolationAggregator::new(
            ViolationRepository::new(pool.clone()),
            events.clone(),
            devices,
        );
        Fixture {
            aggregator,
            events,
            device_id: device.id,
        }
    }

    async fn insert_event(fx: &Fixture, event_type: EventType, confidence: f64) -> EventRecord {
        fx.events
            .insert(
                fx.device_id,
                None,
                event_type,
                confidence,
                Utc::now(),
                "safety-v2",
                "2.1.0",
                None,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_event_creates_open_violation() {
        let pool = test_pool().await;
        let fx = fixture(&pool).await;
        let event = insert_event(&fx, EventType::FallDetected, 0.85).await;

        let outcome = fx.aggregator.process_event(&event).await.unwrap().unwrap();
        assert!(outcome.is_created());
        let v = outcome.violation();
        assert_eq!(v.status, ViolationStatus::Open);
        assert_eq!(v.confidence, 0.85);
        assert_eq!(v.occurred_at, event.occurred_at);

        // Event row carries the link now.
        let linked = fx.events.get(event.id).await.unwrap().unwrap();
        assert_eq!(linked.violation_id, Some(v.id));
    }

    #[tokio::test]
    async fn test_n_events_one_violation_max_confidence() {
        let pool = test_pool().await;
        let fx = fixture(&pool).await;

        let confidences = [0.40, 0.85, 0.60, 0.72];
        let mut violation_ids = Vec::new();
        for c in confidences {
            let event = insert_event(&fx, EventType::FallDetected, c).await;
            let outcome = fx.aggregator.process_event(&event).await.unwrap().unwrap();
            violation_ids.push(outcome.violation().id);
        }

        assert!(violation_ids.windows(2).all(|w| w[0] == w[1]));
        let v = fx
            .aggregator
            .violations
            .get(violation_ids[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(v.confidence, 0.85);
    }

    #[tokio::test]
    async fn test_lower_confidence_does_not_regress() {
        let pool = test_pool().await;
        let fx = fixture(&pool).await;

        let first = insert_event(&fx, EventType::FallDetected, 0.85).await;
        let created = fx.aggregator.process_event(&first).await.unwrap().unwrap();

        let second = insert_event(&fx, EventType::FallDetected, 0.60).await;
        let attached = fx.aggregator.process_event(&second).await.unwrap().unwrap();

        assert!(!attached.is_created());
        assert_eq!(attached.violation().id, created.violation().id);
        assert_eq!(attached.violation().confidence, 0.85);
    }

    #[tokio::test]
    async fn test_redelivery_is_noop() {
        let pool = test_pool().await;
        let fx = fixture(&pool).await;

        let event = insert_event(&fx, EventType::FallDetected, 0.85).await;
        fx.aggregator.process_event(&event).await.unwrap().unwrap();

        // Re-fetch: the record now carries its violation link.
        let redelivered = fx.events.get(event.id).await.unwrap().unwrap();
        let outcome = fx.aggregator.process_event(&redelivered).await.unwrap();
        assert!(outcome.is_none());

        let violations = fx
            .aggregator
            .violations
            .list(None, None, 100)
            .await
            .unwrap();
        assert_eq!(violations.len(), 1);
    }

    #[tokio::test]
    async fn test_unmapped_type_creates_nothing() {
        let pool = test_pool().await;
        let fx = fixture(&pool).await;

        let event = insert_event(&fx, EventType::NoFall, 0.99).await;
        let outcome = fx.aggregator.process_event(&event).await.unwrap();
        assert!(outcome.is_none());

        let stored = fx.events.get(event.id).await.unwrap().unwrap();
        assert!(stored.violation_id.is_none());
    }

    #[tokio::test]
    async fn test_reviewed_violation_still_absorbs_events() {
        let pool = test_pool().await;
        let fx = fixture(&pool).await;

        let first = insert_event(&fx, EventType::FallDetected, 0.70).await;
        let created = fx.aggregator.process_event(&first).await.unwrap().unwrap();

        ViolationStateMachine::new(pool.clone())
            .mark_reviewed(created.violation().id, "op1")
            .await
            .unwrap();

        let second = insert_event(&fx, EventType::FallDetected, 0.90).await;
        let attached = fx.aggregator.process_event(&second).await.unwrap().unwrap();
        assert_eq!(attached.violation().id, created.violation().id);
        assert_eq!(attached.violation().status, ViolationStatus::Reviewed);
        assert_eq!(attached.violation().confidence, 0.90);
    }

    #[tokio::test]
    async fn test_closed_window_gets_fresh_violation() {
        let pool = test_pool().await;
        let fx = fixture(&pool).await;

        let first = insert_event(&fx, EventType::FallDetected, 0.70).await;
        let created = fx.aggregator.process_event(&first).await.unwrap().unwrap();

        // Resolve closes the window.
        let sm = ViolationStateMachine::new(pool.clone());
        sm.mark_reviewed(created.violation().id, "op1").await.unwrap();
        sm.resolve(created.violation().id, None).await.unwrap();

        let second = insert_event(&fx, EventType::FallDetected, 0.80).await;
        let outcome = fx.aggregator.process_event(&second).await.unwrap().unwrap();
        assert!(outcome.is_created());
        assert_ne!(outcome.violation().id, created.violation().id);
    }

    #[tokio::test]
    async fn test_different_kinds_get_separate_violations() {
        let pool = test_pool().await;
        let fx = fixture(&pool).await;

        let fall = insert_event(&fx, EventType::FallDetected, 0.70).await;
        let ppe = insert_event(&fx, EventType::PpeViolation, 0.80).await;

        let a = fx.aggregator.process_event(&fall).await.unwrap().unwrap();
        let b = fx.aggregator.process_event(&ppe).await.unwrap().unwrap();

        assert!(a.is_created());
        assert!(b.is_created());
        assert_ne!(a.violation().id, b.violation().id);
    }
}

//! Event persistence (events table)

use super::{EventRecord, EventType};
use crate::error::{Error, Result};
use crate::models::BoundingBox;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

/// Repository for EventRecord rows
#[derive(Clone)]
pub struct EventRepository {
    pool: SqlitePool,
}

impl EventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new event. This is the only fatal step in the ingestion
    /// path; errors propagate to the caller.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        &self,
        device_id: i64,
        stream_session_id: Option<i64>,
        event_type: EventType,
        confidence: f64,
        occurred_at: DateTime<Utc>,
        model_id: &str,
        model_version: &str,
        bboxes: Option<&[BoundingBox]>,
    ) -> Result<EventRecord> {
        let bboxes_json = bboxes.map(serde_json::to_string).transpose()?;
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO events (
                device_id, stream_session_id, violation_id,
                event_type, confidence, occurred_at,
                model_id, model_version, bboxes, created_at
            ) VALUES (?, ?, NULL, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(device_id)
        .bind(stream_session_id)
        .bind(event_type.as_str())
        .bind(confidence)
        .bind(occurred_at)
        .bind(model_id)
        .bind(model_version)
        .bind(&bboxes_json)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get(id)
            .await?
            .ok_or_else(|| Error::Internal(format!("event {id} vanished after insert")))
    }

    /// Get an event by id
    pub async fn get(&self, id: i64) -> Result<Option<EventRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, device_id, stream_session_id, violation_id,
                   event_type, confidence, occurred_at,
                   model_id, model_version, bboxes, created_at
            FROM events
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_event).transpose()
    }

    /// Link an event to a violation. Set-once: returns false if the event
    /// was already linked, and the existing link is untouched.
    pub async fn link_to_violation(&self, event_id: i64, violation_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE events SET violation_id = ? WHERE id = ? AND violation_id IS NULL",
        )
        .bind(violation_id)
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Latest events, newest first
    pub async fn recent(&self, limit: u32) -> Result<Vec<EventRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, device_id, stream_session_id, violation_id,
                   event_type, confidence, occurred_at,
                   model_id, model_version, bboxes, created_at
            FROM events
            ORDER BY occurred_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_event).collect()
    }
}

fn row_to_event(row: sqlx::sqlite::SqliteRow) -> Result<EventRecord> {
    let type_str: String = row.try_get("event_type")?;
    let event_type = EventType::parse(&type_str)
        .ok_or_else(|| Error::Internal(format!("unexpected event_type in store: {type_str}")))?;

    let bboxes: Option<Vec<BoundingBox>> = row
        .try_get::<Option<String>, _>("bboxes")?
        .map(|s| serde_json::from_str(&s))
        .transpose()?;

    Ok(EventRecord {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        stream_session_id: row.try_get("stream_session_id")?,
        violation_id: row.try_get("violation_id")?,
        event_type,
        confidence: row.try_get("confidence")?,
        occurred_at: row.try_get("occurred_at")?,
        model_id: row.try_get("model_id")?,
        model_version: row.try_get("model_version")?,
        bboxes,
        created_at: row.try_get("created_at")?,
    })
}

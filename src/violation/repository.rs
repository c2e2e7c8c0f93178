//! Violation persistence (violations table)
//!
//! The open-window uniqueness lives in a partial unique index; creation
//! goes through insert-on-conflict so concurrent ingestion for the same
//! window yields exactly one row.

use super::{Violation, ViolationKind, ViolationStatus};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

const SELECT_COLUMNS: &str = r#"
    id, device_id, stream_session_id, violation_type, status,
    confidence, occurred_at, device_name,
    reviewed_by, reviewed_at, notes, created_at, updated_at
"#;

/// Repository for Violation rows
#[derive(Clone)]
pub struct ViolationRepository {
    pool: SqlitePool,
}

impl ViolationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a violation by id
    pub async fn get(&self, id: i64) -> Result<Option<Violation>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM violations WHERE id = ?");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(row_to_violation).transpose()
    }

    /// Find the violation currently holding the open window for
    /// (device, session, type): status in {open, reviewed}.
    pub async fn find_open_window(
        &self,
        device_id: i64,
        stream_session_id: Option<i64>,
        kind: ViolationKind,
    ) -> Result<Option<Violation>> {
        let sql = format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM violations
            WHERE device_id = ?
              AND COALESCE(stream_session_id, -1) = COALESCE(?, -1)
              AND violation_type = ?
              AND status IN ('open', 'reviewed')
            "#
        );
        let row = sqlx::query(&sql)
            .bind(device_id)
            .bind(stream_session_id)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_violation).transpose()
    }

    /// Try to create a new open violation for the window. Returns `None` if
    /// another writer holds the window already (partial unique index
    /// conflict); the caller re-reads and attaches to the winner.
    pub async fn try_insert_open(
        &self,
        device_id: i64,
        stream_session_id: Option<i64>,
        kind: ViolationKind,
        confidence: f64,
        occurred_at: DateTime<Utc>,
        device_name: &str,
    ) -> Result<Option<i64>> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO violations (
                device_id, stream_session_id, violation_type, status,
                confidence, occurred_at, device_name, created_at, updated_at
            ) VALUES (?, ?, ?, 'open', ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(device_id)
        .bind(stream_session_id)
        .bind(kind.as_str())
        .bind(confidence)
        .bind(occurred_at)
        .bind(device_name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(result.last_insert_rowid()))
    }

    /// Raise the running-maximum confidence. Single UPDATE so the
    /// monotonicity holds without a read-modify-write race.
    pub async fn raise_confidence(&self, id: i64, confidence: f64) -> Result<()> {
        sqlx::query(
            "UPDATE violations SET confidence = MAX(confidence, ?), updated_at = ? WHERE id = ?",
        )
        .bind(confidence)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// List violations, newest first, with optional status/device filters
    pub async fn list(
        &self,
        status: Option<ViolationStatus>,
        device_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Violation>> {
        let sql = format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM violations
            WHERE (?1 IS NULL OR status = ?1)
              AND (?2 IS NULL OR device_id = ?2)
            ORDER BY occurred_at DESC
            LIMIT ?3
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(status.map(|s| s.as_str()))
            .bind(device_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(row_to_violation).collect()
    }
}

pub(crate) fn row_to_violation(row: sqlx::sqlite::SqliteRow) -> Result<Violation> {
    let kind_str: String = row.try_get("violation_type")?;
    let violation_type = ViolationKind::parse(&kind_str).ok_or_else(|| {
        Error::Internal(format!("unexpected violation_type in store: {kind_str}"))
    })?;

    let status_str: String = row.try_get("status")?;
    let status = ViolationStatus::parse(&status_str)
        .ok_or_else(|| Error::Internal(format!("unexpected status in store: {status_str}")))?;

    Ok(Violation {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        stream_session_id: row.try_get("stream_session_id")?,
        violation_type,
        status,
        confidence: row.try_get("confidence")?,
        occurred_at: row.try_get("occurred_at")?,
        device_name: row.try_get("device_name")?,
        reviewed_by: row.try_get("reviewed_by")?,
        reviewed_at: row.try_get("reviewed_at")?,
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

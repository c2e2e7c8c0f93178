//! Evidence persistence (evidence table)
//!
//! The (violation, type) slot is a unique constraint; creation goes through
//! insert-on-conflict so concurrent requests agree on one row.

use super::{Evidence, EvidenceStatus, EvidenceType};
use crate::error::{Error, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};

const SELECT_COLUMNS: &str = r#"
    id, violation_id, evidence_type, status, external_id,
    retry_count, last_retry_at, requested_at, ready_at,
    error_message, created_by
"#;

/// Repository for Evidence rows
#[derive(Clone)]
pub struct EvidenceRepository {
    pool: SqlitePool,
}

impl EvidenceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get evidence by id
    pub async fn get(&self, id: i64) -> Result<Option<Evidence>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM evidence WHERE id = ?");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(row_to_evidence).transpose()
    }

    /// The (violation, type) slot, if it was ever requested
    pub async fn find(
        &self,
        violation_id: i64,
        evidence_type: EvidenceType,
    ) -> Result<Option<Evidence>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM evidence WHERE violation_id = ? AND evidence_type = ?"
        );
        let row = sqlx::query(&sql)
            .bind(violation_id)
            .bind(evidence_type.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_evidence).transpose()
    }

    /// All evidence for a violation
    pub async fn list_for_violation(&self, violation_id: i64) -> Result<Vec<Evidence>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM evidence WHERE violation_id = ? ORDER BY requested_at"
        );
        let rows = sqlx::query(&sql)
            .bind(violation_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_evidence).collect()
    }

    /// Rows waiting on the external service
    pub async fn list_processing(&self) -> Result<Vec<Evidence>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM evidence WHERE status = 'processing' ORDER BY requested_at"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_evidence).collect()
    }

    /// Claim the (violation, type) slot. `None` means a concurrent request
    /// holds it already.
    pub async fn try_insert_pending(
        &self,
        violation_id: i64,
        evidence_type: EvidenceType,
        created_by: &str,
    ) -> Result<Option<i64>> {
        let result = sqlx::query(
            r#"
            INSERT INTO evidence (violation_id, evidence_type, status, requested_at, created_by)
            VALUES (?, ?, 'pending', ?, ?)
            ON CONFLICT (violation_id, evidence_type) DO NOTHING
            "#,
        )
        .bind(violation_id)
        .bind(evidence_type.as_str())
        .bind(Utc::now())
        .bind(created_by)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(result.last_insert_rowid()))
    }

    /// pending -> processing with the external artifact id
    pub async fn mark_processing(&self, id: i64, external_id: &str) -> Result<Evidence> {
        sqlx::query(
            "UPDATE evidence SET status = 'processing', external_id = ?, error_message = NULL WHERE id = ?",
        )
        .bind(external_id)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("evidence {id}")))
    }

    /// processing -> ready
    pub async fn mark_ready(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE evidence SET status = 'ready', ready_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// -> failed, keeping the last error for the operator
    pub async fn mark_failed(&self, id: i64, message: &str) -> Result<()> {
        sqlx::query("UPDATE evidence SET status = 'failed', error_message = ? WHERE id = ?")
            .bind(message)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Durable retry bookkeeping
    pub async fn record_retry(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE evidence SET retry_count = retry_count + 1, last_retry_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Swap in a fresh artifact id after a re-request
    pub async fn update_external_id(&self, id: i64, external_id: &str) -> Result<()> {
        sqlx::query("UPDATE evidence SET external_id = ? WHERE id = ?")
            .bind(external_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_evidence(row: sqlx::sqlite::SqliteRow) -> Result<Evidence> {
    let type_str: String = row.try_get("evidence_type")?;
    let evidence_type = EvidenceType::parse(&type_str)
        .ok_or_else(|| Error::Internal(format!("unexpected evidence_type in store: {type_str}")))?;

    let status_str: String = row.try_get("status")?;
    let status = EvidenceStatus::parse(&status_str).ok_or_else(|| {
        Error::Internal(format!("unexpected evidence status in store: {status_str}"))
    })?;

    Ok(Evidence {
        id: row.try_get("id")?,
        violation_id: row.try_get("violation_id")?,
        evidence_type,
        status,
        external_id: row.try_get("external_id")?,
        retry_count: row.try_get("retry_count")?,
        last_retry_at: row.try_get("last_retry_at")?,
        requested_at: row.try_get("requested_at")?,
        ready_at: row.try_get("ready_at")?,
        error_message: row.try_get("error_message")?,
        created_by: row.try_get("created_by")?,
    })
}

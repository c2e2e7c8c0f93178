//! ViolationStateMachine - review lifecycle transitions
//!
//! Every review action goes through `transition`; the named operations are
//! thin wrappers. The read-modify-write runs inside one transaction so
//! concurrent operator actions serialize on the store.

use super::repository::row_to_violation;
use super::{Violation, ViolationStatus};
use crate::error::{Error, Result};
use chrono::Utc;
use sqlx::SqlitePool;

/// ViolationStateMachine instance
#[derive(Clone)]
pub struct ViolationStateMachine {
    pool: SqlitePool,
}

impl ViolationStateMachine {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Transition a violation to `target`.
    ///
    /// - `NotFound` if the violation does not exist
    /// - `TerminalState` if it is resolved
    /// - `InvalidTransition` if the table forbids current -> target
    ///
    /// Entering reviewed records reviewer identity and time; entering
    /// dismissed/resolved records notes when supplied.
    pub async fn transition(
        &self,
        violation_id: i64,
        target: ViolationStatus,
        reviewed_by: Option<&str>,
        notes: Option<&str>,
    ) -> Result<Violation> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, device_id, stream_session_id, violation_type, status,
                   confidence, occurred_at, device_name,
                   reviewed_by, reviewed_at, notes, created_at, updated_at
            FROM violations WHERE id = ?
            "#,
        )
        .bind(violation_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound(format!("violation {violation_id}")))?;

        let current = row_to_violation(row)?;

        if current.status.is_terminal() {
            return Err(Error::TerminalState {
                status: current.status,
            });
        }

        if !current.status.can_transition_to(target) {
            return Err(Error::InvalidTransition {
                from: current.status,
                to: target,
            });
        }

        let now = Utc::now();
        match target {
            ViolationStatus::Reviewed => {
                sqlx::query(
                    r#"
                    UPDATE violations
                    SET status = ?, reviewed_by = ?, reviewed_at = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(target.as_str())
                .bind(reviewed_by)
                .bind(now)
                .bind(now)
                .bind(violation_id)
                .execute(&mut *tx)
                .await?;
            }
            ViolationStatus::Dismissed | ViolationStatus::Resolved => {
                sqlx::query(
                    r#"
                    UPDATE violations
                    SET status = ?, notes = COALESCE(?, notes), updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(target.as_str())
                .bind(notes)
                .bind(now)
                .bind(violation_id)
                .execute(&mut *tx)
                .await?;
            }
            // Reopen: dismissed -> open, review metadata kept for the audit
            // trail. The open-window index fires if a newer violation took
            // the window after the dismissal.
            ViolationStatus::Open => {
                let result =
                    sqlx::query("UPDATE violations SET status = ?, updated_at = ? WHERE id = ?")
                        .bind(target.as_str())
                        .bind(now)
                        .bind(violation_id)
                        .execute(&mut *tx)
                        .await;
                if let Err(e) = result {
                    if e.as_database_error()
                        .is_some_and(|db| db.is_unique_violation())
                    {
                        return Err(Error::WindowConflict(format!(
                            "violation {violation_id} cannot reopen: a newer open violation holds its window"
                        )));
                    }
                    return Err(e.into());
                }
            }
        }

        let row = sqlx::query(
            r#"
            SELECT id, device_id, stream_session_id, violation_type, status,
                   confidence, occurred_at, device_name,
                   reviewed_by, reviewed_at, notes, created_at, updated_at
            FROM violations WHERE id = ?
            "#,
        )
        .bind(violation_id)
        .fetch_one(&mut *tx)
        .await?;
        let updated = row_to_violation(row)?;

        tx.commit().await?;

        tracing::info!(
            violation_id = violation_id,
            from = %current.status,
            to = %updated.status,
            "Violation status transition"
        );

        Ok(updated)
    }

    /// open -> reviewed
    pub async fn mark_reviewed(&self, violation_id: i64, reviewed_by: &str) -> Result<Violation> {
        self.transition(violation_id, ViolationStatus::Reviewed, Some(reviewed_by), None)
            .await
    }

    /// open|reviewed -> dismissed
    pub async fn dismiss(&self, violation_id: i64, notes: Option<&str>) -> Result<Violation> {
        self.transition(violation_id, ViolationStatus::Dismissed, None, notes)
            .await
    }

    /// reviewed -> resolved
    pub async fn resolve(&self, violation_id: i64, notes: Option<&str>) -> Result<Violation> {
        self.transition(violation_id, ViolationStatus::Resolved, None, notes)
            .await
    }

    /// dismissed -> open
    pub async fn reopen(&self, violation_id: i64) -> Result<Violation> {
        self.transition(violation_id, ViolationStatus::Open, None, None)
            .await
    }
}

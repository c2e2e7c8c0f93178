//! DeviceRegistry - Local device resolution
//!
//! ## Responsibilities
//!
//! - Resolve devices by external id for ingestion and session start
//! - Create stub rows for unknown devices so ingestion never blocks on the
//!   upstream registry (metadata catches up via eventual registry sync)
//!
//! Devices are owned by an external registry; this module only keeps the
//! local reference rows.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// Local device row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub external_id: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// DeviceRegistry instance
#[derive(Clone)]
pub struct DeviceRegistry {
    pool: SqlitePool,
}

impl DeviceRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Resolve a device by external id, creating a stub row if unknown.
    ///
    /// Atomic insert-on-conflict-else-select: under concurrent ingestion for
    /// the same unseen device, exactly one row is created and everyone gets
    /// it. The placeholder name is deterministic.
    pub async fn resolve_or_stub(&self, external_id: &str) -> Result<Device> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO devices (external_id, name, is_active, created_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT (external_id) DO NOTHING
            "#,
        )
        .bind(external_id)
        .bind(stub_name(external_id))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() > 0 {
            tracing::info!(external_id = external_id, "Stub device created");
        }

        self.get_by_external_id(external_id)
            .await?
            .ok_or_else(|| Error::Internal(format!("device {external_id} vanished after upsert")))
    }

    /// Get a device by internal id
    pub async fn get(&self, id: i64) -> Result<Option<Device>> {
        let row = sqlx::query(
            "SELECT id, external_id, name, is_active, created_at FROM devices WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_device).transpose()
    }

    /// Get a device by external id
    pub async fn get_by_external_id(&self, external_id: &str) -> Result<Option<Device>> {
        let row = sqlx::query(
            "SELECT id, external_id, name, is_active, created_at FROM devices WHERE external_id = ?",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_device).transpose()
    }
}

/// Deterministic placeholder name for stub rows
fn stub_name(external_id: &str) -> String {
    format!("device {external_id}")
}

fn row_to_device(row: sqlx::sqlite::SqliteRow) -> Result<Device> {
    Ok(Device {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        name: row.try_get("name")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

//! Embedded database schema
//!
//! Applied at startup with `CREATE TABLE IF NOT EXISTS` so the server can
//! bootstrap an empty database. The partial unique indexes are load-bearing:
//! they make the store the serialization point for the open-window and
//! live-session invariants under concurrent writers.

use crate::error::Result;
use sqlx::SqlitePool;

const DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS devices (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        external_id TEXT NOT NULL UNIQUE,
        name        TEXT NOT NULL,
        is_active   INTEGER NOT NULL DEFAULT 1,
        created_at  TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stream_sessions (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id        INTEGER NOT NULL REFERENCES devices(id),
        model_id         TEXT NOT NULL,
        model_version    TEXT NOT NULL,
        inference_params TEXT,
        state            TEXT NOT NULL,
        stream_handle    TEXT,
        started_at       TEXT NOT NULL,
        stopped_at       TEXT,
        frames_processed INTEGER NOT NULL DEFAULT 0,
        events_emitted   INTEGER NOT NULL DEFAULT 0,
        error_message    TEXT
    )
    "#,
    // Invariant: at most one live session per device.
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_stream_sessions_live
        ON stream_sessions (device_id) WHERE state = 'live'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS violations (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id         INTEGER NOT NULL REFERENCES devices(id),
        stream_session_id INTEGER REFERENCES stream_sessions(id),
        violation_type    TEXT NOT NULL,
        status            TEXT NOT NULL,
        confidence        REAL NOT NULL,
        occurred_at       TEXT NOT NULL,
        device_name       TEXT NOT NULL,
        reviewed_by       TEXT,
        reviewed_at       TEXT,
        notes             TEXT,
        created_at        TEXT NOT NULL,
        updated_at        TEXT NOT NULL
    )
    "#,
    // Invariant: at most one open-window violation per
    // (device, session, type). NULL sessions fold to -1 so they share
    // one window instead of each NULL being distinct.
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_violations_open_window
        ON violations (device_id, COALESCE(stream_session_id, -1), violation_type)
        WHERE status IN ('open', 'reviewed')
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id         INTEGER NOT NULL REFERENCES devices(id),
        stream_session_id INTEGER REFERENCES stream_sessions(id),
        violation_id      INTEGER REFERENCES violations(id),
        event_type        TEXT NOT NULL,
        confidence        REAL NOT NULL,
        occurred_at       TEXT NOT NULL,
        model_id          TEXT NOT NULL,
        model_version     TEXT NOT NULL,
        bboxes            TEXT,
        created_at        TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_events_occurred_at
        ON events (occurred_at DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS evidence (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        violation_id  INTEGER NOT NULL REFERENCES violations(id) ON DELETE CASCADE,
        evidence_type TEXT NOT NULL,
        status        TEXT NOT NULL,
        external_id   TEXT,
        retry_count   INTEGER NOT NULL DEFAULT 0,
        last_retry_at TEXT,
        requested_at  TEXT NOT NULL,
        ready_at      TEXT,
        error_message TEXT,
        created_by    TEXT NOT NULL,
        UNIQUE (violation_id, evidence_type)
    )
    "#,
];

/// Apply the embedded schema (idempotent)
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for statement in DDL {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!(statements = DDL.len(), "Database schema applied");
    Ok(())
}

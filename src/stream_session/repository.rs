//! Stream session persistence (stream_sessions table)

use super::{ModelConfig, SessionState, StreamSession};
use crate::error::{Error, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};

const SELECT_COLUMNS: &str = r#"
    id, device_id, model_id, model_version, inference_params,
    state, stream_handle, started_at, stopped_at,
    frames_processed, events_emitted, error_message
"#;

/// Repository for StreamSession rows
#[derive(Clone)]
pub struct StreamSessionRepository {
    pool: SqlitePool,
}

impl StreamSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a session by id
    pub async fn get(&self, id: i64) -> Result<Option<StreamSession>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM stream_sessions WHERE id = ?");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(row_to_session).transpose()
    }

    /// The device's live session, if any
    pub async fn find_live(&self, device_id: i64) -> Result<Option<StreamSession>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM stream_sessions WHERE device_id = ? AND state = 'live'"
        );
        let row = sqlx::query(&sql)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_session).transpose()
    }

    /// Resolve a session by its external stream handle (live sessions only)
    pub async fn find_by_handle(&self, stream_handle: &str) -> Result<Option<StreamSession>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM stream_sessions WHERE stream_handle = ? AND state = 'live'"
        );
        let row = sqlx::query(&sql)
            .bind(stream_handle)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_session).transpose()
    }

    /// List sessions, newest first, optionally for one device
    pub async fn list(&self, device_id: Option<i64>, limit: u32) -> Result<Vec<StreamSession>> {
        let sql = format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM stream_sessions
            WHERE (?1 IS NULL OR device_id = ?1)
            ORDER BY started_at DESC
            LIMIT ?2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(device_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_session).collect()
    }

    /// Insert a new session in `starting` state
    pub async fn insert_starting(
        &self,
        device_id: i64,
        config: &ModelConfig,
    ) -> Result<StreamSession> {
        let params_json = config
            .inference_params
            .as_ref()
            .map(|v| v.to_string());

        let result = sqlx::query(
            r#"
            INSERT INTO stream_sessions (
                device_id, model_id, model_version, inference_params,
                state, started_at
            ) VALUES (?, ?, ?, ?, 'starting', ?)
            "#,
        )
        .bind(device_id)
        .bind(&config.model_id)
        .bind(&config.model_version)
        .bind(&params_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get(id)
            .await?
            .ok_or_else(|| Error::Internal(format!("session {id} vanished after insert")))
    }

    /// starting -> live, committing the stream handle. Fails with a unique
    /// violation if another session went live for the device first.
    pub async fn mark_live(&self, id: i64, stream_handle: &str) -> Result<StreamSession> {
        sqlx::query("UPDATE stream_sessions SET state = 'live', stream_handle = ? WHERE id = ?")
            .bind(stream_handle)
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("session {id}")))
    }

    /// live -> stopping
    pub async fn mark_stopping(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE stream_sessions SET state = 'stopping' WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// stopping -> stopped
    pub async fn mark_stopped(&self, id: i64) -> Result<StreamSession> {
        sqlx::query("UPDATE stream_sessions SET state = 'stopped', stopped_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("session {id}")))
    }

    /// Any non-terminal state -> error
    pub async fn mark_error(&self, id: i64, message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE stream_sessions
            SET state = 'error', error_message = ?, stopped_at = ?
            WHERE id = ? AND state NOT IN ('stopped', 'error')
            "#,
        )
        .bind(message)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bump per-session counters as the inference layer reports work
    pub async fn record_activity(&self, id: i64, frames: i64, events: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE stream_sessions
            SET frames_processed = frames_processed + ?,
                events_emitted = events_emitted + ?
            WHERE id = ?
            "#,
        )
        .bind(frames)
        .bind(events)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_session(row: sqlx::sqlite::SqliteRow) -> Result<StreamSession> {
    let state_str: String = row.try_get("state")?;
    let state = SessionState::parse(&state_str)
        .ok_or_else(|| Error::Internal(format!("unexpected session state in store: {state_str}")))?;

    let inference_params: Option<serde_json::Value> = row
        .try_get::<Option<String>, _>("inference_params")?
        .map(|s| serde_json::from_str(&s))
        .transpose()?;

    Ok(StreamSession {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        model_id: row.try_get("model_id")?,
        model_version: row.try_get("model_version")?,
        inference_params,
        state,
        stream_handle: row.try_get("stream_handle")?,
        started_at: row.try_get("started_at")?,
        stopped_at: row.try_get("stopped_at")?,
        frames_processed: row.try_get("frames_processed")?,
        events_emitted: row.try_get("events_emitted")?,
        error_message: row.try_get("error_message")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_registry::DeviceRegistry;
    use crate::schema::testing::test_pool;

    fn config() -> ModelConfig {
        ModelConfig {
            model_id: "safety-v2".to_string(),
            model_version: "2.1.0".to_string(),
            inference_params: None,
        }
    }

    async fn seed_device(pool: &SqlitePool) -> i64 {
        DeviceRegistry::new(pool.clone())
            .resolve_or_stub("cam-1")
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_live_uniqueness_enforced_by_store() {
        let pool = test_pool().await;
        let device_id = seed_device(&pool).await;
        let repo = StreamSessionRepository::new(pool);

        let first = repo.insert_starting(device_id, &config()).await.unwrap();
        repo.mark_live(first.id, "h1").await.unwrap();

        let second = repo.insert_starting(device_id, &config()).await.unwrap();
        let err = repo.mark_live(second.id, "h2").await.unwrap_err();
        match err {
            Error::Sqlx(e) => {
                assert!(e
                    .as_database_error()
                    .is_some_and(|db| db.is_unique_violation()));
            }
            other => panic!("expected unique violation, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_find_by_handle_only_matches_live() {
        let pool = test_pool().await;
        let device_id = seed_device(&pool).await;
        let repo = StreamSessionRepository::new(pool);

        let session = repo.insert_starting(device_id, &config()).await.unwrap();
        repo.mark_live(session.id, "h1").await.unwrap();
        assert!(repo.find_by_handle("h1").await.unwrap().is_some());

        repo.mark_stopping(session.id).await.unwrap();
        repo.mark_stopped(session.id).await.unwrap();
        assert!(repo.find_by_handle("h1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_error_skips_terminal_sessions() {
        let pool = test_pool().await;
        let device_id = seed_device(&pool).await;
        let repo = StreamSessionRepository::new(pool);

        let session = repo.insert_starting(device_id, &config()).await.unwrap();
        repo.mark_live(session.id, "h1").await.unwrap();
        repo.mark_stopping(session.id).await.unwrap();
        repo.mark_stopped(session.id).await.unwrap();

        repo.mark_error(session.id, "too late").await.unwrap();
        let fetched = repo.get(session.id).await.unwrap().unwrap();
        assert_eq!(fetched.state, SessionState::Stopped);
        assert!(fetched.error_message.is_none());
    }
}

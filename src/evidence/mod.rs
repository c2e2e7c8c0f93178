//! EvidenceOrchestrator - violation evidence capture
//!
//! ## Responsibilities
//!
//! - Request snapshot/bookmark artifacts from the external video service
//! - Idempotent per (violation, evidence type): one external request per slot
//! - Track async readiness; durable retries that survive restarts
//!
//! Side effects are confined to the evidence row and the external call; the
//! Violation and EventRecord are never mutated here. Whether a failure is
//! surfaced or swallowed is the caller's decision.

mod repository;

pub use repository::EvidenceRepository;

use crate::error::{Error, Result};
use crate::stream_session::{SessionState, StreamSessionRepository};
use crate::video_service::{ArtifactState, VideoService};
use crate::violation::{Violation, ViolationRepository};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Bookmark capture window: 5s before, 10s after the request
const BOOKMARK_BEFORE_S: u32 = 5;
const BOOKMARK_AFTER_S: u32 = 10;

/// Evidence artifact type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    Snapshot,
    Bookmark,
}

impl EvidenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceType::Snapshot => "snapshot",
            EvidenceType::Bookmark => "bookmark",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "snapshot" => Some(EvidenceType::Snapshot),
            "bookmark" => Some(EvidenceType::Bookmark),
            _ => None,
        }
    }
}

/// Evidence capture status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl EvidenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceStatus::Pending => "pending",
            EvidenceStatus::Processing => "processing",
            EvidenceStatus::Ready => "ready",
            EvidenceStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EvidenceStatus::Pending),
            "processing" => Some(EvidenceStatus::Processing),
            "ready" => Some(EvidenceStatus::Ready),
            "failed" => Some(EvidenceStatus::Failed),
            _ => None,
        }
    }
}

/// Persisted evidence record (matches evidence table)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: i64,
    pub violation_id: i64,
    pub evidence_type: EvidenceType,
    pub status: EvidenceStatus,
    /// Artifact id in the external video service
    pub external_id: Option<String>,
    pub retry_count: i64,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub requested_at: DateTime<Utc>,
    pub ready_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_by: String,
}

/// What a capture request did with the (violation, type) slot
#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    /// The slot was claimed and an external request made
    Requested(Evidence),
    /// The slot already existed; no external call was made
    Existing(Evidence),
}

impl CaptureOutcome {
    pub fn evidence(&self) -> &Evidence {
        match self {
            CaptureOutcome::Requested(e) | CaptureOutcome::Existing(e) => e,
        }
    }

    pub fn into_evidence(self) -> Evidence {
        match self {
            CaptureOutcome::Requested(e) | CaptureOutcome::Existing(e) => e,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, CaptureOutcome::Requested(_))
    }
}

/// EvidenceOrchestrator instance
pub struct EvidenceOrchestrator {
    repo: EvidenceRepository,
    violations: ViolationRepository,
    sessions: StreamSessionRepository,
    video: Arc<dyn VideoService>,
    max_retries: i64,
}

impl EvidenceOrchestrator {
    pub fn new(
        repo: EvidenceRepository,
        violations: ViolationRepository,
        sessions: StreamSessionRepository,
        video: Arc<dyn VideoService>,
        max_retries: i64,
    ) -> Self {
        Self {
            repo,
            violations,
            sessions,
            video,
            max_retries,
        }
    }

    /// Capture a snapshot for the violation. Idempotent: a repeat request
    /// returns the existing record regardless of its status.
    pub async fn create_snapshot(
        &self,
        violation_id: i64,
        created_by: &str,
    ) -> Result<CaptureOutcome> {
        self.get_or_create(violation_id, EvidenceType::Snapshot, created_by)
            .await
    }

    /// Capture a video bookmark for the violation (default 15s window).
    pub async fn get_or_create_video(&self, violation_id: i64) -> Result<CaptureOutcome> {
        self.get_or_create(violation_id, EvidenceType::Bookmark, "system")
            .await
    }

    /// Evidence rows for a violation, independently queryable so the UI
    /// never blocks on capture.
    pub async fn list_for_violation(&self, violation_id: i64) -> Result<Vec<Evidence>> {
        self.repo.list_for_violation(violation_id).await
    }

    async fn get_or_create(
        &self,
        violation_id: i64,
        evidence_type: EvidenceType,
        created_by: &str,
    ) -> Result<CaptureOutcome> {
        let violation = self
            .violations
            .get(violation_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("violation {violation_id}")))?;

        // Lookup before anything external: one request per slot, ever.
        if let Some(existing) = self.repo.find(violation_id, evidence_type).await? {
            tracing::debug!(
                violation_id = violation_id,
                evidence_id = existing.id,
                evidence_type = evidence_type.as_str(),
                "Evidence already requested, returning existing record"
            );
            return Ok(CaptureOutcome::Existing(existing));
        }

        let handle = self.live_handle(&violation).await?;

        let evidence_id = match self
            .repo
            .try_insert_pending(violation_id, evidence_type, created_by)
            .await?
        {
            Some(id) => id,
            // Concurrent request won the slot; hand back its row.
            None => {
                return self
                    .repo
                    .find(violation_id, evidence_type)
                    .await?
                    .map(CaptureOutcome::Existing)
                    .ok_or_else(|| {
                        Error::Internal(format!(
                            "evidence slot ({violation_id}, {}) vanished",
                            evidence_type.as_str()
                        ))
                    });
            }
        };

        match self.capture(evidence_type, &handle).await {
            Ok(external_id) => {
                let evidence = self.repo.mark_processing(evidence_id, &external_id).await?;
                tracing::info!(
                    violation_id = violation_id,
                    evidence_id = evidence_id,
                    external_id = %external_id,
                    evidence_type = evidence_type.as_str(),
                    "Evidence capture requested"
                );
                Ok(CaptureOutcome::Requested(evidence))
            }
            Err(e) => {
                self.repo.mark_failed(evidence_id, &e.to_string()).await?;
                Err(Error::VideoService(e))
            }
        }
    }

    async fn capture(
        &self,
        evidence_type: EvidenceType,
        stream_handle: &str,
    ) -> std::result::Result<String, crate::video_service::VideoServiceError> {
        match evidence_type {
            EvidenceType::Snapshot => self.video.create_snapshot(stream_handle).await,
            EvidenceType::Bookmark => {
                self.video
                    .create_bookmark(stream_handle, BOOKMARK_BEFORE_S, BOOKMARK_AFTER_S)
                    .await
            }
        }
    }

    /// The violation's live stream handle, or NoActiveStream.
    async fn live_handle(&self, violation: &Violation) -> Result<String> {
        let session_id = violation.stream_session_id.ok_or_else(|| {
            Error::NoActiveStream(format!("violation {} has no stream session", violation.id))
        })?;

        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("stream session {session_id}")))?;

        if session.state != SessionState::Live {
            return Err(Error::NoActiveStream(format!(
                "session {} is {}, not live",
                session.id, session.state
            )));
        }

        session.stream_handle.clone().ok_or_else(|| {
            Error::NoActiveStream(format!("session {} has no stream handle", session.id))
        })
    }

    /// Drive processing rows forward: ready artifacts are committed, failed
    /// ones retried up to the limit. Retry state lives in the row, so a
    /// restart or cancellation between ticks loses nothing.
    pub async fn refresh_pending(&self) -> Result<()> {
        let rows = self.repo.list_processing().await?;
        for evidence in rows {
            if let Err(e) = self.refresh_one(&evidence).await {
                tracing::warn!(
                    evidence_id = evidence.id,
                    error = %e,
                    "Evidence refresh failed, will retry next tick"
                );
            }
        }
        Ok(())
    }

    async fn refresh_one(&self, evidence: &Evidence) -> Result<()> {
        let Some(external_id) = &evidence.external_id else {
            // Processing rows always carry an artifact id; a bare one is a
            // bug upstream of here.
            return Err(Error::Internal(format!(
                "processing evidence {} has no external id",
                evidence.id
            )));
        };

        match self.video.artifact_status(external_id).await {
            Ok(ArtifactState::Ready) => {
                self.repo.mark_ready(evidence.id).await?;
                tracing::info!(
                    evidence_id = evidence.id,
                    external_id = %external_id,
                    "Evidence ready"
                );
                Ok(())
            }
            Ok(ArtifactState::Processing) => Ok(()),
            Ok(ArtifactState::Failed(message)) => self.retry(evidence, &message).await,
            Err(e) => self.retry(evidence, &e.to_string()).await,
        }
    }

    async fn retry(&self, evidence: &Evidence, message: &str) -> Result<()> {
        let attempts = evidence.retry_count + 1;
        if attempts >= self.max_retries {
            self.repo.mark_failed(evidence.id, message).await?;
            tracing::warn!(
                evidence_id = evidence.id,
                retry_count = attempts,
                error = message,
                "Evidence capture gave up after max retries"
            );
            return Ok(());
        }

        self.repo.record_retry(evidence.id).await?;

        // Re-request the artifact if the stream is still live; if not, the
        // row keeps its counters and waits for the next tick.
        let violation = self
            .violations
            .get(evidence.violation_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("violation {}", evidence.violation_id)))?;

        match self.live_handle(&violation).await {
            Ok(handle) => match self.capture(evidence.evidence_type, &handle).await {
                Ok(external_id) => {
                    self.repo
                        .update_external_id(evidence.id, &external_id)
                        .await?;
                    tracing::info!(
                        evidence_id = evidence.id,
                        retry_count = attempts,
                        external_id = %external_id,
                        "Evidence capture re-requested"
                    );
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!(
                        evidence_id = evidence.id,
                        retry_count = attempts,
                        error = %e,
                        "Evidence re-request failed"
                    );
                    Ok(())
                }
            },
            Err(e) => {
                tracing::debug!(
                    evidence_id = evidence.id,
                    error = %e,
                    "Stream no longer live, retry deferred"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_registry::DeviceRegistry;
    use crate::schema::testing::test_pool;
    use crate::stream_session::{ModelConfig, StreamSessionLifecycle};
    use crate::video_service::fake::FakeVideoService;
    use crate::violation::ViolationKind;
    use sqlx::SqlitePool;

    struct Fixture {
        orchestrator: EvidenceOrchestrator,
        video: Arc<FakeVideoService>,
        violation_id: i64,
    }

    /// Device + live session + open violation bound to that session
    async fn fixture(pool: &SqlitePool, max_retries: i64) -> Fixture {
        let video = Arc::new(FakeVideoService::new());
        let device = DeviceRegistry::new(pool.clone())
            .resolve_or_stub("cam-1")
            .await
            .unwrap();

        let sessions = StreamSessionRepository::new(pool.clone());
        let lifecycle = StreamSessionLifecycle::new(sessions.clone(), video.clone());
        let session = lifecycle
            .start(
                &device,
                ModelConfig {
                    model_id: "safety-v2".to_string(),
                    model_version: "2.1.0".to_string(),
                    inference_params: None,
                },
            )
            .await
            .unwrap();

        let violations = ViolationRepository::new(pool.clone());
        let violation_id = violations
            .try_insert_open(
                device.id,
                Some(session.id),
                ViolationKind::FallDetected,
                0.85,
                Utc::now(),
                &device.name,
            )
            .await
            .unwrap()
            .unwrap();

        let orchestrator = EvidenceOrchestrator::new(
            EvidenceRepository::new(pool.clone()),
            violations,
            sessions,
            video.clone(),
            max_retries,
        );

        Fixture {
            orchestrator,
            video,
            violation_id,
        }
    }

    #[tokio::test]
    async fn test_snapshot_advances_to_processing() {
        let pool = test_pool().await;
        let fx = fixture(&pool, 5).await;

        let outcome = fx
            .orchestrator
            .create_snapshot(fx.violation_id, "op1")
            .await
            .unwrap();
        assert!(outcome.is_new());
        let evidence = outcome.into_evidence();
        assert_eq!(evidence.status, EvidenceStatus::Processing);
        assert!(evidence.external_id.is_some());
        assert_eq!(evidence.created_by, "op1");
    }

    #[tokio::test]
    async fn test_snapshot_is_idempotent() {
        let pool = test_pool().await;
        let fx = fixture(&pool, 5).await;

        let first = fx
            .orchestrator
            .create_snapshot(fx.violation_id, "op1")
            .await
            .unwrap();
        let second = fx
            .orchestrator
            .create_snapshot(fx.violation_id, "op2")
            .await
            .unwrap();

        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(first.evidence().id, second.evidence().id);
        assert_eq!(fx.video.snapshot_calls(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_and_bookmark_are_separate_slots() {
        let pool = test_pool().await;
        let fx = fixture(&pool, 5).await;

        let snapshot = fx
            .orchestrator
            .create_snapshot(fx.violation_id, "op1")
            .await
            .unwrap()
            .into_evidence();
        let bookmark = fx
            .orchestrator
            .get_or_create_video(fx.violation_id)
            .await
            .unwrap()
            .into_evidence();

        assert_ne!(snapshot.id, bookmark.id);
        assert_eq!(fx.video.last_bookmark_window(), Some((5, 10)));

        // Bookmark slot is idempotent too: one external call total.
        let repeat = fx
            .orchestrator
            .get_or_create_video(fx.violation_id)
            .await
            .unwrap();
        assert!(!repeat.is_new());
        assert_eq!(repeat.evidence().id, bookmark.id);
        assert_eq!(fx.video.bookmark_calls(), 1);

        let all = fx
            .orchestrator
            .list_for_violation(fx.violation_id)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_no_session_means_no_active_stream() {
        let pool = test_pool().await;
        let fx = fixture(&pool, 5).await;

        // A violation with no session reference at all.
        let device = DeviceRegistry::new(pool.clone())
            .resolve_or_stub("cam-2")
            .await
            .unwrap();
        let orphan_id = ViolationRepository::new(pool.clone())
            .try_insert_open(
                device.id,
                None,
                ViolationKind::PpeViolation,
                0.5,
                Utc::now(),
                &device.name,
            )
            .await
            .unwrap()
            .unwrap();

        let err = fx
            .orchestrator
            .create_snapshot(orphan_id, "op1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoActiveStream(_)));
    }

    #[tokio::test]
    async fn test_capture_failure_is_persisted_and_surfaced() {
        let pool = test_pool().await;
        let fx = fixture(&pool, 5).await;
        fx.video.fail_captures(true);

        let err = fx
            .orchestrator
            .create_snapshot(fx.violation_id, "op1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VideoService(_)));

        let rows = fx
            .orchestrator
            .list_for_violation(fx.violation_id)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, EvidenceStatus::Failed);
        assert!(rows[0].error_message.is_some());

        // The failed slot is still the slot: no second external request.
        fx.video.fail_captures(false);
        let again = fx
            .orchestrator
            .create_snapshot(fx.violation_id, "op1")
            .await
            .unwrap();
        assert!(!again.is_new());
        assert_eq!(again.evidence().id, rows[0].id);
        assert_eq!(again.evidence().status, EvidenceStatus::Failed);
        assert_eq!(fx.video.snapshot_calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_commits_ready_artifacts() {
        let pool = test_pool().await;
        let fx = fixture(&pool, 5).await;

        let evidence = fx
            .orchestrator
            .create_snapshot(fx.violation_id, "op1")
            .await
            .unwrap()
            .into_evidence();
        fx.video.complete_all_artifacts();

        fx.orchestrator.refresh_pending().await.unwrap();

        let rows = fx
            .orchestrator
            .list_for_violation(fx.violation_id)
            .await
            .unwrap();
        assert_eq!(rows[0].id, evidence.id);
        assert_eq!(rows[0].status, EvidenceStatus::Ready);
        assert!(rows[0].ready_at.is_some());
    }

    #[tokio::test]
    async fn test_refresh_retries_then_gives_up() {
        let pool = test_pool().await;
        let fx = fixture(&pool, 2).await;

        fx.orchestrator
            .create_snapshot(fx.violation_id, "op1")
            .await
            .unwrap();
        fx.video.fail_status(true);

        // First failure: durable retry counter.
        fx.orchestrator.refresh_pending().await.unwrap();
        let rows = fx
            .orchestrator
            .list_for_violation(fx.violation_id)
            .await
            .unwrap();
        assert_eq!(rows[0].status, EvidenceStatus::Processing);
        assert_eq!(rows[0].retry_count, 1);
        assert!(rows[0].last_retry_at.is_some());

        // Second failure reaches the limit.
        fx.orchestrator.refresh_pending().await.unwrap();
        let rows = fx
            .orchestrator
            .list_for_violation(fx.violation_id)
            .await
            .unwrap();
        assert_eq!(rows[0].status, EvidenceStatus::Failed);
        assert!(rows[0].error_message.is_some());
    }
}

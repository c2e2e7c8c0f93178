//! In-memory video service for tests

use super::{ArtifactState, VideoResult, VideoService, VideoServiceError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct FakeState {
    /// device external id -> stream handle
    live: HashMap<String, String>,
    /// artifact id -> state
    artifacts: HashMap<String, ArtifactState>,
    snapshot_calls: u32,
    bookmark_calls: u32,
    last_bookmark_window: Option<(u32, u32)>,
    next_artifact: u32,
    fail_captures: bool,
    fail_status: bool,
}

/// Fake video service with scriptable failures and call counters
#[derive(Default)]
pub struct FakeVideoService {
    state: Mutex<FakeState>,
}

impl FakeVideoService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent snapshot/bookmark calls fail with a server error
    pub fn fail_captures(&self, fail: bool) {
        self.state.lock().unwrap().fail_captures = fail;
    }

    /// Make subsequent artifact status polls fail with a server error
    pub fn fail_status(&self, fail: bool) {
        self.state.lock().unwrap().fail_status = fail;
    }

    /// Mark every requested artifact ready
    pub fn complete_all_artifacts(&self) {
        let mut state = self.state.lock().unwrap();
        for status in state.artifacts.values_mut() {
            *status = ArtifactState::Ready;
        }
    }

    pub fn snapshot_calls(&self) -> u32 {
        self.state.lock().unwrap().snapshot_calls
    }

    pub fn bookmark_calls(&self) -> u32 {
        self.state.lock().unwrap().bookmark_calls
    }

    pub fn last_bookmark_window(&self) -> Option<(u32, u32)> {
        self.state.lock().unwrap().last_bookmark_window
    }
}

#[async_trait]
impl VideoService for FakeVideoService {
    async fn start_stream(&self, device_external_id: &str) -> VideoResult<String> {
        let mut state = self.state.lock().unwrap();
        let handle = format!("stream-{device_external_id}");
        state.live.insert(device_external_id.to_string(), handle.clone());
        Ok(handle)
    }

    async fn stop_stream(&self, device_external_id: &str) -> VideoResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.live.remove(device_external_id).is_none() {
            return Err(VideoServiceError::NotFound(format!(
                "no stream for {device_external_id}"
            )));
        }
        Ok(())
    }

    async fn create_snapshot(&self, stream_handle: &str) -> VideoResult<String> {
        let mut state = self.state.lock().unwrap();
        state.snapshot_calls += 1;
        if state.fail_captures {
            return Err(VideoServiceError::Server {
                status: 500,
                message: "capture failed".to_string(),
            });
        }
        if !state.live.values().any(|h| h == stream_handle) {
            return Err(VideoServiceError::StreamNotLive(stream_handle.to_string()));
        }
        state.next_artifact += 1;
        let id = format!("art-{}", state.next_artifact);
        state.artifacts.insert(id.clone(), ArtifactState::Processing);
        Ok(id)
    }

    async fn create_bookmark(
        &self,
        stream_handle: &str,
        before_s: u32,
        after_s: u32,
    ) -> VideoResult<String> {
        let mut state = self.state.lock().unwrap();
        state.bookmark_calls += 1;
        state.last_bookmark_window = Some((before_s, after_s));
        if state.fail_captures {
            return Err(VideoServiceError::Server {
                status: 500,
                message: "capture failed".to_string(),
            });
        }
        if !state.live.values().any(|h| h == stream_handle) {
            return Err(VideoServiceError::StreamNotLive(stream_handle.to_string()));
        }
        state.next_artifact += 1;
        let id = format!("art-{}", state.next_artifact);
        state.artifacts.insert(id.clone(), ArtifactState::Processing);
        Ok(id)
    }

    async fn artifact_status(&self, artifact_id: &str) -> VideoResult<ArtifactState> {
        let state = self.state.lock().unwrap();
        if state.fail_status {
            return Err(VideoServiceError::Server {
                status: 502,
                message: "status poll failed".to_string(),
            });
        }
        state
            .artifacts
            .get(artifact_id)
            .cloned()
            .ok_or_else(|| VideoServiceError::NotFound(artifact_id.to_string()))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

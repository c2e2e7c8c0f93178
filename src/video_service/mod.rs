//! External video service client
//!
//! ## Responsibilities
//!
//! - Media-plane adapter: stream start/stop, snapshot and bookmark capture
//! - Artifact readiness polling
//! - Translate transport failures into this system's typed errors so no
//!   transport detail leaks into persisted fields
//!
//! The trait is the seam the rest of the crate depends on; the reqwest
//! implementation talks to the service's HTTP API. Tests use the fake.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[cfg(test)]
pub(crate) mod fake;

/// Result alias for video service calls
pub type VideoResult<T> = std::result::Result<T, VideoServiceError>;

/// Typed failures from the external video service
#[derive(Debug, Clone, thiserror::Error)]
pub enum VideoServiceError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("not found upstream: {0}")]
    NotFound(String),

    #[error("stream not live: {0}")]
    StreamNotLive(String),

    #[error("upstream server error ({status}): {message}")]
    Server { status: u16, message: String },
}

impl From<reqwest::Error> for VideoServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            VideoServiceError::Timeout(e.to_string())
        } else {
            VideoServiceError::Connection(e.to_string())
        }
    }
}

/// Readiness state of a requested artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactState {
    Processing,
    Ready,
    Failed(String),
}

/// Media-plane operations consumed by session lifecycle and evidence capture
#[async_trait]
pub trait VideoService: Send + Sync {
    /// Start streaming a device; returns the stream handle.
    async fn start_stream(&self, device_external_id: &str) -> VideoResult<String>;

    /// Stop streaming a device. `NotFound` means already stopped upstream.
    async fn stop_stream(&self, device_external_id: &str) -> VideoResult<()>;

    /// Capture a snapshot from a live stream; returns the artifact id.
    async fn create_snapshot(&self, stream_handle: &str) -> VideoResult<String>;

    /// Create a video bookmark around "now"; returns the artifact id.
    async fn create_bookmark(
        &self,
        stream_handle: &str,
        before_s: u32,
        after_s: u32,
    ) -> VideoResult<String>;

    /// Poll readiness of a previously requested artifact.
    async fn artifact_status(&self, artifact_id: &str) -> VideoResult<ArtifactState>;

    /// Reachability probe for the health endpoint.
    async fn health_check(&self) -> bool;
}

#[derive(Debug, Deserialize)]
struct StreamStartResponse {
    stream_id: String,
}

#[derive(Debug, Deserialize)]
struct ArtifactResponse {
    artifact_id: String,
}

#[derive(Debug, Deserialize)]
struct ArtifactStatusResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP implementation against the video service API
pub struct HttpVideoService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpVideoService {
    /// Create a new client for the given base URL
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url }
    }

    /// Map a non-success response to a typed error
    async fn error_for(resp: reqwest::Response) -> VideoServiceError {
        let status = resp.status();
        let message = resp.text().await.unwrap_or_default();

        match status.as_u16() {
            404 => VideoServiceError::NotFound(message),
            409 => VideoServiceError::StreamNotLive(message),
            code => VideoServiceError::Server { status: code, message },
        }
    }
}

#[async_trait]
impl VideoService for HttpVideoService {
    async fn start_stream(&self, device_external_id: &str) -> VideoResult<String> {
        let url = format!(
            "{}/v1/streams/{}/start",
            self.base_url,
            urlencoding::encode(device_external_id)
        );

        let resp = self.client.post(&url).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_for(resp).await);
        }

        let body: StreamStartResponse = resp.json().await?;
        tracing::debug!(
            device = device_external_id,
            stream_id = %body.stream_id,
            "Stream started upstream"
        );
        Ok(body.stream_id)
    }

    async fn stop_stream(&self, device_external_id: &str) -> VideoResult<()> {
        let url = format!(
            "{}/v1/streams/{}/stop",
            self.base_url,
            urlencoding::encode(device_external_id)
        );

        let resp = self.client.post(&url).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_for(resp).await);
        }

        Ok(())
    }

    async fn create_snapshot(&self, stream_handle: &str) -> VideoResult<String> {
        let url = format!(
            "{}/v1/streams/{}/snapshot",
            self.base_url,
            urlencoding::encode(stream_handle)
        );

        let resp = self.client.post(&url).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_for(resp).await);
        }

        let body: ArtifactResponse = resp.json().await?;
        Ok(body.artifact_id)
    }

    async fn create_bookmark(
        &self,
        stream_handle: &str,
        before_s: u32,
        after_s: u32,
    ) -> VideoResult<String> {
        let url = format!(
            "{}/v1/streams/{}/bookmark",
            self.base_url,
            urlencoding::encode(stream_handle)
        );

        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "before_s": before_s,
                "after_s": after_s,
            }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_for(resp).await);
        }

        let body: ArtifactResponse = resp.json().await?;
        Ok(body.artifact_id)
    }

    async fn artifact_status(&self, artifact_id: &str) -> VideoResult<ArtifactState> {
        let url = format!(
            "{}/v1/artifacts/{}",
            self.base_url,
            urlencoding::encode(artifact_id)
        );

        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_for(resp).await);
        }

        let body: ArtifactStatusResponse = resp.json().await?;
        match body.status.as_str() {
            "ready" => Ok(ArtifactState::Ready),
            "failed" => Ok(ArtifactState::Failed(
                body.error.unwrap_or_else(|| "unknown upstream failure".to_string()),
            )),
            _ => Ok(ArtifactState::Processing),
        }
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/v1/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

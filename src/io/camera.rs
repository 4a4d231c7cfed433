//! HTTP camera: frame source and health probe
//!
//! The camera exposes `GET /status` (liveness) and `GET /capture` (latest JPEG).

use crate::domain::types::epoch_ms;
use crate::infra::config::Config;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

/// Latest encoded frame from the camera. Opaque to the core.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,
    pub captured_at_ms: u64,
}

impl Frame {
    pub fn new(data: Bytes) -> Self {
        Self { data, captured_at_ms: epoch_ms() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("camera request timed out")]
    Timeout,
    #[error("camera returned HTTP {0}")]
    Status(u16),
    #[error("camera transport error: {0}")]
    Transport(String),
    #[error("camera returned an empty frame")]
    EmptyFrame,
}

impl From<reqwest::Error> for CameraError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CameraError::Timeout
        } else {
            CameraError::Transport(e.to_string())
        }
    }
}

/// Source of the latest decoded frame
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn latest_frame(&self) -> Result<Frame, CameraError>;
}

/// Liveness check used by the connection supervisor
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<(), CameraError>;
}

pub struct HttpCamera {
    client: reqwest::Client,
    status_url: String,
    capture_url: String,
    probe_timeout: Duration,
    frame_timeout: Duration,
}

impl HttpCamera {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let base = config.camera_url().trim_end_matches('/');
        // Client is created once for connection reuse
        let client = reqwest::Client::builder().http1_only().build()?;
        Ok(Self {
            client,
            status_url: format!("{}/status", base),
            capture_url: format!("{}/capture", base),
            probe_timeout: config.probe_timeout(),
            frame_timeout: config.frame_timeout(),
        })
    }

    pub fn status_url(&self) -> &str {
        &self.status_url
    }

    pub fn capture_url(&self) -> &str {
        &self.capture_url
    }
}

#[async_trait]
impl HealthProbe for HttpCamera {
    async fn probe(&self) -> Result<(), CameraError> {
        let response =
            self.client.get(&self.status_url).timeout(self.probe_timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CameraError::Status(status.as_u16()));
        }
        debug!(url = %self.status_url, "camera_probe_ok");
        Ok(())
    }
}

#[async_trait]
impl FrameSource for HttpCamera {
    async fn latest_frame(&self) -> Result<Frame, CameraError> {
        let response =
            self.client.get(&self.capture_url).timeout(self.frame_timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CameraError::Status(status.as_u16()));
        }
        let data = response.bytes().await?;
        if data.is_empty() {
            return Err(CameraError::EmptyFrame);
        }
        debug!(bytes = %data.len(), "camera_frame_fetched");
        Ok(Frame::new(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_built_from_base() {
        let config = Config::from_toml_str("[camera]\nbase_url = \"http://10.0.0.7/\"\n").unwrap();
        let camera = HttpCamera::new(&config).unwrap();
        assert_eq!(camera.status_url(), "http://10.0.0.7/status");
        assert_eq!(camera.capture_url(), "http://10.0.0.7/capture");
    }
}

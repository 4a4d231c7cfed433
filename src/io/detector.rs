//! HTTP client for the external object-detection service
//!
//! Request: `POST {url}` with the raw frame bytes.
//! Response: `{"detections":[{"class":"person","score":0.91,"bbox":[x,y,w,h]}]}`

use crate::domain::types::{Detection, RawDetection};
use crate::infra::config::Config;
use crate::io::camera::Frame;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("detector timed out")]
    Timeout,
    #[error("detector returned HTTP {0}")]
    Status(u16),
    #[error("detector transport error: {0}")]
    Transport(String),
    #[error("malformed detector response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for DetectError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DetectError::Timeout
        } else {
            DetectError::Transport(e.to_string())
        }
    }
}

/// Object detector consumed once per tick
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectError>;
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<RawDetection>,
}

/// Decode a detector response body
pub fn parse_detections(body: &[u8]) -> Result<Vec<Detection>, DetectError> {
    let response: DetectResponse =
        serde_json::from_slice(body).map_err(|e| DetectError::Decode(e.to_string()))?;
    Ok(response.detections.into_iter().map(Detection::from).collect())
}

pub struct HttpDetector {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpDetector {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().http1_only().build()?;
        Ok(Self {
            client,
            url: config.detector_url().to_string(),
            timeout: config.detector_timeout(),
        })
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .header("content-type", "image/jpeg")
            .body(frame.data.clone())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DetectError::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        let detections = parse_detections(&body)?;
        debug!(count = %detections.len(), "detector_response");
        Ok(detections)
    }
}

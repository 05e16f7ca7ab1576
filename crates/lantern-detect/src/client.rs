//! HTTP detector client.

use crate::error::{ClientError, Result};
use crate::wire::{DetectRequest, DetectResponse};
use async_trait::async_trait;
use lantern_core::DetectorConfig;
use lantern_scanner::{Detection, DetectionError, Detector};
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;

const DETECT_PATH: &str = "/api/v1/detect";

/// Longest error body kept in a `Service` error message.
const MAX_ERROR_BODY: usize = 512;

/// Detector backed by a remote detection service.
///
/// Every call carries two deadlines: the per-call `timeout` handed over by the
/// orchestrator, which is also sent to the service, and the client's
/// transport timeout, which is configured to be longer.
#[derive(Debug, Clone)]
pub struct HttpDetector {
    client: Client,
    base_url: String,
}

impl HttpDetector {
    /// Create a detector for the service at `base_url`.
    ///
    /// # Errors
    /// Returns error if the URL is not http(s) or the HTTP client cannot be
    /// created.
    pub fn new(base_url: impl Into<String>, transport_timeout: Duration) -> Result<Self> {
        let base_url = base_url.into();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::InvalidEndpoint {
                endpoint: base_url,
                reason: "expected an http:// or https:// URL".to_string(),
            });
        }

        let client = Client::builder().timeout(transport_timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create a detector from the `[detector]` configuration section.
    ///
    /// # Errors
    /// Returns error if the configured endpoint is unusable.
    pub fn from_config(config: &DetectorConfig) -> Result<Self> {
        Self::new(
            config.endpoint.clone(),
            Duration::from_millis(config.transport_timeout_ms),
        )
    }

    /// Full URL of the detect endpoint.
    #[must_use]
    pub fn detect_url(&self) -> String {
        format!("{}{DETECT_PATH}", self.base_url)
    }

    async fn call(
        &self,
        content: &str,
        thresholds: &BTreeMap<String, f64>,
        timeout: Duration,
    ) -> std::result::Result<Detection, DetectionError> {
        let response = self
            .client
            .post(self.detect_url())
            .json(&DetectRequest::new(content, thresholds, timeout))
            .send()
            .await
            .map_err(|e| map_transport_error(&e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DetectionError::Service {
                status: Some(status.as_u16()),
                message: truncate(body.trim(), MAX_ERROR_BODY),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| map_transport_error(&e, timeout))?;
        DetectResponse::decode(&body)
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(
        &self,
        content: &str,
        thresholds: &BTreeMap<String, f64>,
        timeout: Duration,
    ) -> std::result::Result<Detection, DetectionError> {
        tracing::debug!(bytes = content.len(), "Sending content to detector");

        match tokio::time::timeout(timeout, self.call(content, thresholds, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(DetectionError::Timeout { timeout }),
        }
    }
}

/// Classify a reqwest failure by whether retrying can help.
fn map_transport_error(error: &reqwest::Error, timeout: Duration) -> DetectionError {
    if error.is_timeout() {
        DetectionError::Timeout { timeout }
    } else if error.is_decode() {
        DetectionError::Service {
            status: error.status().map(|s| s.as_u16()),
            message: format!("undecodable detector response: {error}"),
        }
    } else {
        DetectionError::Connection {
            message: error.to_string(),
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

//! Request and response bodies of `POST /api/v1/detect`.

use lantern_core::{CategorySummary, PiiEntity};
use lantern_scanner::{Detection, DetectionError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DetectRequest<'a> {
    pub content: &'a str,
    pub thresholds: &'a BTreeMap<String, f64>,
    pub timeout_ms: u64,
}

impl<'a> DetectRequest<'a> {
    pub(crate) fn new(
        content: &'a str,
        thresholds: &'a BTreeMap<String, f64>,
        timeout: Duration,
    ) -> Self {
        Self {
            content,
            thresholds,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DetectResponse {
    #[serde(default)]
    pub entities: Vec<PiiEntity>,
    #[serde(default)]
    pub summary: CategorySummary,
}

impl DetectResponse {
    /// Decode a response body, rejecting entities the log could not store.
    pub(crate) fn decode(body: &[u8]) -> Result<Detection, DetectionError> {
        let response: Self = serde_json::from_slice(body).map_err(|e| DetectionError::Service {
            status: None,
            message: format!("undecodable detector response: {e}"),
        })?;

        if let Some(entity) = response
            .entities
            .iter()
            .find(|e| !(0.0..=1.0).contains(&e.confidence))
        {
            return Err(DetectionError::Service {
                status: None,
                message: format!(
                    "detector returned confidence {} for {}",
                    entity.confidence, entity.entity_type
                ),
            });
        }

        Ok(Detection {
            entities: response.entities,
            summary: response.summary,
        })
    }
}

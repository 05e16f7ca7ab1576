//! Detector abstraction.
//!
//! The detection engine is a black box: it receives text plus per-type
//! thresholds and returns masked entities.

use crate::error::DetectionError;
use async_trait::async_trait;
use lantern_core::{CategorySummary, PiiEntity};
use std::collections::BTreeMap;
use std::time::Duration;

/// Entities found in one piece of content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    /// Detected entities with masked context
    pub entities: Vec<PiiEntity>,
    /// Detector-reported counts by entity type
    pub summary: CategorySummary,
}

/// A PII detection service.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Analyse `content` with the given per-type thresholds.
    ///
    /// Implementations should give up after `timeout` with
    /// [`DetectionError::Timeout`]; the orchestrator enforces the same
    /// deadline around the call regardless.
    async fn detect(
        &self,
        content: &str,
        thresholds: &BTreeMap<String, f64>,
        timeout: Duration,
    ) -> Result<Detection, DetectionError>;
}

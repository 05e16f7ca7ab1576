//! Detection settings consumed read-only by the scanner.

use crate::error::{ConfigError, ConfigResult};
use crate::events::PiiEntity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Enablement and confidence threshold for one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSetting {
    /// Whether entities of this type are surfaced at all
    pub enabled: bool,
    /// Minimum confidence for an entity to surface
    pub threshold: f64,
}

impl Default for DetectorSetting {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.5,
        }
    }
}

/// Per-type detector enablement and thresholds.
///
/// Entity types without an explicit entry are enabled with
/// `default_threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Threshold for types without an explicit setting
    pub default_threshold: f64,
    /// Settings keyed by entity type
    pub detectors: BTreeMap<String, DetectorSetting>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let detectors = [
            ("EMAIL", 0.5),
            ("PHONE", 0.6),
            ("IBAN", 0.7),
            ("CREDIT_CARD", 0.7),
            ("SSN", 0.7),
        ]
        .into_iter()
        .map(|(entity_type, threshold)| {
            (
                entity_type.to_string(),
                DetectorSetting {
                    enabled: true,
                    threshold,
                },
            )
        })
        .collect();

        Self {
            default_threshold: 0.5,
            detectors,
        }
    }
}

impl DetectionConfig {
    /// Whether entities of `entity_type` may surface.
    #[must_use]
    pub fn is_enabled(&self, entity_type: &str) -> bool {
        self.detectors.get(entity_type).map_or(true, |s| s.enabled)
    }

    /// Confidence threshold for `entity_type`.
    #[must_use]
    pub fn threshold_for(&self, entity_type: &str) -> f64 {
        self.detectors
            .get(entity_type)
            .map_or(self.default_threshold, |s| s.threshold)
    }

    /// Thresholds of the enabled types, as sent to the detector.
    #[must_use]
    pub fn thresholds(&self) -> BTreeMap<String, f64> {
        self.detectors
            .iter()
            .filter(|(_, setting)| setting.enabled)
            .map(|(entity_type, setting)| (entity_type.clone(), setting.threshold))
            .collect()
    }

    /// Whether a detected entity surfaces in a scan event.
    #[must_use]
    pub fn surfaces(&self, entity: &PiiEntity) -> bool {
        self.is_enabled(&entity.entity_type)
            && entity.confidence >= self.threshold_for(&entity.entity_type)
    }

    /// Keep only the entities that surface.
    #[must_use]
    pub fn filter(&self, entities: Vec<PiiEntity>) -> Vec<PiiEntity> {
        entities.into_iter().filter(|e| self.surfaces(e)).collect()
    }

    /// Check that every threshold lies in `[0.0, 1.0]`.
    pub fn validate(&self) -> ConfigResult<()> {
        let in_range = |t: f64| (0.0..=1.0).contains(&t);
        if !in_range(self.default_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "detector.detection.default_threshold".to_string(),
                reason: format!("{} is outside 0.0..=1.0", self.default_threshold),
            });
        }
        for (entity_type, setting) in &self.detectors {
            if !in_range(setting.threshold) {
                return Err(ConfigError::InvalidValue {
                    field: format!("detector.detection.detectors.{entity_type}.threshold"),
                    reason: format!("{} is outside 0.0..=1.0", setting.threshold),
                });
            }
        }
        Ok(())
    }
}

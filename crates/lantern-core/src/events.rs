//! Scan events: the append-only audit trail and live-stream payload.
//!
//! A [`ScanEvent`] serializes to the wire contract exposed to live
//! subscribers. Optional fields are omitted when absent, so a
//! `SPACE_COMPLETED` event carries no page fields at all.

use crate::error::LanternError;
use crate::types::{ScanId, SpaceKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Counts of detected entities keyed by entity type.
pub type CategorySummary = BTreeMap<String, u64>;

/// Discriminator of a scan event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanEventType {
    /// A space scan acquired its checkpoint and began (or resumed)
    Started,
    /// A page body was analysed
    PageScanned,
    /// A page attachment was analysed
    AttachmentScanned,
    /// Every item of a space was processed
    SpaceCompleted,
    /// Every requested space reached a terminal outcome
    ScanCompleted,
    /// An item or space failed
    Error,
}

impl ScanEventType {
    /// Storage representation of the event type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::PageScanned => "PAGE_SCANNED",
            Self::AttachmentScanned => "ATTACHMENT_SCANNED",
            Self::SpaceCompleted => "SPACE_COMPLETED",
            Self::ScanCompleted => "SCAN_COMPLETED",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for ScanEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanEventType {
    type Err = LanternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTED" => Ok(Self::Started),
            "PAGE_SCANNED" => Ok(Self::PageScanned),
            "ATTACHMENT_SCANNED" => Ok(Self::AttachmentScanned),
            "SPACE_COMPLETED" => Ok(Self::SpaceCompleted),
            "SCAN_COMPLETED" => Ok(Self::ScanCompleted),
            "ERROR" => Ok(Self::Error),
            other => Err(LanternError::Validation(format!(
                "unknown scan event type '{other}'"
            ))),
        }
    }
}

/// One piece of personal information found by the detector.
///
/// Only the masked context is ever kept; the raw value never reaches the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PiiEntity {
    /// Detector-defined entity type, e.g. `EMAIL` or `SSN`
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Human-readable label
    pub label: String,
    /// Detector confidence between 0.0 and 1.0
    pub confidence: f64,
    /// Redacted snippet around the match
    pub masked_context: String,
}

/// Count entities by type.
#[must_use]
pub fn summarize_entities(entities: &[PiiEntity]) -> CategorySummary {
    let mut summary = CategorySummary::new();
    for entity in entities {
        *summary.entry(entity.entity_type.clone()).or_insert(0) += 1;
    }
    summary
}

/// One immutable fact about scan progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEvent {
    /// Scan the event belongs to
    pub scan_id: ScanId,
    /// Space the event is about (`*` for scan-level events)
    pub space_key: SpaceKey,
    /// Event discriminator
    pub event_type: ScanEventType,
    /// Per-scan monotonic sequence, used as the reconnect cursor
    pub sequence: u64,
    /// When the event was produced
    pub timestamp: DateTime<Utc>,
    /// Page the event is about
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    /// Title of that page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    /// Attachment the event is about
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_name: Option<String>,
    /// Entities surfaced for the item
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detected_entities: Vec<PiiEntity>,
    /// Entity counts by type
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub summary_by_category: CategorySummary,
    /// Progress of the space (or scan) in percent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percentage: Option<f64>,
    /// Failure description for ERROR events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ScanEvent {
    /// Create an event without a sequence; the orchestrator assigns one on append.
    #[must_use]
    pub fn new(scan_id: ScanId, space_key: SpaceKey, event_type: ScanEventType) -> Self {
        Self {
            scan_id,
            space_key,
            event_type,
            sequence: 0,
            timestamp: Utc::now(),
            page_id: None,
            page_title: None,
            attachment_name: None,
            detected_entities: Vec::new(),
            summary_by_category: CategorySummary::new(),
            progress_percentage: None,
            error_message: None,
        }
    }

    /// Attach the page the event is about.
    #[must_use]
    pub fn with_page(mut self, page_id: impl Into<String>, page_title: impl Into<String>) -> Self {
        self.page_id = Some(page_id.into());
        self.page_title = Some(page_title.into());
        self
    }

    /// Attach the attachment the event is about.
    #[must_use]
    pub fn with_attachment(mut self, attachment_name: impl Into<String>) -> Self {
        self.attachment_name = Some(attachment_name.into());
        self
    }

    /// Attach detected entities and their per-type summary.
    #[must_use]
    pub fn with_entities(mut self, entities: Vec<PiiEntity>) -> Self {
        self.summary_by_category = summarize_entities(&entities);
        self.detected_entities = entities;
        self
    }

    /// Attach an aggregate summary without individual entities.
    #[must_use]
    pub fn with_summary(mut self, summary: CategorySummary) -> Self {
        self.summary_by_category = summary;
        self
    }

    /// Attach a progress percentage.
    #[must_use]
    pub fn with_progress(mut self, percentage: f64) -> Self {
        self.progress_percentage = Some(percentage);
        self
    }

    /// Attach a failure description.
    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Whether the event reports an analysed page or attachment.
    #[must_use]
    pub fn is_item_event(&self) -> bool {
        matches!(
            self.event_type,
            ScanEventType::PageScanned | ScanEventType::AttachmentScanned
        )
    }
}

/// Aggregate counts reconstructed by folding a sequence of events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanTotals {
    /// PAGE_SCANNED events seen
    pub pages_scanned: u64,
    /// ATTACHMENT_SCANNED events seen
    pub attachments_scanned: u64,
    /// ERROR events seen
    pub error_events: u64,
    /// Entity counts by type across item events
    pub entities: CategorySummary,
}

impl ScanTotals {
    /// Fold one event into the totals.
    pub fn absorb(&mut self, event: &ScanEvent) {
        match event.event_type {
            ScanEventType::PageScanned => self.pages_scanned += 1,
            ScanEventType::AttachmentScanned => self.attachments_scanned += 1,
            ScanEventType::Error => self.error_events += 1,
            _ => return,
        }
        if event.is_item_event() {
            for (category, count) in &event.summary_by_category {
                *self.entities.entry(category.clone()).or_insert(0) += count;
            }
        }
    }

    /// Merge totals from another space.
    pub fn merge(&mut self, other: &ScanTotals) {
        self.pages_scanned += other.pages_scanned;
        self.attachments_scanned += other.attachments_scanned;
        self.error_events += other.error_events;
        for (category, count) in &other.entities {
            *self.entities.entry(category.clone()).or_insert(0) += count;
        }
    }

    /// Total entities across all types.
    #[must_use]
    pub fn entity_count(&self) -> u64 {
        self.entities.values().sum()
    }
}

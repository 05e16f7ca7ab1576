//! Durable per-(scan, space) progress markers.

use crate::error::LanternError;
use crate::types::{ScanId, SpaceKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of one space within one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointStatus {
    /// A process is actively scanning the space
    Running,
    /// Scanning was suspended and can be resumed from the cursor
    Paused,
    /// Every item of the space was processed
    Completed,
    /// The space scan stopped on a non-recoverable failure
    Failed,
}

impl CheckpointStatus {
    /// Storage representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Terminal statuses are kept as history by active-checkpoint resets.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointStatus {
    type Err = LanternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(Self::Running),
            "PAUSED" => Ok(Self::Paused),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(LanternError::Validation(format!(
                "unknown checkpoint status '{other}'"
            ))),
        }
    }
}

/// Position of the last processed item in a space's enumeration order.
///
/// A cursor with only `page_id` means the page itself was processed; with an
/// `attachment_name` it means that attachment of the page was processed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanCursor {
    /// Identifier of the last processed page
    pub page_id: Option<String>,
    /// Name of the last processed attachment of that page
    pub attachment_name: Option<String>,
}

impl ScanCursor {
    /// The cursor of a space where nothing was processed yet.
    #[must_use]
    pub fn initial() -> Self {
        Self::default()
    }

    /// Cursor pointing at a processed page.
    #[must_use]
    pub fn at_page(page_id: impl Into<String>) -> Self {
        Self {
            page_id: Some(page_id.into()),
            attachment_name: None,
        }
    }

    /// Cursor pointing at a processed attachment of a page.
    #[must_use]
    pub fn at_attachment(page_id: impl Into<String>, attachment_name: impl Into<String>) -> Self {
        Self {
            page_id: Some(page_id.into()),
            attachment_name: Some(attachment_name.into()),
        }
    }

    /// Whether no item has been processed yet.
    #[must_use]
    pub fn is_initial(&self) -> bool {
        self.page_id.is_none()
    }
}

/// Durable progress marker for one (scan, space) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanCheckpoint {
    /// Scan this checkpoint belongs to
    pub scan_id: ScanId,
    /// Space this checkpoint tracks
    pub space_key: SpaceKey,
    /// Current lifecycle status
    pub status: CheckpointStatus,
    /// Last processed item
    pub cursor: ScanCursor,
    /// Number of pages consumed so far, in enumeration order
    pub pages_processed: u64,
    /// Number of pages the space had when enumeration last ran
    pub total_pages: u64,
    /// Orchestrator instance that last held the checkpoint
    pub owner: String,
    /// Reason for a FAILED status
    pub error_message: Option<String>,
    /// When the space scan was first started
    pub started_at: DateTime<Utc>,
    /// When the checkpoint was last written
    pub updated_at: DateTime<Utc>,
}

impl ScanCheckpoint {
    /// Create a fresh RUNNING checkpoint with an initial cursor.
    #[must_use]
    pub fn new(scan_id: ScanId, space_key: SpaceKey, owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            scan_id,
            space_key,
            status: CheckpointStatus::Running,
            cursor: ScanCursor::initial(),
            pages_processed: 0,
            total_pages: 0,
            owner: owner.into(),
            error_message: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Whether this checkpoint is RUNNING or PAUSED.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// A RUNNING checkpoint not written since `stale_before` belongs to a dead process.
    #[must_use]
    pub fn is_abandoned(&self, stale_before: DateTime<Utc>) -> bool {
        self.status == CheckpointStatus::Running && self.updated_at < stale_before
    }

    /// Record that a page item was processed.
    pub fn advance_to_page(&mut self, page_id: impl Into<String>) {
        self.cursor = ScanCursor::at_page(page_id);
        self.pages_processed += 1;
        self.updated_at = Utc::now();
    }

    /// Record that an attachment of the current page was processed.
    pub fn advance_to_attachment(
        &mut self,
        page_id: impl Into<String>,
        attachment_name: impl Into<String>,
    ) {
        self.cursor = ScanCursor::at_attachment(page_id, attachment_name);
        self.updated_at = Utc::now();
    }

    /// Move to a new status, recording the failure reason for FAILED.
    pub fn transition(&mut self, status: CheckpointStatus, error_message: Option<String>) {
        self.status = status;
        self.error_message = error_message;
        self.updated_at = Utc::now();
    }
}

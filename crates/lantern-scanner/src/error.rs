//! Scanner error taxonomy.
//!
//! Collaborator failures ([`DetectionError`], [`ContentAccessError`]) carry
//! their own retry classification; [`ScanError`] is what callers of the
//! orchestrator see.

use lantern_core::{LanternError, ScanId, SpaceKey};
use lantern_db::DatabaseError;
use std::time::Duration;
use thiserror::Error;

/// Failure of a detector call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DetectionError {
    /// The detector could not be reached.
    #[error("detector unreachable: {message}")]
    Connection {
        /// Transport-level description
        message: String,
    },

    /// The call did not finish within its deadline.
    #[error("detector timed out after {timeout:?}")]
    Timeout {
        /// Deadline that elapsed
        timeout: Duration,
    },

    /// The detector answered but refused or failed the request.
    #[error("detector service error: {message}")]
    Service {
        /// HTTP status, when the detector reported one
        status: Option<u16>,
        /// Service-provided description
        message: String,
    },
}

impl DetectionError {
    /// Connection and timeout failures are worth retrying; service failures are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Failure of a content-source call. Always treated as transient.
#[derive(Debug, Error)]
pub enum ContentAccessError {
    /// The content source could not be read.
    #[error("content source transport error: {0}")]
    Transport(String),

    /// The call did not finish within its deadline.
    #[error("content source timed out after {0:?}")]
    Timeout(Duration),

    /// Local I/O failure of a file-backed source.
    #[error("content source I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the scan orchestrator.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Another process already holds RUNNING for this space in this scan.
    #[error("space {space_key} is already being scanned in scan {scan_id}")]
    CheckpointConflict {
        /// Scan of the contested checkpoint
        scan_id: ScanId,
        /// Space that is already being scanned
        space_key: SpaceKey,
    },

    /// The content source has no space with this key.
    #[error("space {space_key} not found")]
    SpaceNotFound {
        /// Requested key
        space_key: SpaceKey,
    },

    /// Detector call failed.
    #[error("detection failed: {0}")]
    Detection(#[from] DetectionError),

    /// Content source call failed.
    #[error("content access failed: {0}")]
    ContentAccess(#[from] ContentAccessError),

    /// Checkpoint or event storage failed.
    #[error("store error: {0}")]
    Store(DatabaseError),

    /// Invalid identifiers or configuration.
    #[error(transparent)]
    Core(#[from] LanternError),
}

impl From<DatabaseError> for ScanError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::CheckpointConflict { scan_id, space_key } => {
                Self::CheckpointConflict { scan_id, space_key }
            }
            other => Self::Store(other),
        }
    }
}

/// Result type alias for scanner operations.
pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(DetectionError::Connection {
            message: "refused".to_string()
        }
        .is_retryable());
        assert!(DetectionError::Timeout {
            timeout: Duration::from_secs(8)
        }
        .is_retryable());
        assert!(!DetectionError::Service {
            status: Some(422),
            message: "unsupported content".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_store_conflict_maps_to_scan_conflict() {
        let err: ScanError = DatabaseError::CheckpointConflict {
            scan_id: ScanId::new("scan-1").expect("valid scan id"),
            space_key: SpaceKey::new("DOCS").expect("valid space key"),
        }
        .into();
        assert!(matches!(err, ScanError::CheckpointConflict { .. }));

        let err: ScanError = DatabaseError::Unavailable("disk full".to_string()).into();
        assert!(matches!(err, ScanError::Store(_)));
    }
}

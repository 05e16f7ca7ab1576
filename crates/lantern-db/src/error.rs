//! Database error types.
//!
//! Provides error handling for checkpoint and event storage using `thiserror`.

use lantern_core::{ScanId, SpaceKey};
use thiserror::Error;

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to open or create database connection.
    #[error("failed to open database: {0}")]
    Open(String),

    /// Migration execution failed.
    #[error("migration failed: {0}")]
    Migration(String),

    /// Another process holds RUNNING for this (scan, space).
    #[error("space {space_key} is already being scanned in scan {scan_id}")]
    CheckpointConflict {
        /// Scan of the contested checkpoint
        scan_id: ScanId,
        /// Space of the contested checkpoint
        space_key: SpaceKey,
    },

    /// An event with this sequence was already appended for the scan.
    #[error("event {sequence} already recorded for scan {scan_id}")]
    DuplicateSequence {
        /// Scan of the rejected event
        scan_id: ScanId,
        /// Rejected sequence number
        sequence: u64,
    },

    /// Failed to decode a stored value.
    #[error("decode error: {0}")]
    Decode(String),

    /// The store refused the write.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Serialization/deserialization of JSON columns failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying `SQLx` error.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error during database operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;

//! Error types for building a detection client.
//!
//! Failures of individual detection calls are reported as
//! [`lantern_scanner::DetectionError`]; this module only covers setup.

use thiserror::Error;

/// Errors that can occur while constructing an [`HttpDetector`](crate::HttpDetector).
#[derive(Error, Debug)]
pub enum ClientError {
    /// The endpoint is not an absolute http(s) URL
    #[error("invalid detector endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        /// Endpoint as configured
        endpoint: String,
        /// What is wrong with it
        reason: String,
    },

    /// The HTTP client could not be created
    #[error("failed to create HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Result type alias for client construction.
pub type Result<T> = std::result::Result<T, ClientError>;

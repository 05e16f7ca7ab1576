//! Core error types for Lantern.
//!
//! Subsystem crates define their own error enums; this module holds the
//! errors raised by the shared types and the configuration layer.

use thiserror::Error;

/// Central error type for the shared data model.
#[derive(Error, Debug)]
pub enum LanternError {
    /// Configuration errors (file loading, parsing, validation)
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors (invalid identifiers, out-of-range values)
    #[error("validation error: {0}")]
    Validation(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to determine config directory path
    #[error("could not determine config directory (XDG base directories not available)")]
    NoConfigDir,

    /// Failed to parse TOML
    #[error("failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// I/O error reading/writing config
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: String,
        /// Reason for invalidity
        reason: String,
    },
}

/// Result type alias using `LanternError`.
pub type Result<T> = std::result::Result<T, LanternError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LanternError::Validation("empty space key".to_string());
        assert_eq!(err.to_string(), "validation error: empty space key");

        let err = ConfigError::InvalidValue {
            field: "scanning.max_concurrent_spaces".to_string(),
            reason: "must be at least 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid config value for scanning.max_concurrent_spaces: must be at least 1"
        );
    }

    #[test]
    fn test_error_from_config() {
        let lantern_err: LanternError = ConfigError::NoConfigDir.into();
        assert!(matches!(lantern_err, LanternError::Config(_)));
    }
}

//! Identifier newtypes shared across Lantern.
//!
//! Scans and spaces are addressed by string identifiers coming from callers
//! and from the content source, so both are validated once at the boundary.

use crate::error::LanternError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Space key used for facts about a whole scan rather than one space.
const SCAN_LEVEL_KEY: &str = "*";

/// Identifier of one scan run over one or more spaces.
///
/// Scan IDs are 1-64 characters of ASCII letters, digits, `-` or `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanId(String);

impl ScanId {
    /// Create a new `ScanId` from a string.
    ///
    /// # Errors
    /// Returns error if the ID is empty, too long or contains other characters.
    pub fn new(id: impl Into<String>) -> Result<Self, LanternError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Create a new random `ScanId` using UUID v4.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> Result<(), LanternError> {
        static SCAN_ID_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex =
            SCAN_ID_REGEX.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid regex"));

        if regex.is_match(id) {
            Ok(())
        } else {
            Err(LanternError::Validation(format!(
                "invalid scan ID: must be 1-64 letters, digits, '-' or '_', got '{id}'"
            )))
        }
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of a top-level content container.
///
/// Space keys are alphanumeric with `-` or `_`, optionally prefixed with `~`
/// for personal spaces. The reserved key `*` addresses the scan as a whole and
/// can only be obtained through [`SpaceKey::scan_level`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpaceKey(String);

impl SpaceKey {
    /// Create a new `SpaceKey` from a string.
    ///
    /// # Errors
    /// Returns error if the key doesn't match the required format.
    pub fn new(key: impl Into<String>) -> Result<Self, LanternError> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    /// The reserved key carried by scan-level events such as `SCAN_COMPLETED`.
    #[must_use]
    pub fn scan_level() -> Self {
        Self(SCAN_LEVEL_KEY.to_string())
    }

    /// Whether this is the reserved scan-level key.
    #[must_use]
    pub fn is_scan_level(&self) -> bool {
        self.0 == SCAN_LEVEL_KEY
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(key: &str) -> Result<(), LanternError> {
        static SPACE_KEY_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = SPACE_KEY_REGEX
            .get_or_init(|| Regex::new(r"^~?[A-Za-z0-9_-]{1,255}$").expect("valid regex"));

        if regex.is_match(key) {
            Ok(())
        } else {
            Err(LanternError::Validation(format!(
                "invalid space key: must be alphanumeric with '-' or '_', got '{key}'"
            )))
        }
    }
}

impl fmt::Display for SpaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

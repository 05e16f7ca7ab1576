//! Lantern Core - Foundation crate for the Lantern scan engine.
//!
//! This crate provides the shared identifiers, the scan data model
//! (checkpoints, events, detected entities), error handling, and
//! configuration that all other Lantern crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Identifier newtypes (`ScanId`, `SpaceKey`)
//! - [`checkpoint`] - Per-(scan, space) progress markers
//! - [`events`] - Append-only scan events and aggregate totals
//! - [`detection`] - Per-type detector enablement and thresholds
//!
//! # Example
//!
//! ```rust
//! use lantern_core::{ScanEvent, ScanEventType, ScanId, SpaceKey};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let event = ScanEvent::new(ScanId::generate(), SpaceKey::new("DOCS")?, ScanEventType::Started);
//! assert!(event.page_id.is_none());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod checkpoint;
pub mod config;
pub mod detection;
pub mod error;
pub mod events;
pub mod types;

// Re-export commonly used types
pub use checkpoint::{CheckpointStatus, ScanCheckpoint, ScanCursor};
pub use config::{AppConfig, DatabaseConfig, DetectorConfig, LoggingConfig, ScanningConfig};
pub use detection::{DetectionConfig, DetectorSetting};
pub use error::{ConfigError, ConfigResult, LanternError, Result};
pub use events::{summarize_entities, CategorySummary, PiiEntity, ScanEvent, ScanEventType, ScanTotals};
pub use types::{ScanId, SpaceKey};

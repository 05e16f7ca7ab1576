//! Lantern Scanner - Resumable PII scan orchestration.
//!
//! This crate drives scans of a hierarchical content source (spaces, pages,
//! attachments) through a PII detector. Progress is checkpointed per space so
//! a restarted process resumes where the last one stopped, and every outcome
//! is recorded in an append-only event log that doubles as the replay source
//! for live subscribers.
//!
//! # Features
//!
//! - Concurrent scanning of multiple spaces with configurable parallelism
//! - Atomic checkpoint acquisition; a space is only ever scanned by one holder
//! - Retry logic with exponential backoff for transient detector failures
//! - Per-scan monotonic event sequencing for reconnect semantics
//! - Live subscriptions that replay missed events without gaps or duplicates
//! - Pause and resume of individual spaces
//!
//! # Example
//!
//! ```rust,ignore
//! use lantern_scanner::{ScanOrchestrator, SpaceSelection};
//! use std::sync::Arc;
//!
//! let orchestrator = ScanOrchestrator::new(
//!     Arc::new(content_accessor),
//!     Arc::new(detector),
//!     Arc::new(db.checkpoint_store()),
//!     Arc::new(db.event_store()),
//!     &config,
//! );
//!
//! let report = orchestrator.scan(&scan_id, SpaceSelection::All).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod catalog;
pub mod detector;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod sequencer;
pub mod source;
pub mod stream;

// Re-export commonly used types
pub use catalog::{SpaceCatalog, SpaceScanStatus};
pub use detector::{Detection, Detector};
pub use error::{ContentAccessError, DetectionError, Result, ScanError};
pub use orchestrator::{ScanOrchestrator, ScanReport, SpaceOutcome, SpaceScanResult, SpaceSelection};
pub use progress::{calculate_progress, progress_of};
pub use retry::RetryPolicy;
pub use sequencer::EventSequencer;
pub use source::{Attachment, ContentAccessor, Page, Space};
pub use stream::{EventHub, EventSubscription};

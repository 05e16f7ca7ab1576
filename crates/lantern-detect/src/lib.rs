//! Lantern Detect - HTTP client for the PII detection service.
//!
//! Implements [`lantern_scanner::Detector`] on top of `reqwest`. The service
//! receives content plus the enabled per-type thresholds and answers with
//! masked entities; raw values never cross this boundary.
//!
//! Failures are classified for the orchestrator's retry policy: connection
//! failures and timeouts are transient, anything the service itself rejects
//! is not.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod client;
pub mod error;
mod wire;

pub use client::HttpDetector;
pub use error::{ClientError, Result};

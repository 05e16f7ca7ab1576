//! Lantern CLI - command-line front end for resumable PII scans.
//!
//! Scans a directory tree laid out as spaces, pages and attachments (see
//! [`fs_source`]) through the configured detection service, and inspects or
//! resets the recorded checkpoints and events.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod app;
pub mod commands;
pub mod fs_source;
pub mod logging;
pub mod output;

pub use app::{App, ScanOptions};
pub use commands::{Cli, Commands};
pub use fs_source::FsContentAccessor;
pub use logging::init_tracing;

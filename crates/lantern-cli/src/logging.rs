//! Tracing initialisation.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when neither `RUST_LOG` nor the configuration sets one.
pub const DEFAULT_FILTER: &str = "info,lantern=debug";

/// Build the filter: `RUST_LOG` wins, then the configured directive.
pub fn env_filter(configured: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(configured).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    })
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init_tracing(configured: &str) {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .with(env_filter(configured))
        .init();
}

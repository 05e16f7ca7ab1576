//! Bounded retry with exponential backoff.

use lantern_core::ScanningConfig;
use std::time::Duration;

/// How often and how visibly a failing item is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per item, including the first
    pub max_attempts: u32,
    /// Leading failed attempts that are only logged
    pub quiet_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff: Duration,
    /// Cap on the delay between attempts
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ScanningConfig::default())
    }
}

impl RetryPolicy {
    /// Build the policy from scanning settings.
    #[must_use]
    pub fn from_config(config: &ScanningConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            quiet_attempts: config.quiet_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay after failed attempt `attempt` (1-based), doubling each time.
    #[must_use]
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_backoff)
    }

    /// Whether no attempts remain after `attempt`.
    #[must_use]
    pub fn is_final(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Whether a failure of `attempt` is retried without an ERROR event.
    #[must_use]
    pub fn is_quiet(&self, attempt: u32) -> bool {
        attempt <= self.quiet_attempts
    }
}

//! Exponential backoff for reconnect attempts

use agentlink_common::BackoffConfig;
use std::time::Duration;

/// Backoff calculator
///
/// Attempt 1 is immediate, attempt `n >= 2` waits `base * 2^(n-2)`, never
/// more than `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
}

impl Backoff {
    /// Create a new backoff calculator
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Delay before the given (1-based) reconnect attempt
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        // Cap the exponent; 2^20 of any sane base is already past `max`.
        let exponent = (attempt - 2).min(20);
        let delay = self.config.base.saturating_mul(1u32 << exponent);
        delay.min(self.config.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

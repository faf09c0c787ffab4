//! Exponential backoff configuration.
//!
//! Shared by the device monitor (transient read errors), the publisher
//! (unreachable log) and the router (failed hook deliveries).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries, just the initial attempt).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the exponential growth.
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    #[must_use]
    pub const fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
        }
    }

    /// Creates a configuration with no retries.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Creates a configuration that retries forever (used by the publisher,
    /// whose buffer bounds the cost instead).
    #[must_use]
    pub const fn unbounded(initial_delay: Duration, max_delay: Duration) -> Self {
        Self::new(u32::MAX, initial_delay, max_delay)
    }

    /// Delay before retry number `attempt` (1-indexed).
    ///
    /// Returns `Duration::ZERO` for attempt 0, then `initial_delay * 2^(attempt-1)`
    /// capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Returns true if another attempt is allowed after `current_attempt` retries.
    #[must_use]
    pub fn should_retry(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100), Duration::from_secs(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_and_cap() {
        let cfg = RetryConfig::new(10, Duration::from_millis(100), Duration::from_millis(1000));
        assert_eq!(cfg.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(cfg.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(cfg.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(cfg.delay_for_attempt(4), Duration::from_millis(800));
        assert_eq!(cfg.delay_for_attempt(5), Duration::from_millis(1000));
        assert_eq!(cfg.delay_for_attempt(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn should_retry_respects_limit() {
        let cfg = RetryConfig::new(2, Duration::from_millis(1), Duration::from_millis(1));
        assert!(cfg.should_retry(0));
        assert!(cfg.should_retry(1));
        assert!(!cfg.should_retry(2));
        assert!(!RetryConfig::no_retry().should_retry(0));
    }
}

//! Connection retry configuration
//!
//! Governs how the receive thread paces its connect/accept attempts while the
//! connector sits in the wait-connection state: exponential backoff between a
//! configurable initial and maximum delay, with an optional cap on attempts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry strategy for establishing (and re-establishing) the connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Maximum number of attempts before giving up (`None` = retry forever)
    pub max_attempts: Option<usize>,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on the delay between retries
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Retry forever with default pacing
    pub fn infinite() -> Self {
        Self::default()
    }

    /// Give up after `attempts` failed tries
    pub fn with_max_attempts(attempts: usize) -> Self {
        Self {
            max_attempts: Some(attempts),
            ..Default::default()
        }
    }

    /// Delay to wait after the given (zero-based) failed attempt
    pub(crate) fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as f64) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_retry_forever() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_attempts, None);
    }

    #[test]
    fn test_backoff_progression() {
        let config = ReconnectConfig {
            max_attempts: Some(10),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        // Clamped at max_delay
        assert_eq!(config.delay_for_attempt(6), Duration::from_secs(1));
    }
}

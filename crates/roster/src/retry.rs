//! Shared retry configuration for remote calls and database writes.
//!
//! Both the call gateway (transient network failures) and the split-session
//! writer (locked or busy databases) back off exponentially; this module keeps
//! the knobs in one place.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};

use crate::sync::{INITIAL_BACKOFF_MS, MAX_BACKOFF_MS, MAX_TRANSIENT_RETRIES};

/// Configuration for retry operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Minimum delay between retries.
    pub min_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Maximum number of retry attempts.
    pub max_retries: usize,
    /// Whether to add jitter to delays.
    pub with_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            max_retries: MAX_TRANSIENT_RETRIES,
            with_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom values.
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        Self {
            min_delay,
            max_delay,
            max_retries,
            with_jitter: true,
        }
    }

    /// A configuration that retries immediately. Used by tests and dry runs.
    #[must_use]
    pub fn immediate(max_retries: usize) -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_retries,
            with_jitter: false,
        }
    }

    /// Set whether to use jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    /// Build an exponential backoff strategy from this configuration.
    #[must_use]
    pub fn into_backoff(self) -> ExponentialBuilder {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);

        if self.with_jitter {
            builder = builder.with_jitter();
        }

        builder
    }

    /// Materialise the delay sequence for a hand-driven retry loop.
    ///
    /// The iterator yields at most `max_retries` delays.
    pub fn delays(&self) -> ExponentialBackoff {
        self.clone().into_backoff().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();

        assert_eq!(config.min_delay, Duration::from_millis(INITIAL_BACKOFF_MS));
        assert_eq!(config.max_delay, Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(config.max_retries, MAX_TRANSIENT_RETRIES);
        assert!(config.with_jitter);
    }

    #[test]
    fn test_retry_config_custom() {
        let config = RetryConfig::new(Duration::from_secs(2), Duration::from_secs(30), 3);

        assert_eq!(config.min_delay, Duration::from_secs(2));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert!(config.with_jitter);
    }

    #[test]
    fn delays_are_bounded_by_max_retries() {
        let config = RetryConfig::new(Duration::from_millis(10), Duration::from_millis(40), 5)
            .with_jitter(false);
        let delays: Vec<Duration> = config.delays().collect();

        assert_eq!(delays.len(), 5);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(40)));
    }

    #[test]
    fn immediate_config_never_sleeps() {
        let delays: Vec<Duration> = RetryConfig::immediate(2).delays().collect();
        assert_eq!(delays, vec![Duration::ZERO, Duration::ZERO]);
    }
}

//! Transaction options and retry policy

use courier_core::IsolationLevel;
use rand::Rng;
use std::time::Duration;

// ============================================================================
// Retry Configuration
// ============================================================================

/// Configuration for conflict retry behavior
///
/// Retry `n` (1-based) waits `base_delay * 2^(n-1)`, capped at `max_delay`.
/// With jitter enabled a random extra of up to 25% of that delay is added, so
/// the wait never drops below the deterministic schedule.
///
/// # Example
/// ```ignore
/// let retry = RetryConfig::new()
///     .with_max_retries(5)
///     .with_base_delay(Duration::from_millis(20));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retries (0 = single attempt)
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Add random jitter on top of the computed delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new RetryConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a RetryConfig with no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set maximum number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set base delay for exponential backoff
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set maximum delay between retries
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Deterministic delay before retry `retry` (1-based), without jitter
    pub fn backoff(&self, retry: u32) -> Duration {
        // Cap the shift to prevent overflow (1 << 63 is the max for u64)
        let shift = retry.saturating_sub(1).min(63);
        let multiplier = 1u64 << shift;
        let base_micros = self.base_delay.as_micros().min(u64::MAX as u128) as u64;
        let delay = Duration::from_micros(base_micros.saturating_mul(multiplier));
        delay.min(self.max_delay)
    }

    /// Delay to sleep before retry `retry` (1-based), jitter included
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = self.backoff(retry);
        if !self.jitter {
            return delay;
        }
        let spread = (delay.as_micros() / 4).min(u64::MAX as u128) as u64;
        if spread == 0 {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0..=spread);
        delay + Duration::from_micros(extra)
    }

    /// Lower bound on total time spent sleeping when every retry is used
    pub fn minimum_total_backoff(&self) -> Duration {
        (1..=self.max_retries).map(|n| self.backoff(n)).sum()
    }
}

// ============================================================================
// Transaction Options
// ============================================================================

/// Per-call settings for [`TransactionCoordinator::execute`]
///
/// Settings left at `None` use the engine default.
///
/// [`TransactionCoordinator::execute`]: crate::TransactionCoordinator::execute
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Isolation level applied before the first statement
    pub isolation: Option<IsolationLevel>,
    /// Open the transaction read-only
    pub read_only: bool,
    /// Per-statement timeout
    pub timeout: Option<Duration>,
    /// Label shown in active-transaction listings and logs
    pub name: Option<String>,
    /// Conflict retry policy
    pub retry: RetryConfig,
}

impl TransactionOptions {
    /// Options with engine defaults and the default retry policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level
    pub fn with_isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    /// Open the transaction read-only
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Set the statement timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replace the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the maximum number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    /// Set the base backoff delay
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.retry.base_delay = base_delay;
        self
    }
}


#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: jittered delay stays within [backoff, backoff * 1.25]
        #[test]
        fn prop_jitter_bounds(
            base_ms in 1u64..1_000,
            max_ms in 1u64..60_000,
            retry in 1u32..40
        ) {
            let retry_config = RetryConfig::new()
                .with_base_delay(Duration::from_millis(base_ms))
                .with_max_delay(Duration::from_millis(max_ms));
            let floor = retry_config.backoff(retry);
            let delay = retry_config.delay_for(retry);
            prop_assert!(delay >= floor);
            prop_assert!(delay <= floor + floor / 4);
        }

        /// Property: backoff never decreases and never exceeds the cap
        #[test]
        fn prop_backoff_monotonic_and_capped(
            base_ms in 1u64..1_000,
            max_ms in 1u64..60_000,
            retry in 1u32..100
        ) {
            let retry_config = RetryConfig::new()
                .with_base_delay(Duration::from_millis(base_ms))
                .with_max_delay(Duration::from_millis(max_ms));
            prop_assert!(retry_config.backoff(retry) <= retry_config.backoff(retry + 1));
            prop_assert!(retry_config.backoff(retry) <= Duration::from_millis(max_ms));
        }
    }
}

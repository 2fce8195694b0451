//! Retry policy with exponential backoff and optional jitter.
//!
//! Only transient activity errors are retried. Permanent errors surface on
//! the first attempt.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

const DEFAULT_FIRST_INTERVAL_MS: u64 = 1_000;
const DEFAULT_BACKOFF_COEFFICIENT: f64 = 2.0;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_MAX_INTERVAL_MS: u64 = 30_000;

/// Retry policy for activity invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the second attempt (milliseconds).
    pub first_interval_ms: u64,
    /// Multiplier applied to the delay after each attempt.
    pub backoff_coefficient: f64,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Upper bound on any single delay (milliseconds).
    pub max_interval_ms: u64,
    /// Jitter factor (0.0 - 1.0) added on top of the computed delay.
    #[serde(default)]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            first_interval_ms: DEFAULT_FIRST_INTERVAL_MS,
            backoff_coefficient: DEFAULT_BACKOFF_COEFFICIENT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_interval_ms: DEFAULT_MAX_INTERVAL_MS,
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy.
    pub fn new(first_interval_ms: u64, backoff_coefficient: f64, max_attempts: u32) -> Self {
        Self {
            first_interval_ms,
            backoff_coefficient,
            max_attempts,
            ..Self::default()
        }
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::new(0, 1.0, 1)
    }

    #[must_use]
    pub const fn with_max_interval_ms(mut self, max_interval_ms: u64) -> Self {
        self.max_interval_ms = max_interval_ms;
        self
    }

    #[must_use]
    pub const fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Delay to wait after the given failed attempt (1-indexed).
    ///
    /// Formula: `min(first_interval * coefficient^(attempt - 1), max_interval)`,
    /// plus up to `jitter_factor` of that value.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let raw = (self.first_interval_ms as f64) * self.backoff_coefficient.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.max_interval_ms as f64).max(0.0) as u64
        } else {
            self.max_interval_ms
        };

        let jitter_ms = if self.jitter_factor > 0.0 && capped > 0 {
            let range = (capped as f64) * self.jitter_factor.min(1.0);
            rand::thread_rng().gen_range(0.0..range).floor() as u64
        } else {
            0
        };

        Duration::from_millis(capped.saturating_add(jitter_ms))
    }

    /// Create a retry state for tracking attempts.
    pub fn state(&self) -> RetryState {
        RetryState::new(self.clone())
    }
}

/// Attempt counter for one activity invocation.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetryState {
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Start the next attempt and return its number (1-indexed).
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt = self.attempt.saturating_add(1);
        self.attempt
    }

    /// Attempts started so far.
    pub const fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&self) -> Option<Duration> {
        (self.attempt < self.policy.max_attempts).then(|| self.policy.delay_after(self.attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::new(100, 2.0, 5);
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(1_000, 10.0, 10).with_max_interval_ms(5_000);
        assert_eq!(policy.delay_after(4), Duration::from_millis(5_000));
        assert_eq!(policy.delay_after(60), Duration::from_millis(5_000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::new(1_000, 1.0, 3).with_jitter(0.5);
        for _ in 0..50 {
            let delay = policy.delay_after(1);
            assert!(delay >= Duration::from_millis(1_000));
            assert!(delay < Duration::from_millis(1_500));
        }
    }

    #[test]
    fn test_state_is_bounded_by_max_attempts() {
        let mut state = RetryPolicy::new(1, 1.0, 3).state();
        let started = loop {
            let attempt = state.begin_attempt();
            if state.next_delay().is_none() {
                break attempt;
            }
        };
        assert_eq!(started, 3);
        assert_eq!(state.attempts(), 3);
    }

    #[test]
    fn test_no_retry_policy() {
        let mut state = RetryPolicy::no_retry().state();
        state.begin_attempt();
        assert!(state.next_delay().is_none());
    }
}

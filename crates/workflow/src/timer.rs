//! Durable timer waits.
//!
//! A timer step records its deadline once. Every later run waits only for
//! whatever is left until that deadline, measured against the host clock.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;

/// Time left until `deadline`, zero if it already passed.
pub fn remaining(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

/// Deadline for a timer created now.
pub fn deadline_after(clock: &dyn Clock, delay: Duration) -> DateTime<Utc> {
    let now = clock.now();
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(now)
}

/// Sleep until `deadline` according to `clock`.
pub async fn wait_until(clock: &dyn Clock, deadline: DateTime<Utc>) {
    let left = remaining(deadline, clock.now());
    if !left.is_zero() {
        tokio::time::sleep(left).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_remaining_is_zero_for_past_deadline() {
        let now = Utc::now();
        let past = now - chrono::Duration::seconds(5);
        assert_eq!(remaining(past, now), Duration::ZERO);
    }

    #[test]
    fn test_deadline_after_uses_clock() {
        let clock = ManualClock::default();
        let deadline = deadline_after(&clock, Duration::from_secs(2));
        assert_eq!(remaining(deadline, clock.now()), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_wait_until_elapsed_deadline_returns_immediately() {
        let clock = ManualClock::default();
        let deadline = deadline_after(&clock, Duration::from_secs(3600));
        clock.advance(Duration::from_secs(3600));

        let waited = tokio::time::timeout(Duration::from_millis(100), wait_until(&clock, deadline)).await;
        assert!(waited.is_ok());
    }
}

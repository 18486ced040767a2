//! Retry with exponential backoff.
//!
//! Used by the persistence writer when the primary store rejects a batch.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the initial attempt (0 = try once).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Creates a new policy.
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            multiplier,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 2.0,
        }
    }

    /// Millisecond-scale backoff for tests and local sinks.
    #[must_use]
    pub fn fast() -> Self {
        Self::new(3, Duration::from_millis(5), Duration::from_millis(50), 2.0)
    }

    /// Delay to wait before attempt `attempt` (0-indexed; attempt 0 is immediate).
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let raw_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped_ms as u64)
    }

    /// Whether another attempt is permitted after `attempt` attempts failed.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Iterator over every retry delay in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_attempts).map(|attempt| self.delay_for_attempt(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100), Duration::from_secs(10), 2.0)
    }
}

/// Result of [`retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded on attempt `attempts`.
    Success {
        /// Returned value.
        value: T,
        /// Attempts used, including the successful one.
        attempts: u32,
    },
    /// Every attempt failed.
    Exhausted {
        /// The last error observed.
        error: E,
        /// Attempts made.
        attempts: u32,
    },
}

impl<T, E> RetryOutcome<T, E> {
    /// Returns true if the operation succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Converts into a plain `Result`.
    ///
    /// # Errors
    ///
    /// Returns the last error if every attempt failed.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Success { value, .. } => Ok(value),
            Self::Exhausted { error, .. } => Err(error),
        }
    }
}

/// Runs `operation` until it succeeds, the policy is exhausted, or
/// `should_retry` rejects an error.
pub async fn retry<T, E, Fut, F, P>(policy: &RetryPolicy, mut operation: F, should_retry: P) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt: u32 = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                return RetryOutcome::Success {
                    value,
                    attempts: attempt.saturating_add(1),
                };
            },
            Err(error) => {
                if !policy.should_retry(attempt) || !should_retry(&error) {
                    return RetryOutcome::Exhausted {
                        error,
                        attempts: attempt.saturating_add(1),
                    };
                }
                attempt = attempt.saturating_add(1);
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(10), 2.0);
        let delays: Vec<_> = policy.delays().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_millis(1600),
            ]
        );
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn test_delay_capped() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(300), 3.0);
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(300));
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert!(!policy.should_retry(0));
        assert_eq!(policy.delays().count(), 0);
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let policy = RetryPolicy::fast();
        let outcome = retry(
            &policy,
            |attempt| async move { if attempt < 2 { Err("down") } else { Ok(attempt) } },
            |_| true,
        )
        .await;
        assert_eq!(outcome, RetryOutcome::Success { value: 2, attempts: 3 });
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2), 2.0);
        let outcome = retry(&policy, |_| async { Err::<(), _>("down") }, |_| true).await;
        assert_eq!(outcome, RetryOutcome::Exhausted { error: "down", attempts: 3 });
        assert!(outcome.into_result().is_err());
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let policy = RetryPolicy::fast();
        let outcome = retry(&policy, |_| async { Err::<(), _>("rejected") }, |_| false).await;
        assert_eq!(outcome, RetryOutcome::Exhausted { error: "rejected", attempts: 1 });
    }
}

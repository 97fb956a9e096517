//! Bounded retry with a backoff schedule for transient failures.
//!
//! A [`RetryPolicy`] allows a fixed, small number of retries after the initial
//! attempt. The delay before retry *n* is the *n*-th entry of the backoff
//! schedule; past the end of the schedule the last entry repeats. The schedule
//! is non-decreasing by construction.
//!
//! Whether a failure is worth retrying is the caller's decision, expressed as a
//! predicate over the error. Non-retryable errors end the loop immediately.
//!
//! # Example
//!
//! ```rust
//! use concord_runtime::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(2)
//!     .backoff_schedule(vec![Duration::from_millis(500), Duration::from_millis(1000)])
//!     .build();
//!
//! let result = retry_with_predicate(
//!     &policy,
//!     |_attempt| async { Ok::<_, String>(42) },
//!     |err: &String| err.contains("transient"),
//! ).await?;
//! assert_eq!(result, 42);
//! # Ok(())
//! # }
//! ```

use crate::metrics::RetryMetrics;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy: how many retries and how long to wait before each.
///
/// # Default Values
///
/// - `max_retries`: 2
/// - `backoff_schedule`: 500ms, 1000ms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt
    pub max_retries: usize,
    /// Delay before each retry, non-decreasing
    pub backoff_schedule: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_schedule: vec![Duration::from_millis(500), Duration::from_millis(1000)],
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: None,
            backoff_schedule: None,
        }
    }

    /// A policy that makes exactly one attempt.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_retries: 0,
            backoff_schedule: Vec::new(),
        }
    }

    /// Exponential schedule: `initial * multiplier^n`, capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn exponential(
        max_retries: usize,
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
    ) -> Self {
        let schedule = (0..max_retries)
            .map(|n| {
                let delay_ms = initial_delay.as_millis() as f64 * multiplier.powi(n as i32);
                Duration::from_millis(delay_ms as u64).min(max_delay)
            })
            .collect();
        Self::builder()
            .max_retries(max_retries)
            .backoff_schedule(schedule)
            .build()
    }

    /// Total attempts this policy allows (initial + retries).
    #[must_use]
    pub const fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Delay before retry number `retry` (0-based).
    #[must_use]
    pub fn delay_for_retry(&self, retry: usize) -> Duration {
        self.backoff_schedule
            .get(retry)
            .or_else(|| self.backoff_schedule.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<usize>,
    backoff_schedule: Option<Vec<Duration>>,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the delay before each retry.
    #[must_use]
    pub fn backoff_schedule(mut self, schedule: Vec<Duration>) -> Self {
        self.backoff_schedule = Some(schedule);
        self
    }

    /// Build the [`RetryPolicy`].
    ///
    /// Any entry shorter than its predecessor is raised to match it, so the
    /// schedule never shrinks between retries.
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        let mut schedule = self.backoff_schedule.unwrap_or(defaults.backoff_schedule);
        let mut floor = Duration::ZERO;
        for delay in &mut schedule {
            floor = floor.max(*delay);
            *delay = floor;
        }

        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            backoff_schedule: schedule,
        }
    }
}

/// Retry an async operation while `is_retryable` approves the error.
///
/// `operation` receives the 1-based attempt number. Returns the first success,
/// the first non-retryable error, or the last error once retries are exhausted.
/// Attempt counts are only reported through logs and metrics.
///
/// # Errors
///
/// Returns the error of the final attempt made.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut retry = 0;

    loop {
        let attempt = retry + 1;
        match operation(attempt).await {
            Ok(result) => {
                if retry > 0 {
                    RetryMetrics::record_success();
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            },
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::warn!(
                        attempt,
                        error = %err,
                        "Error is not retryable, failing immediately"
                    );
                    return Err(err);
                }

                if retry >= policy.max_retries {
                    RetryMetrics::record_exhausted();
                    tracing::error!(
                        attempt,
                        max_attempts = policy.max_attempts(),
                        error = %err,
                        "Operation failed after max retries"
                    );
                    return Err(err);
                }

                let delay = policy.delay_for_retry(retry);
                RetryMetrics::record_attempt();
                tracing::warn!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Operation failed, retrying..."
                );

                sleep(delay).await;
                retry += 1;
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[test]
    fn default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_for_retry(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(1000));
        // Past the schedule the last entry repeats
        assert_eq!(policy.delay_for_retry(5), Duration::from_millis(1000));
    }

    #[test]
    fn builder_flattens_decreasing_schedule() {
        let policy = RetryPolicy::builder()
            .backoff_schedule(vec![
                Duration::from_millis(300),
                Duration::from_millis(100),
                Duration::from_millis(900),
            ])
            .build();

        assert_eq!(
            policy.backoff_schedule,
            vec![
                Duration::from_millis(300),
                Duration::from_millis(300),
                Duration::from_millis(900),
            ]
        );
    }

    #[test]
    fn exponential_schedule_is_capped() {
        let policy = RetryPolicy::exponential(
            5,
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(500),
        );

        assert_eq!(policy.delay_for_retry(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for_retry(4), Duration::from_millis(500));
    }

    #[test]
    fn no_retry_policy_has_zero_delay() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delay_for_retry(0), Duration::ZERO);
    }

    #[tokio::test]
    async fn succeeds_on_first_try() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_with_predicate(
            &RetryPolicy::default(),
            |_| {
                let c = Arc::clone(&counter_clone);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(42)
                }
            },
            |_: &String| true,
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_retries_and_returns_last_error() {
        let policy = RetryPolicy::builder()
            .max_retries(2)
            .backoff_schedule(vec![Duration::from_millis(10)])
            .build();

        let result = retry_with_predicate(
            &policy,
            |attempt| async move { Err::<i32, _>(format!("failure #{attempt}")) },
            |_: &String| true,
        )
        .await;

        // Initial + 2 retries; the error of the third attempt comes back verbatim
        assert_eq!(result, Err("failure #3".to_string()));
    }

    #[tokio::test]
    async fn skips_non_retryable() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_with_predicate(
            &RetryPolicy::default(),
            |_| {
                let c = Arc::clone(&counter_clone);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("permanent error")
                }
            },
            |err: &&str| err.contains("transient"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn observed_delays_follow_schedule() {
        let policy = RetryPolicy::default();
        let starts = Arc::new(Mutex::new(Vec::new()));
        let starts_clone = Arc::clone(&starts);

        let _ = retry_with_predicate(
            &policy,
            |_| {
                starts_clone.lock().unwrap().push(Instant::now());
                async { Err::<(), _>("transient") }
            },
            |_: &&str| true,
        )
        .await;

        let starts = starts.lock().unwrap();
        assert_eq!(starts.len(), 3);
        let gaps: Vec<Duration> = starts.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps, vec![Duration::from_millis(500), Duration::from_millis(1000)]);
        assert!(gaps.windows(2).all(|w| w[0] <= w[1]));
    }

    proptest::proptest! {
        #[test]
        fn delays_never_decrease(
            schedule_ms in proptest::collection::vec(0_u64..10_000, 0..8),
            max_retries in 0_usize..10,
        ) {
            let policy = RetryPolicy::builder()
                .max_retries(max_retries)
                .backoff_schedule(schedule_ms.into_iter().map(Duration::from_millis).collect())
                .build();

            let delays: Vec<Duration> =
                (0..max_retries + 3).map(|retry| policy.delay_for_retry(retry)).collect();
            proptest::prop_assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        }
    }
}

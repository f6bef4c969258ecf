//! Bounded retry for store lookups.
//!
//! [`with_retry`] re-runs an operation on transient errors (connection
//! resets, timeouts) with exponential backoff. Fatal errors are returned
//! immediately.
//!
//! # Backoff
//!
//! The delay before retry `n` (zero-based) is `initial_backoff * 2^n`,
//! capped at `max_backoff`. Delays go through `tokio::time::sleep`, so tests
//! with a paused clock run them instantly.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::StoreError;

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retry.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Also retry lookups that succeed with no row.
    pub retry_on_empty: bool,
}

impl RetryPolicy {
    /// A policy that runs the operation exactly once.
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            retry_on_empty: false,
        }
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            retry_on_empty: config.retry_on_empty,
        }
    }
}

/// Delay before retry number `attempt` (zero-based).
pub fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    policy
        .initial_backoff
        .saturating_mul(factor)
        .min(policy.max_backoff)
}

/// Runs `operation`, retrying transient errors under `policy`.
///
/// # Errors
///
/// Returns the first non-transient error, or the last transient error once
/// every attempt has been used.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    with_retry_until(policy, operation_name, operation, |_| true).await
}

/// Like [`with_retry`], but also retries successful results for which
/// `accept` returns `false`. When attempts run out, the last successful
/// result is returned as-is.
///
/// # Errors
///
/// Same as [`with_retry`].
pub async fn with_retry_until<F, Fut, T, A>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
    accept: A,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
    A: Fn(&T) -> bool,
{
    let mut attempt = 0;
    loop {
        let last_attempt = attempt >= policy.max_retries;
        match operation().await {
            Ok(value) if last_attempt || accept(&value) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "operation settled after retry"
                    );
                }
                return Ok(value);
            }
            Ok(_) => {
                let delay = compute_backoff(policy, attempt);
                tracing::debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "operation returned no result, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) if err.is_transient() && !last_attempt => {
                let delay = compute_backoff(policy, attempt);
                tracing::debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient error, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                if last_attempt && attempt > 0 && err.is_transient() {
                    tracing::warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %err,
                        "retries exhausted"
                    );
                }
                return Err(err);
            }
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            retry_on_empty: false,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = policy(5);
        assert_eq!(compute_backoff(&policy, 0), Duration::from_millis(100));
        assert_eq!(compute_backoff(&policy, 1), Duration::from_millis(200));
        assert_eq!(compute_backoff(&policy, 3), Duration::from_millis(800));
        assert_eq!(compute_backoff(&policy, 10), Duration::from_secs(2));
        assert_eq!(compute_backoff(&policy, 40), Duration::from_secs(2));
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::from(&RetryConfig::default());
        assert_eq!(policy.max_attempts(), 3);
        assert!(!policy.retry_on_empty);
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&policy(2), "fetch", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StoreError::transient("reset"))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&policy(2), "fetch", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::transient("reset"))
        })
        .await;

        assert_eq!(result.unwrap_err(), StoreError::transient("reset"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&policy(2), "fetch", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::fatal("permission denied"))
        })
        .await;

        assert!(matches!(result, Err(StoreError::Fatal { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let start = tokio::time::Instant::now();
        let _: Result<(), _> = with_retry(&policy(2), "fetch", || async {
            Err(StoreError::transient("reset"))
        })
        .await;

        // 100ms + 200ms
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unaccepted_results_retried_then_returned() {
        let calls = AtomicU32::new(0);
        let result = with_retry_until(
            &policy(2),
            "fetch",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<Option<u32>, StoreError>(None)
            },
            Option::is_some,
        )
        .await;

        assert_eq!(result.unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}

//! Circuit breaker for store strategies.
//!
//! A breaker counts consecutive failures of one kind of operation. Once the
//! threshold is reached it opens and rejects calls without running them.
//! After the recovery timeout has elapsed since the last failure, the next
//! call becomes a single trial: success closes the circuit, failure opens it
//! again and restarts the recovery timer.
//!
//! # State Machine
//!
//! ```text
//! ┌────────┐  failure_threshold  ┌──────┐  recovery_timeout  ┌──────────┐
//! │ Closed │ ──────reached─────→ │ Open │ ───────elapsed───→ │ HalfOpen │
//! └────────┘                     └──────┘ ←───trial fails─── └──────────┘
//!      ↑                                                          │
//!      └────────────────────── trial succeeds ────────────────────┘
//! ```
//!
//! Each guarded operation gets its own breaker so a degraded data path does
//! not block a healthy one.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::config::BreakerConfig;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation; calls pass through.
    Closed,
    /// Calls are rejected without running.
    Open,
    /// One trial call is in progress or allowed.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Error returned by a guarded call.
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The breaker rejected the call; the operation was not run.
    #[error("Circuit breaker '{breaker}' is open")]
    Open {
        /// Name of the rejecting breaker.
        breaker: String,
    },

    /// The operation ran and failed.
    #[error("{0}")]
    Inner(E),
}

/// Point-in-time view of a breaker, for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_failure_at: Option<OffsetDateTime>,
    /// Calls rejected while open.
    pub fast_fail_count: u64,
    pub state_transitions: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<OffsetDateTime>,
    trial_in_flight: bool,
    fast_fail_count: u64,
    state_transitions: u64,
}

impl Inner {
    fn transition(&mut self, breaker: &str, to: CircuitState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        self.state_transitions += 1;
        match to {
            CircuitState::Open => tracing::warn!(
                breaker,
                previous_state = %from,
                failure_count = self.failure_count,
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => tracing::info!(
                breaker,
                "Circuit breaker half-open, allowing trial call"
            ),
            CircuitState::Closed => tracing::info!(
                breaker,
                "Circuit breaker closed, operation recovered"
            ),
        }
    }
}

/// Thread-safe circuit breaker guarding one kind of operation.
///
/// State sits behind a `parking_lot::Mutex` with short critical sections;
/// the guarded operation itself never runs under the lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                last_failure_at: None,
                trial_in_flight: false,
                fast_fail_count: 0,
                state_transitions: 0,
            }),
        }
    }

    /// Creates a closed breaker from the configuration section.
    pub fn from_config(name: impl Into<String>, config: &BreakerConfig) -> Self {
        Self::new(name, config.failure_threshold, config.recovery_timeout)
    }

    /// Name used in logs and rejection errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Asks permission to run one call.
    ///
    /// An open breaker whose recovery timeout has elapsed moves to half-open
    /// and hands out the single trial permit. While a trial is outstanding,
    /// every other call is rejected.
    ///
    /// # Errors
    ///
    /// Returns `CircuitError::Open` when the call must not run.
    pub fn try_acquire<E>(&self) -> Result<CallPermit<'_>, CircuitError<E>> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self, false)),
            CircuitState::Open => {
                let recovered = inner
                    .last_failure
                    .is_none_or(|at| at.elapsed() >= self.recovery_timeout);
                if recovered {
                    inner.transition(&self.name, CircuitState::HalfOpen);
                    inner.trial_in_flight = true;
                    Ok(CallPermit::new(self, true))
                } else {
                    inner.fast_fail_count += 1;
                    Err(self.open_error())
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    inner.fast_fail_count += 1;
                    Err(self.open_error())
                } else {
                    inner.trial_in_flight = true;
                    Ok(CallPermit::new(self, true))
                }
            }
        }
    }

    /// Runs `operation` under the breaker; every error counts as a failure.
    ///
    /// # Errors
    ///
    /// Returns `CircuitError::Open` without running `operation` when the
    /// circuit is open, or `CircuitError::Inner` with the operation's error.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_when(operation, |_| true).await
    }

    /// Runs `operation` under the breaker, counting only errors for which
    /// `trips` returns `true`. Other errors pass through without changing
    /// the failure count.
    ///
    /// # Errors
    ///
    /// Same as [`Self::call`].
    pub async fn call_when<F, Fut, T, E, P>(
        &self,
        operation: F,
        trips: P,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        let permit = self.try_acquire()?;
        match operation().await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(err) => {
                if trips(&err) {
                    permit.fail();
                }
                Err(CircuitError::Inner(err))
            }
        }
    }

    /// Current state. An open circuit whose recovery timeout has elapsed
    /// still reports `Open` until a call moves it to half-open.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Returns a snapshot for health reporting.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_at: inner.last_failure_at,
            fast_fail_count: inner.fast_fail_count,
            state_transitions: inner.state_transitions,
        }
    }

    fn open_error<E>(&self) -> CircuitError<E> {
        CircuitError::Open {
            breaker: self.name.clone(),
        }
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        if trial {
            inner.trial_in_flight = false;
        }
        if inner.state == CircuitState::HalfOpen {
            inner.transition(&self.name, CircuitState::Closed);
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(OffsetDateTime::now_utc());
        if trial {
            inner.trial_in_flight = false;
        }
        match inner.state {
            CircuitState::HalfOpen => inner.transition(&self.name, CircuitState::Open),
            CircuitState::Closed if inner.failure_count >= self.failure_threshold => {
                inner.transition(&self.name, CircuitState::Open);
            }
            _ => {}
        }
    }

    fn on_abandoned(&self, trial: bool) {
        if trial {
            self.inner.lock().trial_in_flight = false;
        }
    }
}

/// Permission to run one guarded call.
///
/// Report the outcome with [`CallPermit::succeed`] or [`CallPermit::fail`].
/// A permit dropped without an outcome (for example when the caller is
/// cancelled) frees the trial slot without changing the breaker state.
#[must_use = "report the call outcome with succeed() or fail()"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    /// Returns `true` if this permit is the half-open trial call.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Records a successful call.
    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    /// Records a failed call.
    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_abandoned(self.trial);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    const RECOVERY: Duration = Duration::from_secs(10);

    async fn failing(calls: &AtomicU32) -> Result<(), &'static str> {
        calls.fetch_add(1, Ordering::SeqCst);
        Err("boom")
    }

    async fn succeeding(calls: &AtomicU32) -> Result<(), &'static str> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let breaker = CircuitBreaker::new("primary_store", 2, RECOVERY);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire::<()>().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_rejects_without_running() {
        let breaker = CircuitBreaker::new("primary_store", 2, RECOVERY);
        let calls = AtomicU32::new(0);

        assert!(breaker.call(|| failing(&calls)).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.call(|| failing(&calls)).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        let rejected = breaker.call(|| succeeding(&calls)).await;
        assert!(matches!(rejected, Err(CircuitError::Open { ref breaker }) if breaker == "primary_store"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(breaker.snapshot().fast_fail_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new("primary_store", 2, RECOVERY);
        let calls = AtomicU32::new(0);

        let _ = breaker.call(|| failing(&calls)).await;
        breaker.call(|| succeeding(&calls)).await.unwrap();
        let _ = breaker.call(|| failing(&calls)).await;

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_success_closes() {
        let breaker = CircuitBreaker::new("primary_store", 1, RECOVERY);
        let calls = AtomicU32::new(0);

        let _ = breaker.call(|| failing(&calls)).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(RECOVERY - Duration::from_millis(1)).await;
        assert!(matches!(
            breaker.call(|| succeeding(&calls)).await,
            Err(CircuitError::Open { .. })
        ));

        tokio::time::advance(Duration::from_millis(1)).await;
        breaker.call(|| succeeding(&calls)).await.unwrap();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_failure_reopens_and_restarts_timer() {
        let breaker = CircuitBreaker::new("primary_store", 1, RECOVERY);
        let calls = AtomicU32::new(0);

        let _ = breaker.call(|| failing(&calls)).await;
        tokio::time::advance(RECOVERY).await;

        assert!(matches!(
            breaker.call(|| failing(&calls)).await,
            Err(CircuitError::Inner("boom"))
        ));
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(RECOVERY / 2).await;
        assert!(matches!(
            breaker.call(|| succeeding(&calls)).await,
            Err(CircuitError::Open { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_trial_at_a_time() {
        let breaker = CircuitBreaker::new("primary_store", 1, RECOVERY);
        let calls = AtomicU32::new(0);
        let _ = breaker.call(|| failing(&calls)).await;
        tokio::time::advance(RECOVERY).await;

        let trial = breaker.try_acquire::<()>().unwrap();
        assert!(trial.is_trial());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire::<()>().is_err());

        trial.succeed();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire::<()>().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_frees_slot() {
        let breaker = CircuitBreaker::new("primary_store", 1, RECOVERY);
        let calls = AtomicU32::new(0);
        let _ = breaker.call(|| failing(&calls)).await;
        tokio::time::advance(RECOVERY).await;

        drop(breaker.try_acquire::<()>().unwrap());

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        let retry = breaker.try_acquire::<()>().unwrap();
        assert!(retry.is_trial());
        retry.fail();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_when_ignores_non_tripping_errors() {
        let breaker = CircuitBreaker::new("primary_store", 1, RECOVERY);
        let calls = AtomicU32::new(0);

        let result = breaker.call_when(|| failing(&calls), |_| false).await;

        assert!(matches!(result, Err(CircuitError::Inner("boom"))));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_tracks_transitions() {
        let breaker = CircuitBreaker::new("fresh_connection", 1, RECOVERY);
        let calls = AtomicU32::new(0);

        let _ = breaker.call(|| failing(&calls)).await;
        tokio::time::advance(RECOVERY).await;
        breaker.call(|| succeeding(&calls)).await.unwrap();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.name, "fresh_connection");
        assert_eq!(snapshot.state, CircuitState::Closed);
        // closed → open → half_open → closed
        assert_eq!(snapshot.state_transitions, 3);
        assert!(snapshot.last_failure_at.is_some());
    }
}

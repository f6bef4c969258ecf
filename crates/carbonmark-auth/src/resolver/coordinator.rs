//! Per-subject request coordination.
//!
//! Right after a login, many requests race to resolve the same subject while
//! the store may still be propagating the new row. The coordinator lets the
//! first of them run the fallback chain alone and queues the rest behind a
//! per-subject lease. Once a subject resolves, a recent-success marker lets
//! later requests skip the lease entirely for the grace window.
//!
//! # Flow
//!
//! ```text
//! marker valid? ──yes──→ run work (fast path); on error clear marker
//!      │ no
//!      ↓
//! acquire lease ──→ marker valid now?          ──yes──→ run work under lease
//!                   a queued-for run failed?   ──yes──→ return its error
//!                   otherwise                  ──────→ run work, set/clear marker
//! ```
//!
//! Callers that queued behind a failing run get that run's error instead of
//! repeating the whole chain. Different subjects never wait on each other.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::AuthResult;
use crate::config::CoordinatorConfig;
use crate::error::AuthError;

#[derive(Debug, Default)]
struct Lease {
    /// Error of the most recent completed run, `None` if it succeeded.
    last_failure: tokio::sync::Mutex<Option<AuthError>>,
    completed_runs: AtomicU64,
}

/// Counters for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub active_leases: usize,
    pub recent_successes: usize,
}

/// Serializes the first resolution of each subject.
#[derive(Debug)]
pub struct RequestCoordinator {
    grace_window: Duration,
    leases: DashMap<String, Arc<Lease>>,
    markers: Mutex<HashMap<String, Instant>>,
}

impl RequestCoordinator {
    pub fn new(grace_window: Duration) -> Self {
        Self {
            grace_window,
            leases: DashMap::new(),
            markers: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self::new(config.grace_window)
    }

    /// Runs `work` for `subject_id` under the coordination rules.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `work`, or by the run this call queued
    /// behind.
    pub async fn run<T, F, Fut>(&self, subject_id: &str, work: F) -> AuthResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AuthResult<T>>,
    {
        if self.has_recent_success(subject_id) {
            return self.run_fast_path(subject_id, work).await;
        }

        let lease = LeaseHandle::acquire(self, subject_id);
        let observed_runs = lease.lease.completed_runs.load(Ordering::Acquire);
        let mut last_failure = lease.lease.last_failure.lock().await;

        if self.has_recent_success(subject_id) {
            tracing::debug!(subject_id, "Subject resolved while queued, taking fast path");
            return self.run_fast_path(subject_id, work).await;
        }

        if lease.lease.completed_runs.load(Ordering::Acquire) > observed_runs
            && let Some(error) = last_failure.as_ref()
        {
            tracing::debug!(subject_id, "Sharing failure of the run this request queued behind");
            return Err(error.clone());
        }

        let result = work().await;
        match &result {
            Ok(_) => {
                self.mark_success(subject_id);
                *last_failure = None;
            }
            Err(error) => {
                self.forget(subject_id);
                *last_failure = Some(error.clone());
            }
        }
        lease.lease.completed_runs.fetch_add(1, Ordering::Release);
        result
    }

    async fn run_fast_path<T, F, Fut>(&self, subject_id: &str, work: F) -> AuthResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AuthResult<T>>,
    {
        let result = work().await;
        if result.is_err() {
            tracing::debug!(subject_id, "Fast path failed, clearing recent-success marker");
            self.forget(subject_id);
        }
        result
    }

    /// Returns `true` if the subject resolved within the grace window.
    /// Expired markers are removed.
    pub fn has_recent_success(&self, subject_id: &str) -> bool {
        let mut markers = self.markers.lock();
        match markers.get(subject_id) {
            Some(at) if at.elapsed() < self.grace_window => true,
            Some(_) => {
                markers.remove(subject_id);
                false
            }
            None => false,
        }
    }

    /// Sets the subject's marker and drops every expired one.
    fn mark_success(&self, subject_id: &str) {
        let grace_window = self.grace_window;
        let mut markers = self.markers.lock();
        markers.retain(|_, at| at.elapsed() < grace_window);
        markers.insert(subject_id.to_string(), Instant::now());
    }

    /// Removes the subject's recent-success marker.
    pub fn forget(&self, subject_id: &str) {
        self.markers.lock().remove(subject_id);
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            active_leases: self.leases.len(),
            recent_successes: self
                .markers
                .lock()
                .values()
                .filter(|at| at.elapsed() < self.grace_window)
                .count(),
        }
    }
}

/// Shared reference to a subject's lease.
///
/// Dropping the last handle removes the lease from the map, including when
/// the owning future is cancelled.
struct LeaseHandle<'a> {
    coordinator: &'a RequestCoordinator,
    subject_id: &'a str,
    lease: Arc<Lease>,
}

impl<'a> LeaseHandle<'a> {
    fn acquire(coordinator: &'a RequestCoordinator, subject_id: &'a str) -> Self {
        let lease = coordinator
            .leases
            .entry(subject_id.to_string())
            .or_default()
            .clone();
        Self {
            coordinator,
            subject_id,
            lease,
        }
    }
}

impl Drop for LeaseHandle<'_> {
    fn drop(&mut self) {
        // The map holds one reference and this handle another.
        self.coordinator
            .leases
            .remove_if(self.subject_id, |_, lease| Arc::strong_count(lease) <= 2);
    }
}

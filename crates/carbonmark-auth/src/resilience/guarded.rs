//! [`ProfileStore`] adapters that add timeouts, retry, and circuit breaking.
//!
//! Strategies are assembled by stacking adapters:
//!
//! ```text
//! GuardedStore(breaker) → RetryingStore(policy, timeout) → primary store
//! GuardedStore(breaker) → FreshConnectionStore(timeout)  → connector
//! ```
//!
//! The breaker sits outside the retry loop, so one exhausted run of retries
//! counts as a single breaker failure. A lookup that reaches the store and
//! finds no row is a success as far as the breaker is concerned.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::storage::{ProfileQuery, ProfileStore, StoreConnector};
use crate::types::Profile;

use super::circuit_breaker::{CircuitBreaker, CircuitError};
use super::retry::{RetryPolicy, with_retry_until};

async fn fetch_with_timeout(
    store: &dyn ProfileStore,
    query: &ProfileQuery<'_>,
    timeout: Duration,
) -> Result<Option<Profile>, StoreError> {
    match tokio::time::timeout(timeout, store.fetch_profile_by_id(query)).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout { after: timeout }),
    }
}

// ============================================================================
// Retrying Store
// ============================================================================

/// Bounds each lookup with a timeout and retries transient failures.
pub struct RetryingStore {
    name: &'static str,
    inner: Arc<dyn ProfileStore>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl RetryingStore {
    /// Wraps `inner`; `name` labels retry log lines.
    pub fn new(
        name: &'static str,
        inner: Arc<dyn ProfileStore>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            name,
            inner,
            policy,
            timeout,
        }
    }
}

#[async_trait]
impl ProfileStore for RetryingStore {
    async fn fetch_profile_by_id(
        &self,
        query: &ProfileQuery<'_>,
    ) -> Result<Option<Profile>, StoreError> {
        let retry_on_empty = self.policy.retry_on_empty;
        with_retry_until(
            &self.policy,
            self.name,
            || fetch_with_timeout(self.inner.as_ref(), query, self.timeout),
            |found| found.is_some() || !retry_on_empty,
        )
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

// ============================================================================
// Guarded Store
// ============================================================================

/// Runs lookups through a circuit breaker.
///
/// Rejected calls surface as [`StoreError::CircuitOpen`] without touching
/// the inner store.
pub struct GuardedStore {
    breaker: Arc<CircuitBreaker>,
    inner: Arc<dyn ProfileStore>,
}

impl GuardedStore {
    pub fn new(breaker: Arc<CircuitBreaker>, inner: Arc<dyn ProfileStore>) -> Self {
        Self { breaker, inner }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

#[async_trait]
impl ProfileStore for GuardedStore {
    async fn fetch_profile_by_id(
        &self,
        query: &ProfileQuery<'_>,
    ) -> Result<Option<Profile>, StoreError> {
        self.breaker
            .call(|| self.inner.fetch_profile_by_id(query))
            .await
            .map_err(|err| match err {
                CircuitError::Open { breaker } => StoreError::CircuitOpen { breaker },
                CircuitError::Inner(err) => err,
            })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

// ============================================================================
// Fresh Connection Store
// ============================================================================

/// Opens a brand-new connection for every lookup.
///
/// Used as the last resort when pooled connections may be wedged. Each
/// lookup is attempted once; connection failures are returned as-is.
pub struct FreshConnectionStore {
    connector: Arc<dyn StoreConnector>,
    timeout: Duration,
}

impl FreshConnectionStore {
    pub fn new(connector: Arc<dyn StoreConnector>, timeout: Duration) -> Self {
        Self { connector, timeout }
    }
}

#[async_trait]
impl ProfileStore for FreshConnectionStore {
    async fn fetch_profile_by_id(
        &self,
        query: &ProfileQuery<'_>,
    ) -> Result<Option<Profile>, StoreError> {
        let connection = match tokio::time::timeout(self.timeout, self.connector.connect()).await {
            Ok(connection) => connection?,
            Err(_) => return Err(StoreError::Timeout { after: self.timeout }),
        };
        tracing::debug!(subject_id = query.subject_id, "Opened fresh store connection");
        fetch_with_timeout(connection.as_ref(), query, self.timeout).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let connection = self.connector.connect().await?;
        connection.ping().await
    }
}

//! In-memory profile store.
//!
//! Holds profile rows in a `DashMap` and lets callers script the failure
//! modes a real store exhibits: transient errors, latency, and rows hidden by
//! row-level security. Every lookup is counted so callers can assert how many
//! queries actually reached the store.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::types::Profile;

use super::{ProfileQuery, ProfileStore, StoreConnector};

/// In-process [`ProfileStore`] with fault injection.
#[derive(Default)]
pub struct InMemoryProfileStore {
    rows: DashMap<String, Profile>,
    hidden: Mutex<HashSet<String>>,
    scripted_failures: Mutex<VecDeque<StoreError>>,
    persistent_failure: Mutex<Option<StoreError>>,
    latency: Mutex<Duration>,
    calls: AtomicU64,
}

impl InMemoryProfileStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a row and returns the store, for fluent setup.
    #[must_use]
    pub fn with_profile(self, profile: Profile) -> Self {
        self.insert(profile);
        self
    }

    /// Inserts or replaces a row.
    pub fn insert(&self, profile: Profile) {
        self.rows.insert(profile.id.clone(), profile);
    }

    /// Removes a row.
    pub fn remove(&self, subject_id: &str) -> Option<Profile> {
        self.rows.remove(subject_id).map(|(_, profile)| profile)
    }

    /// Makes a row invisible to lookups while keeping it stored.
    pub fn hide(&self, subject_id: &str) {
        self.hidden.lock().insert(subject_id.to_string());
    }

    /// Makes a hidden row visible again.
    pub fn reveal(&self, subject_id: &str) {
        self.hidden.lock().remove(subject_id);
    }

    /// Queues an error returned by the next lookup, ahead of other behavior.
    pub fn push_failure(&self, error: StoreError) {
        self.scripted_failures.lock().push_back(error);
    }

    /// Makes every lookup fail with `error` until [`Self::recover`] is called.
    pub fn fail_always(&self, error: StoreError) {
        *self.persistent_failure.lock() = Some(error);
    }

    /// Clears scripted and persistent failures.
    pub fn recover(&self) {
        self.scripted_failures.lock().clear();
        *self.persistent_failure.lock() = None;
    }

    /// Delays every lookup by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Number of lookups received, including failed ones.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn fetch_profile_by_id(
        &self,
        query: &ProfileQuery<'_>,
    ) -> Result<Option<Profile>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = self.scripted_failures.lock().pop_front() {
            return Err(error);
        }
        if let Some(error) = self.persistent_failure.lock().clone() {
            return Err(error);
        }
        if self.hidden.lock().contains(query.subject_id) {
            return Ok(None);
        }

        Ok(self
            .rows
            .get(query.subject_id)
            .map(|row| row.value().clone()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        match self.persistent_failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// [`StoreConnector`] handing out a shared in-memory store.
pub struct InMemoryConnector {
    store: Arc<InMemoryProfileStore>,
    connect_error: Mutex<Option<StoreError>>,
    connects: AtomicU64,
}

impl InMemoryConnector {
    /// Creates a connector whose connections all read `store`.
    pub fn new(store: Arc<InMemoryProfileStore>) -> Self {
        Self {
            store,
            connect_error: Mutex::new(None),
            connects: AtomicU64::new(0),
        }
    }

    /// Makes every connection attempt fail with `error`.
    pub fn refuse_connections(&self, error: StoreError) {
        *self.connect_error.lock() = Some(error);
    }

    /// Number of connection attempts.
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreConnector for InMemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn ProfileStore>, StoreError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.connect_error.lock().clone() {
            return Err(error);
        }
        Ok(self.store.clone() as Arc<dyn ProfileStore>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(subject_id: &str) -> ProfileQuery<'_> {
        ProfileQuery::new(subject_id, "token")
    }

    #[tokio::test]
    async fn test_lookup_counts_calls() {
        let store = InMemoryProfileStore::new().with_profile(Profile::new("u1", "a@x.com"));

        let found = store.fetch_profile_by_id(&query("u1")).await.unwrap();
        let missing = store.fetch_profile_by_id(&query("u2")).await.unwrap();

        assert_eq!(found.unwrap().email, "a@x.com");
        assert!(missing.is_none());
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failures_run_in_order() {
        let store = InMemoryProfileStore::new().with_profile(Profile::new("u1", "a@x.com"));
        store.push_failure(StoreError::transient("reset"));
        store.push_failure(StoreError::fatal("syntax"));

        assert!(matches!(
            store.fetch_profile_by_id(&query("u1")).await,
            Err(StoreError::Transient { .. })
        ));
        assert!(matches!(
            store.fetch_profile_by_id(&query("u1")).await,
            Err(StoreError::Fatal { .. })
        ));
        assert!(store.fetch_profile_by_id(&query("u1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_hidden_rows_look_empty() {
        let store = InMemoryProfileStore::new().with_profile(Profile::new("u1", "a@x.com"));
        store.hide("u1");
        assert!(store.fetch_profile_by_id(&query("u1")).await.unwrap().is_none());

        store.reveal("u1");
        assert!(store.fetch_profile_by_id(&query("u1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_persistent_failure_fails_ping() {
        let store = InMemoryProfileStore::new();
        assert!(store.ping().await.is_ok());

        store.fail_always(StoreError::transient("down"));
        assert!(store.ping().await.is_err());

        store.recover();
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_connector_counts_and_refuses() {
        let store = Arc::new(InMemoryProfileStore::new());
        let connector = InMemoryConnector::new(store);

        assert!(connector.connect().await.is_ok());
        connector.refuse_connections(StoreError::fatal("auth failed"));
        assert!(connector.connect().await.is_err());
        assert_eq!(connector.connects(), 2);
    }
}

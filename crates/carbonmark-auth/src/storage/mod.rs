//! Storage contracts for profile lookups.
//!
//! The resolver talks to three kinds of store, all through [`ProfileStore`]:
//!
//! - the primary store, queried with the caller's own credentials so
//!   row-level security applies;
//! - the elevated store, a privileged connection that bypasses row-level
//!   security and is only used as a fallback;
//! - fresh connections produced on demand by a [`StoreConnector`], used as
//!   the last resort when pooled connections may be wedged.
//!
//! # Implementations
//!
//! - [`memory::InMemoryProfileStore`] - in-process store with fault injection
//!
//! Database-backed implementations live with the application that owns the
//! connection pools.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::Profile;

pub use memory::InMemoryProfileStore;

/// Parameters of a single profile lookup.
#[derive(Debug, Clone, Copy)]
pub struct ProfileQuery<'a> {
    /// Subject whose profile is requested.
    pub subject_id: &'a str,

    /// The caller's bearer token, for stores that scope queries to the caller.
    /// Privileged stores ignore it.
    pub bearer_token: &'a str,
}

impl<'a> ProfileQuery<'a> {
    /// Creates a query for a subject on behalf of a caller.
    pub fn new(subject_id: &'a str, bearer_token: &'a str) -> Self {
        Self {
            subject_id,
            bearer_token,
        }
    }
}

/// A store that can look up profiles by subject id.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetches the profile row for a subject.
    ///
    /// Returns `Ok(None)` when the store is reachable but no row is visible.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Transient` for failures worth retrying and
    /// `StoreError::Fatal` for everything else.
    async fn fetch_profile_by_id(
        &self,
        query: &ProfileQuery<'_>,
    ) -> Result<Option<Profile>, StoreError>;

    /// Cheap reachability probe used by health reporting.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Opens brand-new privileged store connections.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Opens a new connection, bypassing any pooled state.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    async fn connect(&self) -> Result<Arc<dyn ProfileStore>, StoreError>;
}

//! Ordered fallback strategies for profile resolution.
//!
//! Strategies run in escalating order of cost and privilege:
//!
//! 1. `cache` - local TTL cache, no I/O
//! 2. `primary` - caller-scoped store, timeout + retry + breaker
//! 3. `elevated` - privileged store bypassing row-level security, single attempt + breaker
//! 4. `fresh_connection` - brand-new privileged connection, single attempt + breaker
//!
//! Any error or empty result moves on to the next strategy. The first
//! profile found is normalized, cached, and returned. Only exhausting every
//! strategy produces an error.

use std::sync::Arc;

use crate::AuthResult;
use crate::cache::ProfileCache;
use crate::config::IdentityConfig;
use crate::error::AuthError;
use crate::monitor::{AuthMonitor, StrategyTag};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitSnapshot};
use crate::resilience::guarded::{FreshConnectionStore, GuardedStore, RetryingStore};
use crate::resilience::retry::RetryPolicy;
use crate::storage::{ProfileQuery, ProfileStore, StoreConnector};
use crate::types::Profile;

/// Breaker name for the primary strategy.
pub const PRIMARY_BREAKER: &str = "primary_store";
/// Breaker name for the elevated strategy.
pub const ELEVATED_BREAKER: &str = "elevated_store";
/// Breaker name for the fresh-connection strategy.
pub const FRESH_CONNECTION_BREAKER: &str = "fresh_connection";

/// The stores available to the chain.
#[derive(Clone)]
pub struct ProfileStores {
    pub primary: Arc<dyn ProfileStore>,
    pub elevated: Option<Arc<dyn ProfileStore>>,
    pub connector: Option<Arc<dyn StoreConnector>>,
}

impl ProfileStores {
    /// Only a primary store; fallbacks can be added with the builder methods.
    pub fn new(primary: Arc<dyn ProfileStore>) -> Self {
        Self {
            primary,
            elevated: None,
            connector: None,
        }
    }

    #[must_use]
    pub fn with_elevated(mut self, elevated: Arc<dyn ProfileStore>) -> Self {
        self.elevated = Some(elevated);
        self
    }

    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn StoreConnector>) -> Self {
        self.connector = Some(connector);
        self
    }
}

struct Strategy {
    tag: StrategyTag,
    store: GuardedStore,
}

/// Cache-first chain of store strategies.
pub struct FallbackChain {
    cache: Arc<dyn ProfileCache>,
    monitor: Arc<AuthMonitor>,
    strategies: Vec<Strategy>,
}

impl FallbackChain {
    pub fn new(
        config: &IdentityConfig,
        stores: &ProfileStores,
        cache: Arc<dyn ProfileCache>,
        monitor: Arc<AuthMonitor>,
    ) -> Self {
        let timeout = config.store.query_timeout;
        let breaker = |name: &str| Arc::new(CircuitBreaker::from_config(name, &config.breaker));

        let mut strategies = vec![Strategy {
            tag: StrategyTag::Primary,
            store: GuardedStore::new(
                breaker(PRIMARY_BREAKER),
                Arc::new(RetryingStore::new(
                    "primary",
                    stores.primary.clone(),
                    RetryPolicy::from(&config.retry),
                    timeout,
                )),
            ),
        }];

        if let Some(elevated) = &stores.elevated {
            strategies.push(Strategy {
                tag: StrategyTag::Elevated,
                store: GuardedStore::new(
                    breaker(ELEVATED_BREAKER),
                    Arc::new(RetryingStore::new(
                        "elevated",
                        elevated.clone(),
                        RetryPolicy::none(),
                        timeout,
                    )),
                ),
            });
        }

        if let Some(connector) = &stores.connector {
            strategies.push(Strategy {
                tag: StrategyTag::FreshConnection,
                store: GuardedStore::new(
                    breaker(FRESH_CONNECTION_BREAKER),
                    Arc::new(FreshConnectionStore::new(connector.clone(), timeout)),
                ),
            });
        }

        Self {
            cache,
            monitor,
            strategies,
        }
    }

    /// Resolves the subject's profile, trying each strategy in order.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Unresolvable` when every strategy failed or found
    /// no row.
    pub async fn resolve(&self, subject_id: &str, bearer_token: &str) -> AuthResult<Arc<Profile>> {
        let timer = self.monitor.start(subject_id, StrategyTag::Cache);
        if let Some(profile) = self.cache.get(subject_id).await {
            timer.succeed();
            return Ok(profile);
        }
        timer.discard();

        let query = ProfileQuery::new(subject_id, bearer_token);
        for strategy in &self.strategies {
            let timer = self.monitor.start(subject_id, strategy.tag);
            match strategy.store.fetch_profile_by_id(&query).await {
                Ok(Some(profile)) => {
                    timer.succeed();
                    tracing::debug!(subject_id, strategy = %strategy.tag, "Profile resolved");
                    let profile = self
                        .cache
                        .insert(subject_id.to_string(), profile.normalized())
                        .await;
                    return Ok(profile);
                }
                Ok(None) => {
                    tracing::info!(
                        subject_id,
                        strategy = %strategy.tag,
                        "No profile row visible, escalating"
                    );
                    timer.fail("no profile row visible");
                }
                Err(err) => {
                    tracing::warn!(
                        subject_id,
                        strategy = %strategy.tag,
                        error = %err,
                        "Profile lookup failed, escalating"
                    );
                    timer.fail(&err);
                }
            }
        }

        tracing::error!(subject_id, "All profile resolution strategies failed");
        Err(AuthError::unresolvable(subject_id))
    }

    /// Store strategies in the order they run, after the cache.
    pub fn strategies(&self) -> Vec<StrategyTag> {
        self.strategies.iter().map(|strategy| strategy.tag).collect()
    }

    /// Snapshots of every strategy's breaker.
    pub fn breakers(&self) -> Vec<CircuitSnapshot> {
        self.strategies
            .iter()
            .map(|strategy| strategy.store.breaker().snapshot())
            .collect()
    }
}

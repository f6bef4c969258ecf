//! The identity resolver entry point.
//!
//! [`IdentityResolver`] wires the token verifier, request coordinator,
//! fallback chain, cache, and monitor together. Everything it owns is
//! constructed explicitly and shared through `Arc`, so each test or
//! application instance gets isolated state.

pub mod chain;
pub mod coordinator;

use std::sync::Arc;

use crate::AuthResult;
use crate::cache::{ProfileCache, create_profile_cache};
use crate::config::IdentityConfig;
use crate::error::{AuthError, StoreError};
use crate::monitor::AuthMonitor;
use crate::monitor::health::{HealthReport, QuickHealth, StoreConnectivity, StoreProbe};
use crate::resilience::circuit_breaker::CircuitSnapshot;
use crate::storage::ProfileStore;
use crate::token::TokenVerifier;
use crate::types::Profile;

pub use chain::{FallbackChain, ProfileStores};
pub use coordinator::{CoordinatorStats, RequestCoordinator};

/// Cache key read by the quick health check.
const HEALTH_CHECK_KEY: &str = "health-check";

/// Turns bearer tokens into validated profiles.
pub struct IdentityResolver {
    config: IdentityConfig,
    verifier: Arc<dyn TokenVerifier>,
    stores: ProfileStores,
    cache: Arc<dyn ProfileCache>,
    monitor: Arc<AuthMonitor>,
    coordinator: RequestCoordinator,
    chain: FallbackChain,
}

impl IdentityResolver {
    /// Builds a resolver with a cache and monitor created from `config`.
    pub fn new(
        config: IdentityConfig,
        verifier: Arc<dyn TokenVerifier>,
        stores: ProfileStores,
    ) -> Self {
        let cache = create_profile_cache(&config.cache);
        let monitor = Arc::new(AuthMonitor::new(config.monitor.clone()));
        Self::with_parts(config, verifier, stores, cache, monitor)
    }

    /// Builds a resolver around an existing cache and monitor.
    pub fn with_parts(
        config: IdentityConfig,
        verifier: Arc<dyn TokenVerifier>,
        stores: ProfileStores,
        cache: Arc<dyn ProfileCache>,
        monitor: Arc<AuthMonitor>,
    ) -> Self {
        let chain = FallbackChain::new(&config, &stores, cache.clone(), monitor.clone());
        let coordinator = RequestCoordinator::from_config(&config.coordinator);
        tracing::info!(
            strategies = ?chain.strategies(),
            cache_enabled = config.cache.enabled,
            "Identity resolver initialized"
        );
        Self {
            config,
            verifier,
            stores,
            cache,
            monitor,
            coordinator,
            chain,
        }
    }

    /// Resolves the profile of the caller presenting `bearer_token`.
    ///
    /// # Errors
    ///
    /// - `AuthError::MissingCredentials` if the token is empty
    /// - `AuthError::InvalidToken` if verification fails
    /// - `AuthError::Unresolvable` if no strategy produced a profile
    pub async fn resolve_current_user(&self, bearer_token: &str) -> AuthResult<Arc<Profile>> {
        let bearer_token = bearer_token.trim();
        if bearer_token.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let subject_id = self.verifier.verify(bearer_token).await.map_err(|err| {
            tracing::debug!(error = %err, "Bearer token rejected");
            AuthError::invalid_token(err.to_string())
        })?;

        self.resolve_subject(&subject_id, bearer_token).await
    }

    /// Resolves an already verified subject.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Unresolvable` if no strategy produced a profile.
    pub async fn resolve_subject(
        &self,
        subject_id: &str,
        bearer_token: &str,
    ) -> AuthResult<Arc<Profile>> {
        self.coordinator
            .run(subject_id, || self.chain.resolve(subject_id, bearer_token))
            .await
    }

    /// Drops the cached profile and recent-success marker for a subject.
    pub async fn invalidate(&self, subject_id: &str) {
        self.cache.invalidate(subject_id).await;
        self.coordinator.forget(subject_id);
        tracing::debug!(subject_id, "Invalidated resolved identity");
    }

    /// Builds the full health report, pinging the configured stores.
    pub async fn health_report(&self) -> HealthReport {
        let primary = StoreProbe::from_result(self.ping(self.stores.primary.as_ref()).await);
        let elevated = match &self.stores.elevated {
            Some(store) => Some(StoreProbe::from_result(self.ping(store.as_ref()).await)),
            None => None,
        };

        HealthReport::build(
            self.monitor.health_metrics(),
            self.cache.stats(),
            self.chain.breakers(),
            StoreConnectivity { primary, elevated },
        )
    }

    /// Cheap liveness answer for load balancers.
    pub async fn quick_health(&self) -> QuickHealth {
        let _ = self.cache.get(HEALTH_CHECK_KEY).await;
        match self.ping(self.stores.primary.as_ref()).await {
            Ok(()) => QuickHealth::healthy(),
            Err(err) => {
                tracing::error!(error = %err, "Quick health check failed");
                QuickHealth::unhealthy(err.to_string())
            }
        }
    }

    async fn ping(&self, store: &dyn ProfileStore) -> Result<(), StoreError> {
        let timeout = self.config.store.query_timeout;
        match tokio::time::timeout(timeout, store.ping()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout { after: timeout }),
        }
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn ProfileCache> {
        &self.cache
    }

    pub fn monitor(&self) -> &Arc<AuthMonitor> {
        &self.monitor
    }

    pub fn coordinator(&self) -> &RequestCoordinator {
        &self.coordinator
    }

    pub fn breakers(&self) -> Vec<CircuitSnapshot> {
        self.chain.breakers()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::storage::memory::InMemoryProfileStore;
    use crate::token::VerifyError;

    /// Accepts `token-<subject>` and rejects everything else.
    struct PrefixVerifier;

    #[async_trait]
    impl TokenVerifier for PrefixVerifier {
        async fn verify(&self, token: &str) -> Result<String, VerifyError> {
            token
                .strip_prefix("token-")
                .map(str::to_string)
                .ok_or(VerifyError::InvalidSignature)
        }
    }

    fn resolver(store: Arc<InMemoryProfileStore>) -> IdentityResolver {
        IdentityResolver::new(
            IdentityConfig::default(),
            Arc::new(PrefixVerifier),
            ProfileStores::new(store),
        )
    }

    #[tokio::test]
    async fn test_resolves_verified_subject() {
        let store = Arc::new(InMemoryProfileStore::new().with_profile(Profile::new("u1", "a@x.com")));
        let resolver = resolver(store);

        let profile = resolver.resolve_current_user("token-u1").await.unwrap();

        assert_eq!(profile.email, "a@x.com");
        assert!(resolver.coordinator().has_recent_success("u1"));
    }

    #[tokio::test]
    async fn test_empty_token_is_missing_credentials() {
        let resolver = resolver(Arc::new(InMemoryProfileStore::new()));

        let result = resolver.resolve_current_user("   ").await;

        assert!(matches!(result, Err(AuthError::MissingCredentials)));
    }

    #[tokio::test]
    async fn test_rejected_token_never_reaches_store() {
        let store = Arc::new(InMemoryProfileStore::new());
        let resolver = resolver(store.clone());

        let result = resolver.resolve_current_user("garbage").await;

        assert!(matches!(result, Err(AuthError::InvalidToken { .. })));
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_forces_store_lookup() {
        let store = Arc::new(InMemoryProfileStore::new().with_profile(Profile::new("u1", "a@x.com")));
        let resolver = resolver(store.clone());
        resolver.resolve_current_user("token-u1").await.unwrap();

        resolver.invalidate("u1").await;
        store.insert(Profile::new("u1", "new@x.com"));
        let profile = resolver.resolve_current_user("token-u1").await.unwrap();

        assert_eq!(profile.email, "new@x.com");
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test]
    async fn test_quick_health_reflects_primary_ping() {
        let store = Arc::new(InMemoryProfileStore::new());
        let resolver = resolver(store.clone());
        assert!(resolver.quick_health().await.is_healthy());
        assert_eq!(resolver.cache().stats().misses, 1);

        store.fail_always(StoreError::transient("connection refused"));
        let health = resolver.quick_health().await;
        assert!(!health.is_healthy());
        assert!(health.error.unwrap().contains("connection refused"));
    }
}

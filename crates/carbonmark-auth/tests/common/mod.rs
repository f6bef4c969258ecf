#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use carbonmark_auth::storage::memory::{InMemoryConnector, InMemoryProfileStore};
use carbonmark_auth::token::VerifyError;
use carbonmark_auth::{IdentityConfig, IdentityResolver, Profile, ProfileStores, TokenVerifier};

/// Accepts `token-<subject>` and rejects everything else.
pub struct PrefixVerifier;

#[async_trait]
impl TokenVerifier for PrefixVerifier {
    async fn verify(&self, token: &str) -> Result<String, VerifyError> {
        token
            .strip_prefix("token-")
            .map(str::to_string)
            .ok_or(VerifyError::InvalidSignature)
    }
}

pub fn token(subject_id: &str) -> String {
    format!("token-{subject_id}")
}

/// A resolver over three in-memory stores that all start out empty.
pub struct Harness {
    pub primary: Arc<InMemoryProfileStore>,
    pub elevated: Arc<InMemoryProfileStore>,
    pub fresh: Arc<InMemoryProfileStore>,
    pub connector: Arc<InMemoryConnector>,
    pub resolver: Arc<IdentityResolver>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(IdentityConfig::default())
    }

    pub fn with_config(config: IdentityConfig) -> Self {
        let primary = Arc::new(InMemoryProfileStore::new());
        let elevated = Arc::new(InMemoryProfileStore::new());
        let fresh = Arc::new(InMemoryProfileStore::new());
        let connector = Arc::new(InMemoryConnector::new(fresh.clone()));
        let stores = ProfileStores::new(primary.clone())
            .with_elevated(elevated.clone())
            .with_connector(connector.clone());
        let resolver = Arc::new(IdentityResolver::new(
            config,
            Arc::new(PrefixVerifier),
            stores,
        ));
        Self {
            primary,
            elevated,
            fresh,
            connector,
            resolver,
        }
    }

    /// Stores the profile in every backing store.
    pub fn seed(&self, profile: Profile) {
        self.primary.insert(profile.clone());
        self.elevated.insert(profile.clone());
        self.fresh.insert(profile);
    }

    /// Total lookups across all stores.
    pub fn store_calls(&self) -> u64 {
        self.primary.calls() + self.elevated.calls() + self.fresh.calls()
    }
}

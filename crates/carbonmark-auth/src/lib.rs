//! # carbonmark-auth
//!
//! Identity resolution core for the Carbonmark API.
//!
//! Every authenticated request in the application goes through one contract:
//! a bearer token is turned into a validated [`Profile`], or the request is
//! rejected with a uniform "could not validate credentials" error. The profile
//! store behind that contract can be slow, flaky, or hide rows behind
//! row-level security, so resolution is layered:
//!
//! ```text
//! bearer token
//!   → TokenVerifier            (subject id)
//!   → RequestCoordinator       (per-subject lease until first success)
//!   → FallbackChain            (cache → primary → elevated → fresh connection)
//!        each store strategy: timeout + retry + circuit breaker
//!   → Profile                  (cached on success)
//! AuthMonitor observes every strategy attempt.
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Profile snapshot types
//! - [`error`] - Error taxonomy and HTTP rendering
//! - [`config`] - Configuration sections and loader
//! - [`observability`] - Tracing subscriber setup
//! - [`token`] - Token verification gateway
//! - [`storage`] - Profile store contracts and an in-memory store
//! - [`cache`] - TTL profile cache
//! - [`resilience`] - Circuit breaker, retry, and store adapters
//! - [`resolver`] - Fallback chain, request coordinator, and the resolver entry point
//! - [`monitor`] - Attempt recording, health metrics, and health reports
//! - [`http`] - Axum extractor and health endpoints

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod monitor;
pub mod observability;
pub mod resilience;
pub mod resolver;
pub mod storage;
pub mod token;
pub mod types;

pub use cache::{CacheStats, LocalProfileCache, NoOpProfileCache, ProfileCache};
pub use config::{ConfigError, IdentityConfig};
pub use error::{AuthError, StoreError};
pub use http::{CurrentUser, health_router};
pub use monitor::{AuthMonitor, HealthMetrics, StrategyTag};
pub use monitor::health::{HealthReport, HealthStatus, QuickHealth};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitError, CircuitSnapshot, CircuitState};
pub use resolver::{FallbackChain, IdentityResolver, ProfileStores, RequestCoordinator};
pub use storage::{ProfileQuery, ProfileStore, StoreConnector};
pub use token::{JwtTokenVerifier, TokenVerifier};
pub use types::{AccountType, Profile, SellerVerification, VerificationStatus};

/// Type alias for identity resolution results.
pub type AuthResult<T> = Result<T, AuthError>;

//! Identity resolution configuration.
//!
//! All sections default to the values the resolver was tuned with, so an
//! empty file (or no file at all) is a valid configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [cache]
//! ttl = "5m"
//!
//! [breaker]
//! failure_threshold = 2
//! recovery_timeout = "10s"
//!
//! [retry]
//! max_retries = 2
//! initial_backoff = "100ms"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value is outside its permitted range.
    #[error("Invalid configuration value for {field}: {message}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        message: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

// =============================================================================
// Root Config
// =============================================================================

/// Root configuration for the identity resolver.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Profile cache configuration.
    pub cache: CacheConfig,

    /// Request coordinator configuration.
    pub coordinator: CoordinatorConfig,

    /// Circuit breaker configuration, applied to every store strategy.
    pub breaker: BreakerConfig,

    /// In-strategy retry configuration.
    pub retry: RetryConfig,

    /// Store query configuration.
    pub store: StoreConfig,

    /// Auth monitor configuration.
    pub monitor: MonitorConfig,

    /// Bearer token verification configuration.
    pub token: TokenConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl IdentityConfig {
    /// Checks every section for out-of-range values.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.ttl.is_zero() {
            return Err(ConfigError::invalid("cache.ttl", "must be positive"));
        }
        if self.coordinator.grace_window.is_zero() {
            return Err(ConfigError::invalid(
                "coordinator.grace_window",
                "must be positive",
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "breaker.failure_threshold",
                "must be at least 1",
            ));
        }
        if self.breaker.recovery_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "breaker.recovery_timeout",
                "must be positive",
            ));
        }
        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err(ConfigError::invalid(
                "retry.initial_backoff",
                format!(
                    "{:?} exceeds max_backoff {:?}",
                    self.retry.initial_backoff, self.retry.max_backoff
                ),
            ));
        }
        if self.store.query_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "store.query_timeout",
                "must be positive",
            ));
        }
        if self.monitor.max_history == 0 {
            return Err(ConfigError::invalid(
                "monitor.max_history",
                "must be at least 1",
            ));
        }
        for (field, value) in [
            ("monitor.warn_success_rate", self.monitor.warn_success_rate),
            (
                "monitor.critical_success_rate",
                self.monitor.critical_success_rate,
            ),
            ("monitor.min_cache_hit_rate", self.monitor.min_cache_hit_rate),
            ("monitor.max_fallback_rate", self.monitor.max_fallback_rate),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::invalid(
                    field,
                    format!("{value} is not a percentage"),
                ));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Sections
// =============================================================================

/// Profile cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When disabled, every resolution goes to the stores.
    pub enabled: bool,

    /// Maximum age of a cached profile.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(300),
        }
    }
}

/// Request coordinator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// How long after a successful resolution a subject may skip its lease.
    #[serde(with = "humantime_serde")]
    pub grace_window: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            grace_window: Duration::from_secs(5 * 60),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Time since the last failure before a trial call is allowed.
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(10),
        }
    }
}

/// Retry configuration for the primary store strategy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry; doubles on each further retry.
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Upper bound for a single backoff delay.
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Retry when the store returns no row.
    /// Useful when profile rows are written shortly after sign-up.
    pub retry_on_empty: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            retry_on_empty: false,
        }
    }
}

/// Store query configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Time budget for a single store query.
    #[serde(with = "humantime_serde")]
    pub query_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(5),
        }
    }
}

/// Auth monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Attempts kept in the history ring.
    pub max_history: usize,

    /// Window for the overall success rate and strategy breakdown.
    #[serde(with = "humantime_serde")]
    pub success_window: Duration,

    /// Window for the recent-failures list.
    #[serde(with = "humantime_serde")]
    pub failure_window: Duration,

    /// Maximum entries in the recent-failures list.
    pub max_recent_failures: usize,

    /// Success rate (percent) below which a warning alert is raised.
    pub warn_success_rate: f64,

    /// Success rate (percent) below which a critical alert is raised.
    pub critical_success_rate: f64,

    /// Cache share of attempts (percent) below which an alert is raised.
    pub min_cache_hit_rate: f64,

    /// Fallback share of attempts (percent) above which an alert is raised.
    pub max_fallback_rate: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_history: 1000,
            success_window: Duration::from_secs(3600),
            failure_window: Duration::from_secs(5 * 60),
            max_recent_failures: 10,
            warn_success_rate: 95.0,
            critical_success_rate: 80.0,
            min_cache_hit_rate: 50.0,
            max_fallback_rate: 20.0,
        }
    }
}

/// Bearer token verification configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// HS256 secret shared with the identity provider.
    /// Prefer `CARBONMARK__TOKEN__SECRET` over putting it in a file.
    pub secret: String,

    /// Expected `iss` claim, if any.
    pub issuer: Option<String>,

    /// Expected `aud` claim, if any.
    pub audience: Option<String>,

    /// Clock skew tolerated on `exp`/`nbf`.
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: None,
            audience: None,
            leeway: Duration::from_secs(30),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// =============================================================================
// Loader
// =============================================================================

pub mod loader {
    use super::{ConfigError, IdentityConfig};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file looked up in the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "carbonmark.toml";

    /// Loads configuration from an optional TOML file and the environment.
    ///
    /// Environment variables override the file, e.g.
    /// `CARBONMARK__BREAKER__FAILURE_THRESHOLD=5`.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load_config(path: Option<&str>) -> Result<IdentityConfig, ConfigError> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        builder = builder.add_source(
            Environment::with_prefix("CARBONMARK")
                .try_parsing(true)
                .separator("__"),
        );
        let merged: IdentityConfig = builder.build()?.try_deserialize()?;
        merged.validate()?;
        Ok(merged)
    }
}

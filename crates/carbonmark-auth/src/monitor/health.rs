//! Health reports built from monitor metrics.
//!
//! A [`HealthReport`] combines the monitor's [`HealthMetrics`], cache
//! statistics, circuit breaker snapshots, and store reachability into a
//! score, a coarse status, and operator recommendations.
//!
//! # Score
//!
//! | Component                        | Points          |
//! |----------------------------------|-----------------|
//! | Windowed success rate            | `rate * 0.4`    |
//! | Primary store reachable          | 20              |
//! | Elevated store reachable         | 10              |
//! | Every circuit breaker closed     | 20              |
//! | At least one store reachable     | 10              |

use serde::Serialize;
use time::OffsetDateTime;

use crate::cache::CacheStats;
use crate::resilience::circuit_breaker::{CircuitSnapshot, CircuitState};

use super::{HealthMetrics, StrategyTag};

/// Score at or above which the system is healthy.
pub const HEALTHY_SCORE: u8 = 80;

/// Score at or above which the system is degraded rather than unhealthy.
pub const DEGRADED_SCORE: u8 = 60;

/// Coarse health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn from_score(score: u8) -> Self {
        if score >= HEALTHY_SCORE {
            Self::Healthy
        } else if score >= DEGRADED_SCORE {
            Self::Degraded
        } else {
            Self::Unhealthy
        }
    }
}

/// Result of pinging one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreProbe {
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StoreProbe {
    pub fn from_result<E: std::fmt::Display>(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self {
                reachable: true,
                error: None,
            },
            Err(err) => Self {
                reachable: false,
                error: Some(err.to_string()),
            },
        }
    }
}

/// Reachability of the configured stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreConnectivity {
    pub primary: StoreProbe,
    /// `None` when no elevated store is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elevated: Option<StoreProbe>,
}

impl StoreConnectivity {
    fn elevated_reachable(&self) -> bool {
        self.elevated.as_ref().is_some_and(|probe| probe.reachable)
    }
}

/// Full health report served at `/health/auth`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub health_score: u8,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub metrics: HealthMetrics,
    pub cache: CacheStats,
    pub circuit_breakers: Vec<CircuitSnapshot>,
    pub stores: StoreConnectivity,
    pub recommendations: Vec<String>,
}

impl HealthReport {
    pub fn build(
        metrics: HealthMetrics,
        cache: CacheStats,
        circuit_breakers: Vec<CircuitSnapshot>,
        stores: StoreConnectivity,
    ) -> Self {
        let breakers_closed = circuit_breakers
            .iter()
            .all(|breaker| breaker.state == CircuitState::Closed);
        let health_score = health_score(
            metrics.overall.success_rate_percent,
            stores.primary.reachable,
            stores.elevated_reachable(),
            breakers_closed,
        );
        let recommendations = recommendations(&metrics, &cache, &circuit_breakers);

        Self {
            status: HealthStatus::from_score(health_score),
            health_score,
            timestamp: OffsetDateTime::now_utc(),
            metrics,
            cache,
            circuit_breakers,
            stores,
            recommendations,
        }
    }
}

/// Computes the 0..=100 health score.
pub fn health_score(
    success_rate_percent: f64,
    primary_reachable: bool,
    elevated_reachable: bool,
    breakers_closed: bool,
) -> u8 {
    let mut score = success_rate_percent.clamp(0.0, 100.0) * 0.4;
    if primary_reachable {
        score += 20.0;
    }
    if elevated_reachable {
        score += 10.0;
    }
    if breakers_closed {
        score += 20.0;
    }
    if primary_reachable || elevated_reachable {
        score += 10.0;
    }
    score.clamp(0.0, 100.0) as u8
}

/// Operator recommendations derived from the metrics.
pub fn recommendations(
    metrics: &HealthMetrics,
    cache: &CacheStats,
    breakers: &[CircuitSnapshot],
) -> Vec<String> {
    let mut out = Vec::new();
    let success_rate = metrics.overall.success_rate_percent;

    if success_rate < 95.0 {
        out.push("Investigate authentication failures: success rate below 95%".to_string());
    }
    if success_rate < 80.0 {
        out.push(
            "URGENT: authentication success rate critically low, check store connectivity"
                .to_string(),
        );
    }
    if cache.hits + cache.misses > 0 && cache.hit_rate() < 50.0 {
        out.push(
            "Consider increasing the cache TTL or reviewing cache invalidation patterns"
                .to_string(),
        );
    }
    for breaker in breakers.iter().filter(|b| b.state != CircuitState::Closed) {
        out.push(format!(
            "Circuit breaker '{}' is {}: store queries are being blocked",
            breaker.name, breaker.state
        ));
    }

    let primary = metrics.strategy(StrategyTag::Primary);
    if primary.attempts > 0 && primary.success_rate < 90.0 {
        out.push("Primary store lookups are failing: review connection pool tuning".to_string());
    }
    if metrics.fallback_attempts() > 10 {
        out.push(
            "High fallback strategy usage: investigate primary store reliability".to_string(),
        );
    }
    if metrics.recent_failures.len() > 5 {
        out.push("Multiple recent failures: check application logs for patterns".to_string());
    }
    out
}

/// Minimal health answer for load balancers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuickHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QuickHealth {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            error: None,
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            error: Some(error.into()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

//! Resolution attempt monitoring.
//!
//! [`AuthMonitor`] records the outcome and duration of every strategy
//! invocation and derives health metrics from a bounded history: a rolling
//! success rate, a per-strategy breakdown, the latest failures, and alert
//! strings for operators.
//!
//! Recording never fails and never waits. If the history lock is held by
//! someone else, the attempt is dropped and counted instead.

pub mod health;

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::config::MonitorConfig;

/// Identifies the strategy an attempt ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyTag {
    Cache,
    Primary,
    Elevated,
    FreshConnection,
}

impl StrategyTag {
    pub const ALL: [StrategyTag; 4] = [
        StrategyTag::Cache,
        StrategyTag::Primary,
        StrategyTag::Elevated,
        StrategyTag::FreshConnection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Primary => "primary",
            Self::Elevated => "elevated",
            Self::FreshConnection => "fresh_connection",
        }
    }

    /// Strategies that only run after the primary store failed.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Elevated | Self::FreshConnection)
    }

    fn index(self) -> usize {
        match self {
            Self::Cache => 0,
            Self::Primary => 1,
            Self::Elevated => 2,
            Self::FreshConnection => 3,
        }
    }
}

impl fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone)]
struct AuthAttempt {
    subject_id: String,
    strategy: StrategyTag,
    success: bool,
    duration: Duration,
    error: Option<String>,
    at: Instant,
    recorded_at: OffsetDateTime,
}

/// Lifetime totals for one strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StrategyTotals {
    pub successes: u64,
    pub failures: u64,
    pub total_duration_ms: f64,
}

#[derive(Debug, Default)]
struct History {
    attempts: VecDeque<AuthAttempt>,
    totals: [StrategyTotals; 4],
}

// ============================================================================
// Metrics
// ============================================================================

/// Success rate over the recent window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallHealth {
    /// Percentage in `0.0..=100.0`; `100.0` when nothing was recorded.
    pub success_rate_percent: f64,
    pub total_attempts: usize,
    pub successful_attempts: usize,
    pub failed_attempts: usize,
}

/// Per-strategy figures over the recent window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StrategyPerformance {
    pub attempts: usize,
    pub successes: usize,
    /// Percentage; `0.0` when the strategy did not run.
    pub success_rate: f64,
    pub avg_duration_ms: f64,
}

/// A recent failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub subject_id: String,
    pub strategy: StrategyTag,
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Snapshot returned by [`AuthMonitor::health_metrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthMetrics {
    pub overall: OverallHealth,
    pub strategies: BTreeMap<StrategyTag, StrategyPerformance>,
    pub totals: BTreeMap<StrategyTag, StrategyTotals>,
    pub recent_failures: Vec<FailureRecord>,
    pub alerts: Vec<String>,
    /// Attempts dropped because the history was busy.
    pub dropped_records: u64,
}

impl HealthMetrics {
    /// Figures for one strategy; zeroed when it did not run.
    pub fn strategy(&self, tag: StrategyTag) -> StrategyPerformance {
        self.strategies.get(&tag).cloned().unwrap_or_default()
    }

    /// Share of windowed attempts served by the cache, in percent.
    pub fn cache_hit_rate(&self) -> Option<f64> {
        self.share_of(|tag| tag == StrategyTag::Cache)
    }

    /// Share of windowed attempts that ran a fallback strategy, in percent.
    pub fn fallback_rate(&self) -> Option<f64> {
        self.share_of(|tag| tag.is_fallback())
    }

    /// Windowed attempts that ran a fallback strategy.
    pub fn fallback_attempts(&self) -> usize {
        self.strategies
            .iter()
            .filter(|(tag, _)| tag.is_fallback())
            .map(|(_, perf)| perf.attempts)
            .sum()
    }

    fn share_of(&self, pick: impl Fn(StrategyTag) -> bool) -> Option<f64> {
        let total: usize = self.strategies.values().map(|perf| perf.attempts).sum();
        if total == 0 {
            return None;
        }
        let picked: usize = self
            .strategies
            .iter()
            .filter(|(tag, _)| pick(**tag))
            .map(|(_, perf)| perf.attempts)
            .sum();
        Some(picked as f64 / total as f64 * 100.0)
    }
}

// ============================================================================
// Monitor
// ============================================================================

/// Bounded, internally synchronized record of resolution attempts.
#[derive(Debug)]
pub struct AuthMonitor {
    config: MonitorConfig,
    history: Mutex<History>,
    dropped: AtomicU64,
}

impl Default for AuthMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

impl AuthMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let capacity = config.max_history.min(4096);
        Self {
            config,
            history: Mutex::new(History {
                attempts: VecDeque::with_capacity(capacity),
                totals: Default::default(),
            }),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Records one strategy invocation.
    pub fn record_attempt(
        &self,
        subject_id: &str,
        strategy: StrategyTag,
        success: bool,
        duration: Duration,
        error: Option<String>,
    ) {
        if success && strategy.is_fallback() {
            tracing::warn!(subject_id, strategy = %strategy, "Profile resolution required fallback");
        }

        let Some(mut history) = self.history.try_lock() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(subject_id, strategy = %strategy, "Monitor busy, attempt dropped");
            return;
        };

        let totals = &mut history.totals[strategy.index()];
        if success {
            totals.successes += 1;
        } else {
            totals.failures += 1;
        }
        totals.total_duration_ms += duration.as_secs_f64() * 1000.0;

        if self.config.max_history == 0 {
            return;
        }
        while history.attempts.len() >= self.config.max_history {
            history.attempts.pop_front();
        }
        history.attempts.push_back(AuthAttempt {
            subject_id: subject_id.to_string(),
            strategy,
            success,
            duration,
            error,
            at: Instant::now(),
            recorded_at: OffsetDateTime::now_utc(),
        });
    }

    /// Starts timing one strategy invocation.
    pub fn start(&self, subject_id: &str, strategy: StrategyTag) -> AttemptTimer<'_> {
        AttemptTimer {
            monitor: self,
            subject_id: subject_id.to_string(),
            strategy,
            started: Instant::now(),
            settled: false,
        }
    }

    /// Number of attempts currently held in the history.
    pub fn len(&self) -> usize {
        self.history.lock().attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Computes metrics over the configured windows.
    pub fn health_metrics(&self) -> HealthMetrics {
        let now = Instant::now();
        let within = |at: Instant, window: Duration| now.saturating_duration_since(at) <= window;

        let (recent, totals) = {
            let history = self.history.lock();
            let recent: Vec<AuthAttempt> = history
                .attempts
                .iter()
                .filter(|attempt| within(attempt.at, self.config.success_window))
                .cloned()
                .collect();
            (recent, history.totals)
        };

        let total_attempts = recent.len();
        let successful_attempts = recent.iter().filter(|attempt| attempt.success).count();
        let success_rate_percent = if total_attempts == 0 {
            100.0
        } else {
            round2(successful_attempts as f64 / total_attempts as f64 * 100.0)
        };

        let mut strategies = BTreeMap::new();
        for tag in StrategyTag::ALL {
            let runs: Vec<&AuthAttempt> = recent.iter().filter(|attempt| attempt.strategy == tag).collect();
            let successes = runs.iter().filter(|attempt| attempt.success).count();
            let mut performance = StrategyPerformance {
                attempts: runs.len(),
                successes,
                ..StrategyPerformance::default()
            };
            if !runs.is_empty() {
                let total_ms: f64 = runs
                    .iter()
                    .map(|attempt| attempt.duration.as_secs_f64() * 1000.0)
                    .sum();
                performance.success_rate = round2(successes as f64 / runs.len() as f64 * 100.0);
                performance.avg_duration_ms = round2(total_ms / runs.len() as f64);
            }
            strategies.insert(tag, performance);
        }

        let failures: Vec<FailureRecord> = recent
            .iter()
            .filter(|attempt| !attempt.success && within(attempt.at, self.config.failure_window))
            .map(|attempt| FailureRecord {
                subject_id: attempt.subject_id.clone(),
                strategy: attempt.strategy,
                error: attempt.error.clone(),
                timestamp: attempt.recorded_at,
            })
            .collect();
        let skip = failures.len().saturating_sub(self.config.max_recent_failures);
        let recent_failures = failures.into_iter().skip(skip).collect();

        let totals = StrategyTag::ALL
            .iter()
            .map(|tag| (*tag, totals[tag.index()]))
            .collect();

        let mut metrics = HealthMetrics {
            overall: OverallHealth {
                success_rate_percent,
                total_attempts,
                successful_attempts,
                failed_attempts: total_attempts - successful_attempts,
            },
            strategies,
            totals,
            recent_failures,
            alerts: Vec::new(),
            dropped_records: self.dropped.load(Ordering::Relaxed),
        };
        metrics.alerts = self.alerts(&metrics);
        metrics
    }

    fn alerts(&self, metrics: &HealthMetrics) -> Vec<String> {
        let mut alerts = Vec::new();
        let success_rate = metrics.overall.success_rate_percent;

        if success_rate < self.config.warn_success_rate {
            alerts.push(format!("Low success rate: {success_rate:.1}%"));
        }
        if success_rate < self.config.critical_success_rate {
            alerts.push(format!(
                "CRITICAL: authentication success rate below {:.0}%",
                self.config.critical_success_rate
            ));
        }
        if let Some(hit_rate) = metrics.cache_hit_rate()
            && hit_rate < self.config.min_cache_hit_rate
        {
            alerts.push(format!("Low cache hit rate: {hit_rate:.1}%"));
        }
        if let Some(fallback_rate) = metrics.fallback_rate()
            && fallback_rate > self.config.max_fallback_rate
        {
            alerts.push(format!("High fallback usage: {fallback_rate:.1}%"));
        }
        alerts
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// Attempt Timer
// ============================================================================

/// Scoped timer for one strategy invocation.
///
/// Settle it with [`succeed`](Self::succeed), [`fail`](Self::fail), or
/// [`discard`](Self::discard). A timer dropped unsettled, as happens when the
/// resolving future is cancelled, records a failure.
#[must_use = "settle the timer with succeed(), fail(), or discard()"]
pub struct AttemptTimer<'a> {
    monitor: &'a AuthMonitor,
    subject_id: String,
    strategy: StrategyTag,
    started: Instant,
    settled: bool,
}

impl AttemptTimer<'_> {
    pub fn succeed(mut self) {
        self.finish(true, None);
    }

    pub fn fail(mut self, error: impl fmt::Display) {
        self.finish(false, Some(error.to_string()));
    }

    /// Drops the attempt without recording it.
    pub fn discard(mut self) {
        self.settled = true;
    }

    fn finish(&mut self, success: bool, error: Option<String>) {
        self.settled = true;
        self.monitor.record_attempt(
            &self.subject_id,
            self.strategy,
            success,
            self.started.elapsed(),
            error,
        );
    }
}

impl Drop for AttemptTimer<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.finish(false, Some("cancelled".to_string()));
        }
    }
}

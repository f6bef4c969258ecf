//! Profile caching for identity resolution.
//!
//! This module provides a trait-based cache for [`Profile`] snapshots keyed
//! by subject id. A cache hit lets the resolver skip every store strategy.
//!
//! ## Expiration
//!
//! Entries older than the TTL are treated as absent. Expired entries are
//! removed lazily by the read that finds them; there is no background sweep.
//! [`LocalProfileCache::cleanup_expired`] is available for callers that want
//! to reclaim memory explicitly.
//!
//! ## Invalidation
//!
//! Profile updates and logouts call `invalidate()` so the next resolution
//! refetches the row.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::types::Profile;

/// Trait for profile caching.
///
/// Profiles are stored as `Arc<Profile>`: the snapshot is immutable, so
/// sharing it between the cache and callers cannot alias a mutable copy.
#[async_trait]
pub trait ProfileCache: Send + Sync {
    /// Get a cached profile by subject id.
    ///
    /// Expired entries are evicted on the way and reported as a miss.
    async fn get(&self, subject_id: &str) -> Option<Arc<Profile>>;

    /// Insert a profile, replacing any previous entry for the subject.
    ///
    /// Returns the cached `Arc<Profile>` for use by the caller.
    async fn insert(&self, subject_id: String, profile: Profile) -> Arc<Profile>;

    /// Invalidate (remove) a cached profile.
    async fn invalidate(&self, subject_id: &str);

    /// Drops every entry.
    async fn clear(&self);

    /// Counters and entry ages for health reporting.
    fn stats(&self) -> CacheStats;

    /// Sweeps expired entries, returning how many went.
    /// Caches without expiry keep the default.
    fn cleanup_expired(&self) -> usize {
        0
    }
}

/// Profile cache counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Live entries, expired ones included until swept.
    pub size: usize,
    /// Configured time-to-live.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Insertion time of the oldest entry.
    #[serde(with = "time::serde::rfc3339::option")]
    pub oldest: Option<OffsetDateTime>,
    /// Insertion time of the newest entry.
    #[serde(with = "time::serde::rfc3339::option")]
    pub newest: Option<OffsetDateTime>,
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped for exceeding the TTL.
    pub evictions: u64,
}

impl CacheStats {
    /// Hits as a percentage of lookups; `0.0` before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Cached entry with its insertion times.
struct CachedEntry {
    profile: Arc<Profile>,
    inserted_at: Instant,
    inserted_wall: OffsetDateTime,
}

/// Local in-memory profile cache.
///
/// A single mutex guards the map; reads are short and contention is low.
pub struct LocalProfileCache {
    entries: Mutex<HashMap<String, CachedEntry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl LocalProfileCache {
    /// Create a new local profile cache with the specified TTL.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use carbonmark_auth::cache::LocalProfileCache;
    ///
    /// let cache = LocalProfileCache::new(Duration::from_secs(300));
    /// ```
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Create a new cache with the default TTL of 5 minutes.
    pub fn default_ttl() -> Self {
        Self::new(Duration::from_secs(300))
    }

    fn is_expired(&self, entry: &CachedEntry, now: Instant) -> bool {
        now.duration_since(entry.inserted_at) > self.ttl
    }

    /// Remove every expired entry and return how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.inserted_at) <= self.ttl);
        let removed = before - entries.len();

        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }

        removed
    }
}

#[async_trait]
impl ProfileCache for LocalProfileCache {
    async fn get(&self, subject_id: &str) -> Option<Arc<Profile>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(subject_id) {
            if !self.is_expired(entry, now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(subject_id, "Profile cache hit");
                return Some(Arc::clone(&entry.profile));
            }
            entries.remove(subject_id);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(subject_id, "Profile cache entry expired");
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    async fn insert(&self, subject_id: String, profile: Profile) -> Arc<Profile> {
        let profile = Arc::new(profile);
        let entry = CachedEntry {
            profile: Arc::clone(&profile),
            inserted_at: Instant::now(),
            inserted_wall: OffsetDateTime::now_utc(),
        };
        tracing::debug!(subject_id = %subject_id, "Cached profile");
        self.entries.lock().insert(subject_id, entry);
        profile
    }

    async fn invalidate(&self, subject_id: &str) {
        if self.entries.lock().remove(subject_id).is_some() {
            tracing::debug!(subject_id, "Invalidated cached profile");
        }
    }

    async fn clear(&self) {
        self.entries.lock().clear();
        tracing::debug!("Cleared all cached profiles");
    }

    fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            size: entries.len(),
            ttl: self.ttl,
            oldest: entries.values().map(|e| e.inserted_wall).min(),
            newest: entries.values().map(|e| e.inserted_wall).max(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn cleanup_expired(&self) -> usize {
        LocalProfileCache::cleanup_expired(self)
    }
}

/// A no-op cache used when caching is disabled.
pub struct NoOpProfileCache;

#[async_trait]
impl ProfileCache for NoOpProfileCache {
    async fn get(&self, _subject_id: &str) -> Option<Arc<Profile>> {
        None
    }

    async fn insert(&self, _subject_id: String, profile: Profile) -> Arc<Profile> {
        Arc::new(profile)
    }

    async fn invalidate(&self, _subject_id: &str) {
        // No-op
    }

    async fn clear(&self) {
        // No-op
    }

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

/// Create the cache described by the configuration.
pub fn create_profile_cache(config: &crate::config::CacheConfig) -> Arc<dyn ProfileCache> {
    if config.enabled {
        Arc::new(LocalProfileCache::new(config.ttl))
    } else {
        Arc::new(NoOpProfileCache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn test_insert_and_get() {
        let cache = LocalProfileCache::new(TTL);
        cache
            .insert("u1".to_string(), Profile::new("u1", "a@x.com"))
            .await;

        let result = cache.get("u1").await;
        assert_eq!(result.unwrap().email, "a@x.com");

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert!(stats.oldest.is_some());
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let cache = LocalProfileCache::new(TTL);

        assert!(cache.get("nonexistent").await.is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
        assert!(stats.oldest.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_valid_just_before_ttl() {
        let cache = LocalProfileCache::new(TTL);
        cache
            .insert("u1".to_string(), Profile::new("u1", "a@x.com"))
            .await;

        tokio::time::advance(TTL - Duration::from_millis(1)).await;

        assert!(cache.get("u1").await.is_some());
        assert_eq!(cache.stats().evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_evicted_just_after_ttl() {
        let cache = LocalProfileCache::new(TTL);
        cache
            .insert("u1".to_string(), Profile::new("u1", "a@x.com"))
            .await;

        tokio::time::advance(TTL + Duration::from_millis(1)).await;

        assert!(cache.get("u1").await.is_none());
        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinsert_refreshes_age() {
        let cache = LocalProfileCache::new(TTL);
        cache
            .insert("u1".to_string(), Profile::new("u1", "old@x.com"))
            .await;
        tokio::time::advance(Duration::from_secs(200)).await;
        cache
            .insert("u1".to_string(), Profile::new("u1", "new@x.com"))
            .await;
        tokio::time::advance(Duration::from_secs(200)).await;

        assert_eq!(cache.get("u1").await.unwrap().email, "new@x.com");
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = LocalProfileCache::new(TTL);
        cache
            .insert("u1".to_string(), Profile::new("u1", "a@x.com"))
            .await;
        assert!(cache.get("u1").await.is_some());

        cache.invalidate("u1").await;
        assert!(cache.get("u1").await.is_none());
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = LocalProfileCache::new(TTL);

        for i in 0..5 {
            let id = format!("u{}", i);
            cache
                .insert(id.clone(), Profile::new(id, "a@x.com"))
                .await;
        }

        assert_eq!(cache.stats().size, 5);

        cache.clear().await;
        assert_eq!(cache.stats().size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expired() {
        let cache = LocalProfileCache::new(Duration::from_secs(10));

        for i in 0..3 {
            let id = format!("u{}", i);
            cache
                .insert(id.clone(), Profile::new(id, "a@x.com"))
                .await;
        }

        tokio::time::advance(Duration::from_secs(11)).await;
        cache
            .insert("fresh".to_string(), Profile::new("fresh", "f@x.com"))
            .await;

        let removed = cache.cleanup_expired();
        assert_eq!(removed, 3);
        assert_eq!(cache.stats().size, 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_never_hits() {
        let cache = create_profile_cache(&CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        cache
            .insert("u1".to_string(), Profile::new("u1", "a@x.com"))
            .await;

        assert!(cache.get("u1").await.is_none());
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_hit_rate_calculation() {
        let stats = CacheStats {
            hits: 75,
            misses: 25,
            ..CacheStats::default()
        };

        assert!((stats.hit_rate() - 75.0).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}

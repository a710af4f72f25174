//! Category-aware response cache.
//!
//! Memoizes upstream lookups keyed by a normalized bank/detail pair. Each
//! category carries its own TTL, fixed at configuration time. The cache is
//! never allowed to fail a request: every operation is infallible and a
//! malfunction degrades to a miss.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Cached data classes. Each shares one TTL policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    /// SEC EDGAR filing listings
    Filings,
    /// FDIC financial metrics
    BankMetrics,
    /// Bank identity lookups (name/ticker resolution)
    BankSearch,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 3] = [
        CacheCategory::Filings,
        CacheCategory::BankMetrics,
        CacheCategory::BankSearch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CacheCategory::Filings => "filings",
            CacheCategory::BankMetrics => "bank-metrics",
            CacheCategory::BankSearch => "bank-search",
        }
    }

    /// Parse an admin-surface category name.
    pub fn parse(name: &str) -> Option<CacheCategory> {
        match name.trim().to_ascii_lowercase().as_str() {
            "filings" => Some(CacheCategory::Filings),
            "bank-metrics" => Some(CacheCategory::BankMetrics),
            "bank-search" => Some(CacheCategory::BankSearch),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            CacheCategory::Filings => 0,
            CacheCategory::BankMetrics => 1,
            CacheCategory::BankSearch => 2,
        }
    }
}

struct Entry {
    value: serde_json::Value,
    expires_at: Instant,
}

struct Shard {
    ttl: Duration,
    map: RwLock<HashMap<String, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Shard {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            map: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

/// Per-category counters exposed on the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryStats {
    pub count: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub ttl_secs: u64,
}

/// In-memory cache with per-category TTLs and lazy expiry.
pub struct CacheService {
    shards: [Shard; 3],
}

impl CacheService {
    pub fn new(ttl_filings: Duration, ttl_metrics: Duration, ttl_search: Duration) -> Self {
        Self {
            shards: [
                Shard::new(ttl_filings),
                Shard::new(ttl_metrics),
                Shard::new(ttl_search),
            ],
        }
    }

    /// Normalized lookup key: lowercased, trimmed, inner whitespace collapsed,
    /// so "ROA for  JPMorgan " and "roa for jpmorgan" coalesce.
    pub fn key(bank: &str, detail: &str) -> String {
        let squash = |s: &str| {
            s.split_whitespace()
                .map(|w| w.to_lowercase())
                .collect::<Vec<_>>()
                .join(" ")
        };
        format!("{}|{}", squash(bank), squash(detail))
    }

    /// Look up a value. Expired entries behave exactly like misses and are
    /// removed on the way out (no stale reads).
    pub async fn get(&self, category: CacheCategory, key: &str) -> Option<serde_json::Value> {
        let shard = &self.shards[category.index()];
        let now = Instant::now();

        let expired = {
            let map = shard.map.read().await;
            match map.get(key) {
                Some(entry) if entry.expires_at > now => {
                    shard.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(category = category.as_str(), key, "Cache hit");
                    return Some(entry.value.clone());
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            let mut map = shard.map.write().await;
            // Re-check under the write lock: a concurrent set may have
            // refreshed the entry since the read lock was released.
            if map.get(key).is_some_and(|entry| entry.expires_at <= now) {
                map.remove(key);
            }
        }

        shard.misses.fetch_add(1, Ordering::Relaxed);
        debug!(category = category.as_str(), key, "Cache miss");
        None
    }

    /// Insert or replace a value. Last write wins; expiry is always
    /// `now + ttl(category)`.
    pub async fn set(&self, category: CacheCategory, key: impl Into<String>, value: serde_json::Value) {
        let shard = &self.shards[category.index()];
        let entry = Entry {
            value,
            expires_at: Instant::now() + shard.ttl,
        };
        shard.map.write().await.insert(key.into(), entry);
    }

    /// Proactively purge one category, or all of them.
    pub async fn invalidate(&self, category: Option<CacheCategory>) {
        match category {
            Some(cat) => self.shards[cat.index()].map.write().await.clear(),
            None => {
                for shard in &self.shards {
                    shard.map.write().await.clear();
                }
            }
        }
    }

    /// Per-category counts and hit rates. Expired entries are dropped first
    /// so `count` reflects live entries only.
    pub async fn stats(&self) -> BTreeMap<&'static str, CategoryStats> {
        let now = Instant::now();
        let mut out = BTreeMap::new();
        for category in CacheCategory::ALL {
            let shard = &self.shards[category.index()];
            let count = {
                let mut map = shard.map.write().await;
                map.retain(|_, entry| entry.expires_at > now);
                map.len()
            };
            let hits = shard.hits.load(Ordering::Relaxed);
            let misses = shard.misses.load(Ordering::Relaxed);
            let total = hits + misses;
            out.insert(
                category.as_str(),
                CategoryStats {
                    count,
                    hits,
                    misses,
                    hit_rate: if total == 0 {
                        0.0
                    } else {
                        hits as f64 / total as f64
                    },
                    ttl_secs: shard.ttl.as_secs(),
                },
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service() -> CacheService {
        CacheService::new(
            Duration::from_secs(60),
            Duration::from_secs(10),
            Duration::from_secs(30),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn entry_visible_until_ttl_boundary() {
        let cache = service();
        let key = CacheService::key("JPMorgan Chase", "ROA");
        cache
            .set(CacheCategory::BankMetrics, key.clone(), json!({"roa": 1.2}))
            .await;

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cache.get(CacheCategory::BankMetrics, &key).await.is_some());

        // At exactly inserted_at + ttl the entry is treated as absent.
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(CacheCategory::BankMetrics, &key).await.is_none());

        // The expired entry was removed, not just hidden.
        let stats = cache.stats().await;
        assert_eq!(stats["bank-metrics"].count, 0);
    }

    #[tokio::test]
    async fn categories_do_not_share_entries() {
        let cache = service();
        cache
            .set(CacheCategory::Filings, "jpm|10-k", json!(["f1"]))
            .await;
        assert!(cache.get(CacheCategory::BankMetrics, "jpm|10-k").await.is_none());
        assert!(cache.get(CacheCategory::Filings, "jpm|10-k").await.is_some());
    }

    #[tokio::test]
    async fn last_write_wins() {
        let cache = service();
        cache.set(CacheCategory::BankSearch, "jpm|profile", json!(1)).await;
        cache.set(CacheCategory::BankSearch, "jpm|profile", json!(2)).await;
        assert_eq!(
            cache.get(CacheCategory::BankSearch, "jpm|profile").await,
            Some(json!(2))
        );
    }

    #[tokio::test]
    async fn hit_rate_tracks_hits_and_misses() {
        let cache = service();
        cache.set(CacheCategory::BankMetrics, "k", json!(true)).await;
        cache.get(CacheCategory::BankMetrics, "k").await;
        cache.get(CacheCategory::BankMetrics, "absent").await;

        let stats = cache.stats().await;
        let metrics = &stats["bank-metrics"];
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
        assert!((metrics.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn invalidate_scopes_to_category_or_all() {
        let cache = service();
        cache.set(CacheCategory::Filings, "a", json!(1)).await;
        cache.set(CacheCategory::BankSearch, "b", json!(2)).await;

        cache.invalidate(Some(CacheCategory::Filings)).await;
        assert!(cache.get(CacheCategory::Filings, "a").await.is_none());
        assert!(cache.get(CacheCategory::BankSearch, "b").await.is_some());

        cache.invalidate(None).await;
        assert!(cache.get(CacheCategory::BankSearch, "b").await.is_none());
    }

    #[test]
    fn keys_normalize_case_and_whitespace() {
        assert_eq!(
            CacheService::key("  JPMorgan   Chase ", "ROA"),
            CacheService::key("jpmorgan chase", "roa")
        );
    }
}

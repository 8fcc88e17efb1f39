//! Plan cache storage.
//!
//! Entries expire purely by time. There is no invalidation hook: a plan
//! stays valid for its TTL even if the content it names changes, and the
//! loader turns ids that no longer resolve into placeholders.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use lru::LruCache;
use metrics::counter;

use crate::application::loader::FeedPlan;

use super::config::CacheConfig;
use super::lock::RecoverLock;

const SOURCE: &str = "cache::store";

pub const METRIC_PLAN_CACHE_HIT: &str = "pinfeed_plan_cache_hit_total";
pub const METRIC_PLAN_CACHE_MISS: &str = "pinfeed_plan_cache_miss_total";
pub const METRIC_PLAN_CACHE_EXPIRED: &str = "pinfeed_plan_cache_expired_total";

/// Key/TTL store for feed plans.
pub trait PlanCache: Send + Sync {
    fn get(&self, key: &str) -> Option<FeedPlan>;

    /// Store `plan` under `key`; a zero `ttl` never expires.
    fn set(&self, key: &str, plan: FeedPlan, ttl: Duration);
}

struct CachedPlan {
    plan: FeedPlan,
    expires_at: Option<Instant>,
}

impl CachedPlan {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// In-process plan cache with LRU eviction.
pub struct MemoryPlanCache {
    entries: RwLock<LruCache<String, CachedPlan>>,
}

impl MemoryPlanCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.plan_capacity_non_zero())),
        }
    }

    pub fn get_at(&self, key: &str, now: Instant) -> Option<FeedPlan> {
        let mut entries = self.entries.write_or_recover(SOURCE, "get");

        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                counter!(METRIC_PLAN_CACHE_HIT).increment(1);
                return Some(entry.plan.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
            counter!(METRIC_PLAN_CACHE_EXPIRED).increment(1);
        }
        counter!(METRIC_PLAN_CACHE_MISS).increment(1);
        None
    }

    pub fn set_at(&self, key: &str, plan: FeedPlan, ttl: Duration, now: Instant) {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            now.checked_add(ttl)
        };

        self.entries
            .write_or_recover(SOURCE, "set")
            .put(key.to_string(), CachedPlan { plan, expires_at });
    }

    pub fn clear(&self) {
        self.entries.write_or_recover(SOURCE, "clear").clear();
    }

    /// Number of stored plans, expired ones included until next read.
    pub fn len(&self) -> usize {
        self.entries.read_or_recover(SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PlanCache for MemoryPlanCache {
    fn get(&self, key: &str) -> Option<FeedPlan> {
        self.get_at(key, Instant::now())
    }

    fn set(&self, key: &str, plan: FeedPlan, ttl: Duration) {
        self.set_at(key, plan, ttl, Instant::now());
    }
}

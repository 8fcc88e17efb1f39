//! Plan cache configuration.
//!
//! Controlled by the `[cache]` table of `pinfeed.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use super::transient::Recurrence;

const DEFAULT_PLAN_CAPACITY: usize = 256;
const DEFAULT_PLAN_TTL_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Cache feed plans between requests.
    pub enabled: bool,
    /// Maximum number of plans kept before LRU eviction.
    pub plan_capacity: usize,
    /// TTL used by profiles that do not set their own.
    pub default_ttl: Duration,
    /// Keep the first window of warm profiles refreshed in the background.
    pub warm_front_pages: bool,
    /// Refresh cadence of warmed front pages.
    pub refresh: Recurrence,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            plan_capacity: DEFAULT_PLAN_CAPACITY,
            default_ttl: Duration::from_secs(DEFAULT_PLAN_TTL_SECS),
            warm_front_pages: false,
            refresh: Recurrence::Hourly,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            plan_capacity: settings.plan_capacity,
            default_ttl: settings.default_ttl,
            warm_front_pages: settings.warm_front_pages,
            refresh: settings.refresh,
        }
    }
}

impl CacheConfig {
    /// Returns the plan capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn plan_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.plan_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

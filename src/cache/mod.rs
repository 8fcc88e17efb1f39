//! Feed plan caching.
//!
//! Two mechanisms live here:
//!
//! - **Plan cache**: a key/TTL store of [`crate::application::loader::FeedPlan`]s,
//!   consulted by the loader before it queries the content store.
//! - **Transients**: named values computed by a source and refreshed on a
//!   recurrence, used to keep the front page of busy feeds warm.
//!
//! ## Configuration
//!
//! Controlled via the `[cache]` table of `pinfeed.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! plan_capacity = 256
//! default_ttl_secs = 300
//! warm_front_pages = false
//! refresh = "hourly"
//! ```

mod config;
mod keys;
mod lock;
mod store;
mod transient;

pub use config::CacheConfig;
pub use keys::{front_page_key, hash_value, plan_key};
pub use store::{
    METRIC_PLAN_CACHE_EXPIRED, METRIC_PLAN_CACHE_HIT, METRIC_PLAN_CACHE_MISS, MemoryPlanCache,
    PlanCache,
};
pub use transient::{
    METRIC_TRANSIENT_REFRESH, Recurrence, TransientError, TransientRegistry, TransientSource,
    sanitize_key,
};

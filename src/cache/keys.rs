//! Plan cache key derivation.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Compute a hash for any hashable value.
pub fn hash_value<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Key of the plan for one window of a feed.
///
/// `prefix` names the feed; `fingerprint` should change whenever the feed's
/// sticky layout changes so that a reconfigured feed never reads plans
/// computed for its old layout.
pub fn plan_key(prefix: &str, fingerprint: u64, offset: usize, limit: usize) -> String {
    format!("plan:{prefix}:{fingerprint:016x}:{offset}:{limit}")
}

/// Transient key of a feed's front page.
pub fn front_page_key(prefix: &str) -> String {
    format!("front_{prefix}")
}

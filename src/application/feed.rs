//! Named feed profiles and the service that pages through them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::application::loader::{FeedPage, FeedPlan, LoaderError, PostsLoader};
use crate::application::registry::{KeyRegistry, RegistryError};
use crate::application::repos::{ContentRepo, RepoError};
use crate::cache::{
    PlanCache, Recurrence, TransientError, TransientRegistry, TransientSource, front_page_key,
    hash_value, plan_key,
};
use crate::domain::types::{PostId, TypeFilter, TypeSelector};

const TARGET: &str = "pinfeed::feed";
const PROFILE_GROUP: &str = "profile";
const CACHE_KEY_GROUP: &str = "cache_key";

/// Largest window a caller may request through `limit_override`.
pub const MAX_PAGE_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("unknown feed profile `{0}`")]
    UnknownProfile(String),
    #[error("requested limit {limit} exceeds the maximum of {max}")]
    LimitTooLarge { limit: usize, max: usize },
    #[error("window at offset {offset} with limit {limit} is out of range")]
    WindowOverflow { offset: usize, limit: usize },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Transient(#[from] TransientError),
    #[error(transparent)]
    Loader(#[from] LoaderError),
}

/// A configured feed: which pools it draws from and which positions are pinned.
#[derive(Debug, Clone)]
pub struct FeedProfile {
    pub name: String,
    /// Prefix of the plan cache keys; defaults to the profile name.
    pub cache_key: String,
    pub pool_types: TypeFilter,
    pub limit: usize,
    pub sticky_posts: BTreeMap<usize, PostId>,
    pub sticky_post_types: BTreeMap<usize, TypeSelector>,
    pub preload_meta: bool,
    pub preload_terms: bool,
    pub cache_enabled: bool,
    /// Falls back to the service default when unset.
    pub cache_ttl: Option<Duration>,
    pub warm_front_page: bool,
}

impl FeedProfile {
    pub fn new(name: impl Into<String>, pool_types: TypeFilter, limit: usize) -> Self {
        let name = name.into();
        Self {
            cache_key: name.clone(),
            name,
            pool_types,
            limit,
            sticky_posts: BTreeMap::new(),
            sticky_post_types: BTreeMap::new(),
            preload_meta: true,
            preload_terms: true,
            cache_enabled: true,
            cache_ttl: None,
            warm_front_page: false,
        }
    }

    /// Changes whenever the slot layout changes, so cached plans of an older
    /// configuration are never read back.
    pub fn fingerprint(&self) -> u64 {
        hash_value(&(&self.pool_types, &self.sticky_posts, &self.sticky_post_types))
    }

    fn loader(&self, repo: Arc<dyn ContentRepo>, offset: usize, limit: usize) -> PostsLoader {
        let mut loader = PostsLoader::new(repo, self.pool_types.clone(), limit);
        loader.set_offset(offset);
        for (index, id) in &self.sticky_posts {
            loader.set_sticky_post(*index, *id);
        }
        for (index, selector) in &self.sticky_post_types {
            loader.set_sticky_post_type(*index, selector.clone());
        }
        loader.set_meta_preload(self.preload_meta);
        loader.set_term_preload(self.preload_terms);
        loader
    }
}

/// Validated set of profiles, unique by name and by cache key.
#[derive(Debug, Clone, Default)]
pub struct FeedCatalog {
    profiles: BTreeMap<String, FeedProfile>,
}

impl FeedCatalog {
    pub fn new(profiles: Vec<FeedProfile>) -> Result<Self, FeedError> {
        let mut registry = KeyRegistry::new();
        let mut by_name = BTreeMap::new();

        for profile in profiles {
            registry.claim(PROFILE_GROUP, &profile.name)?;
            registry.claim(CACHE_KEY_GROUP, &profile.cache_key)?;
            by_name.insert(profile.name.clone(), profile);
        }

        Ok(Self { profiles: by_name })
    }

    pub fn get(&self, name: &str) -> Option<&FeedProfile> {
        self.profiles.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeedProfile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Computes the front-page plan of one profile, bypassing the plan cache.
struct FrontPageSource {
    repo: Arc<dyn ContentRepo>,
    profile: FeedProfile,
}

#[async_trait]
impl TransientSource<FeedPlan> for FrontPageSource {
    async fn load(&self) -> Result<FeedPlan, TransientError> {
        self.profile
            .loader(self.repo.clone(), 0, self.profile.limit)
            .plan()
            .await
            .map_err(TransientError::source_failure)
    }
}

#[derive(Clone)]
pub struct FeedService {
    repo: Arc<dyn ContentRepo>,
    catalog: Arc<FeedCatalog>,
    plan_cache: Option<Arc<dyn PlanCache>>,
    default_ttl: Duration,
    front_pages: Option<Arc<TransientRegistry<FeedPlan>>>,
}

impl FeedService {
    pub fn new(repo: Arc<dyn ContentRepo>, catalog: Arc<FeedCatalog>) -> Self {
        Self {
            repo,
            catalog,
            plan_cache: None,
            default_ttl: Duration::ZERO,
            front_pages: None,
        }
    }

    /// Cache plans of profiles with caching on, using `default_ttl` where a
    /// profile sets none.
    pub fn with_plan_cache(mut self, cache: Arc<dyn PlanCache>, default_ttl: Duration) -> Self {
        self.plan_cache = Some(cache);
        self.default_ttl = default_ttl;
        self
    }

    /// Register the front page of every profile marked `warm_front_page` as
    /// a transient refreshed on `recurrence`.
    pub fn with_front_page_warming(mut self, recurrence: Recurrence) -> Result<Self, FeedError> {
        let registry = TransientRegistry::<FeedPlan>::new();
        for profile in self.catalog.iter().filter(|profile| profile.warm_front_page) {
            let source = Arc::new(FrontPageSource {
                repo: self.repo.clone(),
                profile: profile.clone(),
            });
            let key = registry.register(&front_page_key(&profile.cache_key), source, recurrence)?;
            info!(
                target = TARGET,
                profile = %profile.name,
                key = %key,
                recurrence = %recurrence,
                "front page registered for warming"
            );
        }
        self.front_pages = Some(Arc::new(registry));
        Ok(self)
    }

    pub fn catalog(&self) -> &FeedCatalog {
        &self.catalog
    }

    /// Probe the content store behind every profile.
    pub async fn ping(&self) -> Result<(), RepoError> {
        self.repo.ping().await
    }

    /// Start background refresh of warmed front pages.
    pub fn spawn_front_page_refresh(&self) -> Vec<JoinHandle<()>> {
        self.front_pages
            .as_ref()
            .map(TransientRegistry::spawn_refresh)
            .unwrap_or_default()
    }

    /// One window of `profile_name`, `limit_override` replacing the
    /// profile's own page size.
    pub async fn page(
        &self,
        profile_name: &str,
        offset: usize,
        limit_override: Option<usize>,
    ) -> Result<FeedPage, FeedError> {
        let profile = self
            .catalog
            .get(profile_name)
            .ok_or_else(|| FeedError::UnknownProfile(profile_name.to_string()))?;

        let limit = limit_override.unwrap_or(profile.limit);
        if limit > MAX_PAGE_LIMIT {
            return Err(FeedError::LimitTooLarge {
                limit,
                max: MAX_PAGE_LIMIT,
            });
        }
        if offset.checked_add(limit).is_none() {
            return Err(FeedError::WindowOverflow { offset, limit });
        }

        let mut loader = profile.loader(self.repo.clone(), offset, limit);

        if offset == 0 && limit == profile.limit && profile.warm_front_page {
            if let Some(front_pages) = self.front_pages.as_ref() {
                let plan = front_pages.get(&front_page_key(&profile.cache_key)).await?;
                debug!(target = TARGET, profile = %profile.name, "serving warmed front page");
                return Ok(loader.materialize(&plan).await?);
            }
        }

        if let Some(cache) = self.plan_cache.as_ref().filter(|_| profile.cache_enabled) {
            let key = plan_key(&profile.cache_key, profile.fingerprint(), offset, limit);
            loader = loader.with_cache_store(cache.clone());
            loader.enable_cache(key, profile.cache_ttl.unwrap_or(self.default_ttl));
        }

        Ok(loader.get_result().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str) -> FeedProfile {
        FeedProfile::new(name, TypeFilter::Any, 5)
    }

    #[test]
    fn catalog_rejects_duplicate_names() {
        let err = FeedCatalog::new(vec![profile("home"), profile("home")]).expect_err("duplicate");
        assert!(matches!(
            err,
            FeedError::Registry(RegistryError::Duplicate { .. })
        ));
    }

    #[test]
    fn catalog_rejects_shared_cache_keys() {
        let mut other = profile("other");
        other.cache_key = "home".to_string();

        let err = FeedCatalog::new(vec![profile("home"), other]).expect_err("shared key");
        match err {
            FeedError::Registry(RegistryError::Duplicate { group, key }) => {
                assert_eq!(group, CACHE_KEY_GROUP);
                assert_eq!(key, "home");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn fingerprint_tracks_sticky_layout() {
        let plain = profile("home");
        let mut pinned = profile("home");
        pinned.sticky_posts.insert(2, PostId::from(42));

        assert_eq!(plain.fingerprint(), profile("home").fingerprint());
        assert_ne!(plain.fingerprint(), pinned.fingerprint());
    }

    #[test]
    fn catalog_lists_names_in_order() {
        let catalog =
            FeedCatalog::new(vec![profile("news"), profile("archive")]).expect("valid catalog");
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["archive", "news"]);
        assert_eq!(catalog.len(), 2);
    }
}

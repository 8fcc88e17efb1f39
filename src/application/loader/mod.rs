//! Sticky-aware feed loader.
//!
//! A [`PostsLoader`] produces one window (`offset`, `limit`) of a feed drawn
//! from several content-type pools. Individual positions may be pinned to a
//! specific item (sticky posts) or reserved for a content type (sticky
//! post-type slots); every other position is filled from the default pool.
//!
//! Loading happens in two halves:
//!
//! 1. [`PostsLoader::plan`] resolves each position to an id, or records it
//!    as not found. This is the only part that may be served from a
//!    [`PlanCache`].
//! 2. [`PostsLoader::materialize`] fetches the records in one batch, in plan
//!    order, and splices placeholders into the not-found positions.
//!
//! Missing content never fails a load; it surfaces as
//! [`FeedItem::Placeholder`]. Only collaborator failures are errors.

mod page;
mod plan;
mod pool;

pub use page::FeedPage;
pub use plan::FeedPlan;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::application::repos::{ContentRepo, IdQuery, LoadOptions, RepoError};
use crate::cache::PlanCache;
use crate::domain::entities::{ContentRecord, FeedItem};
use crate::domain::error::DomainError;
use crate::domain::types::{PostId, TypeFilter, TypeSelector};

use plan::{PoolDemand, SlotLayout, SlotRole};
use pool::PoolCursor;

const TARGET: &str = "pinfeed::loader";

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Plan(#[from] DomainError),
}

#[derive(Clone)]
struct CacheBinding {
    key: String,
    ttl: Duration,
}

pub struct PostsLoader {
    repo: Arc<dyn ContentRepo>,
    cache_store: Option<Arc<dyn PlanCache>>,
    pool_types: TypeFilter,
    limit: usize,
    offset: usize,
    sticky_posts: BTreeMap<usize, PostId>,
    sticky_post_types: BTreeMap<usize, TypeSelector>,
    preload_meta: bool,
    preload_terms: bool,
    cache: Option<CacheBinding>,
}

impl PostsLoader {
    /// Loader over `pool_types` (empty means every type) returning windows
    /// of `limit` items.
    pub fn new(repo: Arc<dyn ContentRepo>, pool_types: TypeFilter, limit: usize) -> Self {
        Self {
            repo,
            cache_store: None,
            pool_types,
            limit,
            offset: 0,
            sticky_posts: BTreeMap::new(),
            sticky_post_types: BTreeMap::new(),
            preload_meta: true,
            preload_terms: true,
            cache: None,
        }
    }

    /// Attach the store used once [`enable_cache`](Self::enable_cache) is on.
    pub fn with_cache_store(mut self, store: Arc<dyn PlanCache>) -> Self {
        self.cache_store = Some(store);
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Pin `id` to absolute position `index`. A later call for the same
    /// index replaces the earlier one.
    pub fn set_sticky_post(&mut self, index: usize, id: PostId) {
        self.sticky_posts.insert(index, id);
    }

    pub fn sticky_posts(&self) -> &BTreeMap<usize, PostId> {
        &self.sticky_posts
    }

    /// Reserve absolute position `index` for the next item of `selector`'s pool.
    pub fn set_sticky_post_type(&mut self, index: usize, selector: TypeSelector) {
        self.sticky_post_types.insert(index, selector);
    }

    pub fn sticky_post_types(&self) -> &BTreeMap<usize, TypeSelector> {
        &self.sticky_post_types
    }

    pub fn set_meta_preload(&mut self, value: bool) {
        self.preload_meta = value;
    }

    pub fn meta_preload(&self) -> bool {
        self.preload_meta
    }

    pub fn set_term_preload(&mut self, value: bool) {
        self.preload_terms = value;
    }

    pub fn term_preload(&self) -> bool {
        self.preload_terms
    }

    /// Cache the plan under `key` for `ttl`; a zero `ttl` never expires.
    pub fn enable_cache(&mut self, key: impl Into<String>, ttl: Duration) {
        self.cache = Some(CacheBinding {
            key: key.into(),
            ttl,
        });
    }

    pub fn disable_cache(&mut self) {
        self.cache = None;
    }

    pub fn cache_key(&self) -> Option<&str> {
        self.cache.as_ref().map(|binding| binding.key.as_str())
    }

    fn window_end(&self) -> Result<usize, DomainError> {
        self.offset
            .checked_add(self.limit)
            .ok_or(DomainError::WindowOverflow {
                offset: self.offset,
                limit: self.limit,
            })
    }

    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            preload_meta: self.preload_meta,
            preload_terms: self.preload_terms,
        }
    }

    /// Plan and materialize the configured window.
    pub async fn get_result(&self) -> Result<FeedPage, LoaderError> {
        let plan = self.plan().await?;
        self.materialize(&plan).await
    }

    /// Resolve the window to ids, from the plan cache when enabled.
    pub async fn plan(&self) -> Result<FeedPlan, LoaderError> {
        self.window_end()?;

        let (Some(store), Some(binding)) = (self.cache_store.as_ref(), self.cache.as_ref()) else {
            if let Some(binding) = self.cache.as_ref() {
                debug!(
                    target = TARGET,
                    key = %binding.key,
                    "cache enabled without a store; planning uncached"
                );
            }
            return self.compute_plan().await;
        };

        if let Some(plan) = store.get(&binding.key) {
            match plan.check_window(self.offset, self.limit) {
                Ok(()) => {
                    debug!(target = TARGET, key = %binding.key, "plan cache hit");
                    return Ok(plan);
                }
                Err(err) => {
                    warn!(
                        target = TARGET,
                        key = %binding.key,
                        error = %err,
                        "discarding cached plan for a different window"
                    );
                }
            }
        }

        let plan = self.compute_plan().await?;
        store.set(&binding.key, plan.clone(), binding.ttl);
        Ok(plan)
    }

    /// Fetch the records named by `plan` and lay them out over the window.
    pub async fn materialize(&self, plan: &FeedPlan) -> Result<FeedPage, LoaderError> {
        plan.check_window(self.offset, self.limit)?;

        if self.limit == 0 {
            return Ok(FeedPage::empty(self.offset));
        }

        let records = if plan.ordered_ids().is_empty() {
            Vec::new()
        } else {
            self.repo
                .query_by_ids(plan.ordered_ids(), self.load_options())
                .await?
        };

        let mut by_id: HashMap<PostId, ContentRecord> =
            records.into_iter().map(|record| (record.id, record)).collect();
        let mut ids = plan.ordered_ids().iter();
        let mut items = Vec::with_capacity(self.limit);
        let mut found = 0usize;
        let mut placeholders = 0usize;

        for index in self.offset..self.window_end()? {
            if plan.is_not_found(index) {
                items.push(FeedItem::Placeholder);
                placeholders += 1;
                continue;
            }

            // An id the store no longer returns keeps its position as a placeholder.
            match ids.next().and_then(|id| by_id.remove(id)) {
                Some(record) => {
                    items.push(FeedItem::Post(record));
                    found += 1;
                }
                None => {
                    items.push(FeedItem::Placeholder);
                    placeholders += 1;
                }
            }
        }

        if placeholders > plan.not_found().len() {
            debug!(
                target = TARGET,
                stale = placeholders - plan.not_found().len(),
                "planned ids no longer resolve"
            );
        }

        Ok(FeedPage {
            offset: self.offset,
            limit: self.limit,
            post_count: items.len(),
            found_posts: found + placeholders,
            items,
        })
    }

    async fn compute_plan(&self) -> Result<FeedPlan, LoaderError> {
        if self.limit == 0 {
            return Ok(FeedPlan::empty(self.offset));
        }

        let (sticky, rejected) = self.validated_sticky_posts().await?;
        let layout = SlotLayout::build(
            self.offset,
            self.limit,
            &sticky,
            &rejected,
            &self.sticky_post_types,
        )?;

        let sticky_ids: Vec<PostId> = sticky.values().copied().collect();
        let mut exclusion: HashSet<PostId> = sticky_ids.iter().copied().collect();
        let mut claimed = 0usize;

        let mut type_cursors = Vec::with_capacity(layout.type_pools().len());
        for pool in layout.type_pools() {
            let ids = self
                .fill_pool(
                    TypeFilter::from(&pool.selector),
                    pool.demand,
                    &sticky_ids,
                    &mut exclusion,
                    &mut claimed,
                )
                .await?;
            debug!(
                target = TARGET,
                pool = %pool.selector,
                wanted = pool.demand.count,
                resolved = ids.len(),
                "filled sticky type pool"
            );
            type_cursors.push(PoolCursor::new(ids));
        }

        let default_ids = self
            .fill_pool(
                self.pool_types.clone(),
                layout.default_demand(),
                &sticky_ids,
                &mut exclusion,
                &mut claimed,
            )
            .await?;
        let mut default_cursor = PoolCursor::new(default_ids);

        let mut ordered_ids = Vec::with_capacity(self.limit);
        let mut not_found = Vec::new();

        for (position, role) in layout.roles().iter().enumerate() {
            let index = self.offset + position;
            let next = match role {
                SlotRole::StickyPost(id) => Some(*id),
                SlotRole::Rejected => None,
                SlotRole::StickyType(pool) => type_cursors.get_mut(*pool).and_then(PoolCursor::next_id),
                SlotRole::Default => default_cursor.next_id(),
            };

            match next {
                Some(id) => ordered_ids.push(id),
                None => not_found.push(index),
            }
        }

        debug!(
            target = TARGET,
            offset = self.offset,
            limit = self.limit,
            resolved = ordered_ids.len(),
            not_found = not_found.len(),
            default_left = default_cursor.remaining(),
            "computed feed plan"
        );

        Ok(FeedPlan::new(self.offset, ordered_ids, not_found))
    }

    /// Keep sticky posts that resolve to published content. Indices whose id
    /// fails validation, or repeats an id already pinned at a lower index,
    /// are returned as rejected.
    async fn validated_sticky_posts(
        &self,
    ) -> Result<(BTreeMap<usize, PostId>, BTreeSet<usize>), LoaderError> {
        if self.sticky_posts.is_empty() {
            return Ok((BTreeMap::new(), BTreeSet::new()));
        }

        let mut candidates: Vec<PostId> = self.sticky_posts.values().copied().collect();
        candidates.sort_unstable();
        candidates.dedup();

        let query = IdQuery::published(TypeFilter::Any).including(candidates);
        let existing: HashSet<PostId> = self.repo.query_ids(&query).await?.into_iter().collect();

        let mut accepted = BTreeMap::new();
        let mut rejected = BTreeSet::new();
        let mut seen = HashSet::new();

        for (index, id) in &self.sticky_posts {
            if existing.contains(id) && seen.insert(*id) {
                accepted.insert(*index, *id);
            } else {
                rejected.insert(*index);
            }
        }

        if !rejected.is_empty() {
            debug!(
                target = TARGET,
                rejected = rejected.len(),
                "sticky posts failed validation"
            );
        }

        Ok((accepted, rejected))
    }

    /// Fetch a pool's ids for `demand`, over-fetching by the number of ids
    /// other pools already claimed so that subtracting them still leaves
    /// enough candidates.
    async fn fill_pool(
        &self,
        types: TypeFilter,
        demand: PoolDemand,
        sticky_ids: &[PostId],
        exclusion: &mut HashSet<PostId>,
        claimed: &mut usize,
    ) -> Result<Vec<PostId>, LoaderError> {
        if demand.count == 0 {
            return Ok(Vec::new());
        }

        let query = IdQuery::published(types)
            .with_window(demand.offset, demand.count + *claimed)
            .excluding(sticky_ids.to_vec());
        let fetched = self.repo.query_ids(&query).await?;

        let mut taken = Vec::with_capacity(demand.count);
        for id in fetched {
            if taken.len() == demand.count {
                break;
            }
            if exclusion.insert(id) {
                taken.push(id);
            }
        }

        *claimed += taken.len();
        Ok(taken)
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use pinfeed::application::feed::{FeedCatalog, FeedError, FeedProfile, FeedService, MAX_PAGE_LIMIT};
use pinfeed::application::repos::ContentRepo;
use pinfeed::cache::{CacheConfig, MemoryPlanCache, Recurrence};
use pinfeed::domain::entities::ContentRecord;
use pinfeed::domain::types::{PostId, PostStatus, TypeFilter, TypeSelector};
use pinfeed::infra::memory::{MemoryContentRepo, QueryCounts};

fn record(id: u32, post_type: &str) -> ContentRecord {
    ContentRecord {
        id: PostId::from(id),
        post_type: post_type.to_string(),
        slug: format!("{post_type}-{id}"),
        title: format!("{post_type} {id}"),
        excerpt: String::new(),
        status: PostStatus::Published,
        has_password: false,
        published_at: Some(
            time::macros::datetime!(2024-01-01 0:00 UTC) + time::Duration::hours(i64::from(id)),
        ),
        meta: BTreeMap::new(),
        terms: Vec::new(),
    }
}

fn seeded_repo() -> MemoryContentRepo {
    let mut content: Vec<ContentRecord> = (1..=10).map(|id| record(id, "post")).collect();
    content.push(record(42, "page"));
    content.push(record(43, "page"));
    MemoryContentRepo::new(content)
}

fn home_profile() -> FeedProfile {
    let mut profile = FeedProfile::new("home", TypeFilter::from_types(["post"]), 5);
    profile.sticky_posts.insert(2, PostId::from(42));
    profile
}

fn service(repo: &MemoryContentRepo, profiles: Vec<FeedProfile>) -> FeedService {
    let repo: Arc<dyn ContentRepo> = Arc::new(repo.clone());
    let catalog = FeedCatalog::new(profiles).expect("valid catalog");
    FeedService::new(repo, Arc::new(catalog))
}

fn ids(values: &[Option<u32>]) -> Vec<Option<PostId>> {
    values.iter().map(|value| value.map(PostId::from)).collect()
}

#[tokio::test]
async fn profile_layout_drives_the_page() {
    let repo = seeded_repo();
    let mut news = FeedProfile::new("news", TypeFilter::from_types(["post"]), 4);
    news.sticky_post_types
        .insert(0, TypeSelector::parse("page").expect("selector"));
    let service = service(&repo, vec![home_profile(), news]);

    let home = service.page("home", 0, None).await.expect("home page");
    assert_eq!(
        home.ids(),
        ids(&[Some(10), Some(9), Some(42), Some(8), Some(7)])
    );

    let news = service.page("news", 0, None).await.expect("news page");
    assert_eq!(news.ids(), ids(&[Some(43), Some(10), Some(9), Some(8)]));
}

#[tokio::test]
async fn limit_override_is_bounded() {
    let repo = seeded_repo();
    let service = service(&repo, vec![home_profile()]);

    let short = service.page("home", 0, Some(2)).await.expect("short page");
    assert_eq!(short.limit, 2);
    assert_eq!(short.ids(), ids(&[Some(10), Some(9)]));

    let err = service
        .page("home", 0, Some(MAX_PAGE_LIMIT + 1))
        .await
        .expect_err("limit too large");
    assert!(matches!(err, FeedError::LimitTooLarge { .. }));
}

#[tokio::test]
async fn windows_past_the_index_range_are_refused() {
    let repo = seeded_repo();
    let service = service(&repo, vec![home_profile()]);

    let err = service
        .page("home", usize::MAX - 1, None)
        .await
        .expect_err("window overflows");
    assert!(matches!(err, FeedError::WindowOverflow { limit: 5, .. }));
    assert_eq!(repo.query_counts(), QueryCounts::default());

    let distant = service
        .page("home", 1 << 40, None)
        .await
        .expect("distant page");
    assert_eq!(distant.ids(), ids(&[None, None, None, None, None]));
}

#[tokio::test]
async fn unknown_profiles_are_reported() {
    let repo = seeded_repo();
    let service = service(&repo, vec![home_profile()]);

    let err = service.page("missing", 0, None).await.expect_err("unknown");
    assert!(matches!(err, FeedError::UnknownProfile(name) if name == "missing"));
    assert_eq!(repo.query_counts(), QueryCounts::default());
}

#[tokio::test]
async fn cached_profiles_plan_once_per_window() {
    let repo = seeded_repo();
    let cache = Arc::new(MemoryPlanCache::new(&CacheConfig::default()));
    let service = service(&repo, vec![home_profile()])
        .with_plan_cache(cache.clone(), Duration::from_secs(60));

    let first = service.page("home", 5, None).await.expect("first load");
    repo.reset_query_counts();
    let again = service.page("home", 5, None).await.expect("cached load");

    assert_eq!(first, again);
    assert_eq!(repo.query_counts().id_queries, 0);
    assert_eq!(cache.len(), 1);

    service.page("home", 0, None).await.expect("front page");
    assert_eq!(cache.len(), 2, "each window has its own plan");
}

#[tokio::test]
async fn profiles_can_opt_out_of_the_plan_cache() {
    let repo = seeded_repo();
    let mut profile = home_profile();
    profile.cache_enabled = false;
    let cache = Arc::new(MemoryPlanCache::new(&CacheConfig::default()));
    let service =
        service(&repo, vec![profile]).with_plan_cache(cache.clone(), Duration::from_secs(60));

    service.page("home", 0, None).await.expect("first load");
    service.page("home", 0, None).await.expect("second load");

    assert!(cache.is_empty());
    assert_eq!(repo.query_counts().id_queries, 4);
}

#[tokio::test]
async fn warmed_front_page_is_planned_once() {
    let repo = seeded_repo();
    let mut profile = home_profile();
    profile.warm_front_page = true;
    let service = service(&repo, vec![profile])
        .with_front_page_warming(Recurrence::Hourly)
        .expect("warming registers");

    let first = service.page("home", 0, None).await.expect("first load");
    repo.reset_query_counts();
    let second = service.page("home", 0, None).await.expect("warm load");

    assert_eq!(first, second);
    assert_eq!(
        repo.query_counts(),
        QueryCounts {
            id_queries: 0,
            record_queries: 1,
        }
    );

    repo.reset_query_counts();
    service.page("home", 5, None).await.expect("second page");
    assert!(repo.query_counts().id_queries > 0, "later pages are not warmed");
}

#[tokio::test(start_paused = true)]
async fn warmed_front_page_follows_its_recurrence() {
    let repo = seeded_repo();
    let mut profile = home_profile();
    profile.warm_front_page = true;
    let service = service(&repo, vec![profile])
        .with_front_page_warming(Recurrence::Every(Duration::from_secs(10)))
        .expect("warming registers");

    let before = service.page("home", 0, None).await.expect("first load");
    assert_eq!(before.ids()[0], Some(PostId::from(10)));

    repo.upsert(record(11, "post")).await;
    let stale = service.page("home", 0, None).await.expect("warm load");
    assert_eq!(stale.ids()[0], Some(PostId::from(10)));

    let handles = service.spawn_front_page_refresh();
    assert_eq!(handles.len(), 1);
    tokio::time::sleep(Duration::from_secs(15)).await;

    let refreshed = service.page("home", 0, None).await.expect("refreshed load");
    assert_eq!(
        refreshed.ids(),
        ids(&[Some(11), Some(10), Some(42), Some(9), Some(8)])
    );

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn store_outage_surfaces_as_loader_error() {
    let repo = seeded_repo();
    repo.set_unavailable(true);
    let service = service(&repo, vec![home_profile()]);

    let err = service.page("home", 0, None).await.expect_err("outage");
    assert!(matches!(err, FeedError::Loader(_)));
}

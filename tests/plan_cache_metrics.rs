use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use pinfeed::application::feed::{FeedCatalog, FeedProfile, FeedService};
use pinfeed::application::repos::ContentRepo;
use pinfeed::cache::{
    CacheConfig, METRIC_PLAN_CACHE_HIT, METRIC_PLAN_CACHE_MISS, METRIC_TRANSIENT_REFRESH,
    MemoryPlanCache, Recurrence,
};
use pinfeed::domain::entities::ContentRecord;
use pinfeed::domain::types::{PostId, PostStatus, TypeFilter};
use pinfeed::infra::memory::MemoryContentRepo;

fn record(id: u32) -> ContentRecord {
    ContentRecord {
        id: PostId::from(id),
        post_type: "post".to_string(),
        slug: format!("post-{id}"),
        title: format!("Post {id}"),
        excerpt: String::new(),
        status: PostStatus::Published,
        has_password: false,
        published_at: None,
        meta: BTreeMap::new(),
        terms: Vec::new(),
    }
}

#[tokio::test]
async fn feed_caches_report_hits_misses_and_refreshes() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("install debugging recorder");

    let repo: Arc<dyn ContentRepo> = Arc::new(MemoryContentRepo::new((1..=8).map(record)));

    let mut home = FeedProfile::new("home", TypeFilter::Any, 3);
    home.warm_front_page = true;
    let archive = FeedProfile::new("archive", TypeFilter::Any, 3);
    let catalog = FeedCatalog::new(vec![home, archive]).expect("valid catalog");

    let service = FeedService::new(repo, Arc::new(catalog))
        .with_plan_cache(
            Arc::new(MemoryPlanCache::new(&CacheConfig::default())),
            Duration::from_secs(60),
        )
        .with_front_page_warming(Recurrence::Hourly)
        .expect("warming registers");

    // archive: one miss, then one hit
    service.page("archive", 0, None).await.expect("archive page");
    service.page("archive", 0, None).await.expect("archive page");
    // home front page: one transient refresh, then served from it
    service.page("home", 0, None).await.expect("home page");
    service.page("home", 0, None).await.expect("home page");

    let counters: HashMap<String, u64> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter_map(|(composite_key, _, _, value)| match value {
            DebugValue::Counter(count) => Some((composite_key.key().name().to_string(), count)),
            _ => None,
        })
        .collect();

    assert_eq!(counters.get(METRIC_PLAN_CACHE_MISS), Some(&1));
    assert_eq!(counters.get(METRIC_PLAN_CACHE_HIT), Some(&1));
    assert_eq!(counters.get(METRIC_TRANSIENT_REFRESH), Some(&1));
}

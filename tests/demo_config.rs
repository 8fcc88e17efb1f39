use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use pinfeed::application::feed::{FeedCatalog, FeedService};
use pinfeed::application::repos::ContentRepo;
use pinfeed::cache::Recurrence;
use pinfeed::config::{CliArgs, load};
use pinfeed::domain::types::PostId;
use pinfeed::infra::memory::MemoryContentRepo;

fn demo_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("demos")
        .join(name)
}

#[tokio::test]
async fn demo_configuration_serves_the_demo_content() {
    let config_path = demo_path("pinfeed.toml");
    let cli = CliArgs::parse_from([
        "pinfeed",
        "--config-file",
        config_path.to_str().expect("utf-8 path"),
        "page",
        "--profile",
        "home",
    ]);
    let settings = load(&cli).expect("demo settings load");
    assert_eq!(settings.cache.refresh, Recurrence::Hourly);
    assert_eq!(settings.feeds.len(), 3);

    let repo = MemoryContentRepo::from_fixture(&demo_path("content.toml"))
        .await
        .expect("demo fixture loads");
    let repo: Arc<dyn ContentRepo> = Arc::new(repo);
    let catalog = FeedCatalog::new(settings.feeds).expect("valid catalog");
    let service = FeedService::new(repo, Arc::new(catalog));

    let home = service.page("home", 0, None).await.expect("home page");
    assert_eq!(
        home.ids(),
        [10, 9, 42, 8, 60]
            .into_iter()
            .map(|id| Some(PostId::from(id)))
            .collect::<Vec<_>>()
    );
    let first = home.items[0].as_record().expect("post");
    assert_eq!(first.terms.len(), 1);

    let pages = service.page("pages", 0, None).await.expect("pages page");
    assert_eq!(
        pages.ids(),
        vec![Some(PostId::from(43)), Some(PostId::from(42)), None]
    );
    let about = pages.items[1].as_record().expect("page");
    assert!(about.terms.is_empty());
}

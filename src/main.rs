use std::{future::IntoFuture, process, sync::Arc};

use pinfeed::{
    application::{
        error::AppError,
        feed::{FeedCatalog, FeedService},
        repos::ContentRepo,
    },
    cache::{CacheConfig, MemoryPlanCache},
    config,
    infra::{
        db::PostgresContentRepo,
        error::InfraError,
        http::{self, HttpState},
        memory::MemoryContentRepo,
        telemetry,
    },
};
use tokio::sync::oneshot;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Page(args) => run_page(settings, args).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repo = init_content(&settings).await?;
    let feed = build_feed_service(&settings, repo)?;

    let refresh_handles = feed.spawn_front_page_refresh();

    let state = HttpState {
        feed: Arc::new(feed),
    };
    let result = serve_http(&settings, state).await;

    for handle in refresh_handles {
        handle.abort();
        let _ = handle.await;
    }

    result
}

async fn run_page(settings: config::Settings, args: config::PageArgs) -> Result<(), AppError> {
    let repo = init_content(&settings).await?;
    let feed = build_feed_service(&settings, repo)?;

    let page = feed.page(&args.profile, args.offset, args.limit).await?;
    let rendered = serde_json::to_string_pretty(&page)
        .map_err(|err| AppError::unexpected(format!("failed to encode page: {err}")))?;
    println!("{rendered}");
    Ok(())
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let pool = connect_database(&settings).await?;
    PostgresContentRepo::run_migrations(&pool)
        .await
        .map_err(InfraError::from)?;
    info!(target = "pinfeed::migrate", "migrations applied");
    Ok(())
}

/// A configured fixture wins over the database.
async fn init_content(settings: &config::Settings) -> Result<Arc<dyn ContentRepo>, AppError> {
    if let Some(path) = settings.content.fixture.as_ref() {
        if settings.database.url.is_some() {
            warn!(
                target = "pinfeed::startup",
                fixture = %path.display(),
                "content fixture configured; ignoring database url"
            );
        }
        let repo = MemoryContentRepo::from_fixture(path).await?;
        info!(
            target = "pinfeed::startup",
            items = repo.len().await,
            "serving content from fixture"
        );
        return Ok(Arc::new(repo));
    }

    let pool = connect_database(settings).await?;
    PostgresContentRepo::run_migrations(&pool)
        .await
        .map_err(InfraError::from)?;

    Ok(Arc::new(PostgresContentRepo::new(pool)))
}

async fn connect_database(settings: &config::Settings) -> Result<sqlx::PgPool, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    PostgresContentRepo::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))
}

fn build_feed_service(
    settings: &config::Settings,
    repo: Arc<dyn ContentRepo>,
) -> Result<FeedService, AppError> {
    let catalog = FeedCatalog::new(settings.feeds.clone())?;
    if catalog.is_empty() {
        warn!(target = "pinfeed::startup", "no feed profiles configured");
    }

    let mut feed = FeedService::new(repo, Arc::new(catalog));

    let cache_config = CacheConfig::from(&settings.cache);
    if cache_config.enabled {
        let plans = Arc::new(MemoryPlanCache::new(&cache_config));
        feed = feed.with_plan_cache(plans, cache_config.default_ttl);
    }
    if cache_config.warm_front_pages {
        feed = feed.with_front_page_warming(cache_config.refresh)?;
    }

    Ok(feed)
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "pinfeed::startup",
        addr = %settings.server.addr,
        "listening"
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        })
        .into_future();
    let mut server = tokio::spawn(server);

    tokio::select! {
        joined = &mut server => return server_outcome(joined),
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                error!(error = %err, "failed to listen for shutdown signal");
            }
        }
    }

    let grace = settings.server.graceful_shutdown;
    info!(
        target = "pinfeed::shutdown",
        grace_secs = grace.as_secs(),
        "shutdown requested; draining connections"
    );
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(grace, &mut server).await {
        Ok(joined) => server_outcome(joined),
        Err(_) => {
            warn!(
                target = "pinfeed::shutdown",
                "graceful shutdown timed out; dropping open connections"
            );
            server.abort();
            Ok(())
        }
    }
}

fn server_outcome(
    joined: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(AppError::unexpected(format!("server error: {err}"))),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}

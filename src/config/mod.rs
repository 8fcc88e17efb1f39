//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    num::NonZeroU32,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::feed::{FeedProfile, MAX_PAGE_LIMIT};
use crate::cache::{CacheConfig, Recurrence};
use crate::domain::types::{PostId, TypeFilter, TypeSelector};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pinfeed";
const ENV_PREFIX: &str = "PINFEED";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_FEED_LIMIT: usize = 10;

/// Command-line arguments for the pinfeed binary.
#[derive(Debug, Parser)]
#[command(name = "pinfeed", version, about = "Sticky-aware feed server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PINFEED_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve feeds over HTTP.
    Serve(Box<ServeArgs>),
    /// Print one page of a feed as JSON.
    Page(PageArgs),
    /// Apply database migrations.
    Migrate(MigrateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ContentOverrides {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Serve content from a TOML fixture instead of the database.
    #[arg(long = "content-fixture", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub content_fixture: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub content: ContentOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Toggle the plan cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct PageArgs {
    #[command(flatten)]
    pub content: ContentOverrides,

    /// Name of the configured feed profile.
    #[arg(long, value_name = "NAME")]
    pub profile: String,

    /// Absolute index of the first item.
    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// Page size; defaults to the profile's own.
    #[arg(long, value_name = "COUNT")]
    pub limit: Option<usize>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub content: ContentSettings,
    pub cache: CacheSettings,
    pub feeds: Vec<FeedProfile>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct ContentSettings {
    /// Takes precedence over the database when set.
    pub fixture: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub plan_capacity: usize,
    pub default_ttl: Duration,
    pub warm_front_pages: bool,
    pub refresh: Recurrence,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Page(args)) => raw.apply_content_overrides(&args.content),
        Some(Command::Migrate(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    content: RawContentSettings,
    cache: RawCacheSettings,
    feeds: Vec<RawFeedSettings>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }

        self.apply_content_overrides(&overrides.content);
    }

    fn apply_content_overrides(&mut self, overrides: &ContentOverrides) {
        self.apply_database_override(&overrides.database);
        if let Some(path) = overrides.content_fixture.as_ref() {
            self.content.fixture = Some(path.clone());
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            content,
            cache,
            feeds,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let content = build_content_settings(content)?;
        let cache = build_cache_settings(cache)?;
        let feeds = feeds
            .into_iter()
            .map(build_feed_profile)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            server,
            logging,
            database,
            content,
            cache,
            feeds,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_content_settings(content: RawContentSettings) -> Result<ContentSettings, LoadError> {
    if content
        .fixture
        .as_ref()
        .is_some_and(|path| path.as_os_str().is_empty())
    {
        return Err(LoadError::invalid(
            "content.fixture",
            "path must not be empty",
        ));
    }

    Ok(ContentSettings {
        fixture: content.fixture,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = CacheConfig::default();
    let plan_capacity = cache.plan_capacity.unwrap_or(defaults.plan_capacity);
    if plan_capacity == 0 {
        return Err(LoadError::invalid(
            "cache.plan_capacity",
            "must be greater than zero",
        ));
    }

    let refresh = match cache.refresh.as_deref() {
        Some(raw) => Recurrence::from_str(raw)
            .map_err(|err| LoadError::invalid("cache.refresh", err.to_string()))?,
        None => defaults.refresh,
    };

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        plan_capacity,
        default_ttl: cache
            .default_ttl_secs
            .map_or(defaults.default_ttl, Duration::from_secs),
        warm_front_pages: cache.warm_front_pages.unwrap_or(defaults.warm_front_pages),
        refresh,
    })
}

fn build_feed_profile(feed: RawFeedSettings) -> Result<FeedProfile, LoadError> {
    let name = feed
        .name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| LoadError::invalid("feeds.name", "every feed needs a name"))?;

    let limit = feed.limit.unwrap_or(DEFAULT_FEED_LIMIT);
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(LoadError::invalid(
            "feeds.limit",
            format!("feed `{name}`: limit must be between 1 and {MAX_PAGE_LIMIT}"),
        ));
    }

    let mut profile = FeedProfile::new(
        name.clone(),
        TypeFilter::from_types(feed.post_types.unwrap_or_default()),
        limit,
    );

    if let Some(cache_key) = feed.cache_key {
        let cache_key = cache_key.trim().to_string();
        if cache_key.is_empty() {
            return Err(LoadError::invalid(
                "feeds.cache_key",
                format!("feed `{name}`: cache key must not be empty"),
            ));
        }
        profile.cache_key = cache_key;
    }

    profile.sticky_posts = collect_unique(
        feed.sticky_posts,
        "feeds.sticky_posts",
        &name,
        |sticky| {
            PostId::new(sticky.id)
                .map(|id| (sticky.index, id))
                .map_err(|err| err.to_string())
        },
    )?;
    profile.sticky_post_types = collect_unique(
        feed.sticky_post_types,
        "feeds.sticky_post_types",
        &name,
        |sticky| {
            TypeSelector::parse(&sticky.post_type)
                .map(|selector| (sticky.index, selector))
                .map_err(|err| err.to_string())
        },
    )?;

    if let Some(flag) = feed.preload_meta {
        profile.preload_meta = flag;
    }
    if let Some(flag) = feed.preload_terms {
        profile.preload_terms = flag;
    }
    if let Some(flag) = feed.cache {
        profile.cache_enabled = flag;
    }
    profile.cache_ttl = feed.cache_ttl_secs.map(Duration::from_secs);
    profile.warm_front_page = feed.warm_front_page.unwrap_or(false);

    Ok(profile)
}

/// Index-keyed entries; an index may appear only once per feed.
fn collect_unique<T, V>(
    entries: Vec<T>,
    key: &'static str,
    feed: &str,
    convert: impl Fn(T) -> Result<(usize, V), String>,
) -> Result<BTreeMap<usize, V>, LoadError> {
    let mut collected = BTreeMap::new();
    for entry in entries {
        let (index, value) = convert(entry)
            .map_err(|reason| LoadError::invalid(key, format!("feed `{feed}`: {reason}")))?;
        if collected.insert(index, value).is_some() {
            return Err(LoadError::invalid(
                key,
                format!("feed `{feed}`: index {index} is configured twice"),
            ));
        }
    }
    Ok(collected)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawContentSettings {
    fixture: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    plan_capacity: Option<usize>,
    default_ttl_secs: Option<u64>,
    warm_front_pages: Option<bool>,
    refresh: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFeedSettings {
    name: Option<String>,
    cache_key: Option<String>,
    post_types: Option<Vec<String>>,
    limit: Option<usize>,
    sticky_posts: Vec<RawStickyPost>,
    sticky_post_types: Vec<RawStickyPostType>,
    preload_meta: Option<bool>,
    preload_terms: Option<bool>,
    cache: Option<bool>,
    cache_ttl_secs: Option<u64>,
    warm_front_page: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawStickyPost {
    index: usize,
    id: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct RawStickyPostType {
    index: usize,
    post_type: String,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;

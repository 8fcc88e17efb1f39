use serial_test::serial;

use super::*;

fn raw_from_toml(raw: &str) -> RawSettings {
    Config::builder()
        .add_source(File::from_str(raw, config::FileFormat::Toml))
        .build()
        .expect("config builds")
        .try_deserialize()
        .expect("raw settings deserialize")
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn defaults_resolve_without_any_file() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert!(settings.database.url.is_none());
    assert!(settings.content.fixture.is_none());
    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.plan_capacity, 256);
    assert_eq!(settings.cache.default_ttl, Duration::from_secs(300));
    assert_eq!(settings.cache.refresh, Recurrence::Hourly);
    assert!(settings.feeds.is_empty());

    let resolved = CacheConfig::from(&settings.cache);
    let defaults = CacheConfig::default();
    assert_eq!(resolved.plan_capacity, defaults.plan_capacity);
    assert_eq!(resolved.default_ttl, defaults.default_ttl);
    assert_eq!(resolved.warm_front_pages, defaults.warm_front_pages);
}

#[test]
fn zero_port_is_rejected() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(0);

    let err = Settings::from_raw(raw).expect_err("port zero");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "server.port",
            ..
        }
    ));
}

#[test]
fn blank_database_url_is_treated_as_missing() {
    let mut raw = RawSettings::default();
    raw.database.url = Some("   ".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.database.url.is_none());
}

#[test]
fn feed_profiles_resolve_from_toml() {
    let raw = raw_from_toml(
        r#"
        [cache]
        refresh = "twicedaily"
        default_ttl_secs = 0

        [[feeds]]
        name = "home"
        post_types = ["post", "event"]
        limit = 5
        cache_ttl_secs = 60
        warm_front_page = true
        sticky_posts = [{ index = 2, id = 42 }]
        sticky_post_types = [{ index = 0, post_type = "page" }]

        [[feeds]]
        name = "pages"
        cache_key = "all-pages"
        post_types = ["page"]
        preload_terms = false
        cache = false
        "#,
    );

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.refresh, Recurrence::TwiceDaily);
    assert_eq!(settings.cache.default_ttl, Duration::ZERO);

    let home = &settings.feeds[0];
    assert_eq!(home.name, "home");
    assert_eq!(home.cache_key, "home");
    assert_eq!(home.limit, 5);
    assert_eq!(home.pool_types, TypeFilter::from_types(["post", "event"]));
    assert_eq!(home.sticky_posts.get(&2), Some(&PostId::from(42)));
    assert_eq!(
        home.sticky_post_types.get(&0),
        Some(&TypeSelector::parse("page").expect("selector"))
    );
    assert_eq!(home.cache_ttl, Some(Duration::from_secs(60)));
    assert!(home.warm_front_page);

    let pages = &settings.feeds[1];
    assert_eq!(pages.cache_key, "all-pages");
    assert_eq!(pages.limit, DEFAULT_FEED_LIMIT);
    assert!(pages.preload_meta);
    assert!(!pages.preload_terms);
    assert!(!pages.cache_enabled);
    assert!(!pages.warm_front_page);
}

#[test]
fn feed_without_post_types_draws_from_every_type() {
    let raw = raw_from_toml(
        r#"
        [[feeds]]
        name = "everything"
        "#,
    );

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.feeds[0].pool_types, TypeFilter::Any);
}

#[test]
fn feed_limits_are_bounded() {
    let raw = raw_from_toml(
        r#"
        [[feeds]]
        name = "huge"
        limit = 1000
        "#,
    );

    let err = Settings::from_raw(raw).expect_err("limit too large");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "feeds.limit",
            ..
        }
    ));
}

#[test]
fn repeated_sticky_index_is_rejected() {
    let raw = raw_from_toml(
        r#"
        [[feeds]]
        name = "home"
        sticky_posts = [{ index = 1, id = 5 }, { index = 1, id = 6 }]
        "#,
    );

    let err = Settings::from_raw(raw).expect_err("index twice");
    match err {
        LoadError::Invalid { key, reason } => {
            assert_eq!(key, "feeds.sticky_posts");
            assert!(reason.contains("index 1"), "reason was `{reason}`");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn non_positive_sticky_ids_are_rejected() {
    let raw = raw_from_toml(
        r#"
        [[feeds]]
        name = "home"
        sticky_posts = [{ index = 0, id = 0 }]
        "#,
    );

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn unknown_refresh_schedule_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.refresh = Some("weekly".to_string());

    let err = Settings::from_raw(raw).expect_err("unknown schedule");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.refresh",
            ..
        }
    ));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["pinfeed"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_page_arguments() {
    let args = CliArgs::parse_from([
        "pinfeed",
        "page",
        "--profile",
        "home",
        "--offset",
        "10",
        "--limit",
        "5",
        "--content-fixture",
        "/tmp/content.toml",
    ]);

    match args.command.expect("page command") {
        Command::Page(page) => {
            assert_eq!(page.profile, "home");
            assert_eq!(page.offset, 10);
            assert_eq!(page.limit, Some(5));
            assert_eq!(
                page.content.content_fixture.as_deref(),
                Some(std::path::Path::new("/tmp/content.toml"))
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_migrate_arguments() {
    let args = CliArgs::parse_from([
        "pinfeed",
        "migrate",
        "--database-url",
        "postgres://example",
    ]);

    match args.command.expect("migrate command") {
        Command::Migrate(migrate) => {
            assert_eq!(
                migrate.database.database_url.as_deref(),
                Some("postgres://example")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "pinfeed",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--database-url",
        "postgres://override",
        "--cache-enabled=false",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(
                serve.overrides.content.database.database_url.as_deref(),
                Some("postgres://override")
            );
            assert_eq!(serve.overrides.cache_enabled, Some(false));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn serve_overrides_reach_settings() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        cache_enabled: Some(false),
        content: ContentOverrides {
            content_fixture: Some(PathBuf::from("fixtures/content.toml")),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(!settings.cache.enabled);
    assert_eq!(
        settings.content.fixture.as_deref(),
        Some(std::path::Path::new("fixtures/content.toml"))
    );
}

#[test]
#[serial]
fn environment_sits_between_config_file_and_cli() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("pinfeed.toml");
    std::fs::write(
        &path,
        r#"
        [server]
        host = "127.0.0.2"
        port = 4100

        [logging]
        level = "warn"

        [[feeds]]
        name = "from-file"
        limit = 4
        "#,
    )
    .expect("write config file");

    // SAFETY: env mutation is serialized across config tests.
    unsafe { std::env::set_var("PINFEED__SERVER__PORT", "4200") };
    let cli = CliArgs::parse_from([
        "pinfeed",
        "--config-file",
        path.to_str().expect("utf-8 path"),
        "serve",
        "--log-level",
        "debug",
    ]);
    let result = load(&cli);
    unsafe { std::env::remove_var("PINFEED__SERVER__PORT") };

    let settings = result.expect("settings load");
    assert_eq!(settings.server.addr.to_string(), "127.0.0.2:4200");
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.feeds.len(), 1);
    assert_eq!(settings.feeds[0].name, "from-file");
}

#[test]
#[serial]
fn missing_explicit_config_file_fails() {
    let cli = CliArgs::parse_from([
        "pinfeed",
        "--config-file",
        "/nonexistent/pinfeed.toml",
        "migrate",
    ]);
    assert!(matches!(load(&cli), Err(LoadError::Build(_))));
}

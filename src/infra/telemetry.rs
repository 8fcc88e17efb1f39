use std::env;
use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing::debug;
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter,
    filter::Directive,
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{
    METRIC_PLAN_CACHE_EXPIRED, METRIC_PLAN_CACHE_HIT, METRIC_PLAN_CACHE_MISS,
    METRIC_TRANSIENT_REFRESH,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

const TARGET: &str = "pinfeed::telemetry";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Statement logging from sqlx is noisy at `info`; keep it at `warn` unless
/// `RUST_LOG` says otherwise.
const SQLX_DIRECTIVE: &str = "sqlx=warn";

/// Install the global subscriber for `logging`.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = build_filter(logging.level, env::var_os(EnvFilter::DEFAULT_ENV).is_some())?;

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })?;

    debug!(
        target = TARGET,
        level = %logging.level,
        format = ?logging.format,
        "telemetry initialized"
    );
    Ok(())
}

fn build_filter(level: LevelFilter, env_override: bool) -> Result<EnvFilter, InfraError> {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    if env_override {
        return Ok(filter);
    }

    let quiet_sqlx: Directive = SQLX_DIRECTIVE
        .parse()
        .map_err(|err| InfraError::telemetry(format!("invalid log directive: {err}")))?;
    Ok(filter.add_directive(quiet_sqlx))
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_PLAN_CACHE_HIT,
            Unit::Count,
            "Total number of feed plans served from the plan cache."
        );
        describe_counter!(
            METRIC_PLAN_CACHE_MISS,
            Unit::Count,
            "Total number of plan cache lookups that found no usable plan."
        );
        describe_counter!(
            METRIC_PLAN_CACHE_EXPIRED,
            Unit::Count,
            "Total number of cached plans dropped because their TTL elapsed."
        );
        describe_counter!(
            METRIC_TRANSIENT_REFRESH,
            Unit::Count,
            "Total number of transient values recomputed from their source."
        );
    });
}

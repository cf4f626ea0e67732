use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use thiserror::Error;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::LoggingSettings;

static METRIC_DESCRIPTIONS: Once = Once::new();

pub(crate) const METRIC_SLOT_HIT_TOTAL: &str = "onside_cache_slot_hit_total";
pub(crate) const METRIC_SLOT_MISS_TOTAL: &str = "onside_cache_slot_miss_total";
pub(crate) const METRIC_DEDUP_JOIN_TOTAL: &str = "onside_cache_dedup_join_total";
pub(crate) const METRIC_STALE_DROP_TOTAL: &str = "onside_cache_stale_drop_total";
pub(crate) const METRIC_REFETCH_TOTAL: &str = "onside_cache_refetch_total";
pub(crate) const METRIC_SLOT_SWEPT_TOTAL: &str = "onside_cache_slot_swept_total";
pub(crate) const METRIC_FETCH_MS: &str = "onside_cache_fetch_ms";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log level directive `{level}`: {reason}")]
    InvalidLevel { level: String, reason: String },
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), TelemetryError> {
    describe_metrics();

    let directive =
        logging
            .level
            .parse()
            .map_err(|err: tracing_subscriber::filter::ParseError| {
                TelemetryError::InvalidLevel {
                    level: logging.level.clone(),
                    reason: err.to_string(),
                }
            })?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let fmt_layer = if logging.json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer().compact().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| TelemetryError::Install(err.to_string()))
}

pub(crate) fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_SLOT_HIT_TOTAL,
            Unit::Count,
            "Queries answered synchronously from a fresh result slot."
        );
        describe_counter!(
            METRIC_SLOT_MISS_TOTAL,
            Unit::Count,
            "Queries that had to issue a network fetch."
        );
        describe_counter!(
            METRIC_DEDUP_JOIN_TOTAL,
            Unit::Count,
            "Callers that joined an already in-flight fetch for the same key."
        );
        describe_counter!(
            METRIC_STALE_DROP_TOTAL,
            Unit::Count,
            "Responses dropped by the sequence guard after being superseded."
        );
        describe_counter!(
            METRIC_REFETCH_TOTAL,
            Unit::Count,
            "Slots eagerly re-fetched after mutation-driven invalidation."
        );
        describe_counter!(
            METRIC_SLOT_SWEPT_TOTAL,
            Unit::Count,
            "Unsubscribed slots removed by the retention sweep."
        );
        describe_histogram!(
            METRIC_FETCH_MS,
            Unit::Milliseconds,
            "Network fetch latency in milliseconds."
        );
    });
}

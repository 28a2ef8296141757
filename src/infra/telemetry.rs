use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global tracing subscriber and describe the exported metrics.
///
/// `RUST_LOG` directives take precedence over the configured default level.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
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
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "atrium_cache_hit_total",
            Unit::Count,
            "Snapshot lookups answered from the cache store, by view."
        );
        describe_counter!(
            "atrium_cache_miss_total",
            Unit::Count,
            "Snapshot lookups that fell through to the authoritative store, by view."
        );
        describe_counter!(
            "atrium_cache_store_error_total",
            Unit::Count,
            "Cache store operations that failed or timed out, by operation."
        );
        describe_histogram!(
            "atrium_loader_ms",
            Unit::Milliseconds,
            "Loader latency including cache lookup, by view."
        );
        describe_histogram!(
            "atrium_invalidate_ms",
            Unit::Milliseconds,
            "Invalidation latency in milliseconds."
        );
        describe_counter!(
            "atrium_invalidate_deleted_total",
            Unit::Count,
            "Cache keys removed by invalidations."
        );
        describe_counter!(
            "atrium_broadcast_failed_total",
            Unit::Count,
            "Invalidation broadcasts that a peer did not accept."
        );
        describe_histogram!(
            "atrium_warm_ms",
            Unit::Milliseconds,
            "Cache warm pass latency in milliseconds."
        );
    });
}

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

/// Install a global tracing subscriber using the provided logging settings.
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "torchio_pdf_cache_hit_total",
            Unit::Count,
            "Total number of PDF cache hits."
        );
        describe_counter!(
            "torchio_pdf_cache_miss_total",
            Unit::Count,
            "Total number of PDF cache misses."
        );
        describe_counter!(
            "torchio_pdf_cache_store_error_total",
            Unit::Count,
            "Total number of cache store failures absorbed as misses or dropped writes."
        );
        describe_counter!(
            "torchio_pdf_render_total",
            Unit::Count,
            "Total number of render attempts dispatched to the engine pool."
        );
        describe_counter!(
            "torchio_pdf_render_failure_total",
            Unit::Count,
            "Total number of renders that failed in the engine."
        );
        describe_counter!(
            "torchio_pdf_singleflight_shared_total",
            Unit::Count,
            "Total number of requests that attached to an in-flight render instead of starting one."
        );
        describe_histogram!(
            "torchio_pdf_render_ms",
            Unit::Milliseconds,
            "Render latency in milliseconds, temp-file bridge included."
        );
    });
}

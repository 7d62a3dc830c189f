use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
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
///
/// Logs go to stderr so the `render` command can keep stdout for its result.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
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
            "docrelay_fetch_total",
            Unit::Count,
            "Document fetches by result (complete, partial, error)."
        );
        describe_counter!(
            "docrelay_fetch_retry_total",
            Unit::Count,
            "Network-level fetch retries after a retryable fault."
        );
        describe_counter!(
            "docrelay_fetch_bytes_total",
            Unit::Bytes,
            "Total response bytes received by the network layer."
        );
        describe_histogram!(
            "docrelay_fetch_ms",
            Unit::Milliseconds,
            "Single fetch latency in milliseconds."
        );
        describe_counter!(
            "docrelay_render_attempt_total",
            Unit::Count,
            "Rendering method attempts by method and result."
        );
        describe_histogram!(
            "docrelay_render_attempt_ms",
            Unit::Milliseconds,
            "Rendering method attempt duration in milliseconds."
        );
        describe_counter!(
            "docrelay_recovery_total",
            Unit::Count,
            "Recovery strategy executions by strategy and result."
        );
        describe_counter!(
            "docrelay_session_total",
            Unit::Count,
            "Finished rendering sessions by result."
        );
        describe_gauge!(
            "docrelay_canvas_memory_bytes",
            Unit::Bytes,
            "Estimated memory held by tracked surfaces."
        );
        describe_gauge!(
            "docrelay_canvas_surfaces",
            Unit::Count,
            "Number of surfaces currently tracked."
        );
        describe_counter!(
            "docrelay_canvas_cleanup_total",
            Unit::Count,
            "Surfaces destroyed by cleanup passes."
        );
        describe_counter!(
            "docrelay_progress_stuck_total",
            Unit::Count,
            "Stalls detected by the progress tracker."
        );
    });
}

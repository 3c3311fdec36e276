//! Global tracing subscriber bootstrap.

use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::{
    config::{LogFormat, LoggingSettings},
    error::AppError,
};

/// Install a global tracing subscriber using the provided logging settings.
///
/// The output format is fixed for the process lifetime: one JSON object per
/// line for machine ingestion, or a colorized human-readable layout.
pub fn init(logging: &LoggingSettings) -> Result<(), AppError> {
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
        LogFormat::Pretty => fmt::layer().pretty().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            AppError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

//! Tracing subscriber setup.

use anyhow::{Result, anyhow};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogFormat, LoggingConfig};

/// Install the global tracing subscriber. `RUST_LOG` takes precedence over
/// the configured level.
///
/// # Errors
/// Returns an error if the level directive is invalid or a subscriber is
/// already installed.
pub fn init(logging: &LoggingConfig) -> Result<()> {
    let env_filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::try_new(&logging.level)
            .map_err(|err| anyhow!("invalid logging.level '{}': {err}", logging.level))?,
    };

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}

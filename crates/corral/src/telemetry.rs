//! Structured telemetry initialisation for the entrypoint.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use corral_config::{DEBUG_LOG_FILTER, DEFAULT_LOG_FILTER, LogFormat};

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Configures the global tracing subscriber on first use.
///
/// `RUST_LOG` takes precedence when set; otherwise the filter follows the
/// `--debug` flag. Repeated calls are no-ops so tests can initialise freely.
pub fn initialise(debug: bool, format: LogFormat) -> Result<(), TelemetryError> {
    TELEMETRY_GUARD.get_or_try_init(|| install_subscriber(debug, format))?;
    Ok(())
}

fn install_subscriber(debug: bool, format: LogFormat) -> Result<(), TelemetryError> {
    let fallback = if debug {
        DEBUG_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let filter = match std::env::var("RUST_LOG") {
        Ok(expression) => EnvFilter::try_new(expression)
            .map_err(|error| TelemetryError::Filter(error.to_string()))?,
        Err(_) => EnvFilter::try_new(fallback)
            .map_err(|error| TelemetryError::Filter(error.to_string()))?,
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(io::stderr)
        // Avoid stray colour codes when logs are shipped off-host while
        // keeping colour on interactive terminals.
        .with_ansi(io::stderr().is_terminal());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

//! Error surface of the entrypoint.

use std::io;

use thiserror::Error;

use crate::telemetry::TelemetryError;

/// Fatal errors raised while bootstrapping or supervising processes.
///
/// Handshake timeouts are deliberately absent: a member that never becomes
/// ready is an operational condition handled in-line (stop everything, exit
/// zero), not an error that propagates.
#[derive(Debug, Error)]
pub enum EntrypointError {
    /// A supervised process could not be launched at all.
    #[error("failed to spawn process '{name}' from '{program}': {source}")]
    Spawn {
        name: String,
        program: String,
        #[source]
        source: io::Error,
    },
    /// Polling or reaping a supervised process failed.
    #[error("failed to monitor process '{name}': {source}")]
    Monitor {
        name: String,
        #[source]
        source: io::Error,
    },
    /// A termination signal could not be delivered.
    #[error("failed to signal process '{name}' (pid {pid}): {source}")]
    Signal {
        name: String,
        pid: u32,
        #[source]
        source: io::Error,
    },
    /// The shutdown signal handlers could not be installed.
    #[error("failed to install signal handlers: {source}")]
    SignalInstall {
        #[source]
        source: io::Error,
    },
    /// The tracing subscriber could not be configured.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// The cluster configuration could not be resolved.
    #[error(transparent)]
    Config(#[from] corral_config::ConfigError),
}

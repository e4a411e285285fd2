//! Container entrypoint that bootstraps an etcd cluster member and
//! supervises it for the container's lifetime.
//!
//! The binary resolves a role (standalone, bootstrap, or join) plus the
//! cluster parameters, sequences the readiness handshake for that role, then
//! hands the launched process set to the [`supervisor::Supervisor`], which
//! blocks until everything is terminal.

use std::ffi::OsString;
use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error};

use corral_config::ClusterConfig;

pub mod cli;
pub mod cluster;
pub mod entrypoint;
pub mod error;
pub mod probe;
pub mod process;
pub mod shutdown;
pub mod supervisor;
pub mod telemetry;

#[cfg(test)]
mod supervisor_tests;

pub use error::EntrypointError;

/// Parses arguments, initialises telemetry, and runs the entrypoint.
///
/// Exit codes: 0 for standalone success, handshake timeouts, and normal
/// supervised shutdown; non-zero only for spawn, monitoring, or startup
/// failures.
pub fn run<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let arguments = match cli::Cli::try_parse_from(args) {
        Ok(arguments) => arguments,
        Err(error) => error.exit(),
    };
    if let Err(error) = telemetry::initialise(arguments.debug, arguments.log_format) {
        // Telemetry failed, so there is nowhere structured to report it.
        eprintln!("corral: {error}");
        return ExitCode::FAILURE;
    }
    let config = match ClusterConfig::from_env(arguments.role(), &arguments.overrides()) {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "failed to resolve cluster configuration");
            return ExitCode::FAILURE;
        }
    };
    debug!(?config, "resolved cluster configuration");
    match entrypoint::run(&config) {
        Ok(code) => code,
        Err(error) => {
            error!(%error, "entrypoint failed");
            ExitCode::FAILURE
        }
    }
}

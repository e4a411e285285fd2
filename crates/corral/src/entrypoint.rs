//! End-to-end orchestration: handshake, launch, supervise.

use std::process::ExitCode;

use tracing::{info, warn};

use corral_config::ClusterConfig;

use crate::cluster::{ClusterBootstrapper, HandshakeOutcome, HandshakeTimeout};
use crate::error::EntrypointError;
use crate::process::ProcessHandle;
use crate::shutdown::{self, ShutdownFlag};
use crate::supervisor::Supervisor;

const ENTRYPOINT_TARGET: &str = "corral::entrypoint";

/// Runs the full entrypoint flow for the resolved configuration.
///
/// A handshake timeout is an operational "nothing to do" condition and exits
/// zero after stopping whatever was started; only spawn and monitoring
/// failures surface as errors (and a non-zero exit).
///
/// # Errors
///
/// Returns [`EntrypointError`] for spawn failures, monitor failures, or a
/// failed signal-handler installation.
pub fn run(config: &ClusterConfig) -> Result<ExitCode, EntrypointError> {
    let flag = ShutdownFlag::new();
    shutdown::register_signal_handlers(&flag)?;
    run_with(config, flag)
}

/// Runs the entrypoint flow against an externally owned shutdown flag.
pub fn run_with(config: &ClusterConfig, flag: ShutdownFlag) -> Result<ExitCode, EntrypointError> {
    let bootstrapper = ClusterBootstrapper::new(config, flag.clone());
    let command = match bootstrapper.prepare() {
        HandshakeOutcome::Ready(command) => command,
        HandshakeOutcome::TimedOut(timeout) => {
            log_timeout(&timeout, "handshake failed before launch; nothing to supervise");
            return Ok(ExitCode::SUCCESS);
        }
    };
    info!(
        target: ENTRYPOINT_TARGET,
        name = command.name(),
        command = %command,
        "launching supervised process"
    );
    let handle = ProcessHandle::spawn(&command)?;
    if let Err(timeout) = bootstrapper.confirm() {
        log_timeout(&timeout, "member never became ready; stopping started processes");
        // The supervisor observes the flag and fans out termination.
        flag.set();
    }
    Supervisor::new(vec![handle], flag).run()?;
    Ok(ExitCode::SUCCESS)
}

fn log_timeout(timeout: &HandshakeTimeout, message: &str) {
    warn!(
        target: ENTRYPOINT_TARGET,
        stage = %timeout.stage,
        address = %timeout.address,
        waited_ms = timeout.waited.as_millis() as u64,
        "{message}"
    );
}

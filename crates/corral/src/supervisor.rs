//! Supervision of the spawned process set.
//!
//! The supervisor owns every [`ProcessHandle`] plus the shared
//! [`ShutdownFlag`] and drives one shutdown state machine: `Running` until
//! the first child exits or the flag is set, `Stopping` while termination
//! fans out to the remaining children, `Stopped` once every handle is
//! terminal. One process dying means the container's job is over, so no
//! sibling is ever left running.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::EntrypointError;
use crate::process::{ProcessHandle, ProcessState};
use crate::shutdown::ShutdownFlag;

const SUPERVISOR_TARGET: &str = "corral::supervisor";

/// How often the monitor loop samples child liveness and the shutdown flag.
const MONITOR_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Time children get to exit after a graceful stop request before SIGKILL.
const GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Final state of one supervised process, surfaced for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    pub name: String,
    pub state: ProcessState,
}

/// Owns started processes until every one of them is terminal.
#[derive(Debug)]
pub struct Supervisor {
    handles: Vec<ProcessHandle>,
    shutdown: ShutdownFlag,
    poll_interval: Duration,
    grace_period: Duration,
}

impl Supervisor {
    /// Takes ownership of already-started handles and the shared flag.
    #[must_use]
    pub fn new(handles: Vec<ProcessHandle>, shutdown: ShutdownFlag) -> Self {
        Self {
            handles,
            shutdown,
            poll_interval: MONITOR_POLL_INTERVAL,
            grace_period: GRACE_PERIOD,
        }
    }

    /// Overrides the monitor cadence and grace period, mainly for tests.
    #[must_use]
    pub fn with_timing(mut self, poll_interval: Duration, grace_period: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.grace_period = grace_period;
        self
    }

    /// Blocks until every owned process has reached a terminal state.
    ///
    /// The first child exit or shutdown request triggers a stop fan-out to
    /// all remaining children, followed by a bounded grace wait and a
    /// forceful kill for stragglers. Cleanup runs even when monitoring
    /// fails, so no child outlives this call.
    ///
    /// # Errors
    ///
    /// Returns [`EntrypointError::Monitor`] when the monitor loop could not
    /// poll a child; the process set is still torn down first.
    pub fn run(mut self) -> Result<Vec<ProcessReport>, EntrypointError> {
        if self.handles.is_empty() {
            return Ok(Vec::new());
        }
        info!(
            target: SUPERVISOR_TARGET,
            processes = self.handles.len(),
            "supervising process set"
        );
        let watched = self.watch();
        info!(target: SUPERVISOR_TARGET, "stopping process set");
        // Arm the flag so in-flight probes and any other observer wind down
        // alongside the children.
        self.shutdown.set();
        self.stop_all();
        let reports = self.drain();
        info!(target: SUPERVISOR_TARGET, "all processes stopped");
        watched?;
        Ok(reports)
    }

    /// Waits for the first child exit or the shutdown flag.
    fn watch(&mut self) -> Result<(), EntrypointError> {
        loop {
            if self.shutdown.is_set() {
                info!(target: SUPERVISOR_TARGET, "shutdown requested");
                return Ok(());
            }
            for handle in &mut self.handles {
                let state = handle.poll()?;
                if state.is_terminal() {
                    info!(
                        target: SUPERVISOR_TARGET,
                        name = handle.name(),
                        state = %state,
                        "process exited; ending supervision"
                    );
                    return Ok(());
                }
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Fans a graceful stop request out to every live child.
    fn stop_all(&mut self) {
        for handle in &mut self.handles {
            if let Err(error) = handle.request_stop() {
                // Delivery failure must not keep the other children running.
                warn!(
                    target: SUPERVISOR_TARGET,
                    name = handle.name(),
                    %error,
                    "failed to request stop"
                );
            }
        }
    }

    /// Waits out the grace period, kills stragglers, and reaps everything.
    fn drain(&mut self) -> Vec<ProcessReport> {
        let deadline = Instant::now() + self.grace_period;
        while Instant::now() < deadline {
            if self.handles.iter_mut().all(|handle| !handle.is_alive()) {
                break;
            }
            thread::sleep(self.poll_interval);
        }
        for handle in &mut self.handles {
            if handle.is_alive() {
                handle.kill();
            }
        }
        self.handles
            .iter_mut()
            .map(|handle| {
                let state = handle.wait().unwrap_or_else(|error| {
                    warn!(
                        target: SUPERVISOR_TARGET,
                        name = handle.name(),
                        %error,
                        "failed to reap process"
                    );
                    handle.state()
                });
                info!(
                    target: SUPERVISOR_TARGET,
                    name = handle.name(),
                    state = %state,
                    "final process state"
                );
                ProcessReport {
                    name: handle.name().to_owned(),
                    state,
                }
            })
            .collect()
    }
}

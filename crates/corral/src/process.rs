//! Launch commands and ownership of spawned child processes.

use std::fmt;
use std::io;
use std::process::{Child, Command, Stdio};

use tracing::{debug, warn};

use crate::error::EntrypointError;

const PROCESS_TARGET: &str = "corral::process";

/// An argv to launch, paired with a logical name for logs.
///
/// Arguments are passed to the OS verbatim; there is no shell involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    name: String,
    argv: Vec<String>,
}

impl LaunchCommand {
    /// Builds a command. The argv must at least name the program.
    #[must_use]
    pub fn new(name: impl Into<String>, argv: Vec<String>) -> Self {
        debug_assert!(!argv.is_empty(), "launch command needs a program");
        Self {
            name: name.into(),
            argv,
        }
    }

    /// Logical name used in logs and reports.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Program to execute.
    #[must_use]
    pub fn program(&self) -> &str {
        self.argv.first().map_or("", String::as_str)
    }

    /// Arguments following the program.
    #[must_use]
    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or(&[])
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.argv.join(" "))
    }
}

/// Terminal and non-terminal states of a supervised process.
///
/// Transitions are monotonic: `Running` moves to exactly one of the terminal
/// states and never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// The child is still running.
    Running,
    /// The child exited on its own or after a graceful stop request.
    Exited { code: Option<i32> },
    /// The child ignored the grace period and was forcefully killed.
    Killed,
}

impl ProcessState {
    /// True for `Exited` and `Killed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => formatter.write_str("running"),
            Self::Exited { code: Some(code) } => write!(formatter, "exited({code})"),
            Self::Exited { code: None } => formatter.write_str("exited(signal)"),
            Self::Killed => formatter.write_str("killed"),
        }
    }
}

/// Exclusive owner of one spawned child process.
///
/// Only the supervisor's monitor loop and the stop path mutate a handle; the
/// state moves from `Running` to a terminal value exactly once.
#[derive(Debug)]
pub struct ProcessHandle {
    name: String,
    child: Child,
    state: ProcessState,
    kill_sent: bool,
}

impl ProcessHandle {
    /// Spawns the command and returns immediately.
    ///
    /// Stdout and stderr are inherited so the child logs straight to the
    /// container's streams.
    ///
    /// # Errors
    ///
    /// Returns [`EntrypointError::Spawn`] when the program cannot be launched
    /// (missing binary, permission denied). Spawn failures are never retried.
    pub fn spawn(command: &LaunchCommand) -> Result<Self, EntrypointError> {
        let child = Command::new(command.program())
            .args(command.args())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| EntrypointError::Spawn {
                name: command.name().to_owned(),
                program: command.program().to_owned(),
                source,
            })?;
        debug!(
            target: PROCESS_TARGET,
            name = command.name(),
            pid = child.id(),
            command = %command,
            "spawned process"
        );
        Ok(Self {
            name: command.name().to_owned(),
            child,
            state: ProcessState::Running,
            kill_sent: false,
        })
    }

    /// Logical name of the process.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id of the child.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Last observed state; call [`Self::poll`] to refresh it.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Non-blocking liveness check.
    ///
    /// Monitor failures are treated as "not alive" so shutdown fan-out never
    /// stalls on a broken handle.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.poll(), Ok(ProcessState::Running))
    }

    /// Refreshes and returns the current state without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`EntrypointError::Monitor`] when the OS rejects the wait.
    pub fn poll(&mut self) -> Result<ProcessState, EntrypointError> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }
        let status = self
            .child
            .try_wait()
            .map_err(|source| EntrypointError::Monitor {
                name: self.name.clone(),
                source,
            })?;
        if let Some(status) = status {
            self.record_exit(status.code());
        }
        Ok(self.state)
    }

    /// Sends a graceful termination request to the child.
    ///
    /// Repeated calls and calls on an already-exited handle are no-ops; a
    /// request racing the child's own exit is also tolerated.
    ///
    /// # Errors
    ///
    /// Returns [`EntrypointError::Signal`] only for unexpected delivery
    /// failures such as permission problems.
    pub fn request_stop(&mut self) -> Result<(), EntrypointError> {
        if !self.is_alive() {
            return Ok(());
        }
        debug!(
            target: PROCESS_TARGET,
            name = %self.name,
            pid = self.id(),
            "requesting graceful stop"
        );
        send_sigterm(self.id()).map_err(|source| EntrypointError::Signal {
            name: self.name.clone(),
            pid: self.id(),
            source,
        })
    }

    /// Forcefully kills the child after the grace period has been exhausted.
    pub fn kill(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        warn!(
            target: PROCESS_TARGET,
            name = %self.name,
            pid = self.id(),
            "grace period exhausted; killing process"
        );
        if let Err(error) = self.child.kill() {
            // The child may have exited between the liveness check and the
            // kill; the subsequent wait reaps it either way.
            debug!(target: PROCESS_TARGET, name = %self.name, %error, "kill failed");
        } else {
            self.kill_sent = true;
        }
    }

    /// Blocks until the child reaches a terminal state and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`EntrypointError::Monitor`] when the OS wait fails.
    pub fn wait(&mut self) -> Result<ProcessState, EntrypointError> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }
        let status = self
            .child
            .wait()
            .map_err(|source| EntrypointError::Monitor {
                name: self.name.clone(),
                source,
            })?;
        self.record_exit(status.code());
        Ok(self.state)
    }

    fn record_exit(&mut self, code: Option<i32>) {
        self.state = if self.kill_sent {
            ProcessState::Killed
        } else {
            ProcessState::Exited { code }
        };
        debug!(
            target: PROCESS_TARGET,
            name = %self.name,
            state = %self.state,
            "process reached terminal state"
        );
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> io::Result<()> {
    // SAFETY: kill(2) is memory-safe even when the PID is stale; the kernel
    // reports ESRCH, which is folded into the idempotent no-op below.
    let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if result == 0 {
        return Ok(());
    }
    let error = io::Error::last_os_error();
    if error.raw_os_error() == Some(libc::ESRCH) {
        // The child exited between our liveness check and the signal.
        return Ok(());
    }
    Err(error)
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "graceful termination signals are unsupported on this platform",
    ))
}

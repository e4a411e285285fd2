//! Cooperative shutdown flag shared across the entrypoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTERM};
use tracing::debug;

use crate::error::EntrypointError;

/// Set-once flag observed by every polling loop in the entrypoint.
///
/// The first `set` wins; later calls are no-ops and the flag is never reset.
/// Clones share the same underlying state, so a flag handed to the probe, the
/// supervisor, and the signal handlers all observe the same transition.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    inner: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Idempotent.
    pub fn set(&self) {
        if !self.inner.swap(true, Ordering::SeqCst) {
            debug!(target: "corral::shutdown", "shutdown requested");
        }
    }

    /// True once shutdown has been requested.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

/// Arms the flag on SIGTERM, SIGINT, or SIGQUIT.
///
/// Registration happens once at startup; the handlers stay installed for the
/// process lifetime so a late signal still lands on the same flag.
pub fn register_signal_handlers(flag: &ShutdownFlag) -> Result<(), EntrypointError> {
    for signal in [SIGTERM, SIGINT, SIGQUIT] {
        signal_hook::flag::register(signal, Arc::clone(&flag.inner))
            .map_err(|source| EntrypointError::SignalInstall { source })?;
    }
    Ok(())
}

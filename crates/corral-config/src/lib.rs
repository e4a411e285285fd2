//! Configuration types shared by the corral entrypoint.
//!
//! This crate owns the value objects the entrypoint is handed before any
//! process is spawned: the resolved [`Role`], the immutable
//! [`ClusterConfig`] describing the member being bootstrapped, and the
//! logging knobs. Resolution happens once, up front; everything downstream
//! treats these values as read-only.

mod cluster;
mod defaults;
mod logging;
mod role;

pub use cluster::{ClusterConfig, ConfigError, Overrides};
pub use defaults::{
    CLIENT_PORT, CLUSTER_TOKEN, DATA_DIR, DEBUG_LOG_FILTER, DEFAULT_ETCD_BINARY,
    DEFAULT_LOG_FILTER, DISCOVERY_PORT, HANDSHAKE_DEADLINE, PEER_PORT, PROBE_ATTEMPT_TIMEOUT,
    PROBE_POLL_INTERVAL, SETTLE_DELAY,
};
pub use logging::LogFormat;
pub use role::Role;

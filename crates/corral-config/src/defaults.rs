//! Default ports, paths, and timing constants for the entrypoint.

use std::time::Duration;

/// Port on which etcd serves its v2 client and discovery API.
pub const DISCOVERY_PORT: u16 = 4001;

/// Primary etcd client port advertised by joining members.
pub const CLIENT_PORT: u16 = 2379;

/// Port used for peer-to-peer replication traffic.
pub const PEER_PORT: u16 = 2380;

/// Location of the etcd binary inside the container image.
pub const DEFAULT_ETCD_BINARY: &str = "/usr/bin/etcd";

/// Data directory mounted into the container for etcd state.
pub const DATA_DIR: &str = "/data";

/// Initial cluster token shared by every member of the cluster.
pub const CLUSTER_TOKEN: &str = "etcd-cluster-1";

/// Default log filter expression used by the entrypoint.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Log filter applied when `--debug` is passed.
pub const DEBUG_LOG_FILTER: &str = "debug";

/// Upper bound for a single TCP connection attempt during a readiness probe.
pub const PROBE_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Overall deadline for each stage of the readiness handshake.
pub const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(30);

/// Pause between consecutive probe attempts.
pub const PROBE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Delay after the bootstrap node answers its discovery port, giving it time
/// to finish its own internal initialisation before members join.
pub const SETTLE_DELAY: Duration = Duration::from_secs(10);

//! Cluster role resolved from the entrypoint's command line.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How this container participates in the etcd cluster.
///
/// The role is resolved once from the command line and never changes for the
/// lifetime of the entrypoint.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Role {
    /// Run a keep-alive process with no clustering at all.
    Standalone,
    /// Run the first cluster member and expose the discovery endpoint.
    Bootstrap,
    /// Join an existing cluster through the bootstrap node's discovery URL.
    Join,
}

impl Role {
    /// True when the role performs any network handshake before or after
    /// launching its process.
    #[must_use]
    pub fn requires_handshake(self) -> bool {
        !matches!(self, Self::Standalone)
    }
}

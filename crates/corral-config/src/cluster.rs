//! Resolution of the immutable cluster configuration.
//!
//! The entrypoint reads its parameters from the same environment variables
//! the container image has always used (`ETCD_DISCOVERY_NODE`, `ETCD_UUID`,
//! `ETCD_CLUSTER_SIZE`), with a handful of `CORRAL_*` knobs for tuning the
//! handshake timing. All lookups go through an injected environment source so
//! tests never mutate process-wide state.

use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::defaults::{
    DISCOVERY_PORT, DEFAULT_ETCD_BINARY, HANDSHAKE_DEADLINE, PROBE_ATTEMPT_TIMEOUT,
    PROBE_POLL_INTERVAL, SETTLE_DELAY,
};
use crate::role::Role;

/// Environment variable naming the bootstrap node a joining member contacts.
const DISCOVERY_NODE_VAR: &str = "ETCD_DISCOVERY_NODE";
/// Environment variable carrying the cluster UUID used to key discovery.
const UUID_VAR: &str = "ETCD_UUID";
/// Environment variable with the desired cluster size.
const CLUSTER_SIZE_VAR: &str = "ETCD_CLUSTER_SIZE";
/// Optional override for the etcd binary location.
const ETCD_BINARY_VAR: &str = "ETCD_BIN";
/// Hostname reported by the container runtime.
const HOSTNAME_VAR: &str = "HOSTNAME";

const HANDSHAKE_TIMEOUT_VAR: &str = "CORRAL_HANDSHAKE_TIMEOUT_MS";
const PROBE_TIMEOUT_VAR: &str = "CORRAL_PROBE_TIMEOUT_MS";
const PROBE_INTERVAL_VAR: &str = "CORRAL_PROBE_INTERVAL_MS";
const SETTLE_DELAY_VAR: &str = "CORRAL_SETTLE_DELAY_MS";

/// Values supplied on the command line that take precedence over the
/// environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Hostname advertised to the cluster in place of the system hostname.
    pub hostname: Option<String>,
    /// Path to the etcd binary in place of [`DEFAULT_ETCD_BINARY`].
    pub etcd_binary: Option<String>,
}

/// Immutable description of the cluster member being bootstrapped.
///
/// Resolved exactly once before any process is spawned; the rest of the
/// entrypoint only ever borrows it.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    role: Role,
    hostname: String,
    etcd_binary: String,
    discovery_peer: Option<String>,
    cluster_uuid: Option<String>,
    cluster_size: Option<u64>,
    discovery_url: Option<Url>,
    size_config_url: Option<Url>,
    probe_attempt_timeout: Duration,
    handshake_deadline: Duration,
    probe_poll_interval: Duration,
    settle_delay: Duration,
}

impl ClusterConfig {
    /// Resolves the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a variable required by the role is
    /// missing or malformed, or when no hostname can be determined.
    pub fn from_env(role: Role, overrides: &Overrides) -> Result<Self, ConfigError> {
        Self::resolve(role, overrides, |name| std::env::var(name).ok())
    }

    /// Resolves the configuration against an arbitrary environment source.
    pub fn resolve<E>(role: Role, overrides: &Overrides, env: E) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let hostname = overrides
            .hostname
            .clone()
            .or_else(|| env(HOSTNAME_VAR).filter(|name| !name.is_empty()))
            .or_else(system_hostname)
            .ok_or(ConfigError::UnresolvableHostname)?;
        let etcd_binary = overrides
            .etcd_binary
            .clone()
            .or_else(|| env(ETCD_BINARY_VAR))
            .unwrap_or_else(|| DEFAULT_ETCD_BINARY.to_owned());
        let discovery_peer = env(DISCOVERY_NODE_VAR).filter(|peer| !peer.is_empty());
        let cluster_uuid = env(UUID_VAR).filter(|uuid| !uuid.is_empty());
        let cluster_size = env(CLUSTER_SIZE_VAR)
            .map(|raw| {
                raw.parse::<u64>().map_err(|_| ConfigError::InvalidClusterSize { value: raw })
            })
            .transpose()?;

        let mut config = Self {
            role,
            hostname,
            etcd_binary,
            discovery_peer,
            cluster_uuid,
            cluster_size,
            discovery_url: None,
            size_config_url: None,
            probe_attempt_timeout: duration_from_env(&env, PROBE_TIMEOUT_VAR)?
                .unwrap_or(PROBE_ATTEMPT_TIMEOUT),
            handshake_deadline: duration_from_env(&env, HANDSHAKE_TIMEOUT_VAR)?
                .unwrap_or(HANDSHAKE_DEADLINE),
            probe_poll_interval: duration_from_env(&env, PROBE_INTERVAL_VAR)?
                .unwrap_or(PROBE_POLL_INTERVAL),
            settle_delay: duration_from_env(&env, SETTLE_DELAY_VAR)?.unwrap_or(SETTLE_DELAY),
        };
        config.validate_for_role()?;
        Ok(config)
    }

    /// Checks role-specific requirements and precomputes the discovery URLs.
    fn validate_for_role(&mut self) -> Result<(), ConfigError> {
        match self.role {
            Role::Standalone => Ok(()),
            Role::Bootstrap => {
                let uuid = self.require(UUID_VAR, self.cluster_uuid.as_deref())?;
                if self.cluster_size.is_none() {
                    return Err(ConfigError::MissingVariable {
                        role: self.role,
                        name: CLUSTER_SIZE_VAR,
                    });
                }
                self.size_config_url = Some(parse_url(format!(
                    "http://{}:{}/v2/keys/discovery/{}/_config/size",
                    self.hostname, DISCOVERY_PORT, uuid
                ))?);
                Ok(())
            }
            Role::Join => {
                let uuid = self.require(UUID_VAR, self.cluster_uuid.as_deref())?;
                let peer = self.require(DISCOVERY_NODE_VAR, self.discovery_peer.as_deref())?;
                self.discovery_url = Some(parse_url(format!(
                    "http://{}:{}/v2/keys/discovery/{}",
                    peer, DISCOVERY_PORT, uuid
                ))?);
                Ok(())
            }
        }
    }

    fn require<'a>(&self, name: &'static str, value: Option<&'a str>) -> Result<&'a str, ConfigError> {
        value.ok_or(ConfigError::MissingVariable {
            role: self.role,
            name,
        })
    }

    /// Role this member was launched with.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Hostname advertised in the member's client and peer URLs.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Path of the etcd binary to launch.
    #[must_use]
    pub fn etcd_binary(&self) -> &str {
        &self.etcd_binary
    }

    /// Bootstrap node a joining member discovers the cluster through.
    #[must_use]
    pub fn discovery_peer(&self) -> Option<&str> {
        self.discovery_peer.as_deref()
    }

    /// UUID keying the cluster's discovery namespace.
    #[must_use]
    pub fn cluster_uuid(&self) -> Option<&str> {
        self.cluster_uuid.as_deref()
    }

    /// Desired cluster size announced by the bootstrap node.
    #[must_use]
    pub fn cluster_size(&self) -> Option<u64> {
        self.cluster_size
    }

    /// Discovery URL a joining member passes to etcd. `Some` only for Join.
    #[must_use]
    pub fn discovery_url(&self) -> Option<&Url> {
        self.discovery_url.as_ref()
    }

    /// URL the bootstrap node writes the desired cluster size to. `Some` only
    /// for Bootstrap.
    #[must_use]
    pub fn size_config_url(&self) -> Option<&Url> {
        self.size_config_url.as_ref()
    }

    /// Upper bound for a single probe connection attempt.
    #[must_use]
    pub fn probe_attempt_timeout(&self) -> Duration {
        self.probe_attempt_timeout
    }

    /// Overall deadline for each handshake stage.
    #[must_use]
    pub fn handshake_deadline(&self) -> Duration {
        self.handshake_deadline
    }

    /// Pause between probe attempts; also bounds shutdown latency in loops.
    #[must_use]
    pub fn probe_poll_interval(&self) -> Duration {
        self.probe_poll_interval
    }

    /// Pause after the bootstrap node answers, before a member joins.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }
}

fn parse_url(raw: String) -> Result<Url, ConfigError> {
    Url::parse(&raw).map_err(|source| ConfigError::InvalidDiscoveryUrl { url: raw, source })
}

fn duration_from_env<E>(env: &E, name: &'static str) -> Result<Option<Duration>, ConfigError>
where
    E: Fn(&str) -> Option<String>,
{
    env(name)
        .map(|raw| {
            raw.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidDuration { name, value: raw })
        })
        .transpose()
}

#[cfg(unix)]
fn system_hostname() -> Option<String> {
    let mut buffer = [0u8; 256];
    // SAFETY: gethostname writes at most buffer.len() bytes; the name is
    // NUL-terminated when it fits, and a missing terminator is rejected below.
    let rc = unsafe { libc::gethostname(buffer.as_mut_ptr().cast(), buffer.len()) };
    if rc != 0 {
        return None;
    }
    let end = buffer.iter().position(|&byte| byte == 0)?;
    String::from_utf8(buffer[..end].to_vec()).ok()
}

#[cfg(not(unix))]
fn system_hostname() -> Option<String> {
    None
}

/// Errors raised while resolving the cluster configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable the role depends on was absent or empty.
    #[error("role '{role}' requires the {name} environment variable")]
    MissingVariable { role: Role, name: &'static str },
    /// The cluster size variable did not hold an unsigned integer.
    #[error("invalid cluster size '{value}': expected an unsigned integer")]
    InvalidClusterSize { value: String },
    /// A timing knob did not hold a millisecond count.
    #[error("invalid value '{value}' for {name}: expected milliseconds")]
    InvalidDuration { name: &'static str, value: String },
    /// The resolved parameters did not form a valid discovery URL.
    #[error("invalid discovery URL '{url}': {source}")]
    InvalidDiscoveryUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    /// No hostname override, environment value, or system hostname was found.
    #[error("could not determine a hostname for this member")]
    UnresolvableHostname,
}

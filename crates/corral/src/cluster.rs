//! Role-specific cluster bootstrap orchestration.
//!
//! Each role turns into at most one [`LaunchCommand`] plus the readiness
//! handshake around it. The joining member's discovery-peer probe always
//! completes before its command is even built, so no process is ever started
//! against an unconfirmed peer.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use reqwest::blocking::Client;
use tracing::{info, warn};
use url::Url;

use corral_config::{
    CLIENT_PORT, CLUSTER_TOKEN, ClusterConfig, DATA_DIR, DISCOVERY_PORT, PEER_PORT, Role,
};

use crate::probe::Probe;
use crate::process::LaunchCommand;
use crate::shutdown::ShutdownFlag;

const CLUSTER_TARGET: &str = "corral::cluster";

/// Logical name every supervised process carries, matching the image's
/// long-standing log line format.
const PROCESS_NAME: &str = "etcd";

/// Handshake stage a timeout was observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStage {
    /// Waiting for the bootstrap node's discovery port to answer.
    DiscoveryPeer,
    /// Waiting for this member's own client port after launch.
    SelfReadiness,
}

impl fmt::Display for HandshakeStage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DiscoveryPeer => formatter.write_str("discovery-peer"),
            Self::SelfReadiness => formatter.write_str("self-readiness"),
        }
    }
}

/// Terminal failure context for a handshake that did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeTimeout {
    pub stage: HandshakeStage,
    pub address: String,
    pub waited: Duration,
}

/// Result of the pre-launch half of the handshake: either a command ready to
/// run or the reason nothing should be started.
#[derive(Debug)]
pub enum HandshakeOutcome {
    Ready(LaunchCommand),
    TimedOut(HandshakeTimeout),
}

/// Sequences readiness probes and the discovery configuration write for one
/// role execution.
#[derive(Debug)]
pub struct ClusterBootstrapper<'a> {
    config: &'a ClusterConfig,
    probe: Probe,
    shutdown: ShutdownFlag,
    self_probe_host: String,
}

impl<'a> ClusterBootstrapper<'a> {
    /// Builds a bootstrapper sharing the entrypoint's shutdown flag.
    #[must_use]
    pub fn new(config: &'a ClusterConfig, shutdown: ShutdownFlag) -> Self {
        Self {
            config,
            probe: Probe::from_config(config, shutdown.clone()),
            shutdown,
            self_probe_host: "127.0.0.1".to_owned(),
        }
    }

    /// Redirects the post-launch self probe, mainly for tests.
    #[must_use]
    pub fn with_self_probe_host(mut self, host: impl Into<String>) -> Self {
        self.self_probe_host = host.into();
        self
    }

    /// Runs the pre-launch half of the handshake and builds the command.
    ///
    /// Standalone and Bootstrap yield a command immediately; Join first
    /// confirms the discovery peer answers and then waits out the settle
    /// delay so the bootstrap node finishes its own initialisation.
    pub fn prepare(&self) -> HandshakeOutcome {
        match self.config.role() {
            Role::Standalone => {
                info!(target: CLUSTER_TARGET, "starting in standalone mode");
                HandshakeOutcome::Ready(keep_alive_command())
            }
            Role::Bootstrap => {
                info!(target: CLUSTER_TARGET, "starting bootstrap node");
                HandshakeOutcome::Ready(bootstrap_command(self.config))
            }
            Role::Join => {
                info!(target: CLUSTER_TARGET, "starting in cluster mode");
                match (self.config.discovery_peer(), self.config.discovery_url()) {
                    (Some(peer), Some(url)) => self.prepare_join(peer, url),
                    // A validated Join config always carries both; a gap here
                    // is treated as an immediate peer timeout, not a panic.
                    _ => HandshakeOutcome::TimedOut(HandshakeTimeout {
                        stage: HandshakeStage::DiscoveryPeer,
                        address: String::from("<unconfigured>"),
                        waited: Duration::ZERO,
                    }),
                }
            }
        }
    }

    fn prepare_join(&self, peer: &str, discovery_url: &Url) -> HandshakeOutcome {
        let started = Instant::now();
        let address = format!("{peer}:{DISCOVERY_PORT}");
        if !self.probe.wait_for(peer, DISCOVERY_PORT) {
            return HandshakeOutcome::TimedOut(HandshakeTimeout {
                stage: HandshakeStage::DiscoveryPeer,
                address,
                waited: started.elapsed(),
            });
        }
        info!(
            target: CLUSTER_TARGET,
            peer,
            port = DISCOVERY_PORT,
            "bootstrap node is reachable; waiting for it to settle"
        );
        if !self.settle() {
            return HandshakeOutcome::TimedOut(HandshakeTimeout {
                stage: HandshakeStage::DiscoveryPeer,
                address,
                waited: started.elapsed(),
            });
        }
        HandshakeOutcome::Ready(join_command(self.config, discovery_url))
    }

    /// Runs the post-launch half of the handshake.
    ///
    /// Bootstrap probes its own discovery port and then announces the
    /// desired cluster size; Join confirms its own client port answers.
    /// Standalone has nothing to confirm.
    ///
    /// # Errors
    ///
    /// Returns the timeout context when the member never became ready; the
    /// caller stops all started processes and exits cleanly.
    pub fn confirm(&self) -> Result<(), HandshakeTimeout> {
        let role = self.config.role();
        if !role.requires_handshake() {
            return Ok(());
        }
        if role == Role::Bootstrap {
            self.confirm_self(DISCOVERY_PORT)?;
            self.announce_cluster_size();
            return Ok(());
        }
        self.confirm_self(CLIENT_PORT)
    }

    fn confirm_self(&self, port: u16) -> Result<(), HandshakeTimeout> {
        let started = Instant::now();
        if self.probe.wait_for(&self.self_probe_host, port) {
            info!(target: CLUSTER_TARGET, port, "etcd is active");
            return Ok(());
        }
        Err(HandshakeTimeout {
            stage: HandshakeStage::SelfReadiness,
            address: format!("{}:{port}", self.self_probe_host),
            waited: started.elapsed(),
        })
    }

    /// Waits out the settle delay, staying responsive to shutdown.
    fn settle(&self) -> bool {
        let deadline = Instant::now() + self.config.settle_delay();
        loop {
            if self.shutdown.is_set() {
                return false;
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return true;
            };
            if remaining.is_zero() {
                return true;
            }
            thread::sleep(remaining.min(self.probe.interval()));
        }
    }

    /// Writes the desired cluster size to the discovery namespace.
    ///
    /// Best effort by design: the response status is logged and a failure
    /// never aborts the handshake.
    fn announce_cluster_size(&self) {
        let (Some(url), Some(size)) = (self.config.size_config_url(), self.config.cluster_size())
        else {
            return;
        };
        match put_cluster_size(url, size, self.config.probe_attempt_timeout()) {
            Ok(status) if status.is_success() => {
                info!(
                    target: CLUSTER_TARGET,
                    %url,
                    size,
                    status = status.as_u16(),
                    "initialised bootstrap discovery size"
                );
            }
            Ok(status) => {
                warn!(
                    target: CLUSTER_TARGET,
                    %url,
                    size,
                    status = status.as_u16(),
                    "discovery size write returned a non-success status"
                );
            }
            Err(error) => {
                warn!(
                    target: CLUSTER_TARGET,
                    %url,
                    size,
                    %error,
                    "discovery size write failed"
                );
            }
        }
    }
}

/// Issues one `PUT value=<size>` against the discovery size key.
pub(crate) fn put_cluster_size(
    url: &Url,
    size: u64,
    timeout: Duration,
) -> Result<StatusCode, reqwest::Error> {
    let client = Client::builder().timeout(timeout).build()?;
    let response = client
        .put(url.clone())
        .form(&[("value", size.to_string())])
        .send()?;
    Ok(response.status())
}

/// Keep-alive command for standalone mode.
fn keep_alive_command() -> LaunchCommand {
    LaunchCommand::new(
        PROCESS_NAME,
        vec!["tail".to_owned(), "-f".to_owned(), "/dev/null".to_owned()],
    )
}

/// Command for the first cluster member.
fn bootstrap_command(config: &ClusterConfig) -> LaunchCommand {
    let host = config.hostname();
    LaunchCommand::new(
        PROCESS_NAME,
        vec![
            config.etcd_binary().to_owned(),
            "--name".to_owned(),
            "bootstrap".to_owned(),
            "--data-dir".to_owned(),
            DATA_DIR.to_owned(),
            "--advertise-client-urls".to_owned(),
            format!("http://{host}:{DISCOVERY_PORT}"),
            "--listen-client-urls".to_owned(),
            format!("http://0.0.0.0:{DISCOVERY_PORT}"),
            "--initial-advertise-peer-urls".to_owned(),
            format!("http://{host}:{PEER_PORT}"),
            "--listen-peer-urls".to_owned(),
            format!("http://0.0.0.0:{PEER_PORT}"),
            "--initial-cluster-token".to_owned(),
            CLUSTER_TOKEN.to_owned(),
            "--initial-cluster".to_owned(),
            format!("bootstrap=http://{host}:{PEER_PORT}"),
            "--initial-cluster-state".to_owned(),
            "new".to_owned(),
        ],
    )
}

/// Command for a member joining through the discovery URL.
fn join_command(config: &ClusterConfig, discovery_url: &Url) -> LaunchCommand {
    let host = config.hostname();
    LaunchCommand::new(
        PROCESS_NAME,
        vec![
            config.etcd_binary().to_owned(),
            // etcd accepts the single-dash spelling; kept for parity with the
            // image's historical invocation.
            "-name".to_owned(),
            host.to_owned(),
            "--data-dir".to_owned(),
            DATA_DIR.to_owned(),
            "--initial-advertise-peer-urls".to_owned(),
            format!("http://{host}:{PEER_PORT}"),
            "--listen-peer-urls".to_owned(),
            format!("http://0.0.0.0:{PEER_PORT}"),
            "--listen-client-urls".to_owned(),
            format!("http://0.0.0.0:{CLIENT_PORT},http://0.0.0.0:{DISCOVERY_PORT}"),
            "--advertise-client-urls".to_owned(),
            format!("http://{host}:{CLIENT_PORT}"),
            "--discovery".to_owned(),
            discovery_url.as_str().trim_end_matches('/').to_owned(),
        ],
    )
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use std::collections::HashMap;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    use url::Url;

    use corral_config::{ClusterConfig, Overrides, Role};

    use super::{
        ClusterBootstrapper, HandshakeOutcome, HandshakeStage, put_cluster_size,
    };
    use crate::shutdown::ShutdownFlag;

    fn config_for(role: Role, extra: &[(&str, &str)]) -> ClusterConfig {
        let mut pairs: HashMap<String, String> = [
            ("ETCD_UUID", "abc123"),
            ("ETCD_CLUSTER_SIZE", "3"),
            ("CORRAL_HANDSHAKE_TIMEOUT_MS", "200"),
            ("CORRAL_PROBE_TIMEOUT_MS", "100"),
            ("CORRAL_PROBE_INTERVAL_MS", "20"),
            ("CORRAL_SETTLE_DELAY_MS", "0"),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect();
        for (key, value) in extra {
            pairs.insert((*key).to_owned(), (*value).to_owned());
        }
        let overrides = Overrides {
            hostname: Some("node-a".to_owned()),
            etcd_binary: None,
        };
        ClusterConfig::resolve(role, &overrides, move |name| pairs.get(name).cloned())
            .expect("resolve config")
    }

    fn command_of(outcome: HandshakeOutcome) -> Vec<String> {
        match outcome {
            HandshakeOutcome::Ready(command) => {
                let mut argv = vec![command.program().to_owned()];
                argv.extend(command.args().iter().cloned());
                argv
            }
            HandshakeOutcome::TimedOut(timeout) => panic!("expected Ready, got {timeout:?}"),
        }
    }

    #[test]
    fn standalone_builds_the_keep_alive_command() {
        let config = config_for(Role::Standalone, &[]);
        let bootstrapper = ClusterBootstrapper::new(&config, ShutdownFlag::new());
        let argv = command_of(bootstrapper.prepare());
        assert_eq!(argv, ["tail", "-f", "/dev/null"]);
        // Nothing to confirm either.
        bootstrapper.confirm().expect("standalone confirm");
    }

    #[test]
    fn bootstrap_command_describes_a_single_member_cluster() {
        let config = config_for(Role::Bootstrap, &[]);
        let bootstrapper = ClusterBootstrapper::new(&config, ShutdownFlag::new());
        let argv = command_of(bootstrapper.prepare());
        assert_eq!(argv[0], "/usr/bin/etcd");
        let rendered = argv.join(" ");
        assert!(rendered.contains("--name bootstrap"));
        assert!(rendered.contains("--advertise-client-urls http://node-a:4001"));
        assert!(rendered.contains("--initial-cluster bootstrap=http://node-a:2380"));
        assert!(rendered.contains("--initial-cluster-state new"));
    }

    #[test]
    fn join_with_unreachable_peer_times_out_without_a_command() {
        // Bind then drop to obtain a refusing port on the loopback peer.
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind listener");
        drop(listener);
        let config = config_for(Role::Join, &[("ETCD_DISCOVERY_NODE", "127.0.0.1")]);
        // Port 4001 is fixed for discovery, so this only passes while nothing
        // local listens there; the tiny deadline keeps the test fast.
        let bootstrapper = ClusterBootstrapper::new(&config, ShutdownFlag::new());
        match bootstrapper.prepare() {
            HandshakeOutcome::TimedOut(timeout) => {
                assert_eq!(timeout.stage, HandshakeStage::DiscoveryPeer);
                assert_eq!(timeout.address, "127.0.0.1:4001");
                assert!(timeout.waited >= Duration::from_millis(200));
            }
            HandshakeOutcome::Ready(command) => {
                panic!("no command should be built for an unreachable peer: {command}")
            }
        }
    }

    #[test]
    fn bootstrap_confirm_times_out_when_the_member_never_answers() {
        let config = config_for(Role::Bootstrap, &[]);
        // The .invalid TLD never resolves, so every self probe fails until
        // the (short) deadline runs out.
        let bootstrapper = ClusterBootstrapper::new(&config, ShutdownFlag::new())
            .with_self_probe_host("corral-test.invalid");
        let timeout = bootstrapper.confirm().expect_err("confirm must time out");
        assert_eq!(timeout.stage, HandshakeStage::SelfReadiness);
        assert_eq!(timeout.address, "corral-test.invalid:4001");
        assert!(timeout.waited >= Duration::from_millis(200));
    }

    #[test]
    fn join_command_points_discovery_at_the_peer() {
        let config = config_for(Role::Join, &[("ETCD_DISCOVERY_NODE", "seed-0")]);
        let url = config.discovery_url().expect("discovery url").clone();
        let argv = command_of(HandshakeOutcome::Ready(super::join_command(&config, &url)));
        let rendered = argv.join(" ");
        assert!(rendered.contains("-name node-a"));
        assert!(rendered.contains("--discovery http://seed-0:4001/v2/keys/discovery/abc123"));
        assert!(rendered.contains("--listen-client-urls http://0.0.0.0:2379,http://0.0.0.0:4001"));
    }

    /// Minimal one-shot HTTP responder for exercising the size PUT.
    fn serve_once(status_line: &'static str) -> (u16, thread::JoinHandle<String>) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind responder");
        let port = listener.local_addr().expect("local addr").port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            stream
                .set_read_timeout(Some(Duration::from_millis(200)))
                .expect("set read timeout");
            // Headers and body may arrive in separate segments; keep reading
            // until the connection goes quiet.
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                match stream.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(read) => request.extend_from_slice(&chunk[..read]),
                    Err(_) => break,
                }
                if request.windows(6).any(|window| window == b"value=") {
                    break;
                }
            }
            let response =
                format!("{status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
            stream.write_all(response.as_bytes()).expect("write response");
            String::from_utf8_lossy(&request).into_owned()
        });
        (port, handle)
    }

    #[test]
    fn size_put_sends_a_form_body() {
        let (port, server) = serve_once("HTTP/1.1 200 OK");
        let url = Url::parse(&format!(
            "http://127.0.0.1:{port}/v2/keys/discovery/abc123/_config/size"
        ))
        .expect("url");
        let status = put_cluster_size(&url, 3, Duration::from_secs(5)).expect("put");
        assert!(status.is_success());
        let request = server.join().expect("join server");
        assert!(request.starts_with("PUT /v2/keys/discovery/abc123/_config/size"));
        assert!(request.contains("value=3"));
    }

    #[test]
    fn size_put_surfaces_non_success_statuses_without_error() {
        let (port, server) = serve_once("HTTP/1.1 500 Internal Server Error");
        let url = Url::parse(&format!("http://127.0.0.1:{port}/size")).expect("url");
        let status = put_cluster_size(&url, 3, Duration::from_secs(5)).expect("put");
        assert_eq!(status.as_u16(), 500);
        server.join().expect("join server");
    }
}

//! Bounded TCP readiness probing.
//!
//! etcd takes a while to open its client port after launch, so the handshake
//! polls plain TCP connectivity at a fixed interval until either the port
//! answers or the deadline passes. Connection failures are steady-state noise
//! during startup and only ever logged at debug level.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use corral_config::ClusterConfig;

use crate::shutdown::ShutdownFlag;

const PROBE_TARGET: &str = "corral::probe";

/// A reusable readiness probe with fixed timing and a cancellation flag.
#[derive(Debug, Clone)]
pub struct Probe {
    attempt_timeout: Duration,
    deadline: Duration,
    interval: Duration,
    shutdown: ShutdownFlag,
}

impl Probe {
    /// Builds a probe with explicit timing, mainly for tests.
    #[must_use]
    pub fn new(
        attempt_timeout: Duration,
        deadline: Duration,
        interval: Duration,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            attempt_timeout,
            deadline,
            interval,
            shutdown,
        }
    }

    /// Builds a probe from the resolved cluster configuration.
    #[must_use]
    pub fn from_config(config: &ClusterConfig, shutdown: ShutdownFlag) -> Self {
        Self::new(
            config.probe_attempt_timeout(),
            config.handshake_deadline(),
            config.probe_poll_interval(),
            shutdown,
        )
    }

    /// Polls `host:port` until it accepts a connection or the deadline passes.
    ///
    /// Returns `true` as soon as one connection succeeds. Returns `false`
    /// when the deadline elapses or, within one poll interval, when the
    /// shutdown flag is set mid-poll. Each connection attempt is capped at
    /// the poll interval so a black-holed address cannot hold up the flag
    /// check for the full attempt timeout. No error escapes: resolution and
    /// connection failures merely schedule the next attempt.
    pub fn wait_for(&self, host: &str, port: u16) -> bool {
        let started = Instant::now();
        let deadline = started + self.deadline;
        while Instant::now() < deadline {
            if self.shutdown.is_set() {
                debug!(
                    target: PROBE_TARGET,
                    host,
                    port,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "probe cancelled by shutdown request"
                );
                return false;
            }
            let budget = self
                .attempt_timeout
                .min(self.interval)
                .min(deadline.saturating_duration_since(Instant::now()))
                .max(Duration::from_millis(1));
            match try_connect(host, port, budget) {
                Ok(()) => {
                    debug!(
                        target: PROBE_TARGET,
                        host,
                        port,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "port accepted a connection"
                    );
                    return true;
                }
                Err(error) => {
                    debug!(
                        target: PROBE_TARGET,
                        host,
                        port,
                        %error,
                        "connection attempt failed; retrying"
                    );
                }
            }
            thread::sleep(self.interval);
        }
        debug!(
            target: PROBE_TARGET,
            host,
            port,
            waited_ms = started.elapsed().as_millis() as u64,
            "deadline elapsed without a successful connection"
        );
        false
    }

    /// Overall deadline this probe waits for, used in timeout reports.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Poll interval, shared with the settle-delay wait.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

fn try_connect(host: &str, port: u16, timeout: Duration) -> io::Result<()> {
    let address = resolve_tcp(host, port)?;
    TcpStream::connect_timeout(&address, timeout).map(|_| ())
}

fn resolve_tcp(host: &str, port: u16) -> io::Result<SocketAddr> {
    let mut addresses = (host, port).to_socket_addrs()?;
    addresses
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved address"))
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use std::net::TcpListener;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::Probe;
    use crate::shutdown::ShutdownFlag;

    fn fast_probe(deadline: Duration, shutdown: ShutdownFlag) -> Probe {
        Probe::new(
            Duration::from_millis(250),
            deadline,
            Duration::from_millis(25),
            shutdown,
        )
    }

    #[test]
    fn reachable_port_reports_ready_immediately() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind listener");
        let port = listener.local_addr().expect("local addr").port();
        let probe = fast_probe(Duration::from_secs(5), ShutdownFlag::new());
        let started = Instant::now();
        assert!(probe.wait_for("127.0.0.1", port));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn unreachable_port_fails_no_earlier_than_the_deadline() {
        // Bind then drop to find a port that refuses connections.
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind listener");
        let port = listener.local_addr().expect("local addr").port();
        drop(listener);

        let deadline = Duration::from_millis(200);
        let probe = fast_probe(deadline, ShutdownFlag::new());
        let started = Instant::now();
        assert!(!probe.wait_for("127.0.0.1", port));
        let elapsed = started.elapsed();
        assert!(elapsed >= deadline, "returned early after {elapsed:?}");
        // One extra interval plus scheduling slack is the allowed overshoot.
        assert!(elapsed < deadline + Duration::from_millis(500));
    }

    #[test]
    fn shutdown_cancels_an_in_flight_probe() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind listener");
        let port = listener.local_addr().expect("local addr").port();
        drop(listener);

        let flag = ShutdownFlag::new();
        let probe = fast_probe(Duration::from_secs(30), flag.clone());
        let setter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            flag.set();
        });
        let started = Instant::now();
        assert!(!probe.wait_for("127.0.0.1", port));
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "probe did not observe the shutdown flag promptly"
        );
        setter.join().expect("join setter");
    }

    #[test]
    fn slow_connects_do_not_stall_cancellation() {
        // 203.0.113.0/24 is reserved for documentation, so connecting either
        // fails fast or hangs until the attempt timeout, never succeeds.
        let flag = ShutdownFlag::new();
        let probe = Probe::new(
            Duration::from_secs(5),
            Duration::from_secs(30),
            Duration::from_millis(25),
            flag.clone(),
        );
        let setter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            flag.set();
        });
        let started = Instant::now();
        assert!(!probe.wait_for("203.0.113.1", 4001));
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "a blocked connect delayed shutdown observation"
        );
        setter.join().expect("join setter");
    }
}

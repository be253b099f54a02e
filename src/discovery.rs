use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use ipnet::Ipv4Net;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::error::ScanError;
use crate::netdetect::{host_addresses, parse_network, usable_host_count};
use crate::session::{now_rfc3339, run_pool, SessionHandle, StateCell};
use crate::types::{DiscoverySummary, HostProbeResult, SessionState};

pub type DiscoveryHandle = SessionHandle<HostProbeResult, DiscoverySummary>;

/// Extra time granted to the ping process on top of its own wait.
const PING_GRACE: Duration = Duration::from_secs(2);

/// "Is this address reachable within `timeout`?"
pub trait HostProber: Send + Sync + 'static {
    fn is_reachable(&self, addr: IpAddr, timeout: Duration)
        -> impl Future<Output = bool> + Send;
}

/// Reachability through the system `ping` utility (one ICMP echo).
#[derive(Debug, Clone, Copy, Default)]
pub struct PingProber;

impl HostProber for PingProber {
    fn is_reachable(
        &self,
        addr: IpAddr,
        timeout: Duration,
    ) -> impl Future<Output = bool> + Send {
        ping_host(addr, timeout)
    }
}

async fn ping_host(addr: IpAddr, timeout: Duration) -> bool {
    let mut cmd = Command::new("ping");
    cmd.args(ping_args(addr, timeout))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    match time::timeout(timeout + PING_GRACE, cmd.status()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            debug!(%addr, error = %e, "failed to run ping");
            false
        }
        Err(_) => false,
    }
}

fn ping_args(addr: IpAddr, timeout: Duration) -> Vec<String> {
    if cfg!(windows) {
        // -n count, -w wait in milliseconds
        let ms = timeout.as_millis().max(1);
        vec!["-n".into(), "1".into(), "-w".into(), ms.to_string(), addr.to_string()]
    } else {
        // -c count, -W wait in whole seconds
        let secs = timeout.as_secs_f64().ceil().max(1.0) as u64;
        vec!["-c".into(), "1".into(), "-W".into(), secs.to_string(), addr.to_string()]
    }
}

/// Ping sweep of every usable host in an IPv4 network.
///
/// Same lifecycle as [`crate::scanner::ScanSession`]: `Idle`, then `Running`
/// or `Failed` on `start`, then `Completed` or `Cancelled`.
#[derive(Debug)]
pub struct DiscoverySession<H: HostProber = PingProber> {
    network: String,
    config: DiscoveryConfig,
    prober: Arc<H>,
    state: StateCell,
}

impl DiscoverySession<PingProber> {
    pub fn new(network: impl Into<String>, config: DiscoveryConfig) -> Self {
        Self {
            network: network.into(),
            config,
            prober: Arc::new(PingProber),
            state: StateCell::new(),
        }
    }
}

impl<H: HostProber> DiscoverySession<H> {
    pub fn with_prober<Q: HostProber>(self, prober: Q) -> DiscoverySession<Q> {
        DiscoverySession {
            network: self.network,
            config: self.config,
            prober: Arc::new(prober),
            state: self.state,
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Validate the range and configuration, then launch the sweep.
    pub fn start(&mut self) -> Result<DiscoveryHandle, ScanError> {
        if self.state.get() != SessionState::Idle {
            return Err(ScanError::InvalidConfiguration(
                "session has already been started".into(),
            ));
        }
        let net = match self.config.validate().and_then(|_| parse_network(&self.network)) {
            Ok(net) => net,
            Err(e) => {
                warn!(network = %self.network, error = %e, "discovery rejected");
                self.state.set(SessionState::Failed);
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        self.state.set(SessionState::Running);
        let driver = tokio::spawn(drive_discovery(
            net,
            self.config.clone(),
            self.prober.clone(),
            cancel.clone(),
            tx,
            self.state.clone(),
        ));
        Ok(SessionHandle::new(rx, driver, cancel, self.state.subscribe()))
    }
}

/// Start a ping sweep of `cidr` with the system ping prober.
pub fn start_discovery(cidr: &str, config: DiscoveryConfig) -> Result<DiscoveryHandle, ScanError> {
    DiscoverySession::new(cidr, config).start()
}

async fn drive_discovery<H: HostProber>(
    net: Ipv4Net,
    config: DiscoveryConfig,
    prober: Arc<H>,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<HostProbeResult>,
    state: StateCell,
) -> DiscoverySummary {
    let started_at = now_rfc3339();
    let start = Instant::now();
    let limit = config.effective_concurrency();
    let timeout = config.per_host_timeout;
    info!(network = %net, hosts = usable_host_count(net), concurrency = limit, "discovery started");

    let mut alive: Vec<HostProbeResult> = Vec::new();
    let mut probed = 0usize;
    let report = run_pool(
        host_addresses(net),
        limit,
        &cancel,
        |ip: Ipv4Addr| {
            let prober = prober.clone();
            async move {
                let address = IpAddr::V4(ip);
                let reachable = prober.is_reachable(address, timeout).await;
                HostProbeResult { address, reachable }
            }
        },
        |result: HostProbeResult| {
            probed += 1;
            debug!(address = %result.address, reachable = result.reachable, "host probed");
            if result.reachable {
                alive.push(result);
            }
            let _ = tx.send(result);
        },
    )
    .await;

    alive.sort_by_key(|h| h.address);
    let summary = DiscoverySummary {
        network: net.to_string(),
        probed,
        alive_hosts: alive,
        started_at,
        elapsed_ms: start.elapsed().as_millis() as u64,
        cancelled: report.cancelled,
    };
    state.set(if report.cancelled {
        SessionState::Cancelled
    } else {
        SessionState::Completed
    });
    info!(
        network = %summary.network,
        alive = summary.alive_hosts.len(),
        probed = summary.probed,
        dispatched = report.dispatched,
        elapsed_ms = summary.elapsed_ms,
        "discovery finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_ping_waits_at_least_a_second() {
        if cfg!(windows) {
            return;
        }
        let args = ping_args(IpAddr::from([10, 0, 0, 1]), Duration::from_millis(300));
        assert_eq!(args, vec!["-c", "1", "-W", "1", "10.0.0.1"]);
        let args = ping_args(IpAddr::from([10, 0, 0, 1]), Duration::from_millis(2500));
        assert_eq!(args[3], "3");
    }

    struct EvenHostsAlive;

    impl HostProber for EvenHostsAlive {
        fn is_reachable(
            &self,
            addr: IpAddr,
            _timeout: Duration,
        ) -> impl Future<Output = bool> + Send {
            let alive = match addr {
                IpAddr::V4(v4) => v4.octets()[3] % 2 == 0,
                IpAddr::V6(_) => false,
            };
            async move { alive }
        }
    }

    #[tokio::test]
    async fn sweep_streams_every_host_and_summarizes_alive_ones() {
        let mut session = DiscoverySession::new("10.9.8.0/29", DiscoveryConfig::default())
            .with_prober(EvenHostsAlive);
        let mut handle = session.start().unwrap();
        let mut streamed = Vec::new();
        while let Some(h) = handle.next().await {
            streamed.push(h);
        }
        assert_eq!(streamed.len(), 6);
        let summary = handle.finish().await.unwrap();
        let alive: Vec<IpAddr> = summary.alive_hosts.iter().map(|h| h.address).collect();
        assert_eq!(
            alive,
            vec![
                IpAddr::from([10, 9, 8, 2]),
                IpAddr::from([10, 9, 8, 4]),
                IpAddr::from([10, 9, 8, 6]),
            ]
        );
        assert_eq!(summary.probed, 6);
        assert_eq!(summary.network, "10.9.8.0/29");
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn single_host_network_completes_empty() {
        let mut session = DiscoverySession::new("10.0.0.5/32", DiscoveryConfig::default())
            .with_prober(EvenHostsAlive);
        let summary = session.start().unwrap().finish().await.unwrap();
        assert_eq!(summary.probed, 0);
        assert!(summary.alive_hosts.is_empty());
        assert!(!summary.cancelled);
    }

    #[tokio::test]
    async fn bad_cidr_fails_immediately() {
        let mut session = DiscoverySession::new("10.0.0.0/40", DiscoveryConfig::default());
        assert!(matches!(
            session.start(),
            Err(ScanError::InvalidNetworkSpec(_))
        ));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn zero_concurrency_rejected() {
        let cfg = DiscoveryConfig { concurrency: 0, ..DiscoveryConfig::default() };
        assert!(matches!(
            start_discovery("10.0.0.0/30", cfg),
            Err(ScanError::InvalidConfiguration(_))
        ));
    }
}

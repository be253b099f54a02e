use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};
use tokio::time::{self, Instant};
use tracing::trace;

use crate::banner;
use crate::config::BannerConfig;
use crate::error::ProbeFailure;
use crate::types::BannerOutcome;

/// Upper bound on resolving a target hostname.
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a single connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub open: bool,
    pub error: Option<ProbeFailure>,
    pub latency: Option<Duration>,
}

impl ProbeOutcome {
    pub fn open(latency: Duration) -> Self {
        Self {
            open: true,
            error: None,
            latency: Some(latency),
        }
    }

    pub fn failed(error: ProbeFailure) -> Self {
        Self {
            open: false,
            error: Some(error),
            latency: None,
        }
    }
}

/// What the scan workers call for each port.
///
/// [`TcpProber`] is the real implementation; tests substitute their own.
pub trait PortProber: Send + Sync + 'static {
    fn connect(
        &self,
        addr: SocketAddr,
        timeout: Duration,
    ) -> impl Future<Output = ProbeOutcome> + Send;

    fn banner(
        &self,
        addr: SocketAddr,
        cfg: &BannerConfig,
    ) -> impl Future<Output = BannerOutcome> + Send;
}

/// Full TCP handshake probes over the OS socket API.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

impl PortProber for TcpProber {
    fn connect(
        &self,
        addr: SocketAddr,
        timeout: Duration,
    ) -> impl Future<Output = ProbeOutcome> + Send {
        probe(addr, timeout)
    }

    fn banner(
        &self,
        addr: SocketAddr,
        cfg: &BannerConfig,
    ) -> impl Future<Output = BannerOutcome> + Send {
        let cfg = cfg.clone();
        async move { banner::grab_banner(addr, &cfg).await }
    }
}

/// Attempt a TCP connection to `addr`, giving up after `timeout`.
///
/// The socket is closed as soon as the handshake completes; no data is exchanged.
pub async fn probe(addr: SocketAddr, timeout: Duration) -> ProbeOutcome {
    let start = Instant::now();
    match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            let latency = start.elapsed();
            drop(stream);
            trace!(%addr, ?latency, "port open");
            ProbeOutcome::open(latency)
        }
        Ok(Err(e)) => {
            trace!(%addr, error = %e, "connect failed");
            ProbeOutcome::failed(ProbeFailure::from_io(&e))
        }
        Err(_) => ProbeOutcome::failed(ProbeFailure::TimedOut),
    }
}

/// Resolve a scan target to a single address, preferring IPv4.
pub async fn resolve_target(host: &str) -> Result<IpAddr, ProbeFailure> {
    let host = host.trim();
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let addrs: Vec<SocketAddr> = match time::timeout(RESOLVE_TIMEOUT, lookup_host((host, 0))).await {
        Ok(Ok(it)) => it.collect(),
        Ok(Err(_)) | Err(_) => return Err(ProbeFailure::Resolve),
    };
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .map(|a| a.ip())
        .ok_or(ProbeFailure::Resolve)
}

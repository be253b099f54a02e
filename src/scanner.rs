use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::error::{ProbeFailure, ScanError};
use crate::ports::{parse_ports, PortSpec};
use crate::probe::{resolve_target, PortProber, TcpProber};
use crate::services::lookup_service;
use crate::session::{now_rfc3339, run_pool, SessionHandle, StateCell};
use crate::types::{ProbeResult, ScanSummary, SessionState};

pub type ScanHandle = SessionHandle<ProbeResult, ScanSummary>;

#[derive(Debug, Clone)]
enum PortSource {
    Parsed(PortSpec),
    Text(String),
}

/// One port scan against one target.
///
/// Created `Idle`; [`ScanSession::start`] validates the request and either
/// moves to `Running` (handing back a [`ScanHandle`]) or to `Failed`.
/// The handle's state then ends in `Completed` or `Cancelled`.
#[derive(Debug)]
pub struct ScanSession<P: PortProber = TcpProber> {
    target: String,
    ports: PortSource,
    config: ScanConfig,
    prober: Arc<P>,
    state: StateCell,
    port_count: Option<usize>,
}

impl ScanSession<TcpProber> {
    /// Session over a textual port specification, parsed on `start`.
    pub fn new(target: impl Into<String>, ports: impl Into<String>, config: ScanConfig) -> Self {
        Self::from_source(target.into(), PortSource::Text(ports.into()), config)
    }

    /// Session over an already parsed port set.
    pub fn with_ports(target: impl Into<String>, ports: PortSpec, config: ScanConfig) -> Self {
        Self::from_source(target.into(), PortSource::Parsed(ports), config)
    }

    fn from_source(target: String, ports: PortSource, config: ScanConfig) -> Self {
        Self {
            target,
            ports,
            config,
            prober: Arc::new(TcpProber),
            state: StateCell::new(),
            port_count: None,
        }
    }
}

impl<P: PortProber> ScanSession<P> {
    /// Swap the probing backend.
    pub fn with_prober<Q: PortProber>(self, prober: Q) -> ScanSession<Q> {
        ScanSession {
            target: self.target,
            ports: self.ports,
            config: self.config,
            prober: Arc::new(prober),
            state: self.state,
            port_count: self.port_count,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Number of ports to probe; known once `start` has validated the request.
    pub fn port_count(&self) -> Option<usize> {
        match &self.ports {
            PortSource::Parsed(p) => Some(p.len()),
            PortSource::Text(_) => self.port_count,
        }
    }

    /// Validate and launch the scan.
    ///
    /// Validation errors are returned here, before any socket is opened, and
    /// leave the session `Failed`. Must be called inside a tokio runtime.
    pub fn start(&mut self) -> Result<ScanHandle, ScanError> {
        if self.state.get() != SessionState::Idle {
            return Err(ScanError::InvalidConfiguration(
                "session has already been started".into(),
            ));
        }
        let (ports, ports_text) = match self.validate() {
            Ok(v) => v,
            Err(e) => {
                warn!(host = %self.target, error = %e, "scan rejected");
                self.state.set(SessionState::Failed);
                return Err(e);
            }
        };

        self.port_count = Some(ports.len());

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        self.state.set(SessionState::Running);

        let driver = tokio::spawn(drive_scan(
            ScanJob {
                target: self.target.trim().to_string(),
                ports,
                ports_text,
                config: Arc::new(self.config.clone()),
            },
            self.prober.clone(),
            cancel.clone(),
            tx,
            self.state.clone(),
        ));

        Ok(SessionHandle::new(rx, driver, cancel, self.state.subscribe()))
    }

    fn validate(&self) -> Result<(PortSpec, Option<String>), ScanError> {
        if self.target.trim().is_empty() {
            return Err(ScanError::InvalidTarget("target must not be empty".into()));
        }
        self.config.validate()?;
        match &self.ports {
            PortSource::Parsed(p) => Ok((p.clone(), None)),
            PortSource::Text(s) => Ok((parse_ports(s)?, Some(s.trim().to_string()))),
        }
    }
}

/// Start scanning `target` on `ports` with the TCP connect prober.
pub fn start_scan(
    target: &str,
    ports: PortSpec,
    config: ScanConfig,
) -> Result<ScanHandle, ScanError> {
    ScanSession::with_ports(target, ports, config).start()
}

struct ScanJob {
    target: String,
    ports: PortSpec,
    ports_text: Option<String>,
    config: Arc<ScanConfig>,
}

async fn drive_scan<P: PortProber>(
    job: ScanJob,
    prober: Arc<P>,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<ProbeResult>,
    state: StateCell,
) -> ScanSummary {
    let started_at = now_rfc3339();
    let start = Instant::now();
    let limit = job.config.effective_concurrency();
    info!(
        host = %job.target,
        ports = job.ports.len(),
        concurrency = limit,
        timeout_ms = job.config.timeout.as_millis() as u64,
        "scan started"
    );

    // Resolve once; a failure is reported per port rather than failing the session.
    let resolved = resolve_target(&job.target).await;
    if resolved.is_err() {
        warn!(host = %job.target, "target did not resolve; every port will report a resolve failure");
    }

    let mut open_ports = Vec::new();
    let mut completed = 0usize;
    let report = run_pool(
        job.ports.iter(),
        limit,
        &cancel,
        |port| {
            let prober = prober.clone();
            let config = job.config.clone();
            let target = resolved;
            async move { probe_port(&*prober, target, port, &config).await }
        },
        |result: ProbeResult| {
            completed += 1;
            debug!(port = result.port, open = result.open, error = ?result.error, "port probed");
            if result.open {
                open_ports.push(result.clone());
            }
            // The caller may have stopped listening; the summary still counts it.
            let _ = tx.send(result);
        },
    )
    .await;

    open_ports.sort_by_key(|r| r.port);
    let summary = ScanSummary {
        target: job.target,
        ports: job.ports_text,
        requested_port_count: job.ports.len(),
        completed,
        open_ports,
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
        host = %summary.target,
        open = summary.open_count(),
        completed = summary.completed,
        dispatched = report.dispatched,
        elapsed_ms = summary.elapsed_ms,
        cancelled = summary.cancelled,
        "scan finished"
    );
    summary
}

/// Probe a single port; on success grab a banner and attach the service label.
async fn probe_port<P: PortProber>(
    prober: &P,
    target: Result<IpAddr, ProbeFailure>,
    port: u16,
    config: &ScanConfig,
) -> ProbeResult {
    let ip = match target {
        Ok(ip) => ip,
        Err(e) => return ProbeResult::closed(port, e),
    };
    let addr = SocketAddr::new(ip, port);
    let outcome = prober.connect(addr, config.timeout).await;
    if !outcome.open {
        return ProbeResult::closed(port, outcome.error.unwrap_or(ProbeFailure::Unreachable));
    }
    let banner = if config.banner.enabled {
        Some(prober.banner(addr, &config.banner).await)
    } else {
        None
    };
    ProbeResult {
        port,
        open: true,
        service: Some(lookup_service(port).to_string()),
        banner,
        error: None,
        latency_ms: outcome.latency.map(|d| d.as_millis() as u64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BannerConfig;
    use crate::probe::ProbeOutcome;
    use crate::types::BannerOutcome;
    use std::collections::HashSet;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Ports in `open` accept, everything else is refused.
    struct FakeProber {
        open: HashSet<u16>,
        delay: Duration,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl FakeProber {
        fn new(open: &[u16], delay_ms: u64) -> Self {
            Self {
                open: open.iter().copied().collect(),
                delay: Duration::from_millis(delay_ms),
                in_flight: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl PortProber for FakeProber {
        fn connect(
            &self,
            addr: SocketAddr,
            _timeout: Duration,
        ) -> impl Future<Output = ProbeOutcome> + Send {
            let open = self.open.contains(&addr.port());
            let delay = self.delay;
            let in_flight = self.in_flight.clone();
            let peak = self.peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                if open {
                    ProbeOutcome::open(delay)
                } else {
                    ProbeOutcome::failed(ProbeFailure::Refused)
                }
            }
        }

        fn banner(
            &self,
            addr: SocketAddr,
            _cfg: &BannerConfig,
        ) -> impl Future<Output = BannerOutcome> + Send {
            let port = addr.port();
            async move { BannerOutcome::Captured(format!("hello from {port}")) }
        }
    }

    #[tokio::test]
    async fn every_port_reports_once_and_summary_is_sorted() {
        let ports: PortSpec = (1..=60).rev().collect();
        let mut session = ScanSession::with_ports("127.0.0.1", ports, ScanConfig::default())
            .with_prober(FakeProber::new(&[53, 7, 22], 1));
        let mut handle = session.start().unwrap();

        let mut seen = Vec::new();
        while let Some(r) = handle.next().await {
            seen.push(r);
        }
        assert_eq!(seen.len(), 60);
        let distinct: HashSet<u16> = seen.iter().map(|r| r.port).collect();
        assert_eq!(distinct.len(), 60);

        let summary = handle.finish().await.unwrap();
        assert_eq!(summary.completed, 60);
        assert_eq!(summary.requested_port_count, 60);
        assert!(!summary.cancelled);
        let open: Vec<u16> = summary.open_ports.iter().map(|r| r.port).collect();
        assert_eq!(open, vec![7, 22, 53]);
        assert_eq!(summary.open_count(), seen.iter().filter(|r| r.open).count());
        assert_eq!(summary.open_ports[1].service.as_deref(), Some("SSH"));
        assert_eq!(summary.open_ports[1].banner_display(), "hello from 22");
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn in_flight_probes_respect_concurrency() {
        let prober = FakeProber::new(&[], 5);
        let peak = prober.peak.clone();
        let cfg = ScanConfig::default().with_concurrency(3);
        let mut session = ScanSession::new("127.0.0.1", "1-50", cfg).with_prober(prober);
        assert_eq!(session.port_count(), None);
        let handle = session.start().unwrap();
        assert_eq!(session.port_count(), Some(50));
        let summary = handle.finish().await.unwrap();
        assert_eq!(summary.completed, 50);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(summary.ports.as_deref(), Some("1-50"));
    }

    #[tokio::test]
    async fn cancel_stops_new_dispatch() {
        let cfg = ScanConfig::default().with_concurrency(2);
        let mut session =
            ScanSession::new("127.0.0.1", "1-1000", cfg).with_prober(FakeProber::new(&[], 20));
        let mut handle = session.start().unwrap();
        let mut observed = 0;
        while let Some(_r) = handle.next().await {
            observed += 1;
            if observed == 4 {
                handle.cancel();
            }
        }
        assert!(observed < 1000);
        assert_eq!(handle.state(), SessionState::Cancelled);
        let summary = handle.finish().await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.completed, observed);
        assert!(summary.completed < 100);
    }

    #[tokio::test]
    async fn invalid_requests_fail_before_running() {
        let mut empty_target = ScanSession::new("  ", "80", ScanConfig::default());
        assert!(matches!(empty_target.start(), Err(ScanError::InvalidTarget(_))));
        assert_eq!(empty_target.state(), SessionState::Failed);

        let mut bad_ports = ScanSession::new("127.0.0.1", "80,,443", ScanConfig::default());
        assert!(matches!(bad_ports.start(), Err(ScanError::InvalidPortSpec(_))));
        assert_eq!(bad_ports.state(), SessionState::Failed);

        let cfg = ScanConfig::default().with_concurrency(0);
        let mut bad_cfg = ScanSession::new("127.0.0.1", "80", cfg);
        assert!(matches!(
            bad_cfg.start(),
            Err(ScanError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn session_cannot_be_restarted() {
        let mut session = ScanSession::new("127.0.0.1", "1", ScanConfig::default())
            .with_prober(FakeProber::new(&[], 0));
        let handle = session.start().unwrap();
        assert!(session.start().is_err());
        handle.finish().await.unwrap();
    }

    #[tokio::test]
    async fn unresolvable_target_reports_every_port_closed() {
        let mut session =
            ScanSession::new("no-such-host.invalid", "80,443", ScanConfig::default());
        let summary = session.start().unwrap().finish().await.unwrap();
        assert_eq!(summary.completed, 2);
        assert!(summary.open_ports.is_empty());
        assert!(!summary.cancelled);
    }
}

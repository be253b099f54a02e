use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use duckscan_rs::discovery::HostProber;
use duckscan_rs::{DiscoveryConfig, DiscoverySession, SessionState};

struct AllAlive {
    delay: Duration,
}

impl HostProber for AllAlive {
    fn is_reachable(&self, _addr: IpAddr, _timeout: Duration) -> impl Future<Output = bool> + Send {
        let delay = self.delay;
        async move {
            tokio::time::sleep(delay).await;
            true
        }
    }
}

#[tokio::test]
async fn slash_30_probes_exactly_two_hosts() {
    let mut session = DiscoverySession::new("10.0.0.0/30", DiscoveryConfig::default())
        .with_prober(AllAlive { delay: Duration::ZERO });
    let mut handle = session.start().unwrap();
    let mut seen = Vec::new();
    while let Some(h) = handle.next().await {
        seen.push(h.address);
    }
    seen.sort();
    assert_eq!(
        seen,
        vec![IpAddr::from([10, 0, 0, 1]), IpAddr::from([10, 0, 0, 2])]
    );
    let summary = handle.finish().await.unwrap();
    assert_eq!(summary.alive_hosts.len(), 2);
}

#[tokio::test]
async fn cancelled_sweep_stops_early() {
    let cfg = DiscoveryConfig {
        concurrency: 4,
        ..DiscoveryConfig::default()
    };
    let mut session = DiscoverySession::new("10.1.0.0/16", cfg)
        .with_prober(AllAlive { delay: Duration::from_millis(10) });
    let mut handle = session.start().unwrap();
    let mut observed = 0usize;
    while let Some(_h) = handle.next().await {
        observed += 1;
        if observed == 10 {
            handle.cancel();
        }
    }
    assert_eq!(handle.state(), SessionState::Cancelled);
    let summary = handle.finish().await.unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.probed, observed);
    assert!(observed < 65_534);
}

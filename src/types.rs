use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::error::{BannerUnavailable, ProbeFailure};

/// Text shown wherever a banner could not be captured.
pub const NO_BANNER: &str = "No banner";

/// Lifecycle of a scan or discovery session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed
        )
    }
}

/// Outcome of a best-effort banner grab.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum BannerOutcome {
    Captured(String),
    Unavailable(BannerUnavailable),
}

impl BannerOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            BannerOutcome::Captured(s) => Some(s),
            BannerOutcome::Unavailable(_) => None,
        }
    }
}

/// One probed port. Produced exactly once per requested port.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub port: u16,
    pub open: bool,
    pub service: Option<String>,
    pub banner: Option<BannerOutcome>,
    pub error: Option<ProbeFailure>,
    pub latency_ms: Option<u64>,
}

impl ProbeResult {
    pub fn closed(port: u16, error: ProbeFailure) -> Self {
        Self {
            port,
            open: false,
            service: None,
            banner: None,
            error: Some(error),
            latency_ms: None,
        }
    }

    pub fn state_label(&self) -> &'static str {
        if self.open {
            "open"
        } else {
            "closed"
        }
    }

    /// Captured banner text, or [`NO_BANNER`].
    pub fn banner_display(&self) -> &str {
        self.banner
            .as_ref()
            .and_then(BannerOutcome::text)
            .unwrap_or(NO_BANNER)
    }
}

/// Final view of a finished scan session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub target: String,
    /// Textual port specification, when the session was started from one.
    pub ports: Option<String>,
    pub requested_port_count: usize,
    /// Number of results produced; equals the request unless cancelled.
    pub completed: usize,
    /// Open ports sorted by port number.
    pub open_ports: Vec<ProbeResult>,
    pub started_at: String,
    pub elapsed_ms: u64,
    pub cancelled: bool,
}

impl ScanSummary {
    pub fn open_count(&self) -> usize {
        self.open_ports.len()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostProbeResult {
    pub address: IpAddr,
    pub reachable: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DiscoverySummary {
    pub network: String,
    pub probed: usize,
    /// Reachable hosts sorted by address.
    pub alive_hosts: Vec<HostProbeResult>,
    pub started_at: String,
    pub elapsed_ms: u64,
    pub cancelled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_display_falls_back_to_sentinel() {
        let mut r = ProbeResult::closed(22, ProbeFailure::Refused);
        assert_eq!(r.banner_display(), NO_BANNER);
        r.banner = Some(BannerOutcome::Unavailable(BannerUnavailable::NoData));
        assert_eq!(r.banner_display(), NO_BANNER);
        r.banner = Some(BannerOutcome::Captured("SSH-2.0-OpenSSH_9.6".into()));
        assert_eq!(r.banner_display(), "SSH-2.0-OpenSSH_9.6");
    }

    #[test]
    fn session_state_serializes_snake_case() {
        let s = serde_json::to_string(&SessionState::Cancelled).unwrap();
        assert_eq!(s, "\"cancelled\"");
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Running.is_terminal());
    }
}

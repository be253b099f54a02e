use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that stop a session before (or instead of) it running.
///
/// Per-port problems never show up here; they are folded into the
/// individual [`crate::types::ProbeResult`] as a [`ProbeFailure`] or
/// [`BannerUnavailable`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("invalid port specification: {0}")]
    InvalidPortSpec(String),
    #[error("invalid network specification: {0}")]
    InvalidNetworkSpec(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("session task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for ScanError {
    fn from(e: tokio::task::JoinError) -> Self {
        ScanError::Task(e.to_string())
    }
}

/// Why a connect probe did not report an open port. Informational only.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailure {
    Refused,
    TimedOut,
    Unreachable,
    Resolve,
}

impl ProbeFailure {
    pub fn from_io(e: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::ConnectionRefused => ProbeFailure::Refused,
            ErrorKind::TimedOut => ProbeFailure::TimedOut,
            _ => ProbeFailure::Unreachable,
        }
    }
}

impl std::fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProbeFailure::Refused => "connection refused",
            ProbeFailure::TimedOut => "timed out",
            ProbeFailure::Unreachable => "unreachable",
            ProbeFailure::Resolve => "name resolution failed",
        };
        f.write_str(s)
    }
}

/// Why no banner could be captured from an open port.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BannerUnavailable {
    ConnectFailed,
    TimedOut,
    NoData,
    Io,
}

impl std::fmt::Display for BannerUnavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BannerUnavailable::ConnectFailed => "banner connection failed",
            BannerUnavailable::TimedOut => "banner read timed out",
            BannerUnavailable::NoData => "no banner data",
            BannerUnavailable::Io => "banner read error",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kinds_map_to_probe_failures() {
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert_eq!(ProbeFailure::from_io(&refused), ProbeFailure::Refused);
        let timed = std::io::Error::from(std::io::ErrorKind::TimedOut);
        assert_eq!(ProbeFailure::from_io(&timed), ProbeFailure::TimedOut);
        let other = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(ProbeFailure::from_io(&other), ProbeFailure::Unreachable);
    }

    #[test]
    fn errors_render_their_category() {
        let e = ScanError::InvalidPortSpec("token \"\" is not a port".into());
        assert!(e.to_string().starts_with("invalid port specification"));
    }
}

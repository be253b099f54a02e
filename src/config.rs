use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// Upper bound on in-flight probes regardless of what the caller asks for.
pub const MAX_CONCURRENCY: usize = 5_000;

/// Scan technique label. Only `Connect` is implemented; the others exist so
/// callers that offer them get a clear rejection instead of a silent fallback.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    #[default]
    Connect,
    Syn,
    Udp,
    Stealth,
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanMode::Connect => "TCP Connect",
            ScanMode::Syn => "TCP SYN",
            ScanMode::Udp => "UDP",
            ScanMode::Stealth => "Stealth",
        };
        f.write_str(s)
    }
}

/// Banner grabbing knobs. The timeout is independent of the connect timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BannerConfig {
    pub enabled: bool,
    pub timeout: Duration,
    /// Send a bare line terminator to wake up protocols that wait for the client.
    pub nudge: bool,
    pub max_bytes: usize,
    pub max_chars: usize,
}

impl Default for BannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_secs(2),
            nudge: true,
            max_bytes: 1024,
            max_chars: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    pub concurrency: usize,
    pub timeout: Duration,
    pub mode: ScanMode,
    pub banner: BannerConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: 100,
            timeout: Duration::from_secs(1),
            mode: ScanMode::Connect,
            banner: BannerConfig::default(),
        }
    }
}

impl ScanConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn without_banner(mut self) -> Self {
        self.banner.enabled = false;
        self
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        validate_pool(self.concurrency, self.timeout)?;
        if self.banner.enabled && self.banner.timeout.is_zero() {
            return Err(ScanError::InvalidConfiguration(
                "banner timeout must be positive".into(),
            ));
        }
        if self.mode != ScanMode::Connect {
            return Err(ScanError::InvalidConfiguration(format!(
                "scan mode {} is not implemented; only TCP connect probes are supported",
                self.mode
            )));
        }
        Ok(())
    }

    /// Concurrency actually used by the worker pool.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.min(MAX_CONCURRENCY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    pub concurrency: usize,
    pub per_host_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            concurrency: 50,
            per_host_timeout: Duration::from_secs(1),
        }
    }
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Result<(), ScanError> {
        validate_pool(self.concurrency, self.per_host_timeout)
    }

    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.min(MAX_CONCURRENCY)
    }
}

fn validate_pool(concurrency: usize, timeout: Duration) -> Result<(), ScanError> {
    if concurrency == 0 {
        return Err(ScanError::InvalidConfiguration(
            "concurrency must be at least 1".into(),
        ));
    }
    if timeout.is_zero() {
        return Err(ScanError::InvalidConfiguration(
            "timeout must be positive".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ScanConfig::default().validate().is_ok());
        assert!(DiscoveryConfig::default().validate().is_ok());
        assert_eq!(DiscoveryConfig::default().concurrency, 50);
    }

    #[test]
    fn zero_concurrency_rejected() {
        let cfg = ScanConfig::default().with_concurrency(0);
        assert!(matches!(
            cfg.validate(),
            Err(ScanError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn zero_timeout_rejected() {
        let cfg = DiscoveryConfig {
            per_host_timeout: Duration::ZERO,
            ..DiscoveryConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unimplemented_modes_rejected() {
        for mode in [ScanMode::Syn, ScanMode::Udp, ScanMode::Stealth] {
            let cfg = ScanConfig { mode, ..ScanConfig::default() };
            let err = cfg.validate().unwrap_err();
            assert!(err.to_string().contains("not implemented"));
        }
    }

    #[test]
    fn concurrency_is_capped() {
        let cfg = ScanConfig::default().with_concurrency(1_000_000);
        assert_eq!(cfg.effective_concurrency(), MAX_CONCURRENCY);
    }
}

//! Library crate for duckscan-rs: bounded-concurrency TCP connect scanning,
//! banner grabbing and ping sweeps behind cancellable sessions.
pub mod banner;
pub mod config;
pub mod discovery;
pub mod error;
pub mod export;
pub mod history;
pub mod netdetect;
pub mod ports;
pub mod probe;
pub mod scanner;
pub mod server;
pub mod services;
pub mod session;
pub mod types;

pub use config::{BannerConfig, DiscoveryConfig, ScanConfig, ScanMode};
pub use discovery::{start_discovery, DiscoveryHandle, DiscoverySession};
pub use error::{BannerUnavailable, ProbeFailure, ScanError};
pub use ports::{parse_ports, PortSpec};
pub use scanner::{start_scan, ScanHandle, ScanSession};
pub use services::lookup_service;
pub use session::SessionHandle;
pub use types::{
    BannerOutcome, DiscoverySummary, HostProbeResult, ProbeResult, ScanSummary, SessionState,
};

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;
use tracing::trace;

use crate::config::BannerConfig;
use crate::error::BannerUnavailable;
use crate::types::BannerOutcome;

const NUDGE: &[u8] = b"\r\n";

/// Open a fresh connection to `addr` and try to read what the service says first.
///
/// The whole exchange (connect, optional nudge, single read) is bounded by
/// `cfg.timeout`. Never fails: every problem maps to
/// [`BannerOutcome::Unavailable`].
pub async fn grab_banner(addr: SocketAddr, cfg: &BannerConfig) -> BannerOutcome {
    let outcome = match time::timeout(cfg.timeout, read_banner(addr, cfg)).await {
        Ok(outcome) => outcome,
        Err(_) => BannerOutcome::Unavailable(BannerUnavailable::TimedOut),
    };
    trace!(%addr, ?outcome, "banner grab finished");
    outcome
}

async fn read_banner(addr: SocketAddr, cfg: &BannerConfig) -> BannerOutcome {
    let mut stream = match TcpStream::connect(addr).await {
        Ok(s) => s,
        Err(_) => return BannerOutcome::Unavailable(BannerUnavailable::ConnectFailed),
    };
    if cfg.nudge && stream.write_all(NUDGE).await.is_err() {
        return BannerOutcome::Unavailable(BannerUnavailable::Io);
    }
    read_reply(&mut stream, cfg).await
}

/// Single read of at most `cfg.max_bytes`, cleaned up into a banner.
async fn read_reply<R: AsyncRead + Unpin>(reader: &mut R, cfg: &BannerConfig) -> BannerOutcome {
    let mut buf = vec![0u8; cfg.max_bytes.max(1)];
    match reader.read(&mut buf).await {
        Ok(0) => BannerOutcome::Unavailable(BannerUnavailable::NoData),
        Ok(n) => match clean_banner(&buf[..n], cfg.max_chars) {
            Some(text) => BannerOutcome::Captured(text),
            None => BannerOutcome::Unavailable(BannerUnavailable::NoData),
        },
        Err(_) => BannerOutcome::Unavailable(BannerUnavailable::Io),
    }
}

/// Decode permissively, trim, and cap to `max_chars` characters.
/// Returns `None` when nothing printable is left.
pub fn clean_banner(bytes: &[u8], max_chars: usize) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(max_chars).collect())
}

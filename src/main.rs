use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use duckscan_rs::config::{DiscoveryConfig, ScanConfig, ScanMode};
use duckscan_rs::discovery::DiscoverySession;
use duckscan_rs::history::{ScanHistory, DEFAULT_HISTORY_FILE};
use duckscan_rs::scanner::ScanSession;
use duckscan_rs::types::{DiscoverySummary, ScanSummary};
use duckscan_rs::{export, netdetect, ports, server};

/// duckscan-rs — async TCP connect port scanner and ping sweeper.
#[derive(Debug, Parser)]
#[command(
    name = "duckscan-rs",
    version,
    about = "Async TCP connect port scanner with banner grabbing and ping sweeps.",
    long_about = None
)]
struct Cli {
    /// Log filter (e.g. `info`, `duckscan_rs=debug`). Falls back to RUST_LOG, then `warn`.
    #[arg(long = "log-level", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan ports on a single target.
    Scan(ScanArgs),
    /// Probe the common service ports of a target and grab banners.
    Detect {
        /// Target IP address or hostname.
        target: String,
        /// Socket connect timeout in milliseconds.
        #[arg(long = "timeout-ms", default_value_t = 1000)]
        timeout_ms: u64,
    },
    /// Ping sweep a network range.
    Discover {
        /// CIDR (e.g. 192.168.1.0/24). If omitted, auto-detect local /24 networks.
        cidr: Option<String>,
        /// Max concurrent pings.
        #[arg(short = 't', long, default_value_t = 50)]
        concurrency: usize,
        /// Per-host wait in milliseconds.
        #[arg(long = "timeout-ms", default_value_t = 1000)]
        timeout_ms: u64,
        /// Write the discovery summaries as pretty JSON to this path.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Start the embedded HTTP UI server.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
        /// Record finished scans in this history file.
        #[arg(long)]
        history: Option<PathBuf>,
    },
    /// Inspect or manage the scan history file.
    History {
        #[arg(long, default_value = DEFAULT_HISTORY_FILE)]
        history: PathBuf,
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// List the built-in port presets.
    Presets,
}

#[derive(Debug, Clone, clap::Args)]
struct ScanArgs {
    /// Target IP address or hostname.
    target: String,

    /// Ports: `80,443,1000-2000`, a preset name, or `@path` to a ports file.
    #[arg(short, long, default_value = "1-1000")]
    ports: String,

    /// Max concurrent TCP connect attempts.
    #[arg(short = 't', long, default_value_t = 100)]
    concurrency: usize,

    /// Socket connect timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 1000)]
    timeout_ms: u64,

    /// Banner read timeout in milliseconds.
    #[arg(long = "banner-timeout-ms", default_value_t = 2000)]
    banner_timeout_ms: u64,

    /// Skip banner grabbing on open ports.
    #[arg(long = "no-banner", default_value_t = false)]
    no_banner: bool,

    /// Do not send a line terminator before reading banners.
    #[arg(long = "no-nudge", default_value_t = false)]
    no_nudge: bool,

    /// Scan technique. Only `connect` is implemented.
    #[arg(long = "scan-type", value_enum, default_value_t = ScanTypeArg::Connect)]
    scan_type: ScanTypeArg,

    /// Export open ports to this path (.json, .csv, anything else is text).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Append the finished scan to this history file.
    #[arg(long)]
    history: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScanTypeArg {
    Connect,
    Syn,
    Udp,
    Stealth,
}

impl From<ScanTypeArg> for ScanMode {
    fn from(v: ScanTypeArg) -> Self {
        match v {
            ScanTypeArg::Connect => ScanMode::Connect,
            ScanTypeArg::Syn => ScanMode::Syn,
            ScanTypeArg::Udp => ScanMode::Udp,
            ScanTypeArg::Stealth => ScanMode::Stealth,
        }
    }
}

#[derive(Debug, Subcommand)]
enum HistoryAction {
    /// Print recorded scans.
    List,
    /// Remove every recorded scan.
    Clear,
    /// Export the history (.json for full entries, CSV overview otherwise).
    Export { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match cli.command {
        Command::Scan(args) => run_scan(args).await,
        Command::Detect { target, timeout_ms } => run_detect(target, timeout_ms).await,
        Command::Discover {
            cidr,
            concurrency,
            timeout_ms,
            output,
        } => run_discover(cidr, concurrency, timeout_ms, output).await,
        Command::Serve { bind, history } => {
            println!("UI server starting at http://{} (Ctrl+C to stop)", bind);
            tokio::select! {
                res = server::spawn_server(&bind, history) => res,
                _ = tokio::signal::ctrl_c() => Ok(()),
            }
        }
        Command::History { history, action } => run_history(&history, action),
        Command::Presets => {
            for (name, spec) in ports::PRESETS {
                println!("  {:<10} {}", name, spec);
            }
            Ok(())
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(l) => EnvFilter::new(l),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Resolve the `--ports` argument: `@file`, preset name, or literal spec.
fn resolve_ports_arg(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if let Some(path) = raw.strip_prefix('@') {
        let spec = ports::load_ports_from_path(path)?;
        // Hand the session a canonical comma list so it validates like any other spec.
        return Ok(spec
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(","));
    }
    Ok(ports::preset(raw).unwrap_or(raw).to_string())
}

async fn run_scan(args: ScanArgs) -> Result<()> {
    let spec = resolve_ports_arg(&args.ports)?;
    let mut cfg = ScanConfig {
        concurrency: args.concurrency,
        timeout: Duration::from_millis(args.timeout_ms),
        mode: args.scan_type.into(),
        ..ScanConfig::default()
    };
    cfg.banner.enabled = !args.no_banner;
    cfg.banner.nudge = !args.no_nudge;
    cfg.banner.timeout = Duration::from_millis(args.banner_timeout_ms);

    println!("duckscan-rs scan:");
    println!("  target       : {}", args.target);
    println!("  ports        : {}", abbreviate(&args.ports, 60));
    println!("  concurrency  : {}", cfg.concurrency);
    println!("  timeout_ms   : {}", args.timeout_ms);
    println!("  scan type    : {}", cfg.mode);
    println!("{}", "-".repeat(50));

    let mut session = ScanSession::new(args.target.clone(), spec, cfg);
    let summary = stream_scan(&mut session).await?;
    print_scan_summary(&summary);

    if let Some(path) = args.output.as_deref() {
        match export::write_summary(path, &summary) {
            Ok(fmt) => println!("Wrote {:?} results to {}", fmt, path.display()),
            Err(e) => eprintln!("Failed to export to {}: {e:#}", path.display()),
        }
    }
    if let Some(path) = args.history {
        let mut history = ScanHistory::load(path);
        if let Err(e) = history.record(&summary) {
            warn!(error = %e, "failed to record scan history");
        }
    }
    Ok(())
}

async fn run_detect(target: String, timeout_ms: u64) -> Result<()> {
    let cfg = ScanConfig {
        concurrency: 20,
        timeout: Duration::from_millis(timeout_ms),
        ..ScanConfig::default()
    };
    println!("Detecting services on {target}...");
    let mut session = ScanSession::with_ports(target, ports::service_detection_ports(), cfg);
    let summary = stream_scan(&mut session).await?;
    print_scan_summary(&summary);
    Ok(())
}

/// Background task aborted when the guard goes out of scope.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Cancel `token` on Ctrl-C for as long as the returned guard lives.
fn cancel_on_ctrl_c(token: CancellationToken, notice: Option<&'static str>) -> AbortOnDrop {
    AbortOnDrop(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if let Some(msg) = notice {
                eprintln!("{msg}");
            }
            token.cancel();
        }
    }))
}

/// Start the session, print open ports as they arrive, and cancel on Ctrl-C.
async fn stream_scan(session: &mut ScanSession) -> Result<ScanSummary> {
    let mut handle = session.start().context("scan could not start")?;
    let _ctrlc = cancel_on_ctrl_c(
        handle.cancel_token(),
        Some("\nStopping scan: waiting for in-flight probes..."),
    );

    while let Some(r) = handle.next().await {
        if r.open {
            println!(
                "Port {}/tcp open - {}",
                r.port,
                r.service.as_deref().unwrap_or("Unknown")
            );
            if let Some(text) = r.banner.as_ref().and_then(|b| b.text()) {
                println!("   Banner: {}", text);
            }
        }
    }
    Ok(handle.finish().await?)
}

async fn run_discover(
    cidr: Option<String>,
    concurrency: usize,
    timeout_ms: u64,
    output: Option<PathBuf>,
) -> Result<()> {
    let networks = match cidr {
        Some(c) => vec![c],
        None => {
            let detected = netdetect::detect_local_cidrs()
                .context("failed to detect local networks")?;
            if detected.is_empty() {
                bail!("no local IPv4 networks detected; pass a CIDR explicitly");
            }
            println!("Detected local IPv4 CIDRs:");
            for n in &detected {
                println!("  - {} ({} hosts)", n, netdetect::usable_host_count(*n));
            }
            detected.iter().map(|n| n.to_string()).collect()
        }
    };

    let cfg = DiscoveryConfig {
        concurrency,
        per_host_timeout: Duration::from_millis(timeout_ms),
    };
    let mut summaries: Vec<DiscoverySummary> = Vec::new();
    for network in networks {
        println!("Starting ping sweep for {network}...");
        let mut session = DiscoverySession::new(network, cfg.clone());
        let mut handle = session.start()?;
        let ctrlc = cancel_on_ctrl_c(handle.cancel_token(), None);
        while let Some(h) = handle.next().await {
            if h.reachable {
                println!("  {} is alive", h.address);
            }
        }
        drop(ctrlc);
        let summary = handle.finish().await?;
        info!(network = %summary.network, alive = summary.alive_hosts.len(), "sweep done");
        println!(
            "{} alive of {} probed in {:.2}s{}",
            summary.alive_hosts.len(),
            summary.probed,
            summary.elapsed_ms as f64 / 1000.0,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        let stop = summary.cancelled;
        summaries.push(summary);
        if stop {
            break;
        }
    }

    if let Some(path) = output.as_deref() {
        write_json(path, &summaries)?;
        println!("Wrote JSON results to {}", path.display());
    }
    Ok(())
}

fn run_history(path: &Path, action: HistoryAction) -> Result<()> {
    let mut history = ScanHistory::load(path);
    match action {
        HistoryAction::List => {
            if history.entries().is_empty() {
                println!("No scan history in {}", path.display());
            }
            for e in history.entries() {
                println!(
                    "{} - {} ({} open ports, {:.2}s, ports {})",
                    e.timestamp, e.target, e.open_ports, e.duration, e.ports
                );
            }
        }
        HistoryAction::Clear => {
            history.clear()?;
            println!("Cleared {}", path.display());
        }
        HistoryAction::Export { path: out } => {
            if history.entries().is_empty() {
                bail!("no scan history to export");
            }
            history.export(&out)?;
            println!("History exported to {}", out.display());
        }
    }
    Ok(())
}

fn print_scan_summary(summary: &ScanSummary) {
    let svc_w = summary
        .open_ports
        .iter()
        .filter_map(|r| r.service.as_ref().map(String::len))
        .max()
        .unwrap_or(0)
        .max("service".len());
    let port_w = 5usize.max("port".len());

    println!("{}", "-".repeat(50));
    println!(
        "Scan {} in {:.2} seconds",
        if summary.cancelled { "stopped" } else { "completed" },
        summary.elapsed_ms as f64 / 1000.0
    );
    println!(
        "Open ports found: {} (scanned: {}/{})",
        summary.open_count(),
        summary.completed,
        summary.requested_port_count
    );
    if summary.open_ports.is_empty() {
        return;
    }
    println!(
        "\n{:>port_w$}  {:<svc_w$}  {}",
        "port",
        "service",
        "banner",
        port_w = port_w,
        svc_w = svc_w
    );
    println!(
        "{:-<port_w$}  {:-<svc_w$}  {:-<6}",
        "",
        "",
        "",
        port_w = port_w,
        svc_w = svc_w
    );
    for r in &summary.open_ports {
        println!(
            "{:>port_w$}  {:<svc_w$}  {}",
            r.port,
            r.service.as_deref().unwrap_or(""),
            abbreviate(r.banner_display(), 60),
            port_w = port_w,
            svc_w = svc_w
        );
    }
}

fn abbreviate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("...");
    out
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

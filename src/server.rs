use std::{net::IpAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::{
    config::{DiscoveryConfig, ScanConfig},
    discovery::DiscoverySession,
    history::ScanHistory,
    netdetect,
    ports,
    scanner::ScanSession,
    types::{DiscoverySummary, ScanSummary, SessionState},
};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<RwLock<ServerState>>, // shared mutable state for progress/results
    history: Option<Arc<Mutex<ScanHistory>>>,
}

#[derive(Debug, Default)]
struct ServerState {
    scan: ScanStatus,
    results: Option<ScanSummary>,
    scan_active: Option<Active>,
    discovery: DiscoveryStatus,
    discovery_active: Option<Active>,
    next_id: u64,
}

/// The session currently owning a status slot. A newer request replaces it.
#[derive(Debug)]
struct Active {
    id: u64,
    cancel: CancellationToken,
}

impl ServerState {
    fn claim(&mut self, cancel: CancellationToken) -> Active {
        self.next_id += 1;
        Active { id: self.next_id, cancel }
    }
}

fn owns(slot: &Option<Active>, id: u64) -> bool {
    slot.as_ref().is_some_and(|a| a.id == id)
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ScanStatus {
    pub state: SessionState,
    pub target: String,
    pub total: u64,
    pub scanned: u64,
    pub open: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct DiscoveryStatus {
    pub state: SessionState,
    pub network: String,
    pub total: u64,
    pub probed: u64,
    pub alive: Vec<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<DiscoverySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub target: String,
    /// Port spec or preset name; defaults to the `common` preset.
    #[serde(default)]
    pub ports: Option<String>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub banner: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct DiscoverRequest {
    pub cidr: String,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ScanRequest {
    fn port_spec(&self) -> String {
        let raw = self.ports.as_deref().map(str::trim).unwrap_or("");
        if raw.is_empty() {
            return ports::preset("common").unwrap_or_default().to_string();
        }
        ports::preset(raw).unwrap_or(raw).to_string()
    }

    fn config(&self) -> ScanConfig {
        let mut cfg = ScanConfig::default();
        if let Some(c) = self.concurrency {
            cfg.concurrency = c;
        }
        if let Some(ms) = self.timeout_ms {
            cfg.timeout = Duration::from_millis(ms);
        }
        if let Some(b) = self.banner {
            cfg.banner.enabled = b;
        }
        cfg
    }
}

impl DiscoverRequest {
    fn config(&self) -> DiscoveryConfig {
        let mut cfg = DiscoveryConfig::default();
        if let Some(c) = self.concurrency {
            cfg.concurrency = c;
        }
        if let Some(ms) = self.timeout_ms {
            cfg.per_host_timeout = Duration::from_millis(ms);
        }
        cfg
    }
}

impl AppState {
    pub fn new(history_path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ServerState::default())),
            history: history_path.map(|p| Arc::new(Mutex::new(ScanHistory::load(p)))),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/scan/stop", post(post_scan_stop))
        .route("/results", get(get_results))
        .route("/discover", post(post_discover))
        .route("/discover/stop", post(post_discover_stop))
        .route("/discovery", get(get_discovery))
        .with_state(state);

    let static_svc = ServeDir::new("ui").append_index_html_on_directories(true);

    Router::new()
        .nest("/api", api)
        .fallback_service(static_svc)
}

pub async fn spawn_server(bind: &str, history_path: Option<PathBuf>) -> Result<()> {
    let app = router(AppState::new(history_path));
    info!("serving UI on http://{}", bind);
    axum::serve(tokio::net::TcpListener::bind(bind).await?, app).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    (StatusCode::OK, Json(s.scan.clone()))
}

async fn get_results(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    if let Some(res) = s.results.as_ref() {
        (StatusCode::OK, Json(res.clone())).into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn get_discovery(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    (StatusCode::OK, Json(s.discovery.clone()))
}

async fn post_scan_stop(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    match s.scan_active.as_ref() {
        Some(a) => {
            a.cancel.cancel();
            (StatusCode::ACCEPTED, Json(s.scan.clone())).into_response()
        }
        None => StatusCode::CONFLICT.into_response(),
    }
}

async fn post_discover_stop(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    match s.discovery_active.as_ref() {
        Some(a) => {
            a.cancel.cancel();
            (StatusCode::ACCEPTED, Json(s.discovery.clone())).into_response()
        }
        None => StatusCode::CONFLICT.into_response(),
    }
}

async fn post_scan(State(app): State<AppState>, Json(req): Json<ScanRequest>) -> impl IntoResponse {
    let spec = req.port_spec();
    let mut session = ScanSession::new(req.target.clone(), spec, req.config());

    let mut s = app.inner.write().await;
    // Cancel any existing scan
    if let Some(a) = s.scan_active.take() {
        a.cancel.cancel();
    }
    let mut handle = match session.start() {
        Ok(h) => h,
        Err(e) => {
            s.scan = ScanStatus {
                state: session.state(),
                target: req.target,
                error: Some(e.to_string()),
                ..ScanStatus::default()
            };
            return (StatusCode::BAD_REQUEST, Json(s.scan.clone())).into_response();
        }
    };

    let active = s.claim(handle.cancel_token());
    let id = active.id;
    let total = session.port_count().unwrap_or(0) as u64;
    s.scan = ScanStatus {
        state: SessionState::Running,
        target: session.target().to_string(),
        total,
        ..ScanStatus::default()
    };
    s.results = None;
    s.scan_active = Some(active);
    let status = s.scan.clone();
    drop(s);

    // Spawn the consumer: mirror streamed results into the status, then store the summary.
    let app2 = app.clone();
    tokio::spawn(async move {
        while let Some(r) = handle.next().await {
            let mut s = app2.inner.write().await;
            if !owns(&s.scan_active, id) {
                continue;
            }
            s.scan.scanned += 1;
            if r.open {
                s.scan.open += 1;
            }
        }
        let state = handle.state();
        let res = handle.finish().await;

        let mut s = app2.inner.write().await;
        if !owns(&s.scan_active, id) {
            return;
        }
        s.scan_active = None;
        match res {
            Ok(summary) => {
                s.scan.state = state;
                s.scan.scanned = summary.completed as u64;
                s.scan.open = summary.open_count() as u64;
                if let Some(h) = app2.history.as_ref() {
                    if let Err(e) = h.lock().await.record(&summary) {
                        warn!(error = %e, "failed to record scan history");
                    }
                }
                s.results = Some(summary);
            }
            Err(e) => {
                s.scan.state = SessionState::Failed;
                s.scan.error = Some(e.to_string());
                warn!(error = %e, "scan error");
            }
        }
    });

    (StatusCode::ACCEPTED, Json(status)).into_response()
}

async fn post_discover(
    State(app): State<AppState>,
    Json(req): Json<DiscoverRequest>,
) -> impl IntoResponse {
    let mut session = DiscoverySession::new(req.cidr.clone(), req.config());

    let mut s = app.inner.write().await;
    if let Some(a) = s.discovery_active.take() {
        a.cancel.cancel();
    }
    let mut handle = match session.start() {
        Ok(h) => h,
        Err(e) => {
            s.discovery = DiscoveryStatus {
                state: session.state(),
                network: req.cidr,
                error: Some(e.to_string()),
                ..DiscoveryStatus::default()
            };
            return (StatusCode::BAD_REQUEST, Json(s.discovery.clone())).into_response();
        }
    };

    let active = s.claim(handle.cancel_token());
    let id = active.id;
    let total = netdetect::parse_network(&req.cidr)
        .map(netdetect::usable_host_count)
        .unwrap_or(0);
    s.discovery = DiscoveryStatus {
        state: SessionState::Running,
        network: req.cidr.trim().to_string(),
        total,
        ..DiscoveryStatus::default()
    };
    s.discovery_active = Some(active);
    let status = s.discovery.clone();
    drop(s);

    let app2 = app.clone();
    tokio::spawn(async move {
        while let Some(h) = handle.next().await {
            let mut s = app2.inner.write().await;
            if !owns(&s.discovery_active, id) {
                continue;
            }
            s.discovery.probed += 1;
            if h.reachable {
                s.discovery.alive.push(h.address);
            }
        }
        let state = handle.state();
        let res = handle.finish().await;

        let mut s = app2.inner.write().await;
        if !owns(&s.discovery_active, id) {
            return;
        }
        s.discovery_active = None;
        match res {
            Ok(summary) => {
                s.discovery.state = state;
                s.discovery.alive = summary.alive_hosts.iter().map(|h| h.address).collect();
                s.discovery.summary = Some(summary);
            }
            Err(e) => {
                s.discovery.state = SessionState::Failed;
                s.discovery.error = Some(e.to_string());
                warn!(error = %e, "discovery error");
            }
        }
    });

    (StatusCode::ACCEPTED, Json(status)).into_response()
}

//! Health endpoint
//!
//! - `GET /`       → 200 plain-text liveness
//! - `GET /status` → 200 with connection details once the gateway is up,
//!   503 while still connecting

use crate::{ArnoldiiError, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::info;

pub const ALIVE_TEXT: &str = "Arnoldii is alive";

#[derive(Debug, Clone, Default)]
struct ConnectionState {
    connected: bool,
    latency: Option<Duration>,
    bot_user: Option<String>,
}

/// Gateway connection state shared between the Discord adapter and the health server
#[derive(Debug)]
pub struct BotStatus {
    started_at: Instant,
    state: RwLock<ConnectionState>,
}

/// Body of `GET /status`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub status: &'static str,
    pub connected: bool,
    pub latency_ms: Option<u64>,
    pub uptime_secs: u64,
    pub bot_user: Option<String>,
}

impl Default for BotStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl BotStatus {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            state: RwLock::new(ConnectionState::default()),
        }
    }

    pub async fn mark_connected(&self, bot_user: impl Into<String>) {
        let mut state = self.state.write().await;
        state.connected = true;
        state.bot_user = Some(bot_user.into());
    }

    /// Back online after a resume; no-op until the first ready
    pub async fn mark_reconnected(&self) {
        let mut state = self.state.write().await;
        if state.bot_user.is_some() {
            state.connected = true;
        }
    }

    pub async fn mark_disconnected(&self) {
        let mut state = self.state.write().await;
        state.connected = false;
        state.latency = None;
    }

    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.state.write().await.latency = latency;
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.connected
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        let state = self.state.read().await;
        StatusSnapshot {
            status: if state.connected { "ok" } else { "connecting" },
            connected: state.connected,
            latency_ms: state
                .latency
                .map(|l| u64::try_from(l.as_millis()).unwrap_or(u64::MAX)),
            uptime_secs: self.uptime().as_secs(),
            bot_user: state.bot_user.clone(),
        }
    }
}

/// Routes for the health server
pub fn router(status: Arc<BotStatus>) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/status", get(handle_status))
        .with_state(status)
}

/// Serve the health endpoint on `0.0.0.0:port` until the task is dropped
pub async fn serve(port: u16, status: Arc<BotStatus>) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| ArnoldiiError::Health(format!("cannot bind port {port}: {e}")))?;
    info!(port, "Health server listening");

    axum::serve(listener, router(status))
        .await
        .map_err(|e| ArnoldiiError::Health(e.to_string()))
}

/// GET /: liveness only
async fn handle_root() -> &'static str {
    ALIVE_TEXT
}

/// GET /status: 503 until the gateway reports ready
async fn handle_status(State(status): State<Arc<BotStatus>>) -> impl IntoResponse {
    let snapshot = status.snapshot().await;
    let code = if snapshot.connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(snapshot))
}

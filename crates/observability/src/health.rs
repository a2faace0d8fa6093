//! Health-Check-Endpunkt fuer Sonar
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Upstream-Verbindungsstatus.
//! Fuer den Master ist "Upstream" immer verbunden; Edges melden hier den
//! Zustand ihrer Master-Verbindung.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub upstream_connected: bool,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    pub start_time: Arc<Instant>,
    pub upstream_connected: Arc<std::sync::atomic::AtomicBool>,
}

impl HealthState {
    pub fn neu() -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            upstream_connected: Arc::new(std::sync::atomic::AtomicBool::new(true)),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn upstream_verbunden(&self) -> bool {
        self.upstream_connected
            .load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn upstream_status_setzen(&self, verbunden: bool) {
        self.upstream_connected
            .store(verbunden, std::sync::atomic::Ordering::Relaxed);
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::neu()
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Prozessstatus zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let upstream_connected = state.upstream_verbunden();
    let status = if upstream_connected {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    let http_status = match status {
        HealthStatus::Healthy => StatusCode::OK,
        // 200 auch bei degraded (Probe soll nicht failen)
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        upstream_connected,
    };

    (http_status, Json(response))
}

//! Prometheus-kompatible Metriken fuer Sonar
//!
//! Registrierte Metriken:
//! - `sonar_requests_total` – Counter: Anfragen pro Befehl
//! - `sonar_request_failures_total` – Counter: Fehlgeschlagene Anfragen gesamt
//! - `sonar_request_errors_total` – Counter: Fehler pro Fehler-Code
//! - `sonar_request_duration_seconds` – Histogram: Verarbeitungszeit pro Befehl
//! - `sonar_registrations_total` – Counter: Registrierungen pro Dienst und Ausgang
//! - `sonar_disconnects_total` – Counter: Verbindungsabbrueche pro Dienst
//! - `sonar_tokens_issued_total` – Counter: Ausgestellte Tokens pro Art
//! - `sonar_challenges_total` – Counter: UDP-Challenges pro Ausgang
//! - `sonar_orphan_evictions_total` – Counter: Vom Orphan-Sweep entfernte Kanaele
//! - `sonar_connected_users` – Gauge: Aktuell erreichbare Benutzer
//! - `sonar_voice_servers` – Gauge: Registrierte Voice-Server
//! - `sonar_active_channels` – Gauge: Lebende Kanaele
//! - `sonar_operators` – Gauge: Bekannte Operatoren

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Alle Sonar-Prometheus-Metriken
#[derive(Clone)]
pub struct SonarMetrics {
    pub registry: Arc<Registry>,

    // Anfrage-Metriken
    pub requests_total: IntCounterVec,
    pub request_failures_total: IntCounter,
    pub request_errors_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,

    // Verbindungs-Metriken
    pub registrations_total: IntCounterVec,
    pub disconnects_total: IntCounterVec,

    // Domaenen-Metriken
    pub tokens_issued_total: IntCounterVec,
    pub challenges_total: IntCounterVec,
    pub orphan_evictions_total: IntCounter,

    // Zustands-Gauges
    pub connected_users: IntGauge,
    pub voice_servers: IntGauge,
    pub active_channels: IntGauge,
    pub operators: IntGauge,
}

impl SonarMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Arc<Self>> {
        let registry = Registry::new();

        // --- Anfrage-Metriken ---
        let requests_total = IntCounterVec::new(
            Opts::new("sonar_requests_total", "Anfragen pro Befehl"),
            &["command"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_failures_total = IntCounter::with_opts(Opts::new(
            "sonar_request_failures_total",
            "Fehlgeschlagene Anfragen gesamt",
        ))?;
        registry.register(Box::new(request_failures_total.clone()))?;

        let request_errors_total = IntCounterVec::new(
            Opts::new("sonar_request_errors_total", "Fehler pro Fehler-Code"),
            &["code"],
        )?;
        registry.register(Box::new(request_errors_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "sonar_request_duration_seconds",
                "Verarbeitungszeit pro Befehl in Sekunden",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5,
            ]),
            &["command"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        // --- Verbindungs-Metriken ---
        let registrations_total = IntCounterVec::new(
            Opts::new(
                "sonar_registrations_total",
                "Registrierungen pro Dienst und Ausgang",
            ),
            &["service", "outcome"],
        )?;
        registry.register(Box::new(registrations_total.clone()))?;

        let disconnects_total = IntCounterVec::new(
            Opts::new("sonar_disconnects_total", "Verbindungsabbrueche pro Dienst"),
            &["service"],
        )?;
        registry.register(Box::new(disconnects_total.clone()))?;

        // --- Domaenen-Metriken ---
        let tokens_issued_total = IntCounterVec::new(
            Opts::new("sonar_tokens_issued_total", "Ausgestellte Tokens pro Art"),
            &["kind"],
        )?;
        registry.register(Box::new(tokens_issued_total.clone()))?;

        let challenges_total = IntCounterVec::new(
            Opts::new("sonar_challenges_total", "UDP-Challenges pro Ausgang"),
            &["outcome"],
        )?;
        registry.register(Box::new(challenges_total.clone()))?;

        let orphan_evictions_total = IntCounter::with_opts(Opts::new(
            "sonar_orphan_evictions_total",
            "Vom Orphan-Sweep entfernte Kanaele",
        ))?;
        registry.register(Box::new(orphan_evictions_total.clone()))?;

        // --- Zustands-Gauges ---
        let connected_users = IntGauge::with_opts(Opts::new(
            "sonar_connected_users",
            "Aktuell ueber User-Edges erreichbare Benutzer",
        ))?;
        registry.register(Box::new(connected_users.clone()))?;

        let voice_servers = IntGauge::with_opts(Opts::new(
            "sonar_voice_servers",
            "Aktuell registrierte Voice-Server",
        ))?;
        registry.register(Box::new(voice_servers.clone()))?;

        let active_channels = IntGauge::with_opts(Opts::new(
            "sonar_active_channels",
            "Aktuell lebende Voice-Kanaele",
        ))?;
        registry.register(Box::new(active_channels.clone()))?;

        let operators = IntGauge::with_opts(Opts::new(
            "sonar_operators",
            "Anzahl bekannter Operatoren",
        ))?;
        registry.register(Box::new(operators.clone()))?;

        Ok(Arc::new(Self {
            registry: Arc::new(registry),
            requests_total,
            request_failures_total,
            request_errors_total,
            request_duration_seconds,
            registrations_total,
            disconnects_total,
            tokens_issued_total,
            challenges_total,
            orphan_evictions_total,
            connected_users,
            voice_servers,
            active_channels,
            operators,
        }))
    }

    /// Verbucht eine fehlgeschlagene Anfrage (Gesamt- plus Code-Zaehler)
    pub fn fehler_verbuchen(&self, code: &str) {
        self.request_failures_total.inc();
        self.request_errors_total.with_label_values(&[code]).inc();
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: Arc<SonarMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(
    axum::extract::State(metriken): axum::extract::State<Arc<SonarMetrics>>,
) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

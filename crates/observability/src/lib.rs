//! sonar-observability – Metriken, Health-Check und Logging
//!
//! Stellt die Prometheus-Registry, den HTTP-Endpunkt (`/metrics`, `/health`)
//! und die tracing-subscriber-Initialisierung fuer alle Sonar-Prozesse
//! bereit.

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{HealthState, HealthStatus};
pub use logging::logging_initialisieren;
pub use metrics::SonarMetrics;

//! Sonar Server – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet die
//! konfigurierte Rolle (Master, User-Edge oder Voice-Edge).

use anyhow::Result;
use sonar_observability::logging_initialisieren;
use sonar_server::{config::ServerConfig, Server};

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("SONAR_CONFIG").unwrap_or_else(|_| "config.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let config = ServerConfig::laden(&config_pfad)?;

    // Logging initialisieren
    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        rolle = %config.rolle.0,
        "Sonar Server wird initialisiert"
    );

    // Rolle starten
    let server = Server::neu(config);
    server.starten().await?;

    Ok(())
}

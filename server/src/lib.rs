//! sonar-server – Bibliotheks-Root
//!
//! Verdrahtet die Konfiguration mit der konfigurierten Rolle: ein Prozess
//! ist entweder Master, User-Edge oder Voice-Edge. Die autoritativen
//! Registries existieren genau einmal pro Master-Prozess und werden per
//! Referenz an alle Komponenten gereicht.

pub mod config;

use anyhow::Result;
use config::ServerConfig;
use sonar_edge::{UserEdgeConfig, UserEdgeServer, VoiceEdgeConfig, VoiceEdgeServer};
use sonar_master::geoip::{Position, StatischerPositionAnbieter};
use sonar_master::{MasterBindAdressen, MasterConfig, MasterServer, MasterState};
use sonar_observability::health::health_router;
use sonar_observability::metrics::metrics_router;
use sonar_observability::{HealthState, SonarMetrics};
use sonar_token::SchluesselPaar;
use std::sync::Arc;
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet die konfigurierte Rolle und laeuft bis Ctrl-C / SIGTERM
    pub async fn starten(self) -> Result<()> {
        let metriken = SonarMetrics::neu()?;
        let health = HealthState::neu();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown-Signal empfangen");
                let _ = shutdown_tx.send(true);
            }
        });

        if self.config.observability.aktiviert {
            let router = metrics_router(metriken.clone()).merge(health_router(health.clone()));
            let adresse = self.config.observability_bind_adresse();
            tokio::spawn(async move {
                match tokio::net::TcpListener::bind(&adresse).await {
                    Ok(listener) => {
                        tracing::info!(adresse = %adresse, "Observability-Endpunkt bereit");
                        if let Err(e) = axum::serve(listener, router).await {
                            tracing::error!(fehler = %e, "Observability-Endpunkt beendet");
                        }
                    }
                    Err(e) => {
                        tracing::error!(adresse = %adresse, fehler = %e, "Observability-Bind fehlgeschlagen");
                    }
                }
            });
        }

        match self.config.rolle.0.as_str() {
            "master" => self.master_starten(metriken, shutdown_rx).await,
            "user-edge" => self.user_edge_starten(metriken, health, shutdown_rx).await,
            "voice-edge" => self.voice_edge_starten(metriken, health, shutdown_rx).await,
            andere => Err(anyhow::anyhow!(
                "Unbekannte Rolle '{andere}' (erwartet: master, user-edge, voice-edge)"
            )),
        }
    }

    async fn master_starten(
        &self,
        metriken: Arc<SonarMetrics>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let schluessel = match &self.config.master.privater_schluessel {
            Some(kodiert) if !kodiert.is_empty() => SchluesselPaar::aus_base64(kodiert)
                .map_err(|e| anyhow::anyhow!("Privater Schluessel unbrauchbar: {e}"))?,
            _ => {
                let paar = SchluesselPaar::generieren();
                tracing::warn!(
                    oeffentlich = %paar.oeffentlich_base64(),
                    "Kein privater Schluessel konfiguriert – frisches Paar generiert; \
                     Edges brauchen den oeffentlichen Schluessel"
                );
                paar
            }
        };

        let geoip = StatischerPositionAnbieter::neu(
            self.config
                .geoip
                .eintraege
                .iter()
                .map(|e| {
                    (
                        e.praefix.clone(),
                        Position {
                            breitengrad: e.breitengrad,
                            laengengrad: e.laengengrad,
                        },
                    )
                })
                .collect(),
        );

        let state = MasterState::neu(
            MasterConfig {
                token_ttl_sek: self.config.master.token_ttl_sek,
                orphan_intervall_sek: self.config.master.orphan_intervall_sek,
                max_orphan_anzahl: self.config.master.max_orphan_anzahl,
                join_future_ttl_sek: self.config.master.join_future_ttl_sek,
                registrierungs_frist_sek: self.config.master.registrierungs_frist_sek,
                keepalive_sek: self.config.master.keepalive_sek,
            },
            geoip,
            schluessel,
            metriken,
        );

        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            oeffentlicher_schluessel = %state.oeffentlicher_schluessel_base64(),
            "Master startet"
        );

        let server = MasterServer::neu(
            state,
            MasterBindAdressen {
                operator: self.config.operator_bind_adresse(),
                user_edge: self.config.user_edge_bind_adresse(),
                voice_edge: self.config.voice_edge_bind_adresse(),
                event: self.config.event_bind_adresse(),
            },
        );
        server.starten(shutdown).await
    }

    async fn user_edge_starten(
        &self,
        metriken: Arc<SonarMetrics>,
        health: HealthState,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        tracing::info!(version = env!("CARGO_PKG_VERSION"), "User-Edge startet");
        let server = UserEdgeServer::neu(
            UserEdgeConfig {
                bind_adresse: self.config.user_bind_adresse(),
                master_adresse: self.config.edge.master_adresse.clone(),
                oeffentliche_adresse: self.config.edge.oeffentliche_adresse.clone(),
                oeffentlicher_port: self.config.edge.oeffentlicher_port,
                master_schluessel_base64: self.config.edge.master_schluessel.clone(),
                token_max_alter_sek: self.config.edge.token_max_alter_sek,
                token_refresh_sek: self.config.edge.token_refresh_sek,
                registrierungs_frist_sek: self.config.edge.registrierungs_frist_sek,
            },
            metriken,
            health,
        )?;
        server.starten(shutdown).await
    }

    async fn voice_edge_starten(
        &self,
        metriken: Arc<SonarMetrics>,
        health: HealthState,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        tracing::info!(version = env!("CARGO_PKG_VERSION"), "Voice-Edge startet");
        let server = VoiceEdgeServer::neu(
            VoiceEdgeConfig {
                bind_adresse: self.config.voice_bind_adresse(),
                master_adresse: self.config.edge.master_adresse.clone(),
                challenge_bind_adresse: format!("{}:0", self.config.netzwerk.bind_adresse),
                challenge_timeout_ms: self.config.edge.challenge_timeout_ms,
                registrierungs_frist_sek: self.config.edge.registrierungs_frist_sek,
            },
            metriken,
            health,
        );
        server.starten(shutdown).await
    }
}

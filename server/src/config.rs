//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass ein Master ohne Konfigurationsdatei
//! lauffaehig ist. Ein Prozess spielt genau eine Rolle: `master`,
//! `user-edge` oder `voice-edge`.

use serde::{Deserialize, Serialize};

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct ServerConfig {
    /// Rolle dieses Prozesses
    pub rolle: RollenEinstellung,
    /// Netzwerk-Einstellungen (Bind-Adressen und Ports)
    pub netzwerk: NetzwerkEinstellungen,
    /// Master-Einstellungen (Token, Orphan-Sweep)
    pub master: MasterEinstellungen,
    /// Edge-Einstellungen (Upstream, Challenge, Token-Pruefung)
    pub edge: EdgeEinstellungen,
    /// GeoIP-Praefix-Tabelle
    pub geoip: GeoIpEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Rolle des Prozesses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RollenEinstellung(pub String);

impl Default for RollenEinstellung {
    fn default() -> Self {
        Self("master".into())
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer alle Dienste dieses Prozesses
    pub bind_adresse: String,
    /// Master: Port des Operator-Dienstes
    pub operator_port: u16,
    /// Master: Port des User-Edge-Dienstes
    pub user_edge_port: u16,
    /// Master: Port des Voice-Edge-Dienstes
    pub voice_edge_port: u16,
    /// Master: Port des Event-Dienstes
    pub event_port: u16,
    /// User-Edge: Port fuer Endbenutzer-Verbindungen
    pub user_port: u16,
    /// Voice-Edge: Port fuer Voice-Server-Verbindungen
    pub voice_port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            operator_port: 4700,
            user_edge_port: 4701,
            voice_edge_port: 4702,
            event_port: 4703,
            user_port: 4710,
            voice_port: 4720,
        }
    }
}

/// Master-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterEinstellungen {
    /// Maximalalter von Tokens in Sekunden (negativ = keine Pruefung)
    pub token_ttl_sek: i64,
    /// Intervall des Orphan-Sweeps in Sekunden
    pub orphan_intervall_sek: u64,
    /// Sweeps in Folge bevor ein verwaister Kanal entfernt wird
    pub max_orphan_anzahl: u32,
    /// Lebenszeit nicht eingeloester Join-Futures in Sekunden
    pub join_future_ttl_sek: u64,
    /// Registrierungsfrist fuer eingehende Verbindungen in Sekunden
    pub registrierungs_frist_sek: u64,
    /// Keepalive-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Privater Ed25519-Schluessel (Base64); leer = frisch generieren
    pub privater_schluessel: Option<String>,
}

impl Default for MasterEinstellungen {
    fn default() -> Self {
        Self {
            token_ttl_sek: 300,
            orphan_intervall_sek: 30,
            max_orphan_anzahl: 3,
            join_future_ttl_sek: 600,
            registrierungs_frist_sek: 10,
            keepalive_sek: 30,
            privater_schluessel: None,
        }
    }
}

/// Edge-Einstellungen (User-Edge und Voice-Edge)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeEinstellungen {
    /// Adresse des zustaendigen Master-Dienstes
    pub master_adresse: String,
    /// Oeffentliche Adresse dieser Edge (landet in Tokens)
    pub oeffentliche_adresse: String,
    /// Oeffentlicher Port dieser Edge
    pub oeffentlicher_port: u16,
    /// Oeffentlicher Master-Schluessel (Base64) fuer die Token-Pruefung
    pub master_schluessel: String,
    /// Maximalalter akzeptierter Tokens in Sekunden
    pub token_max_alter_sek: i64,
    /// Intervall der Token-Erneuerung in Sekunden
    pub token_refresh_sek: u64,
    /// Registrierungsfrist fuer Clients in Sekunden
    pub registrierungs_frist_sek: u64,
    /// Timeout der UDP-Challenge in Millisekunden (Voice-Edge)
    pub challenge_timeout_ms: u64,
}

impl Default for EdgeEinstellungen {
    fn default() -> Self {
        Self {
            master_adresse: "127.0.0.1:4701".into(),
            oeffentliche_adresse: "127.0.0.1".into(),
            oeffentlicher_port: 4710,
            master_schluessel: String::new(),
            token_max_alter_sek: 300,
            token_refresh_sek: 180,
            registrierungs_frist_sek: 10,
            challenge_timeout_ms: 2000,
        }
    }
}

/// Ein GeoIP-Praefix-Eintrag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoIpEintrag {
    /// Adress-Praefix, z.B. "10.1."
    pub praefix: String,
    pub breitengrad: f64,
    pub laengengrad: f64,
}

/// GeoIP-Praefix-Tabelle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoIpEinstellungen {
    pub eintraege: Vec<GeoIpEintrag>,
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den HTTP-Endpunkt
    pub aktiviert: bool,
    /// Port fuer Metriken und Health
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Gibt die Bind-Adresse des Operator-Dienstes zurueck
    pub fn operator_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.operator_port)
    }

    /// Gibt die Bind-Adresse des User-Edge-Dienstes zurueck
    pub fn user_edge_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.user_edge_port)
    }

    /// Gibt die Bind-Adresse des Voice-Edge-Dienstes zurueck
    pub fn voice_edge_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.voice_edge_port)
    }

    /// Gibt die Bind-Adresse des Event-Dienstes zurueck
    pub fn event_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.event_port)
    }

    /// Gibt die Bind-Adresse fuer Endbenutzer-Verbindungen zurueck
    pub fn user_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.user_port)
    }

    /// Gibt die Bind-Adresse fuer Voice-Server-Verbindungen zurueck
    pub fn voice_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.voice_port)
    }

    /// Gibt die Bind-Adresse des Observability-Endpunkts zurueck
    pub fn observability_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.observability.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.rolle.0, "master");
        assert_eq!(cfg.netzwerk.operator_port, 4700);
        assert_eq!(cfg.master.token_ttl_sek, 300);
        assert_eq!(cfg.master.max_orphan_anzahl, 3);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.observability.aktiviert);
    }

    #[test]
    fn bind_adressen() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.operator_bind_adresse(), "0.0.0.0:4700");
        assert_eq!(cfg.event_bind_adresse(), "0.0.0.0:4703");
        assert_eq!(cfg.voice_bind_adresse(), "0.0.0.0:4720");
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            rolle = "user-edge"

            [netzwerk]
            user_port = 5000

            [edge]
            master_adresse = "master.intern:4701"
            master_schluessel = "abc"

            [master]
            max_orphan_anzahl = 5
        "#;
        let cfg: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.rolle.0, "user-edge");
        assert_eq!(cfg.netzwerk.user_port, 5000);
        assert_eq!(cfg.edge.master_adresse, "master.intern:4701");
        assert_eq!(cfg.master.max_orphan_anzahl, 5);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.netzwerk.operator_port, 4700);
        assert_eq!(cfg.edge.token_refresh_sek, 180);
    }

    #[test]
    fn geoip_eintraege_aus_toml() {
        let toml = r#"
            [[geoip.eintraege]]
            praefix = "10.1."
            breitengrad = 52.52
            laengengrad = 13.405
        "#;
        let cfg: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.geoip.eintraege.len(), 1);
        assert_eq!(cfg.geoip.eintraege[0].praefix, "10.1.");
    }
}

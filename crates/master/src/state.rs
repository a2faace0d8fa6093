//! Gemeinsamer Master-Zustand
//!
//! Haelt alle Registries und Services als Arc-Referenzen, die sicher
//! zwischen tokio-Tasks geteilt werden koennen. Es gibt genau eine
//! Instanz pro Prozess – sie wird beim Start konstruiert und per Referenz
//! an alle Komponenten gereicht; Tests konstruieren einfach eigene
//! Instanzen.

use chrono::Utc;
use sonar_core::event::OperatorEreignis;
use sonar_core::types::{EdgeId, OperatorId, UserId};
use sonar_observability::SonarMetrics;
use sonar_protocol::command::{Command, ErrorCode};
use sonar_token::{SchluesselPaar, Token};
use std::sync::Arc;
use std::time::Instant;

use crate::channel::VoiceChannel;
use crate::error::{DomainFehler, DomainResult};
use crate::geoip::PositionAnbieter;
use crate::operator::{OperatorManager, VerbundenerBenutzer};
use crate::user_manager::{UserEdgeEintrag, UserManager};
use crate::voice_manager::VoiceManager;

/// Konfiguration des Masters
#[derive(Debug, Clone)]
pub struct MasterConfig {
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
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            token_ttl_sek: 300,
            orphan_intervall_sek: 30,
            max_orphan_anzahl: 3,
            join_future_ttl_sek: 600,
            registrierungs_frist_sek: 10,
            keepalive_sek: 30,
        }
    }
}

/// Gemeinsamer Master-Zustand (thread-safe, Arc-geteilt)
pub struct MasterState {
    pub config: Arc<MasterConfig>,
    pub operatoren: OperatorManager,
    pub voice: VoiceManager,
    pub benutzer: UserManager,
    pub metriken: Arc<SonarMetrics>,
    /// Signierschluessel fuer Tokens (privat beim Master)
    schluessel: SchluesselPaar,
    /// Startzeitpunkt (fuer Uptime)
    pub start: Instant,
}

impl MasterState {
    /// Erstellt einen neuen MasterState
    pub fn neu(
        config: MasterConfig,
        geoip: Arc<dyn PositionAnbieter>,
        schluessel: SchluesselPaar,
        metriken: Arc<SonarMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::new(config),
            operatoren: OperatorManager::neu(),
            voice: VoiceManager::neu(geoip),
            benutzer: UserManager::neu(),
            metriken,
            schluessel,
            start: Instant::now(),
        })
    }

    /// Gibt den oeffentlichen Schluessel als Base64 zurueck (fuer Edges)
    pub fn oeffentlicher_schluessel_base64(&self) -> String {
        self.schluessel.oeffentlich_base64()
    }

    /// Gibt die Uptime in Sekunden zurueck
    pub fn uptime_sek(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    // -----------------------------------------------------------------------
    // Token-Ausgabe
    // -----------------------------------------------------------------------

    /// Praegt und signiert ein Token
    ///
    /// Mit `kanal` entsteht ein Kanal-Token (VoIP-Adresse des gebundenen
    /// Servers eingebettet), ohne ein Control-Token. Schlaegt mit
    /// `NichtSynchron` fehl wenn der gebundene Server nicht mehr verbunden
    /// ist.
    pub fn token_ausstellen(
        &self,
        operator_id: &OperatorId,
        user_id: &UserId,
        user_beschreibung: &str,
        kanal: Option<&Arc<VoiceChannel>>,
        location: &str,
        edge: &UserEdgeEintrag,
    ) -> DomainResult<String> {
        let (voip_adresse, voip_port, channel_id, channel_beschreibung) = match kanal {
            Some(kanal) => {
                let server = self.voice.nach_id(&kanal.server_id).ok_or_else(|| {
                    DomainFehler::NichtSynchron(format!(
                        "Voice-Server {} des Kanals {} ist nicht verbunden",
                        kanal.server_id, kanal.channel_id
                    ))
                })?;
                (
                    server.voip_adresse.clone(),
                    server.voip_port,
                    kanal.channel_id.als_str().to_string(),
                    kanal.beschreibung.clone(),
                )
            }
            None => (String::new(), 0, String::new(), String::new()),
        };

        let token = Token {
            operator_id: operator_id.als_str().to_string(),
            user_id: user_id.als_str().to_string(),
            user_beschreibung: user_beschreibung.to_string(),
            channel_id,
            channel_beschreibung,
            location: location.to_string(),
            erstellt_am: Utc::now().timestamp(),
            edge_adresse: edge.oeffentliche_adresse.clone(),
            edge_port: edge.oeffentlicher_port,
            voip_adresse,
            voip_port,
        };

        let art = if kanal.is_some() { "channel" } else { "control" };
        self.metriken.tokens_issued_total.with_label_values(&[art]).inc();

        Ok(token.signieren(self.schluessel.signing_key())?)
    }

    /// Erneuert das Token eines verbundenen Benutzers (REFRESH_TOKEN)
    ///
    /// Der Benutzer muss auf der anfragenden Edge gefuehrt werden. Ist er
    /// laut Cache in einem Kanal dessen Bindung noch lebt, wird ein
    /// Kanal-Token gepraegt, sonst ein Control-Token.
    pub fn token_erneuern(
        &self,
        operator_id: &OperatorId,
        user_id: &UserId,
        edge_id: &EdgeId,
    ) -> DomainResult<String> {
        let operator = self
            .operatoren
            .operator_falls_vorhanden(operator_id)
            .ok_or_else(|| DomainFehler::BenutzerNichtGefunden(user_id.als_str().to_string()))?;
        let benutzer = operator
            .benutzer_holen(user_id)
            .filter(|b| b.edge.edge_id == *edge_id)
            .ok_or_else(|| DomainFehler::BenutzerNichtGefunden(user_id.als_str().to_string()))?;

        let kanal = operator
            .cache
            .kanal_von(user_id)
            .and_then(|kanal_id| operator.kanaele.kanal(&kanal_id))
            .filter(|kanal| !kanal.ist_zerstoert() && self.voice.ist_verbunden(&kanal.server_id));

        self.token_ausstellen(
            operator_id,
            user_id,
            &benutzer.beschreibung,
            kanal.as_ref(),
            "",
            &benutzer.edge,
        )
    }

    // -----------------------------------------------------------------------
    // Benutzer-Registrierung (gespeist von den User-Edge-Relays)
    // -----------------------------------------------------------------------

    /// Verarbeitet eine USER_REGISTERED-Meldung eines User-Edges
    ///
    /// Eine Zweitregistrierung desselben Benutzers verdraengt die erste:
    /// der alte Edge erhaelt einen Unregister-Push mit Grund
    /// `LOGGED_IN_ELSEWHERE`. Eine offene Beitritts-Absicht wird sofort als
    /// Token-Push mit Grund `JOIN` eingeloest.
    pub fn benutzer_registrieren(
        &self,
        operator_id: &OperatorId,
        user_id: &UserId,
        beschreibung: &str,
        remote_adresse: &str,
        edge: Arc<UserEdgeEintrag>,
    ) {
        let operator = self.operatoren.operator_holen(operator_id);

        let neuer = VerbundenerBenutzer {
            user_id: user_id.clone(),
            beschreibung: beschreibung.to_string(),
            remote_adresse: remote_adresse.to_string(),
            edge: edge.clone(),
        };

        if let Some(vorher) = operator.benutzer.insert(user_id.clone(), neuer) {
            if vorher.edge.edge_id != edge.edge_id {
                tracing::info!(
                    operator = %operator_id,
                    user = %user_id,
                    alter_edge = %vorher.edge.edge_id,
                    "Zweitregistrierung – alter Edge wird abgemeldet"
                );
                vorher.edge.handle.senden(
                    Command::Unregister,
                    vec![
                        operator_id.als_str().to_string(),
                        user_id.als_str().to_string(),
                        ErrorCode::LoggedInElsewhere.als_str().to_string(),
                    ],
                );
            }
        }

        operator.ereignisse.veroeffentlichen(OperatorEreignis::BenutzerOnline {
            user_id: user_id.clone(),
        });

        // Offene Beitritts-Absicht einloesen
        if let Some(future) = self.benutzer.join_future_einloesen(operator_id, user_id) {
            match operator.kanaele.kanal_erstellen(
                &future.channel_id,
                &future.channel_beschreibung,
                &self.voice,
                None,
                remote_adresse,
                &future.location,
            ) {
                Ok(kanal) => match self.token_ausstellen(
                    operator_id,
                    user_id,
                    beschreibung,
                    Some(&kanal),
                    &future.location,
                    &edge,
                ) {
                    Ok(token) => {
                        edge.handle.senden(
                            Command::UpdateToken,
                            vec![
                                operator_id.als_str().to_string(),
                                user_id.als_str().to_string(),
                                sonar_token::TOKEN_GRUND_JOIN.to_string(),
                                token,
                            ],
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            operator = %operator_id,
                            user = %user_id,
                            fehler = %e,
                            "Join-Future konnte nicht eingeloest werden"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        operator = %operator_id,
                        kanal = %future.channel_id,
                        fehler = %e,
                        "Kanal-Zuteilung fuer Join-Future fehlgeschlagen"
                    );
                }
            }
        }

        self.gauges_aktualisieren();
    }

    /// Verarbeitet eine USER_UNREGISTERED-Meldung eines User-Edges
    ///
    /// Entfernt den Benutzer nur wenn er noch auf dieser Edge gefuehrt wird
    /// (eine verspaetete Abmeldung nach einer Zweitregistrierung ist kein
    /// Abbruch der neuen Verbindung).
    pub fn benutzer_entfernen(
        &self,
        operator_id: &OperatorId,
        user_id: &UserId,
        edge_id: &EdgeId,
        grund: &str,
    ) -> bool {
        let Some(operator) = self.operatoren.operator_falls_vorhanden(operator_id) else {
            return false;
        };

        let entfernt = operator
            .benutzer
            .remove_if(user_id, |_, b| b.edge.edge_id == *edge_id)
            .is_some();

        if entfernt {
            operator
                .ereignisse
                .veroeffentlichen(OperatorEreignis::BenutzerOffline {
                    user_id: user_id.clone(),
                    grund: grund.to_string(),
                });
            self.gauges_aktualisieren();
        }
        entfernt
    }

    /// Entfernt alle Benutzer eines User-Edges (Verbindungsverlust)
    pub fn benutzer_von_edge_entfernen(&self, edge_id: &EdgeId) -> usize {
        let mut entfernt = 0;
        for operator in self.operatoren.schnappschuss() {
            let betroffen: Vec<UserId> = operator
                .benutzer
                .iter()
                .filter(|e| e.value().edge.edge_id == *edge_id)
                .map(|e| e.key().clone())
                .collect();
            for user_id in betroffen {
                if self.benutzer_entfernen(
                    &operator.operator_id,
                    &user_id,
                    edge_id,
                    ErrorCode::TryAgain.als_str(),
                ) {
                    entfernt += 1;
                }
            }
        }
        entfernt
    }

    // -----------------------------------------------------------------------
    // Gauges
    // -----------------------------------------------------------------------

    /// Aktualisiert die Zustands-Gauges aus den Registries
    pub fn gauges_aktualisieren(&self) {
        let operatoren = self.operatoren.schnappschuss();
        let benutzer: usize = operatoren.iter().map(|o| o.benutzer.len()).sum();
        let kanaele: usize = operatoren.iter().map(|o| o.kanaele.anzahl()).sum();

        self.metriken.connected_users.set(benutzer as i64);
        self.metriken.active_channels.set(kanaele as i64);
        self.metriken.voice_servers.set(self.voice.anzahl() as i64);
        self.metriken.operators.set(operatoren.len() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeHandle;
    use crate::geoip::StatischerPositionAnbieter;
    use crate::user_manager::JoinChannelFuture;
    use crate::voice_manager::VoiceServerEintrag;
    use sonar_core::types::{ChannelId, ServerId};
    use sonar_token::TokenFehler;
    use tokio::sync::mpsc;

    pub(crate) fn test_state() -> Arc<MasterState> {
        MasterState::neu(
            MasterConfig::default(),
            StatischerPositionAnbieter::leer(),
            SchluesselPaar::generieren(),
            SonarMetrics::neu().unwrap(),
        )
    }

    pub(crate) fn test_user_edge() -> (Arc<UserEdgeEintrag>, mpsc::Receiver<sonar_protocol::wire::WireFrame>) {
        let edge_id = EdgeId::neu();
        let (handle, rx) = EdgeHandle::neu(edge_id);
        (
            Arc::new(UserEdgeEintrag {
                edge_id,
                oeffentliche_adresse: "edge.example.net".into(),
                oeffentlicher_port: 4710,
                handle,
            }),
            rx,
        )
    }

    pub(crate) fn test_voice_server(
        state: &MasterState,
    ) -> (Arc<VoiceServerEintrag>, mpsc::Receiver<sonar_protocol::wire::WireFrame>) {
        let (handle, rx) = EdgeHandle::neu(EdgeId::neu());
        let server = Arc::new(VoiceServerEintrag {
            server_id: ServerId::neu(),
            voip_adresse: "10.0.0.5".into(),
            voip_port: 9000,
            max_clients: 100,
            location: "eu".into(),
            edge: handle,
        });
        state.voice.registrieren(server.clone());
        (server, rx)
    }

    #[test]
    fn control_token_ausstellen_und_verifizieren() {
        let state = test_state();
        let (edge, _rx) = test_user_edge();

        let roh = state
            .token_ausstellen(
                &OperatorId::neu("acme"),
                &UserId::neu("u1"),
                "User One",
                None,
                "eu",
                &edge,
            )
            .unwrap();

        let key = sonar_token::keys::verifying_key_aus_base64(
            &state.oeffentlicher_schluessel_base64(),
        )
        .unwrap();
        let token = Token::verifizieren(&roh, &key, state.config.token_ttl_sek).unwrap();
        assert_eq!(token.operator_id, "acme");
        assert_eq!(token.edge_adresse, "edge.example.net");
        assert!(!token.ist_kanal_token());
    }

    #[test]
    fn kanal_token_traegt_voip_adresse() {
        let state = test_state();
        let (edge, _edge_rx) = test_user_edge();
        let (_server, _voice_rx) = test_voice_server(&state);

        let operator = state.operatoren.operator_holen(&OperatorId::neu("acme"));
        let kanal = operator
            .kanaele
            .kanal_erstellen(&ChannelId::neu("c1"), "Kanal", &state.voice, None, "1.2.3.4", "eu")
            .unwrap();

        let roh = state
            .token_ausstellen(
                &OperatorId::neu("acme"),
                &UserId::neu("u1"),
                "User One",
                Some(&kanal),
                "eu",
                &edge,
            )
            .unwrap();

        let key = sonar_token::keys::verifying_key_aus_base64(
            &state.oeffentlicher_schluessel_base64(),
        )
        .unwrap();
        let token = Token::verifizieren(&roh, &key, -1).unwrap();
        assert_eq!(token.channel_id, "c1");
        assert_eq!(token.voip_adresse, "10.0.0.5");
        assert_eq!(token.voip_port, 9000);
    }

    #[test]
    fn kanal_token_ohne_lebenden_server_ist_nicht_synchron() {
        let state = test_state();
        let (edge, _edge_rx) = test_user_edge();
        let (server, _voice_rx) = test_voice_server(&state);

        let operator = state.operatoren.operator_holen(&OperatorId::neu("acme"));
        let kanal = operator
            .kanaele
            .kanal_erstellen(&ChannelId::neu("c1"), "Kanal", &state.voice, None, "1.2.3.4", "eu")
            .unwrap();

        state.voice.entfernen(&server.server_id);

        let ergebnis = state.token_ausstellen(
            &OperatorId::neu("acme"),
            &UserId::neu("u1"),
            "x",
            Some(&kanal),
            "eu",
            &edge,
        );
        assert!(matches!(ergebnis, Err(DomainFehler::NichtSynchron(_))));
    }

    #[test]
    fn manipuliertes_token_faellt_durch() {
        let state = test_state();
        let (edge, _rx) = test_user_edge();
        let roh = state
            .token_ausstellen(&OperatorId::neu("acme"), &UserId::neu("u1"), "x", None, "", &edge)
            .unwrap();

        let key = sonar_token::keys::verifying_key_aus_base64(
            &state.oeffentlicher_schluessel_base64(),
        )
        .unwrap();
        let manipuliert = format!("{}x", roh);
        assert!(matches!(
            Token::verifizieren(&manipuliert, &key, -1),
            Err(TokenFehler::Ungueltig(_))
        ));
    }

    #[tokio::test]
    async fn zweitregistrierung_verdraengt_erste() {
        let state = test_state();
        let (edge_a, mut rx_a) = test_user_edge();
        let (edge_b, _rx_b) = test_user_edge();
        let operator_id = OperatorId::neu("acme");
        let user_id = UserId::neu("u1");

        state.benutzer_registrieren(&operator_id, &user_id, "User", "1.2.3.4", edge_a.clone());
        state.benutzer_registrieren(&operator_id, &user_id, "User", "5.6.7.8", edge_b.clone());

        // Edge A muss den Unregister-Push mit LOGGED_IN_ELSEWHERE erhalten
        let push = rx_a.recv().await.expect("Push erwartet");
        assert_eq!(push.befehl, "UNREGISTER");
        assert_eq!(push.argumente[2], "LOGGED_IN_ELSEWHERE");

        // Nur die zweite Registrierung bleibt bestehen
        let operator = state.operatoren.operator_holen(&operator_id);
        let benutzer = operator.benutzer_holen(&user_id).unwrap();
        assert_eq!(benutzer.edge.edge_id, edge_b.edge_id);
    }

    #[tokio::test]
    async fn join_future_wird_bei_registrierung_eingeloest() {
        let state = test_state();
        let (_server, _voice_rx) = test_voice_server(&state);
        let (edge, mut rx) = test_user_edge();
        let operator_id = OperatorId::neu("acme");
        let user_id = UserId::neu("u1");

        state.benutzer.join_future_anlegen(JoinChannelFuture {
            operator_id: operator_id.clone(),
            user_id: user_id.clone(),
            channel_id: ChannelId::neu("c1"),
            channel_beschreibung: "Kanal Eins".into(),
            location: "eu".into(),
            erstellt: std::time::Instant::now(),
        });

        state.benutzer_registrieren(&operator_id, &user_id, "User", "1.2.3.4", edge);

        let push = rx.recv().await.expect("Token-Push erwartet");
        assert_eq!(push.befehl, "UPDATE_TOKEN");
        assert_eq!(push.argumente[2], "JOIN");
        // Future ist verbraucht
        assert_eq!(state.benutzer.futures_anzahl(), 0);
        // Kanal wurde angelegt
        let operator = state.operatoren.operator_holen(&operator_id);
        assert!(operator.kanaele.kanal(&ChannelId::neu("c1")).is_some());
    }

    #[test]
    fn verspaetete_abmeldung_trifft_neue_registrierung_nicht() {
        let state = test_state();
        let (edge_a, _rx_a) = test_user_edge();
        let (edge_b, _rx_b) = test_user_edge();
        let operator_id = OperatorId::neu("acme");
        let user_id = UserId::neu("u1");

        state.benutzer_registrieren(&operator_id, &user_id, "User", "1.2.3.4", edge_a.clone());
        state.benutzer_registrieren(&operator_id, &user_id, "User", "5.6.7.8", edge_b);

        // Verspaetetes USER_UNREGISTERED von Edge A darf nichts entfernen
        assert!(!state.benutzer_entfernen(&operator_id, &user_id, &edge_a.edge_id, "CLIENT"));
        let operator = state.operatoren.operator_holen(&operator_id);
        assert!(operator.ist_online(&user_id));
    }

    #[test]
    fn edge_verlust_entfernt_alle_benutzer() {
        let state = test_state();
        let (edge, _rx) = test_user_edge();
        let operator_id = OperatorId::neu("acme");

        for i in 0..3 {
            state.benutzer_registrieren(
                &operator_id,
                &UserId::neu(format!("u{i}")),
                "User",
                "1.2.3.4",
                edge.clone(),
            );
        }

        assert_eq!(state.benutzer_von_edge_entfernen(&edge.edge_id), 3);
        let operator = state.operatoren.operator_holen(&operator_id);
        assert_eq!(operator.benutzer.len(), 0);
    }

    #[test]
    fn gauges_spiegeln_zustand() {
        let state = test_state();
        let (edge, _rx) = test_user_edge();
        let (_server, _voice_rx) = test_voice_server(&state);

        state.benutzer_registrieren(
            &OperatorId::neu("acme"),
            &UserId::neu("u1"),
            "User",
            "1.2.3.4",
            edge,
        );

        assert_eq!(state.metriken.connected_users.get(), 1);
        assert_eq!(state.metriken.voice_servers.get(), 1);
        assert_eq!(state.metriken.operators.get(), 1);
    }
}

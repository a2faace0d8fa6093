//! OperatorService – Die Steuer-API fuer Operator-Clients
//!
//! Request/Reply ueber das Zeilenprotokoll. Jeder Handler prueft zuerst die
//! Argumentanzahl (`NOT_ENOUGH_ARGUMENTS`), dann Laenge und Zeichensatz der
//! Felder (`INVALID_ARGUMENT`) und delegiert erst danach an die Manager.
//! Typisierte Domaenen-Fehler werden in spezifische Wire-Codes uebersetzt;
//! kein Fehler verlaesst die Dienst-Schicht als Panic.

use sonar_core::types::{ChannelId, OperatorId, UserId};
use sonar_protocol::command::{Command, ErrorCode};
use sonar_protocol::limits::{
    feld_gueltig, id_gueltig, MAX_ADRESSE_LAENGE, MAX_BESCHREIBUNG_LAENGE, MAX_CHANNEL_ID_LAENGE,
    MAX_LOCATION_LAENGE, MAX_OPERATOR_ID_LAENGE, MAX_USER_ID_LAENGE,
};
use sonar_protocol::wire::WireFrame;
use std::sync::Arc;
use std::time::Instant;

use crate::error::DomainFehler;
use crate::state::MasterState;
use crate::user_manager::JoinChannelFuture;

/// Antwort-Disposition von JOIN_USER_TO_CHANNEL
const JOIN_PUSHED: &str = "PUSHED";
const JOIN_QUEUED: &str = "QUEUED";

/// Fehler der Dienst-Schicht: Protokollverletzung oder Domaenen-Fehler
#[derive(Debug)]
enum ServiceFehler {
    Protokoll(ErrorCode),
    Domain(DomainFehler),
}

impl ServiceFehler {
    fn wire_code(&self) -> ErrorCode {
        match self {
            Self::Protokoll(code) => *code,
            Self::Domain(fehler) => fehler.wire_code(),
        }
    }
}

impl From<DomainFehler> for ServiceFehler {
    fn from(fehler: DomainFehler) -> Self {
        Self::Domain(fehler)
    }
}

type ServiceResult = std::result::Result<Vec<String>, ServiceFehler>;

// ---------------------------------------------------------------------------
// Argument-Pruefung
// ---------------------------------------------------------------------------

fn argument<'a>(argumente: &'a [String], index: usize) -> std::result::Result<&'a str, ServiceFehler> {
    argumente
        .get(index)
        .map(String::as_str)
        .ok_or(ServiceFehler::Protokoll(ErrorCode::NotEnoughArguments))
}

fn pflicht_id<'a>(wert: &'a str, max_laenge: usize) -> std::result::Result<&'a str, ServiceFehler> {
    if id_gueltig(wert, max_laenge) {
        Ok(wert)
    } else {
        Err(ServiceFehler::Protokoll(ErrorCode::InvalidArgument))
    }
}

fn optionales_feld<'a>(wert: &'a str, max_laenge: usize) -> std::result::Result<&'a str, ServiceFehler> {
    if feld_gueltig(wert, max_laenge) {
        Ok(wert)
    } else {
        Err(ServiceFehler::Protokoll(ErrorCode::InvalidArgument))
    }
}

// ---------------------------------------------------------------------------
// OperatorService
// ---------------------------------------------------------------------------

/// Uebersetzt Protokoll-Frames des Operator-Dienstes in Manager-Operationen
pub struct OperatorService {
    state: Arc<MasterState>,
}

impl OperatorService {
    /// Erstellt einen neuen OperatorService
    pub fn neu(state: Arc<MasterState>) -> Self {
        Self { state }
    }

    /// Verarbeitet einen Frame und gibt immer eine Antwort zurueck
    ///
    /// Verbucht Anfrage-, Fehler- und Latenz-Metriken rund um die
    /// eigentliche Verarbeitung.
    pub fn verarbeiten(&self, frame: &WireFrame) -> WireFrame {
        let start = Instant::now();
        let metriken = &self.state.metriken;
        metriken
            .requests_total
            .with_label_values(&[frame.befehl.as_str()])
            .inc();

        let ergebnis = self.weiterleiten(frame);

        metriken
            .request_duration_seconds
            .with_label_values(&[frame.befehl.as_str()])
            .observe(start.elapsed().as_secs_f64());

        match ergebnis {
            Ok(argumente) => WireFrame::antwort_ok(frame.id, argumente),
            Err(fehler) => {
                let code = fehler.wire_code();
                metriken.fehler_verbuchen(code.als_str());
                tracing::debug!(befehl = %frame.befehl, code = %code, "Anfrage fehlgeschlagen");
                WireFrame::antwort_fehler(frame.id, code)
            }
        }
    }

    /// Statische Dispatch-Tabelle: Befehls-Tag -> Handler
    fn weiterleiten(&self, frame: &WireFrame) -> ServiceResult {
        let argumente = &frame.argumente;
        match Command::parse(&frame.befehl) {
            Some(Command::Keepalive) => Ok(vec![]),
            Some(Command::JoinUserToChannel) => self.join_user_to_channel(argumente),
            Some(Command::PartUserFromChannel) => self.part_user_from_channel(argumente),
            Some(Command::DisconnectUser) => self.disconnect_user(argumente),
            Some(Command::DestroyChannel) => self.destroy_channel(argumente),
            Some(Command::GetUsersOnlineStatus) => self.get_users_online_status(argumente),
            Some(Command::GetChannelUsers) => self.get_channel_users(argumente),
            Some(Command::GetControlToken) => self.get_control_token(argumente),
            Some(Command::GetChannelToken) => self.get_channel_token(argumente),
            _ => Err(ServiceFehler::Protokoll(ErrorCode::InvalidArgument)),
        }
    }

    // -----------------------------------------------------------------------
    // Handler
    // -----------------------------------------------------------------------

    /// JOIN_USER_TO_CHANNEL <operator> <location> <user> <kanal> <kanal-beschreibung>
    fn join_user_to_channel(&self, argumente: &[String]) -> ServiceResult {
        let operator_id = OperatorId::neu(pflicht_id(argument(argumente, 0)?, MAX_OPERATOR_ID_LAENGE)?);
        let location = optionales_feld(argument(argumente, 1)?, MAX_LOCATION_LAENGE)?.to_string();
        let user_id = UserId::neu(pflicht_id(argument(argumente, 2)?, MAX_USER_ID_LAENGE)?);
        let channel_id = ChannelId::neu(pflicht_id(argument(argumente, 3)?, MAX_CHANNEL_ID_LAENGE)?);
        let beschreibung =
            optionales_feld(argument(argumente, 4)?, MAX_BESCHREIBUNG_LAENGE)?.to_string();

        let operator = self.state.operatoren.operator_holen(&operator_id);

        match operator.benutzer_holen(&user_id) {
            Some(benutzer) => {
                // Benutzer ist erreichbar: Kanal zuteilen und Token pushen
                let kanal = operator.kanaele.kanal_erstellen(
                    &channel_id,
                    &beschreibung,
                    &self.state.voice,
                    None,
                    &benutzer.remote_adresse,
                    &location,
                )?;
                let token = self.state.token_ausstellen(
                    &operator_id,
                    &user_id,
                    &benutzer.beschreibung,
                    Some(&kanal),
                    &location,
                    &benutzer.edge,
                )?;
                benutzer.edge.handle.senden(
                    Command::UpdateToken,
                    vec![
                        operator_id.als_str().to_string(),
                        user_id.als_str().to_string(),
                        sonar_token::TOKEN_GRUND_JOIN.to_string(),
                        token,
                    ],
                );
                self.state.gauges_aktualisieren();
                Ok(vec![JOIN_PUSHED.to_string()])
            }
            None => {
                // Benutzer (noch) nicht verbunden: Absicht vormerken
                self.state.benutzer.join_future_anlegen(JoinChannelFuture {
                    operator_id,
                    user_id,
                    channel_id,
                    channel_beschreibung: beschreibung,
                    location,
                    erstellt: Instant::now(),
                });
                Ok(vec![JOIN_QUEUED.to_string()])
            }
        }
    }

    /// PART_USER_FROM_CHANNEL <operator> <user> <kanal>
    fn part_user_from_channel(&self, argumente: &[String]) -> ServiceResult {
        let operator_id = OperatorId::neu(pflicht_id(argument(argumente, 0)?, MAX_OPERATOR_ID_LAENGE)?);
        let user_id = UserId::neu(pflicht_id(argument(argumente, 1)?, MAX_USER_ID_LAENGE)?);
        let channel_id = ChannelId::neu(pflicht_id(argument(argumente, 2)?, MAX_CHANNEL_ID_LAENGE)?);

        let operator = self
            .state
            .operatoren
            .operator_falls_vorhanden(&operator_id)
            .ok_or_else(|| DomainFehler::KanalNichtGefunden(channel_id.als_str().to_string()))?;

        let kanal = operator
            .kanaele
            .kanal(&channel_id)
            .ok_or_else(|| DomainFehler::KanalNichtGefunden(channel_id.als_str().to_string()))?;

        // Der gecachte Kanal des Benutzers muss dem angefragten entsprechen
        if operator.cache.kanal_von(&user_id).as_ref() != Some(&channel_id) {
            return Err(DomainFehler::NichtInDiesemKanal(
                user_id.als_str().to_string(),
                channel_id.als_str().to_string(),
            )
            .into());
        }

        // Der gebundene Voice-Server muss erreichbar sein
        let server = self.state.voice.nach_id(&kanal.server_id).ok_or_else(|| {
            DomainFehler::NichtSynchron(format!(
                "Voice-Server {} des Kanals {} ist nicht verbunden",
                kanal.server_id, channel_id
            ))
        })?;

        server.edge.senden(
            Command::UnregisterUser,
            vec![
                server.server_id.to_string(),
                operator_id.als_str().to_string(),
                user_id.als_str().to_string(),
                channel_id.als_str().to_string(),
            ],
        );
        Ok(vec![])
    }

    /// DISCONNECT_USER <operator> <user> [grund]
    fn disconnect_user(&self, argumente: &[String]) -> ServiceResult {
        let operator_id = OperatorId::neu(pflicht_id(argument(argumente, 0)?, MAX_OPERATOR_ID_LAENGE)?);
        let user_id = UserId::neu(pflicht_id(argument(argumente, 1)?, MAX_USER_ID_LAENGE)?);
        let grund = match argumente.get(2) {
            Some(grund) => optionales_feld(grund, MAX_BESCHREIBUNG_LAENGE)?.to_string(),
            None => "DISCONNECTED".to_string(),
        };

        let operator = self
            .state
            .operatoren
            .operator_falls_vorhanden(&operator_id)
            .ok_or_else(|| DomainFehler::BenutzerNichtGefunden(user_id.als_str().to_string()))?;
        let benutzer = operator
            .benutzer_holen(&user_id)
            .ok_or_else(|| DomainFehler::BenutzerNichtGefunden(user_id.als_str().to_string()))?;

        benutzer.edge.handle.senden(
            Command::DisconnectUser,
            vec![
                operator_id.als_str().to_string(),
                user_id.als_str().to_string(),
                grund,
            ],
        );
        Ok(vec![])
    }

    /// DESTROY_CHANNEL <operator> <kanal> <grund> <nachricht>
    fn destroy_channel(&self, argumente: &[String]) -> ServiceResult {
        let operator_id = OperatorId::neu(pflicht_id(argument(argumente, 0)?, MAX_OPERATOR_ID_LAENGE)?);
        let channel_id = ChannelId::neu(pflicht_id(argument(argumente, 1)?, MAX_CHANNEL_ID_LAENGE)?);
        let grund = optionales_feld(argument(argumente, 2)?, MAX_BESCHREIBUNG_LAENGE)?.to_string();
        let nachricht = optionales_feld(argument(argumente, 3)?, MAX_BESCHREIBUNG_LAENGE)?.to_string();

        let operator = self
            .state
            .operatoren
            .operator_falls_vorhanden(&operator_id)
            .ok_or_else(|| DomainFehler::KanalNichtGefunden(channel_id.als_str().to_string()))?;
        let kanal = operator
            .kanaele
            .kanal(&channel_id)
            .ok_or_else(|| DomainFehler::KanalNichtGefunden(channel_id.als_str().to_string()))?;

        operator.kanaele.als_zerstoert_markieren(&channel_id);

        // Teardown nur relayen wenn der Server noch erreichbar ist; sonst
        // stillschweigend auslassen – der Orphan-Sweep raeumt den Cache
        if let Some(server) = self.state.voice.nach_id(&kanal.server_id) {
            server.edge.senden(
                Command::DestroyChannel,
                vec![
                    server.server_id.to_string(),
                    operator_id.als_str().to_string(),
                    channel_id.als_str().to_string(),
                    grund.clone(),
                    nachricht,
                ],
            );
        }

        operator.kanaele.unlinken(&channel_id);
        operator
            .ereignisse
            .veroeffentlichen(sonar_core::event::OperatorEreignis::KanalZerstoert {
                kanal_id: channel_id,
                grund,
            });
        self.state.gauges_aktualisieren();
        Ok(vec![])
    }

    /// GET_USERS_ONLINE_STATUS <operator> <user>...
    fn get_users_online_status(&self, argumente: &[String]) -> ServiceResult {
        let operator_id = OperatorId::neu(pflicht_id(argument(argumente, 0)?, MAX_OPERATOR_ID_LAENGE)?);
        // Mindestens ein Benutzer muss angefragt sein
        argument(argumente, 1)?;

        let operator = self.state.operatoren.operator_falls_vorhanden(&operator_id);

        let mut flags = Vec::with_capacity(argumente.len() - 1);
        for wert in &argumente[1..] {
            let user_id = UserId::neu(pflicht_id(wert, MAX_USER_ID_LAENGE)?);
            let online = operator
                .as_ref()
                .map(|o| o.ist_online(&user_id))
                .unwrap_or(false);
            flags.push(format!("{}:{}", user_id.als_str(), if online { 1 } else { 0 }));
        }
        Ok(flags)
    }

    /// GET_CHANNEL_USERS <operator> <kanal>
    fn get_channel_users(&self, argumente: &[String]) -> ServiceResult {
        let operator_id = OperatorId::neu(pflicht_id(argument(argumente, 0)?, MAX_OPERATOR_ID_LAENGE)?);
        let channel_id = ChannelId::neu(pflicht_id(argument(argumente, 1)?, MAX_CHANNEL_ID_LAENGE)?);

        let operator = self
            .state
            .operatoren
            .operator_falls_vorhanden(&operator_id)
            .ok_or_else(|| DomainFehler::KanalNichtGefunden(channel_id.als_str().to_string()))?;

        let mitglieder = operator.cache.benutzer_in(&channel_id);
        if mitglieder.is_empty() && operator.kanaele.kanal(&channel_id).is_none() {
            return Err(
                DomainFehler::KanalNichtGefunden(channel_id.als_str().to_string()).into(),
            );
        }

        Ok(mitglieder
            .into_iter()
            .map(|u| u.als_str().to_string())
            .collect())
    }

    /// GET_CONTROL_TOKEN <operator> <user> <beschreibung> <location> <client-adresse>
    fn get_control_token(&self, argumente: &[String]) -> ServiceResult {
        let operator_id = OperatorId::neu(pflicht_id(argument(argumente, 0)?, MAX_OPERATOR_ID_LAENGE)?);
        let user_id = UserId::neu(pflicht_id(argument(argumente, 1)?, MAX_USER_ID_LAENGE)?);
        let beschreibung = optionales_feld(argument(argumente, 2)?, MAX_BESCHREIBUNG_LAENGE)?;
        let location = optionales_feld(argument(argumente, 3)?, MAX_LOCATION_LAENGE)?;
        optionales_feld(argument(argumente, 4)?, MAX_ADRESSE_LAENGE)?;

        // Operator lazy anlegen – das Token ist der erste Kontakt
        self.state.operatoren.operator_holen(&operator_id);

        let edge = self
            .state
            .benutzer
            .zufaelliger_edge()
            .ok_or_else(|| DomainFehler::NichtVerfuegbar("Kein User-Edge verbunden".into()))?;

        let token = self.state.token_ausstellen(
            &operator_id,
            &user_id,
            beschreibung,
            None,
            location,
            &edge,
        )?;
        Ok(vec![token])
    }

    /// GET_CHANNEL_TOKEN <operator> <user> <beschreibung> <kanal>
    ///                   <kanal-beschreibung> <location> <client-adresse>
    fn get_channel_token(&self, argumente: &[String]) -> ServiceResult {
        let operator_id = OperatorId::neu(pflicht_id(argument(argumente, 0)?, MAX_OPERATOR_ID_LAENGE)?);
        let user_id = UserId::neu(pflicht_id(argument(argumente, 1)?, MAX_USER_ID_LAENGE)?);
        let beschreibung = optionales_feld(argument(argumente, 2)?, MAX_BESCHREIBUNG_LAENGE)?;
        let channel_id = ChannelId::neu(pflicht_id(argument(argumente, 3)?, MAX_CHANNEL_ID_LAENGE)?);
        let kanal_beschreibung = optionales_feld(argument(argumente, 4)?, MAX_BESCHREIBUNG_LAENGE)?;
        let location = optionales_feld(argument(argumente, 5)?, MAX_LOCATION_LAENGE)?;
        let client_adresse = optionales_feld(argument(argumente, 6)?, MAX_ADRESSE_LAENGE)?;

        let operator = self.state.operatoren.operator_holen(&operator_id);

        let kanal = operator.kanaele.kanal_erstellen(
            &channel_id,
            kanal_beschreibung,
            &self.state.voice,
            None,
            client_adresse,
            location,
        )?;

        let edge = self
            .state
            .benutzer
            .zufaelliger_edge()
            .ok_or_else(|| DomainFehler::NichtVerfuegbar("Kein User-Edge verbunden".into()))?;

        let token = self.state.token_ausstellen(
            &operator_id,
            &user_id,
            beschreibung,
            Some(&kanal),
            location,
            &edge,
        )?;
        self.state.gauges_aktualisieren();
        Ok(vec![token])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeHandle;
    use crate::geoip::StatischerPositionAnbieter;
    use crate::state::MasterConfig;
    use crate::user_manager::UserEdgeEintrag;
    use crate::voice_manager::VoiceServerEintrag;
    use sonar_core::types::{EdgeId, ServerId};
    use sonar_observability::SonarMetrics;
    use sonar_token::{SchluesselPaar, Token};
    use tokio::sync::mpsc;

    fn test_state() -> Arc<MasterState> {
        MasterState::neu(
            MasterConfig::default(),
            StatischerPositionAnbieter::leer(),
            SchluesselPaar::generieren(),
            SonarMetrics::neu().unwrap(),
        )
    }

    fn user_edge_anmelden(
        state: &MasterState,
    ) -> (Arc<UserEdgeEintrag>, mpsc::Receiver<WireFrame>) {
        let edge_id = EdgeId::neu();
        let (handle, rx) = EdgeHandle::neu(edge_id);
        let eintrag = Arc::new(UserEdgeEintrag {
            edge_id,
            oeffentliche_adresse: "edge.example.net".into(),
            oeffentlicher_port: 4710,
            handle,
        });
        state.benutzer.edge_registrieren(eintrag.clone());
        (eintrag, rx)
    }

    fn voice_server_anmelden(
        state: &MasterState,
    ) -> (Arc<VoiceServerEintrag>, mpsc::Receiver<WireFrame>) {
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

    fn anfrage(befehl: Command, argumente: &[&str]) -> WireFrame {
        WireFrame::neu(
            1,
            befehl,
            argumente.iter().map(|a| a.to_string()).collect(),
        )
    }

    fn erwarte_ok(antwort: &WireFrame) -> Vec<String> {
        match antwort.als_antwort() {
            Some(Ok(args)) => args.to_vec(),
            sonst => panic!("OK erwartet, erhalten: {sonst:?}"),
        }
    }

    fn erwarte_fehler(antwort: &WireFrame, code: ErrorCode) {
        match antwort.als_antwort() {
            Some(Err(erhalten)) => assert_eq!(erhalten, code),
            sonst => panic!("Fehler {code} erwartet, erhalten: {sonst:?}"),
        }
    }

    #[test]
    fn get_channel_token_ende_zu_ende() {
        let state = test_state();
        let (_edge, _rx) = user_edge_anmelden(&state);
        let (server, _voice_rx) = voice_server_anmelden(&state);
        let dienst = OperatorService::neu(state.clone());

        let antwort = dienst.verarbeiten(&anfrage(
            Command::GetChannelToken,
            &["acme", "u1", "User One", "c1", "Channel One", "", "1.2.3.4"],
        ));

        let args = erwarte_ok(&antwort);
        assert_eq!(args.len(), 1);

        // Kanal wurde unter "acme" angelegt und an den Server gebunden
        let operator = state.operatoren.operator_holen(&OperatorId::neu("acme"));
        let kanal = operator.kanaele.kanal(&ChannelId::neu("c1")).unwrap();
        assert_eq!(kanal.server_id, server.server_id);

        // Token verifiziert gegen den oeffentlichen Master-Schluessel
        let key = sonar_token::keys::verifying_key_aus_base64(
            &state.oeffentlicher_schluessel_base64(),
        )
        .unwrap();
        let token = Token::verifizieren(&args[0], &key, state.config.token_ttl_sek).unwrap();
        assert_eq!(token.operator_id, "acme");
        assert_eq!(token.channel_id, "c1");
        assert_eq!(token.voip_adresse, "10.0.0.5");
    }

    #[test]
    fn get_channel_token_ohne_voice_server() {
        let state = test_state();
        let (_edge, _rx) = user_edge_anmelden(&state);
        let dienst = OperatorService::neu(state);

        let antwort = dienst.verarbeiten(&anfrage(
            Command::GetChannelToken,
            &["acme", "u1", "x", "c1", "x", "", "1.2.3.4"],
        ));
        erwarte_fehler(&antwort, ErrorCode::ChannelAllocationFailed);
    }

    #[test]
    fn get_control_token_ohne_user_edge() {
        let state = test_state();
        let dienst = OperatorService::neu(state);

        let antwort = dienst.verarbeiten(&anfrage(
            Command::GetControlToken,
            &["acme", "u1", "x", "", "1.2.3.4"],
        ));
        erwarte_fehler(&antwort, ErrorCode::Unavailable);
    }

    #[test]
    fn destroy_unbekannter_kanal() {
        let state = test_state();
        let dienst = OperatorService::neu(state);

        let antwort = dienst.verarbeiten(&anfrage(
            Command::DestroyChannel,
            &["acme", "c1", "ADMIN_KICK", "bye"],
        ));
        erwarte_fehler(&antwort, ErrorCode::ChannelNotFound);
    }

    #[tokio::test]
    async fn destroy_relayed_teardown_und_unlinkt() {
        let state = test_state();
        let (_edge, _rx) = user_edge_anmelden(&state);
        let (server, mut voice_rx) = voice_server_anmelden(&state);
        let dienst = OperatorService::neu(state.clone());

        erwarte_ok(&dienst.verarbeiten(&anfrage(
            Command::GetChannelToken,
            &["acme", "u1", "x", "c1", "x", "", "1.2.3.4"],
        )));

        let antwort = dienst.verarbeiten(&anfrage(
            Command::DestroyChannel,
            &["acme", "c1", "ADMIN_KICK", "bye"],
        ));
        erwarte_ok(&antwort);

        // Teardown-Relay an die Voice-Edge
        let relay = voice_rx.recv().await.unwrap();
        assert_eq!(relay.befehl, "DESTROY_CHANNEL");
        assert_eq!(relay.argumente[0], server.server_id.to_string());
        assert_eq!(relay.argumente[2], "c1");

        // Kanal ist aus der lebenden Menge verschwunden
        let operator = state.operatoren.operator_holen(&OperatorId::neu("acme"));
        assert!(operator.kanaele.ist_unlinked_oder_zerstoert(&ChannelId::neu("c1")));
    }

    #[test]
    fn destroy_ohne_server_ist_stillschweigend_ok() {
        let state = test_state();
        let (_edge, _rx) = user_edge_anmelden(&state);
        let (server, _voice_rx) = voice_server_anmelden(&state);
        let dienst = OperatorService::neu(state.clone());

        erwarte_ok(&dienst.verarbeiten(&anfrage(
            Command::GetChannelToken,
            &["acme", "u1", "x", "c1", "x", "", "1.2.3.4"],
        )));

        // Server verschwindet bevor der Kanal zerstoert wird
        state.voice.entfernen(&server.server_id);

        let antwort = dienst.verarbeiten(&anfrage(
            Command::DestroyChannel,
            &["acme", "c1", "ADMIN_KICK", "bye"],
        ));
        erwarte_ok(&antwort);
    }

    #[tokio::test]
    async fn part_user_happy_path() {
        let state = test_state();
        let (edge, _rx) = user_edge_anmelden(&state);
        let (server, mut voice_rx) = voice_server_anmelden(&state);
        let dienst = OperatorService::neu(state.clone());

        state.benutzer_registrieren(
            &OperatorId::neu("acme"),
            &UserId::neu("u1"),
            "User",
            "1.2.3.4",
            edge,
        );
        erwarte_ok(&dienst.verarbeiten(&anfrage(
            Command::GetChannelToken,
            &["acme", "u1", "x", "c1", "x", "", "1.2.3.4"],
        )));
        // Beitritt wie vom Voice-Edge gemeldet
        let operator = state.operatoren.operator_holen(&OperatorId::neu("acme"));
        operator.cache.beitreten(&UserId::neu("u1"), &ChannelId::neu("c1"));

        let antwort = dienst.verarbeiten(&anfrage(
            Command::PartUserFromChannel,
            &["acme", "u1", "c1"],
        ));
        erwarte_ok(&antwort);

        let relay = voice_rx.recv().await.unwrap();
        assert_eq!(relay.befehl, "UNREGISTER_USER");
        assert_eq!(relay.argumente[0], server.server_id.to_string());
        assert_eq!(relay.argumente[2], "u1");
    }

    #[test]
    fn part_user_falscher_kanal() {
        let state = test_state();
        let (_edge, _rx) = user_edge_anmelden(&state);
        let (_server, _voice_rx) = voice_server_anmelden(&state);
        let dienst = OperatorService::neu(state.clone());

        erwarte_ok(&dienst.verarbeiten(&anfrage(
            Command::GetChannelToken,
            &["acme", "u1", "x", "c1", "x", "", "1.2.3.4"],
        )));
        let operator = state.operatoren.operator_holen(&OperatorId::neu("acme"));
        operator.cache.beitreten(&UserId::neu("u1"), &ChannelId::neu("c-anders"));

        let antwort = dienst.verarbeiten(&anfrage(
            Command::PartUserFromChannel,
            &["acme", "u1", "c1"],
        ));
        erwarte_fehler(&antwort, ErrorCode::NotInThatChannel);
    }

    #[test]
    fn part_user_unbekannter_kanal() {
        let state = test_state();
        let dienst = OperatorService::neu(state);

        let antwort = dienst.verarbeiten(&anfrage(
            Command::PartUserFromChannel,
            &["acme", "u1", "nie-gesehen"],
        ));
        erwarte_fehler(&antwort, ErrorCode::ChannelNotFound);
    }

    #[test]
    fn part_user_server_weg_ist_out_of_sync() {
        let state = test_state();
        let (_edge, _rx) = user_edge_anmelden(&state);
        let (server, _voice_rx) = voice_server_anmelden(&state);
        let dienst = OperatorService::neu(state.clone());

        erwarte_ok(&dienst.verarbeiten(&anfrage(
            Command::GetChannelToken,
            &["acme", "u1", "x", "c1", "x", "", "1.2.3.4"],
        )));
        let operator = state.operatoren.operator_holen(&OperatorId::neu("acme"));
        operator.cache.beitreten(&UserId::neu("u1"), &ChannelId::neu("c1"));
        state.voice.entfernen(&server.server_id);

        let antwort = dienst.verarbeiten(&anfrage(
            Command::PartUserFromChannel,
            &["acme", "u1", "c1"],
        ));
        erwarte_fehler(&antwort, ErrorCode::OutOfSync);
    }

    #[tokio::test]
    async fn join_verbundener_benutzer_erhaelt_push() {
        let state = test_state();
        let (edge, mut edge_rx) = user_edge_anmelden(&state);
        let (_server, _voice_rx) = voice_server_anmelden(&state);
        let dienst = OperatorService::neu(state.clone());

        state.benutzer_registrieren(
            &OperatorId::neu("acme"),
            &UserId::neu("u1"),
            "User",
            "1.2.3.4",
            edge,
        );

        let antwort = dienst.verarbeiten(&anfrage(
            Command::JoinUserToChannel,
            &["acme", "eu", "u1", "c1", "Kanal Eins"],
        ));
        assert_eq!(erwarte_ok(&antwort), vec![JOIN_PUSHED.to_string()]);

        let push = edge_rx.recv().await.unwrap();
        assert_eq!(push.befehl, "UPDATE_TOKEN");
        assert_eq!(push.argumente[1], "u1");
        assert_eq!(push.argumente[2], "JOIN");
    }

    #[test]
    fn join_unverbundener_benutzer_wird_vorgemerkt() {
        let state = test_state();
        let dienst = OperatorService::neu(state.clone());

        let antwort = dienst.verarbeiten(&anfrage(
            Command::JoinUserToChannel,
            &["acme", "eu", "u1", "c1", "Kanal Eins"],
        ));
        assert_eq!(erwarte_ok(&antwort), vec![JOIN_QUEUED.to_string()]);
        assert_eq!(state.benutzer.futures_anzahl(), 1);
    }

    #[tokio::test]
    async fn disconnect_user_relayed_an_edge() {
        let state = test_state();
        let (edge, mut edge_rx) = user_edge_anmelden(&state);
        let dienst = OperatorService::neu(state.clone());

        state.benutzer_registrieren(
            &OperatorId::neu("acme"),
            &UserId::neu("u1"),
            "User",
            "1.2.3.4",
            edge,
        );

        let antwort = dienst.verarbeiten(&anfrage(
            Command::DisconnectUser,
            &["acme", "u1", "ADMIN_KICK"],
        ));
        erwarte_ok(&antwort);

        let push = edge_rx.recv().await.unwrap();
        assert_eq!(push.befehl, "DISCONNECT_USER");
        assert_eq!(push.argumente[2], "ADMIN_KICK");
    }

    #[test]
    fn disconnect_unbekannter_benutzer() {
        let state = test_state();
        let dienst = OperatorService::neu(state);

        let antwort =
            dienst.verarbeiten(&anfrage(Command::DisconnectUser, &["acme", "u1"]));
        erwarte_fehler(&antwort, ErrorCode::UserNotFound);
    }

    #[test]
    fn online_status_flags() {
        let state = test_state();
        let (edge, _rx) = user_edge_anmelden(&state);
        let dienst = OperatorService::neu(state.clone());

        state.benutzer_registrieren(
            &OperatorId::neu("acme"),
            &UserId::neu("u1"),
            "User",
            "1.2.3.4",
            edge,
        );

        let antwort = dienst.verarbeiten(&anfrage(
            Command::GetUsersOnlineStatus,
            &["acme", "u1", "u2"],
        ));
        assert_eq!(
            erwarte_ok(&antwort),
            vec!["u1:1".to_string(), "u2:0".to_string()]
        );
    }

    #[test]
    fn channel_users_aus_dem_cache() {
        let state = test_state();
        let (_edge, _rx) = user_edge_anmelden(&state);
        let (_server, _voice_rx) = voice_server_anmelden(&state);
        let dienst = OperatorService::neu(state.clone());

        erwarte_ok(&dienst.verarbeiten(&anfrage(
            Command::GetChannelToken,
            &["acme", "u1", "x", "c1", "x", "", "1.2.3.4"],
        )));
        let operator = state.operatoren.operator_holen(&OperatorId::neu("acme"));
        operator.cache.beitreten(&UserId::neu("u1"), &ChannelId::neu("c1"));
        operator.cache.beitreten(&UserId::neu("u2"), &ChannelId::neu("c1"));

        let antwort =
            dienst.verarbeiten(&anfrage(Command::GetChannelUsers, &["acme", "c1"]));
        let mut benutzer = erwarte_ok(&antwort);
        benutzer.sort();
        assert_eq!(benutzer, vec!["u1".to_string(), "u2".to_string()]);

        let unbekannt =
            dienst.verarbeiten(&anfrage(Command::GetChannelUsers, &["acme", "c9"]));
        erwarte_fehler(&unbekannt, ErrorCode::ChannelNotFound);
    }

    #[test]
    fn zu_wenige_argumente() {
        let state = test_state();
        let dienst = OperatorService::neu(state);

        let antwort = dienst.verarbeiten(&anfrage(Command::GetChannelToken, &["acme", "u1"]));
        erwarte_fehler(&antwort, ErrorCode::NotEnoughArguments);
    }

    #[test]
    fn ueberlange_felder_sind_invalid_argument() {
        let state = test_state();
        let dienst = OperatorService::neu(state);

        let zu_lang = "x".repeat(MAX_OPERATOR_ID_LAENGE + 1);
        let antwort = dienst.verarbeiten(&anfrage(
            Command::GetControlToken,
            &[&zu_lang, "u1", "x", "", "1.2.3.4"],
        ));
        erwarte_fehler(&antwort, ErrorCode::InvalidArgument);
    }

    #[test]
    fn unbekannter_befehl() {
        let state = test_state();
        let dienst = OperatorService::neu(state);

        let antwort = dienst.verarbeiten(&WireFrame::roh(1, "FROBNICATE", vec![]));
        erwarte_fehler(&antwort, ErrorCode::InvalidArgument);
    }

    #[test]
    fn metriken_werden_verbucht() {
        let state = test_state();
        let dienst = OperatorService::neu(state.clone());

        dienst.verarbeiten(&anfrage(Command::Keepalive, &[]));
        dienst.verarbeiten(&anfrage(
            Command::DestroyChannel,
            &["acme", "c1", "x", "y"],
        ));

        assert_eq!(
            state
                .metriken
                .requests_total
                .with_label_values(&["KEEPALIVE"])
                .get(),
            1
        );
        assert_eq!(state.metriken.request_failures_total.get(), 1);
        assert_eq!(
            state
                .metriken
                .request_errors_total
                .with_label_values(&["CHANNEL_NOT_FOUND"])
                .get(),
            1
        );
    }
}

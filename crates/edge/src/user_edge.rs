//! User-Edge – Relay fuer Endbenutzer-Steuerverbindungen
//!
//! Endbenutzer registrieren sich mit einem vom Master gepraegten Token
//! (`REGISTER <token>`); die Edge verifiziert es gegen den oeffentlichen
//! Master-Schluessel und relayed die Registrierung als `USER_REGISTERED`
//! zum Master. Pro Verbindung laeuft eine Token-Erneuerungs-Schleife die
//! beim Trennen abgebrochen wird.
//!
//! Eine lokale Zweitregistrierung desselben Benutzers verdraengt die
//! erste (`LOGGED_IN_ELSEWHERE`); Cross-Edge-Verdraengung pusht der Master
//! ueber `UNREGISTER`.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use sonar_core::types::{OperatorId, UserId};
use sonar_net::inbound;
use sonar_net::outbound::{
    AusgehendHandler, AusgehendeVerbindung, VerbindungsHandle, VerbindungsOptionen,
};
use sonar_observability::{HealthState, SonarMetrics};
use sonar_protocol::command::{Command, ErrorCode};
use sonar_protocol::wire::{LineCodec, WireFrame};
use sonar_token::{keys, Token, TOKEN_GRUND_REFRESH};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

/// Groesse der Sende-Queue pro Endbenutzer-Verbindung
const CLIENT_QUEUE_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration des User-Edge
#[derive(Debug, Clone)]
pub struct UserEdgeConfig {
    /// Bind-Adresse fuer Endbenutzer-Verbindungen
    pub bind_adresse: String,
    /// Adresse des Master User-Edge-Dienstes
    pub master_adresse: String,
    /// Oeffentliche Adresse dieser Edge (landet in Tokens)
    pub oeffentliche_adresse: String,
    pub oeffentlicher_port: u16,
    /// Oeffentlicher Master-Schluessel (Base64) fuer die Token-Pruefung
    pub master_schluessel_base64: String,
    /// Maximalalter akzeptierter Tokens in Sekunden
    pub token_max_alter_sek: i64,
    /// Intervall der Token-Erneuerung in Sekunden
    pub token_refresh_sek: u64,
    /// Registrierungsfrist fuer Endbenutzer in Sekunden
    pub registrierungs_frist_sek: u64,
}

impl Default for UserEdgeConfig {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0:4710".into(),
            master_adresse: "127.0.0.1:4701".into(),
            oeffentliche_adresse: "127.0.0.1".into(),
            oeffentlicher_port: 4710,
            master_schluessel_base64: String::new(),
            token_max_alter_sek: 300,
            token_refresh_sek: 180,
            registrierungs_frist_sek: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Client-Eintrag
// ---------------------------------------------------------------------------

struct ClientEintrag {
    operator_id: OperatorId,
    user_id: UserId,
    /// Laufende Nummer der Verbindung; schuetzt Cleanup gegen Verdraengung
    verbindungs_nr: u64,
    tx: mpsc::Sender<WireFrame>,
    refresh: Mutex<Option<JoinHandle<()>>>,
}

impl ClientEintrag {
    /// Bricht die Token-Erneuerung ab (Pflicht beim Trennen)
    fn refresh_abbrechen(&self) {
        if let Some(handle) = self.refresh.lock().take() {
            handle.abort();
        }
    }

    /// Pusht einen Unregister an den Client; die Verbindungs-Schleife
    /// schliesst nach dem Senden
    fn verwerfen(&self, grund: &str) {
        self.refresh_abbrechen();
        let _ = self
            .tx
            .try_send(WireFrame::neu(0, Command::Unregister, vec![grund.to_string()]));
    }
}

struct UserEdgeInner {
    config: UserEdgeConfig,
    master_schluessel: ed25519_dalek::VerifyingKey,
    clients: DashMap<(OperatorId, UserId), Arc<ClientEintrag>>,
    verbindungs_zaehler: AtomicU64,
    metriken: Arc<SonarMetrics>,
    health: HealthState,
}

impl UserEdgeInner {
    /// Verarbeitet einen Push/eine Anfrage des Masters
    fn master_push(&self, frame: &WireFrame) -> WireFrame {
        match Command::parse(&frame.befehl) {
            // UPDATE_TOKEN <operator> <user> <grund> <token>
            Some(Command::UpdateToken) if frame.argumente.len() >= 4 => {
                let schluessel = (
                    OperatorId::neu(frame.argumente[0].clone()),
                    UserId::neu(frame.argumente[1].clone()),
                );
                match self.clients.get(&schluessel) {
                    Some(eintrag) => {
                        let _ = eintrag.tx.try_send(WireFrame::neu(
                            0,
                            Command::UpdateToken,
                            vec![frame.argumente[2].clone(), frame.argumente[3].clone()],
                        ));
                        WireFrame::antwort_ok(frame.id, vec![])
                    }
                    None => WireFrame::antwort_fehler(frame.id, ErrorCode::UserNotFound),
                }
            }

            // UNREGISTER / DISCONNECT_USER <operator> <user> <grund>
            Some(Command::Unregister) | Some(Command::DisconnectUser)
                if frame.argumente.len() >= 3 =>
            {
                let schluessel = (
                    OperatorId::neu(frame.argumente[0].clone()),
                    UserId::neu(frame.argumente[1].clone()),
                );
                if let Some((_, eintrag)) = self.clients.remove(&schluessel) {
                    eintrag.verwerfen(&frame.argumente[2]);
                }
                // Idempotent: unbekannte Benutzer sind kein Fehler
                WireFrame::antwort_ok(frame.id, vec![])
            }

            _ => WireFrame::antwort_fehler(frame.id, ErrorCode::InvalidArgument),
        }
    }

    /// Verwirft alle lokalen Clients (Master-Verbindung verloren)
    fn alle_verwerfen(&self, grund: &str) -> usize {
        let schluessel: Vec<(OperatorId, UserId)> =
            self.clients.iter().map(|e| e.key().clone()).collect();
        let anzahl = schluessel.len();
        for key in schluessel {
            if let Some((_, eintrag)) = self.clients.remove(&key) {
                eintrag.verwerfen(grund);
            }
        }
        anzahl
    }
}

// ---------------------------------------------------------------------------
// Upstream-Handler
// ---------------------------------------------------------------------------

struct UserEdgeHandler {
    inner: Arc<UserEdgeInner>,
}

#[async_trait]
impl AusgehendHandler for UserEdgeHandler {
    async fn registrieren(
        &self,
        handle: &VerbindungsHandle,
    ) -> Result<(), sonar_net::NetzFehler> {
        handle
            .anfrage_ok(
                Command::Register,
                vec![
                    "USER_EDGE".to_string(),
                    self.inner.config.oeffentliche_adresse.clone(),
                    self.inner.config.oeffentlicher_port.to_string(),
                ],
            )
            .await?;
        self.inner.health.upstream_status_setzen(true);
        Ok(())
    }

    async fn nachricht(&self, frame: WireFrame, handle: &VerbindungsHandle) {
        let antwort = self.inner.master_push(&frame);
        let _ = handle.senden(antwort).await;
    }

    async fn getrennt(&self) {
        self.inner.health.upstream_status_setzen(false);
        let verworfen = self.inner.alle_verwerfen(ErrorCode::TryAgain.als_str());
        if verworfen > 0 {
            tracing::warn!(verworfen, "Master-Verbindung weg – lokale Benutzer verworfen");
        }
    }
}

// ---------------------------------------------------------------------------
// UserEdgeServer
// ---------------------------------------------------------------------------

/// Der User-Edge-Prozess
pub struct UserEdgeServer {
    inner: Arc<UserEdgeInner>,
}

impl UserEdgeServer {
    /// Erstellt den Server; schlaegt fehl wenn der Master-Schluessel nicht
    /// dekodierbar ist
    pub fn neu(
        config: UserEdgeConfig,
        metriken: Arc<SonarMetrics>,
        health: HealthState,
    ) -> anyhow::Result<Self> {
        let master_schluessel = keys::verifying_key_aus_base64(&config.master_schluessel_base64)
            .map_err(|e| anyhow::anyhow!("Master-Schluessel unbrauchbar: {e}"))?;
        Ok(Self {
            inner: Arc::new(UserEdgeInner {
                config,
                master_schluessel,
                clients: DashMap::new(),
                verbindungs_zaehler: AtomicU64::new(1),
                metriken,
                health,
            }),
        })
    }

    /// Gibt die Anzahl lokal registrierter Benutzer zurueck
    pub fn client_anzahl(&self) -> usize {
        self.inner.clients.len()
    }

    /// Bindet die Client-Adresse und laeuft bis zum Shutdown-Signal
    pub async fn starten(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.inner.config.bind_adresse).await?;
        self.laufen(listener, shutdown).await
    }

    /// Betreibt einen bereits gebundenen Listener (Tests binden Port 0)
    pub async fn laufen(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        tracing::info!(
            clients = %listener.local_addr()?,
            master = %self.inner.config.master_adresse,
            "User-Edge startet"
        );

        let (verbindung, master) = AusgehendeVerbindung::neu(
            self.inner.config.master_adresse.clone(),
            Arc::new(UserEdgeHandler {
                inner: self.inner.clone(),
            }),
            VerbindungsOptionen::default(),
        );
        tokio::spawn(verbindung.betreiben(shutdown.clone()));

        loop {
            tokio::select! {
                ergebnis = listener.accept() => {
                    match ergebnis {
                        Ok((stream, peer)) => {
                            tokio::spawn(client_verbindung(
                                self.inner.clone(),
                                master.clone(),
                                stream,
                                peer,
                                shutdown.clone(),
                            ));
                        }
                        Err(e) => {
                            tracing::warn!(fehler = %e, "Accept fehlgeschlagen");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("User-Edge wird beendet");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Endbenutzer-Verbindung
// ---------------------------------------------------------------------------

async fn client_verbindung(
    inner: Arc<UserEdgeInner>,
    master: VerbindungsHandle,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut framed = Framed::new(stream, LineCodec::neu());
    let frist = Duration::from_secs(inner.config.registrierungs_frist_sek);

    let frame = match inbound::registrierung_erwarten(&mut framed, frist).await {
        Ok(frame) => frame,
        Err(e) => {
            tracing::info!(peer = %peer, fehler = %e, "Benutzer-Registrierung abgebrochen");
            inner
                .metriken
                .registrations_total
                .with_label_values(&["user_client", "failure"])
                .inc();
            return;
        }
    };

    // REGISTER <token>
    let token_roh = match (Command::parse(&frame.befehl), frame.argumente.first()) {
        (Some(Command::Register), Some(roh)) => roh.as_str(),
        _ => {
            let _ = inbound::fehler_senden(&mut framed, frame.id, ErrorCode::InvalidArgument).await;
            inner
                .metriken
                .registrations_total
                .with_label_values(&["user_client", "failure"])
                .inc();
            return;
        }
    };

    let token = match Token::verifizieren(
        token_roh,
        &inner.master_schluessel,
        inner.config.token_max_alter_sek,
    ) {
        Ok(token) => token,
        Err(e) => {
            tracing::info!(peer = %peer, fehler = %e, "Token abgelehnt");
            let _ = inbound::fehler_senden(&mut framed, frame.id, ErrorCode::InvalidToken).await;
            inner
                .metriken
                .registrations_total
                .with_label_values(&["user_client", "failure"])
                .inc();
            return;
        }
    };

    let schluessel = (
        OperatorId::neu(token.operator_id.clone()),
        UserId::neu(token.user_id.clone()),
    );
    let verbindungs_nr = inner.verbindungs_zaehler.fetch_add(1, Ordering::Relaxed);
    let (tx, mut rx) = mpsc::channel(CLIENT_QUEUE_GROESSE);
    let eintrag = Arc::new(ClientEintrag {
        operator_id: schluessel.0.clone(),
        user_id: schluessel.1.clone(),
        verbindungs_nr,
        tx,
        refresh: Mutex::new(None),
    });

    // Lokale Zweitregistrierung verdraengt die erste
    if let Some(alt) = inner.clients.insert(schluessel.clone(), eintrag.clone()) {
        tracing::info!(
            operator = %schluessel.0,
            user = %schluessel.1,
            "Lokale Zweitregistrierung – alte Verbindung wird geschlossen"
        );
        alt.verwerfen(ErrorCode::LoggedInElsewhere.als_str());
    }

    // Registrierung zum Master relayen; ohne Master gibt es nur TRY_AGAIN
    let upstream = master
        .anfrage_ok(
            Command::UserRegistered,
            vec![
                token.operator_id.clone(),
                token.user_id.clone(),
                token.user_beschreibung.clone(),
                peer.ip().to_string(),
            ],
        )
        .await;
    if let Err(e) = upstream {
        tracing::warn!(peer = %peer, fehler = %e, "Registrierungs-Relay fehlgeschlagen");
        let _ = inbound::fehler_senden(&mut framed, frame.id, ErrorCode::TryAgain).await;
        inner
            .clients
            .remove_if(&schluessel, |_, e| e.verbindungs_nr == verbindungs_nr);
        inner
            .metriken
            .registrations_total
            .with_label_values(&["user_client", "failure"])
            .inc();
        return;
    }

    if inbound::ok_senden(&mut framed, frame.id, vec![]).await.is_err() {
        inner
            .clients
            .remove_if(&schluessel, |_, e| e.verbindungs_nr == verbindungs_nr);
        return;
    }
    inner
        .metriken
        .registrations_total
        .with_label_values(&["user_client", "success"])
        .inc();
    tracing::info!(peer = %peer, operator = %schluessel.0, user = %schluessel.1, "Benutzer registriert");

    // Token-Erneuerung planen; wird beim Trennen abgebrochen
    let refresh_handle = tokio::spawn(refresh_schleife(
        inner.clone(),
        master.clone(),
        eintrag.clone(),
    ));
    *eintrag.refresh.lock() = Some(refresh_handle);

    // true sobald der Master bzw. der Client selbst die Abmeldung kennt
    let mut abgemeldet = false;

    loop {
        tokio::select! {
            gelesen = framed.next() => {
                match gelesen {
                    Some(Ok(frame)) => match Command::parse(&frame.befehl) {
                        Some(Command::Keepalive) => {
                            if inbound::ok_senden(&mut framed, frame.id, vec![]).await.is_err() {
                                break;
                            }
                        }
                        Some(Command::Unregister) => {
                            // Freiwillige Abmeldung des Clients
                            let _ = master
                                .senden(WireFrame::neu(
                                    master.naechste_id(),
                                    Command::UserUnregistered,
                                    vec![
                                        schluessel.0.als_str().to_string(),
                                        schluessel.1.als_str().to_string(),
                                        "CLIENT".to_string(),
                                    ],
                                ))
                                .await;
                            abgemeldet = true;
                            let _ = inbound::ok_senden(&mut framed, frame.id, vec![]).await;
                            break;
                        }
                        _ => {
                            if inbound::fehler_senden(&mut framed, frame.id, ErrorCode::InvalidArgument)
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    },
                    Some(Err(e)) => {
                        tracing::warn!(peer = %peer, fehler = %e, "Frame-Lesefehler");
                        break;
                    }
                    None => break,
                }
            }
            ausgehend = rx.recv() => {
                match ausgehend {
                    Some(frame) => {
                        let schliessen = frame.befehl == Command::Unregister.als_str();
                        if framed.send(frame).await.is_err() {
                            break;
                        }
                        if schliessen {
                            // Verdraengt oder vom Master getrennt – Abmeldung
                            // ist bereits bekannt
                            abgemeldet = true;
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    // Cleanup: nur wenn unser Eintrag noch der aktuelle ist
    let noch_aktuell = inner
        .clients
        .remove_if(&schluessel, |_, e| e.verbindungs_nr == verbindungs_nr)
        .is_some();
    eintrag.refresh_abbrechen();
    if noch_aktuell && !abgemeldet {
        let _ = master
            .senden(WireFrame::neu(
                master.naechste_id(),
                Command::UserUnregistered,
                vec![
                    schluessel.0.als_str().to_string(),
                    schluessel.1.als_str().to_string(),
                    "DISCONNECTED".to_string(),
                ],
            ))
            .await;
    }
    inner
        .metriken
        .disconnects_total
        .with_label_values(&["user_client"])
        .inc();
    tracing::info!(peer = %peer, user = %schluessel.1, "Benutzer-Verbindung beendet");
}

/// Erneuert das Token periodisch bis die Verbindung endet
async fn refresh_schleife(
    inner: Arc<UserEdgeInner>,
    master: VerbindungsHandle,
    eintrag: Arc<ClientEintrag>,
) {
    let intervall = Duration::from_secs(inner.config.token_refresh_sek);
    loop {
        tokio::time::sleep(intervall).await;
        match master
            .anfrage_ok(
                Command::RefreshToken,
                vec![
                    eintrag.operator_id.als_str().to_string(),
                    eintrag.user_id.als_str().to_string(),
                ],
            )
            .await
        {
            Ok(args) if !args.is_empty() => {
                let _ = eintrag.tx.try_send(WireFrame::neu(
                    0,
                    Command::UpdateToken,
                    vec![TOKEN_GRUND_REFRESH.to_string(), args[0].clone()],
                ));
                tracing::debug!(user = %eintrag.user_id, "Token erneuert");
            }
            Ok(_) => {}
            Err(e) => {
                // Naechster Zyklus versucht es erneut; bei Verdraengung wird
                // die Schleife ohnehin abgebrochen
                tracing::debug!(user = %eintrag.user_id, fehler = %e, "Token-Erneuerung fehlgeschlagen");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sonar_token::SchluesselPaar;

    /// Minimaler Master-Ersatz fuer den User-Edge-Dienst: beantwortet
    /// REGISTER und alle Relays mit OK
    async fn fake_master(listener: TcpListener) {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut framed = Framed::new(stream, LineCodec::neu());
                while let Some(Ok(frame)) = framed.next().await {
                    if frame.ist_antwort() {
                        continue;
                    }
                    if framed
                        .send(WireFrame::antwort_ok(frame.id, vec![]))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            });
        }
    }

    struct TestUmgebung {
        paar: SchluesselPaar,
        edge_adresse: String,
        _shutdown_tx: watch::Sender<bool>,
    }

    async fn edge_starten() -> TestUmgebung {
        let paar = SchluesselPaar::generieren();

        let master_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let master_adresse = master_listener.local_addr().unwrap().to_string();
        tokio::spawn(fake_master(master_listener));

        let edge_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let edge_adresse = edge_listener.local_addr().unwrap().to_string();

        let config = UserEdgeConfig {
            master_adresse,
            master_schluessel_base64: paar.oeffentlich_base64(),
            registrierungs_frist_sek: 2,
            ..Default::default()
        };
        let server = UserEdgeServer::neu(
            config,
            SonarMetrics::neu().unwrap(),
            HealthState::neu(),
        )
        .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(server.laufen(edge_listener, shutdown_rx));

        TestUmgebung {
            paar,
            edge_adresse,
            _shutdown_tx: shutdown_tx,
        }
    }

    fn test_token(paar: &SchluesselPaar, user: &str) -> String {
        Token {
            operator_id: "acme".into(),
            user_id: user.into(),
            user_beschreibung: "Testbenutzer".into(),
            channel_id: String::new(),
            channel_beschreibung: String::new(),
            location: String::new(),
            erstellt_am: Utc::now().timestamp(),
            edge_adresse: "127.0.0.1".into(),
            edge_port: 4710,
            voip_adresse: String::new(),
            voip_port: 0,
        }
        .signieren(paar.signing_key())
        .unwrap()
    }

    async fn registrieren(
        umgebung: &TestUmgebung,
        token: &str,
    ) -> Framed<TcpStream, LineCodec> {
        let stream = TcpStream::connect(&umgebung.edge_adresse).await.unwrap();
        let mut framed = Framed::new(stream, LineCodec::neu());
        framed
            .send(WireFrame::neu(1, Command::Register, vec![token.to_string()]))
            .await
            .unwrap();
        let antwort = framed.next().await.unwrap().unwrap();
        assert!(
            matches!(antwort.als_antwort(), Some(Ok(_))),
            "Registrierung fehlgeschlagen: {antwort:?}"
        );
        framed
    }

    #[tokio::test]
    async fn gueltiges_token_registriert() {
        let umgebung = edge_starten().await;
        let token = test_token(&umgebung.paar, "u1");
        let mut framed = registrieren(&umgebung, &token).await;

        // Keepalive funktioniert nach der Registrierung
        framed
            .send(WireFrame::neu(2, Command::Keepalive, vec![]))
            .await
            .unwrap();
        let antwort = framed.next().await.unwrap().unwrap();
        assert!(matches!(antwort.als_antwort(), Some(Ok(_))));
    }

    #[tokio::test]
    async fn manipuliertes_token_wird_abgelehnt() {
        let umgebung = edge_starten().await;
        let mut token = test_token(&umgebung.paar, "u1");
        token.push('x');

        let stream = TcpStream::connect(&umgebung.edge_adresse).await.unwrap();
        let mut framed = Framed::new(stream, LineCodec::neu());
        framed
            .send(WireFrame::neu(1, Command::Register, vec![token]))
            .await
            .unwrap();

        let antwort = framed.next().await.unwrap().unwrap();
        match antwort.als_antwort() {
            Some(Err(code)) => assert_eq!(code, ErrorCode::InvalidToken),
            sonst => panic!("INVALID_TOKEN erwartet, erhalten: {sonst:?}"),
        }
    }

    #[tokio::test]
    async fn abgelaufenes_token_wird_abgelehnt() {
        let umgebung = edge_starten().await;
        let alt = Token {
            operator_id: "acme".into(),
            user_id: "u1".into(),
            user_beschreibung: String::new(),
            channel_id: String::new(),
            channel_beschreibung: String::new(),
            location: String::new(),
            erstellt_am: Utc::now().timestamp() - 3600,
            edge_adresse: "127.0.0.1".into(),
            edge_port: 4710,
            voip_adresse: String::new(),
            voip_port: 0,
        }
        .signieren(umgebung.paar.signing_key())
        .unwrap();

        let stream = TcpStream::connect(&umgebung.edge_adresse).await.unwrap();
        let mut framed = Framed::new(stream, LineCodec::neu());
        framed
            .send(WireFrame::neu(1, Command::Register, vec![alt]))
            .await
            .unwrap();

        let antwort = framed.next().await.unwrap().unwrap();
        match antwort.als_antwort() {
            Some(Err(code)) => assert_eq!(code, ErrorCode::InvalidToken),
            sonst => panic!("INVALID_TOKEN erwartet, erhalten: {sonst:?}"),
        }
    }

    #[tokio::test]
    async fn lokale_zweitregistrierung_verdraengt_erste() {
        let umgebung = edge_starten().await;
        let token = test_token(&umgebung.paar, "u1");

        let mut erste = registrieren(&umgebung, &token).await;
        let _zweite = registrieren(&umgebung, &token).await;

        // Die erste Verbindung muss UNREGISTER LOGGED_IN_ELSEWHERE erhalten
        let push = tokio::time::timeout(Duration::from_secs(5), erste.next())
            .await
            .expect("Push erwartet")
            .unwrap()
            .unwrap();
        assert_eq!(push.befehl, "UNREGISTER");
        assert_eq!(push.argumente[0], "LOGGED_IN_ELSEWHERE");

        // Danach schliesst die Edge die erste Verbindung
        let ende = tokio::time::timeout(Duration::from_secs(5), erste.next())
            .await
            .expect("Verbindungsende erwartet");
        assert!(ende.is_none());
    }

    #[tokio::test]
    async fn registrierungs_frist_ohne_register() {
        let umgebung = edge_starten().await;

        let stream = TcpStream::connect(&umgebung.edge_adresse).await.unwrap();
        let mut framed = Framed::new(stream, LineCodec::neu());
        // Nichts senden
        let antwort = tokio::time::timeout(Duration::from_secs(5), framed.next())
            .await
            .expect("TIMEOUT-Antwort erwartet")
            .unwrap()
            .unwrap();
        match antwort.als_antwort() {
            Some(Err(code)) => assert_eq!(code, ErrorCode::Timeout),
            sonst => panic!("TIMEOUT erwartet, erhalten: {sonst:?}"),
        }
    }
}

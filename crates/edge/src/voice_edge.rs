//! Voice-Edge – Relay fuer Voice-Server-Registrierungen
//!
//! Voice-Server melden sich mit `REGISTER <server-id> <voip-adresse>
//! <voip-port> <max-clients> <location>`. Vor dem Abschluss bestaetigt die
//! Edge die behauptete VoIP-Adresse per UDP-Challenge; ein Server dessen
//! Adresse nie antwortet erhaelt keine erfolgreiche Registrierung sondern
//! laeuft in den Timeout. Danach werden Registrierung sowie Join/Leave-
//! Ereignisse transparent zum Master relayed; Unregister- und
//! Teardown-Anweisungen des Masters laufen in Gegenrichtung.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use sonar_core::types::ServerId;
use sonar_net::inbound;
use sonar_net::outbound::{
    AusgehendHandler, AusgehendeVerbindung, VerbindungsHandle, VerbindungsOptionen,
};
use sonar_observability::{HealthState, SonarMetrics};
use sonar_protocol::command::{Command, ErrorCode};
use sonar_protocol::wire::{LineCodec, WireFrame};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;

use crate::challenge::ChallengeManager;

/// Groesse der Sende-Queue pro Voice-Server-Verbindung
const CLIENT_QUEUE_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration der Voice-Edge
#[derive(Debug, Clone)]
pub struct VoiceEdgeConfig {
    /// Bind-Adresse fuer Voice-Server-Verbindungen
    pub bind_adresse: String,
    /// Adresse des Master Voice-Edge-Dienstes
    pub master_adresse: String,
    /// Bind-Adresse des UDP-Challenge-Sockets
    pub challenge_bind_adresse: String,
    /// Timeout fuer die Challenge-Bestaetigung in Millisekunden
    pub challenge_timeout_ms: u64,
    /// Registrierungsfrist fuer Voice-Server in Sekunden
    pub registrierungs_frist_sek: u64,
}

impl Default for VoiceEdgeConfig {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0:4720".into(),
            master_adresse: "127.0.0.1:4702".into(),
            challenge_bind_adresse: "0.0.0.0:0".into(),
            challenge_timeout_ms: 2000,
            registrierungs_frist_sek: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Client-Eintrag
// ---------------------------------------------------------------------------

struct VoiceClientEintrag {
    server_id: ServerId,
    verbindungs_nr: u64,
    tx: mpsc::Sender<WireFrame>,
}

impl VoiceClientEintrag {
    fn verwerfen(&self, grund: &str) {
        let _ = self
            .tx
            .try_send(WireFrame::neu(0, Command::Unregister, vec![grund.to_string()]));
    }
}

struct VoiceEdgeInner {
    config: VoiceEdgeConfig,
    clients: DashMap<ServerId, Arc<VoiceClientEintrag>>,
    verbindungs_zaehler: AtomicU64,
    metriken: Arc<SonarMetrics>,
    health: HealthState,
}

impl VoiceEdgeInner {
    /// Verarbeitet einen Push/eine Anfrage des Masters
    fn master_push(&self, frame: &WireFrame) -> WireFrame {
        match Command::parse(&frame.befehl) {
            // UNREGISTER_USER <server-id> <operator> <user> <kanal>
            Some(Command::UnregisterUser) if frame.argumente.len() >= 4 => {
                let Some(server_id) = ServerId::parse(&frame.argumente[0]) else {
                    return WireFrame::antwort_fehler(frame.id, ErrorCode::InvalidArgument);
                };
                match self.clients.get(&server_id) {
                    Some(eintrag) => {
                        let _ = eintrag.tx.try_send(WireFrame::neu(
                            0,
                            Command::UnregisterUser,
                            frame.argumente[1..4].to_vec(),
                        ));
                        WireFrame::antwort_ok(frame.id, vec![])
                    }
                    None => WireFrame::antwort_fehler(frame.id, ErrorCode::OutOfSync),
                }
            }

            // DESTROY_CHANNEL <server-id> <operator> <kanal> <grund> <nachricht>
            Some(Command::DestroyChannel) if frame.argumente.len() >= 5 => {
                let Some(server_id) = ServerId::parse(&frame.argumente[0]) else {
                    return WireFrame::antwort_fehler(frame.id, ErrorCode::InvalidArgument);
                };
                match self.clients.get(&server_id) {
                    Some(eintrag) => {
                        let _ = eintrag.tx.try_send(WireFrame::neu(
                            0,
                            Command::DestroyChannel,
                            frame.argumente[1..5].to_vec(),
                        ));
                        WireFrame::antwort_ok(frame.id, vec![])
                    }
                    None => WireFrame::antwort_fehler(frame.id, ErrorCode::OutOfSync),
                }
            }

            _ => WireFrame::antwort_fehler(frame.id, ErrorCode::InvalidArgument),
        }
    }

    /// Verwirft alle lokalen Voice-Server (Master-Verbindung verloren)
    fn alle_verwerfen(&self, grund: &str) -> usize {
        let ids: Vec<ServerId> = self.clients.iter().map(|e| *e.key()).collect();
        let anzahl = ids.len();
        for id in ids {
            if let Some((_, eintrag)) = self.clients.remove(&id) {
                eintrag.verwerfen(grund);
            }
        }
        anzahl
    }
}

// ---------------------------------------------------------------------------
// Upstream-Handler
// ---------------------------------------------------------------------------

struct VoiceEdgeHandler {
    inner: Arc<VoiceEdgeInner>,
}

#[async_trait]
impl AusgehendHandler for VoiceEdgeHandler {
    async fn registrieren(
        &self,
        handle: &VerbindungsHandle,
    ) -> Result<(), sonar_net::NetzFehler> {
        handle
            .anfrage_ok(Command::Register, vec!["VOICE_EDGE".to_string()])
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
            tracing::warn!(
                verworfen,
                "Master-Verbindung weg – lokale Voice-Server verworfen"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// VoiceEdgeServer
// ---------------------------------------------------------------------------

/// Der Voice-Edge-Prozess
pub struct VoiceEdgeServer {
    inner: Arc<VoiceEdgeInner>,
}

impl VoiceEdgeServer {
    /// Erstellt den Server
    pub fn neu(
        config: VoiceEdgeConfig,
        metriken: Arc<SonarMetrics>,
        health: HealthState,
    ) -> Self {
        Self {
            inner: Arc::new(VoiceEdgeInner {
                config,
                clients: DashMap::new(),
                verbindungs_zaehler: AtomicU64::new(1),
                metriken,
                health,
            }),
        }
    }

    /// Gibt die Anzahl lokal registrierter Voice-Server zurueck
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
        let challenges = ChallengeManager::neu(
            &self.inner.config.challenge_bind_adresse,
            Duration::from_millis(self.inner.config.challenge_timeout_ms),
        )
        .await?;

        tracing::info!(
            clients = %listener.local_addr()?,
            master = %self.inner.config.master_adresse,
            challenge = %challenges.lokale_adresse()?,
            "Voice-Edge startet"
        );

        let (verbindung, master) = AusgehendeVerbindung::neu(
            self.inner.config.master_adresse.clone(),
            Arc::new(VoiceEdgeHandler {
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
                            tokio::spawn(voice_server_verbindung(
                                self.inner.clone(),
                                master.clone(),
                                challenges.clone(),
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
        tracing::info!("Voice-Edge wird beendet");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Voice-Server-Verbindung
// ---------------------------------------------------------------------------

async fn voice_server_verbindung(
    inner: Arc<VoiceEdgeInner>,
    master: VerbindungsHandle,
    challenges: Arc<ChallengeManager>,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut framed = Framed::new(stream, LineCodec::neu());
    let frist = Duration::from_secs(inner.config.registrierungs_frist_sek);

    let frame = match inbound::registrierung_erwarten(&mut framed, frist).await {
        Ok(frame) => frame,
        Err(e) => {
            tracing::info!(peer = %peer, fehler = %e, "Voice-Server-Registrierung abgebrochen");
            inner
                .metriken
                .registrations_total
                .with_label_values(&["voice_server", "failure"])
                .inc();
            return;
        }
    };

    // REGISTER <server-id> <voip-adresse> <voip-port> <max-clients> <location>
    let registrierung = voice_registrierung_parsen(&frame);
    let Some((server_id, voip_adresse, voip_port, max_clients, location)) = registrierung else {
        let _ = inbound::fehler_senden(&mut framed, frame.id, ErrorCode::InvalidArgument).await;
        inner
            .metriken
            .registrations_total
            .with_label_values(&["voice_server", "failure"])
            .inc();
        return;
    };

    // UDP-Challenge gegen die behauptete Adresse; ohne Echo keine Registrierung
    let ziel = match IpAddr::from_str(&voip_adresse) {
        Ok(ip) => SocketAddr::new(ip, voip_port),
        Err(_) => {
            let _ = inbound::fehler_senden(&mut framed, frame.id, ErrorCode::InvalidArgument).await;
            inner
                .metriken
                .registrations_total
                .with_label_values(&["voice_server", "failure"])
                .inc();
            return;
        }
    };
    if !challenges.bestaetigen(ziel).await {
        tracing::info!(peer = %peer, ziel = %ziel, "Challenge nicht bestaetigt – Registrierung abgelehnt");
        inner
            .metriken
            .challenges_total
            .with_label_values(&["failure"])
            .inc();
        inner
            .metriken
            .registrations_total
            .with_label_values(&["voice_server", "failure"])
            .inc();
        let _ = inbound::fehler_senden(&mut framed, frame.id, ErrorCode::Timeout).await;
        return;
    }
    inner
        .metriken
        .challenges_total
        .with_label_values(&["success"])
        .inc();

    let verbindungs_nr = inner.verbindungs_zaehler.fetch_add(1, Ordering::Relaxed);
    let (tx, mut rx) = mpsc::channel(CLIENT_QUEUE_GROESSE);
    let eintrag = Arc::new(VoiceClientEintrag {
        server_id,
        verbindungs_nr,
        tx,
    });
    if let Some(alt) = inner.clients.insert(server_id, eintrag.clone()) {
        tracing::info!(server_id = %server_id, "Voice-Server-Zweitregistrierung – alte Verbindung wird geschlossen");
        alt.verwerfen(ErrorCode::TryAgain.als_str());
    }

    // Registrierung zum Master relayen
    let upstream = master
        .anfrage_ok(
            Command::VoiceServerRegistered,
            vec![
                server_id.to_string(),
                voip_adresse.clone(),
                voip_port.to_string(),
                max_clients.to_string(),
                location.clone(),
            ],
        )
        .await;
    if let Err(e) = upstream {
        tracing::warn!(peer = %peer, fehler = %e, "Registrierungs-Relay fehlgeschlagen");
        let _ = inbound::fehler_senden(&mut framed, frame.id, ErrorCode::TryAgain).await;
        inner
            .clients
            .remove_if(&server_id, |_, e| e.verbindungs_nr == verbindungs_nr);
        inner
            .metriken
            .registrations_total
            .with_label_values(&["voice_server", "failure"])
            .inc();
        return;
    }

    if inbound::ok_senden(&mut framed, frame.id, vec![]).await.is_err() {
        inner
            .clients
            .remove_if(&server_id, |_, e| e.verbindungs_nr == verbindungs_nr);
        return;
    }
    inner
        .metriken
        .registrations_total
        .with_label_values(&["voice_server", "success"])
        .inc();
    tracing::info!(peer = %peer, server_id = %server_id, voip = %ziel, "Voice-Server registriert");

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
                        // USER_JOINED_CHANNEL / USER_LEFT_CHANNEL <operator> <user> <kanal>
                        Some(Command::UserJoinedChannel) | Some(Command::UserLeftChannel)
                            if frame.argumente.len() >= 3 =>
                        {
                            let relay = WireFrame::roh(
                                master.naechste_id(),
                                frame.befehl.clone(),
                                frame.argumente.clone(),
                            );
                            let _ = master.senden(relay).await;
                            if inbound::ok_senden(&mut framed, frame.id, vec![]).await.is_err() {
                                break;
                            }
                        }
                        Some(Command::Unregister) => {
                            // Sauberer Abbau durch den Voice-Server
                            let _ = master
                                .senden(WireFrame::neu(
                                    master.naechste_id(),
                                    Command::VoiceServerUnregistered,
                                    vec![server_id.to_string()],
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

    let noch_aktuell = inner
        .clients
        .remove_if(&server_id, |_, e| e.verbindungs_nr == verbindungs_nr)
        .is_some();
    if noch_aktuell && !abgemeldet {
        let _ = master
            .senden(WireFrame::neu(
                master.naechste_id(),
                Command::VoiceServerUnregistered,
                vec![server_id.to_string()],
            ))
            .await;
    }
    inner
        .metriken
        .disconnects_total
        .with_label_values(&["voice_server"])
        .inc();
    tracing::info!(peer = %peer, server_id = %server_id, "Voice-Server-Verbindung beendet");
}

fn voice_registrierung_parsen(frame: &WireFrame) -> Option<(ServerId, String, u16, u32, String)> {
    if Command::parse(&frame.befehl) != Some(Command::Register) {
        return None;
    }
    let server_id = ServerId::parse(frame.argumente.first()?)?;
    let voip_adresse = frame.argumente.get(1)?.clone();
    let voip_port: u16 = frame.argumente.get(2)?.parse().ok()?;
    let max_clients: u32 = frame.argumente.get(3)?.parse().ok()?;
    let location = frame.argumente.get(4)?.clone();
    if voip_adresse.is_empty() {
        return None;
    }
    Some((server_id, voip_adresse, voip_port, max_clients, location))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

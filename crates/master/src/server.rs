//! MasterServer – Die vier TCP-Dienste des Masters
//!
//! - **Operator-Dienst**: `REGISTER <operatorId>`, danach Steuerbefehle
//! - **User-Edge-Dienst**: `REGISTER USER_EDGE <adresse> <port>`, danach
//!   Registrierungs-Relays und Token-Erneuerung; Pushes in Gegenrichtung
//! - **Voice-Edge-Dienst**: `REGISTER VOICE_EDGE`, danach Server- und
//!   Mitgliedschafts-Relays; Unregister/Teardown-Pushes in Gegenrichtung
//! - **Event-Dienst**: `SUBSCRIBE <operatorId>`, danach Event-Strom
//!
//! Jede akzeptierte Verbindung laeuft in einem eigenen tokio-Task. Die
//! Registrierungsfrist wird fuer alle Dienste gleich durchgesetzt;
//! Protokollfehler werden als Wire-Fehler beantwortet und beenden die
//! Verbindung nicht.

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use sonar_core::types::{EdgeId, OperatorId, ServerId, UserId};
use sonar_net::inbound;
use sonar_net::VerbindungsZustand;
use sonar_protocol::command::{Command, ErrorCode};
use sonar_protocol::limits::{id_gueltig, MAX_OPERATOR_ID_LAENGE, MAX_USER_ID_LAENGE};
use sonar_protocol::wire::{LineCodec, WireFrame};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::codec::Framed;

use crate::edge::EdgeHandle;
use crate::orphan::OrphanTask;
use crate::service::OperatorService;
use crate::state::MasterState;
use crate::user_manager::UserEdgeEintrag;
use crate::voice_manager::VoiceServerEintrag;

// ---------------------------------------------------------------------------
// Bind-Adressen
// ---------------------------------------------------------------------------

/// Bind-Adressen der vier Master-Dienste
#[derive(Debug, Clone)]
pub struct MasterBindAdressen {
    pub operator: String,
    pub user_edge: String,
    pub voice_edge: String,
    pub event: String,
}

impl Default for MasterBindAdressen {
    fn default() -> Self {
        Self {
            operator: "0.0.0.0:4700".into(),
            user_edge: "0.0.0.0:4701".into(),
            voice_edge: "0.0.0.0:4702".into(),
            event: "0.0.0.0:4703".into(),
        }
    }
}

/// Gebundene Listener der vier Dienste (fuer Tests auf Port 0)
pub struct MasterListeners {
    pub operator: TcpListener,
    pub user_edge: TcpListener,
    pub voice_edge: TcpListener,
    pub event: TcpListener,
}

/// Dienst-Art einer akzeptierten Verbindung
#[derive(Debug, Clone, Copy)]
enum Dienst {
    Operator,
    UserEdge,
    VoiceEdge,
    Event,
}

impl Dienst {
    fn als_str(&self) -> &'static str {
        match self {
            Self::Operator => "operator",
            Self::UserEdge => "user_edge",
            Self::VoiceEdge => "voice_edge",
            Self::Event => "event",
        }
    }
}

// ---------------------------------------------------------------------------
// MasterServer
// ---------------------------------------------------------------------------

/// Betreibt die vier TCP-Dienste und den Orphan-Sweep
pub struct MasterServer {
    state: Arc<MasterState>,
    binds: MasterBindAdressen,
}

impl MasterServer {
    /// Erstellt einen neuen MasterServer
    pub fn neu(state: Arc<MasterState>, binds: MasterBindAdressen) -> Self {
        Self { state, binds }
    }

    /// Bindet alle Dienste und laeuft bis zum Shutdown-Signal
    pub async fn starten(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let listeners = MasterListeners {
            operator: TcpListener::bind(&self.binds.operator).await?,
            user_edge: TcpListener::bind(&self.binds.user_edge).await?,
            voice_edge: TcpListener::bind(&self.binds.voice_edge).await?,
            event: TcpListener::bind(&self.binds.event).await?,
        };
        self.laufen(listeners, shutdown).await
    }

    /// Betreibt bereits gebundene Listener (Tests binden auf Port 0)
    pub async fn laufen(
        self,
        listeners: MasterListeners,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        tracing::info!(
            operator = %listeners.operator.local_addr()?,
            user_edge = %listeners.user_edge.local_addr()?,
            voice_edge = %listeners.voice_edge.local_addr()?,
            event = %listeners.event.local_addr()?,
            "Master-Dienste gebunden"
        );

        let _orphan_task = OrphanTask::neu(self.state.clone()).starten(shutdown.clone());

        tokio::spawn(akzeptieren(
            listeners.operator,
            self.state.clone(),
            Dienst::Operator,
            shutdown.clone(),
        ));
        tokio::spawn(akzeptieren(
            listeners.user_edge,
            self.state.clone(),
            Dienst::UserEdge,
            shutdown.clone(),
        ));
        tokio::spawn(akzeptieren(
            listeners.voice_edge,
            self.state.clone(),
            Dienst::VoiceEdge,
            shutdown.clone(),
        ));
        tokio::spawn(akzeptieren(
            listeners.event,
            self.state.clone(),
            Dienst::Event,
            shutdown.clone(),
        ));

        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        tracing::info!("Master wird beendet");
        Ok(())
    }
}

/// Accept-Schleife eines Dienstes
async fn akzeptieren(
    listener: TcpListener,
    state: Arc<MasterState>,
    dienst: Dienst,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            ergebnis = listener.accept() => {
                match ergebnis {
                    Ok((stream, peer)) => {
                        let state = state.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            match dienst {
                                Dienst::Operator => {
                                    operator_verbindung(state, stream, peer, shutdown).await
                                }
                                Dienst::UserEdge => {
                                    user_edge_verbindung(state, stream, peer, shutdown).await
                                }
                                Dienst::VoiceEdge => {
                                    voice_edge_verbindung(state, stream, peer, shutdown).await
                                }
                                Dienst::Event => {
                                    event_verbindung(state, stream, peer, shutdown).await
                                }
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(dienst = dienst.als_str(), fehler = %e, "Accept fehlgeschlagen");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Gemeinsame Helfer
// ---------------------------------------------------------------------------

fn arg(frame: &WireFrame, index: usize) -> std::result::Result<&str, ErrorCode> {
    frame
        .argumente
        .get(index)
        .map(String::as_str)
        .ok_or(ErrorCode::NotEnoughArguments)
}

fn registrierung_verbuchen(state: &MasterState, dienst: Dienst, erfolgreich: bool) {
    let outcome = if erfolgreich { "success" } else { "failure" };
    state
        .metriken
        .registrations_total
        .with_label_values(&[dienst.als_str(), outcome])
        .inc();
}

fn trennung_verbuchen(state: &MasterState, dienst: Dienst) {
    state
        .metriken
        .disconnects_total
        .with_label_values(&[dienst.als_str()])
        .inc();
}

// ---------------------------------------------------------------------------
// Operator-Dienst
// ---------------------------------------------------------------------------

async fn operator_verbindung(
    state: Arc<MasterState>,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut framed = Framed::new(stream, LineCodec::neu());
    let frist = Duration::from_secs(state.config.registrierungs_frist_sek);
    let mut zustand = VerbindungsZustand::Registrieren;
    tracing::debug!(peer = %peer, zustand = ?zustand, "Operator-Verbindung angenommen");

    let frame = match inbound::registrierung_erwarten(&mut framed, frist).await {
        Ok(frame) => frame,
        Err(e) => {
            tracing::info!(peer = %peer, fehler = %e, "Operator-Registrierung abgebrochen");
            registrierung_verbuchen(&state, Dienst::Operator, false);
            return;
        }
    };

    let operator_id = match (Command::parse(&frame.befehl), frame.argumente.first()) {
        (Some(Command::Register), Some(id)) if id_gueltig(id, MAX_OPERATOR_ID_LAENGE) => {
            OperatorId::neu(id.clone())
        }
        _ => {
            let _ = inbound::fehler_senden(&mut framed, frame.id, ErrorCode::InvalidArgument).await;
            registrierung_verbuchen(&state, Dienst::Operator, false);
            return;
        }
    };

    state.operatoren.operator_holen(&operator_id);
    if inbound::ok_senden(&mut framed, frame.id, vec![]).await.is_err() {
        return;
    }
    zustand = VerbindungsZustand::Registriert;
    registrierung_verbuchen(&state, Dienst::Operator, true);
    tracing::info!(peer = %peer, operator = %operator_id, zustand = ?zustand, "Operator-Client registriert");

    let dienst = OperatorService::neu(state.clone());
    let leerlauf_frist = Duration::from_secs(state.config.keepalive_sek * 3);

    loop {
        tokio::select! {
            gelesen = tokio::time::timeout(leerlauf_frist, framed.next()) => {
                match gelesen {
                    Err(_) => {
                        tracing::warn!(peer = %peer, "Operator-Verbindung im Leerlauf-Timeout");
                        break;
                    }
                    Ok(Some(Ok(frame))) => {
                        if frame.ist_antwort() {
                            continue;
                        }
                        let antwort = dienst.verarbeiten(&frame);
                        if framed.send(antwort).await.is_err() {
                            break;
                        }
                    }
                    Ok(Some(Err(e))) => {
                        tracing::warn!(peer = %peer, fehler = %e, "Frame-Lesefehler");
                        break;
                    }
                    Ok(None) => break,
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    zustand = VerbindungsZustand::Geschlossen;
    trennung_verbuchen(&state, Dienst::Operator);
    tracing::info!(peer = %peer, operator = %operator_id, zustand = ?zustand, "Operator-Verbindung beendet");
}

// ---------------------------------------------------------------------------
// User-Edge-Dienst
// ---------------------------------------------------------------------------

async fn user_edge_verbindung(
    state: Arc<MasterState>,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut framed = Framed::new(stream, LineCodec::neu());
    let frist = Duration::from_secs(state.config.registrierungs_frist_sek);

    let frame = match inbound::registrierung_erwarten(&mut framed, frist).await {
        Ok(frame) => frame,
        Err(e) => {
            tracing::info!(peer = %peer, fehler = %e, "User-Edge-Registrierung abgebrochen");
            registrierung_verbuchen(&state, Dienst::UserEdge, false);
            return;
        }
    };

    // REGISTER USER_EDGE <oeffentliche-adresse> <port>
    let eintrag = match registrierung_user_edge(&frame) {
        Some(eintrag) => eintrag,
        None => {
            let _ = inbound::fehler_senden(&mut framed, frame.id, ErrorCode::InvalidArgument).await;
            registrierung_verbuchen(&state, Dienst::UserEdge, false);
            return;
        }
    };
    let (handle, mut queue_rx) = EdgeHandle::neu(eintrag.0);
    let eintrag = Arc::new(UserEdgeEintrag {
        edge_id: eintrag.0,
        oeffentliche_adresse: eintrag.1,
        oeffentlicher_port: eintrag.2,
        handle,
    });

    state.benutzer.edge_registrieren(eintrag.clone());
    if inbound::ok_senden(&mut framed, frame.id, vec![eintrag.edge_id.to_string()])
        .await
        .is_err()
    {
        state.benutzer.edge_entfernen(&eintrag.edge_id);
        return;
    }
    registrierung_verbuchen(&state, Dienst::UserEdge, true);
    tracing::info!(peer = %peer, edge_id = %eintrag.edge_id, "User-Edge registriert");

    loop {
        tokio::select! {
            gelesen = framed.next() => {
                match gelesen {
                    Some(Ok(frame)) => {
                        if frame.ist_antwort() {
                            // Edge-Antworten auf Master-Pushes sind rein informativ
                            continue;
                        }
                        let antwort = user_edge_frame(&state, &eintrag, &frame);
                        if framed.send(antwort).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(peer = %peer, fehler = %e, "Frame-Lesefehler");
                        break;
                    }
                    None => break,
                }
            }
            Some(push) = queue_rx.recv() => {
                if framed.send(push).await.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    state.benutzer.edge_entfernen(&eintrag.edge_id);
    let entfernte_benutzer = state.benutzer_von_edge_entfernen(&eintrag.edge_id);
    trennung_verbuchen(&state, Dienst::UserEdge);
    tracing::info!(
        peer = %peer,
        edge_id = %eintrag.edge_id,
        entfernte_benutzer,
        "User-Edge-Verbindung beendet"
    );
}

fn registrierung_user_edge(frame: &WireFrame) -> Option<(EdgeId, String, u16)> {
    if Command::parse(&frame.befehl) != Some(Command::Register) {
        return None;
    }
    if frame.argumente.first().map(String::as_str) != Some("USER_EDGE") {
        return None;
    }
    let adresse = frame.argumente.get(1)?.clone();
    let port: u16 = frame.argumente.get(2)?.parse().ok()?;
    if adresse.is_empty() {
        return None;
    }
    Some((EdgeId::neu(), adresse, port))
}

fn user_edge_frame(
    state: &Arc<MasterState>,
    eintrag: &Arc<UserEdgeEintrag>,
    frame: &WireFrame,
) -> WireFrame {
    state
        .metriken
        .requests_total
        .with_label_values(&[frame.befehl.as_str()])
        .inc();

    let ergebnis: std::result::Result<Vec<String>, ErrorCode> = (|| {
        match Command::parse(&frame.befehl) {
            Some(Command::Keepalive) => Ok(vec![]),

            // USER_REGISTERED <operator> <user> <beschreibung> <remote-adresse>
            Some(Command::UserRegistered) => {
                let operator_id = arg(frame, 0)?;
                let user_id = arg(frame, 1)?;
                let beschreibung = arg(frame, 2)?;
                let remote = arg(frame, 3)?;
                if !id_gueltig(operator_id, MAX_OPERATOR_ID_LAENGE)
                    || !id_gueltig(user_id, MAX_USER_ID_LAENGE)
                {
                    return Err(ErrorCode::InvalidArgument);
                }
                state.benutzer_registrieren(
                    &OperatorId::neu(operator_id),
                    &UserId::neu(user_id),
                    beschreibung,
                    remote,
                    eintrag.clone(),
                );
                Ok(vec![])
            }

            // USER_UNREGISTERED <operator> <user> <grund>
            Some(Command::UserUnregistered) => {
                let operator_id = OperatorId::neu(arg(frame, 0)?);
                let user_id = UserId::neu(arg(frame, 1)?);
                let grund = frame.argumente.get(2).cloned().unwrap_or_default();
                // Idempotent: verspaetete Abmeldungen sind kein Fehler
                state.benutzer_entfernen(&operator_id, &user_id, &eintrag.edge_id, &grund);
                Ok(vec![])
            }

            // REFRESH_TOKEN <operator> <user>
            Some(Command::RefreshToken) => {
                let operator_id = OperatorId::neu(arg(frame, 0)?);
                let user_id = UserId::neu(arg(frame, 1)?);
                match state.token_erneuern(&operator_id, &user_id, &eintrag.edge_id) {
                    Ok(token) => Ok(vec![token]),
                    Err(e) => Err(e.wire_code()),
                }
            }

            _ => Err(ErrorCode::InvalidArgument),
        }
    })();

    match ergebnis {
        Ok(argumente) => WireFrame::antwort_ok(frame.id, argumente),
        Err(code) => {
            state.metriken.fehler_verbuchen(code.als_str());
            WireFrame::antwort_fehler(frame.id, code)
        }
    }
}

// ---------------------------------------------------------------------------
// Voice-Edge-Dienst
// ---------------------------------------------------------------------------

async fn voice_edge_verbindung(
    state: Arc<MasterState>,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut framed = Framed::new(stream, LineCodec::neu());
    let frist = Duration::from_secs(state.config.registrierungs_frist_sek);

    let frame = match inbound::registrierung_erwarten(&mut framed, frist).await {
        Ok(frame) => frame,
        Err(e) => {
            tracing::info!(peer = %peer, fehler = %e, "Voice-Edge-Registrierung abgebrochen");
            registrierung_verbuchen(&state, Dienst::VoiceEdge, false);
            return;
        }
    };

    let ist_voice_edge = Command::parse(&frame.befehl) == Some(Command::Register)
        && frame.argumente.first().map(String::as_str) == Some("VOICE_EDGE");
    if !ist_voice_edge {
        let _ = inbound::fehler_senden(&mut framed, frame.id, ErrorCode::InvalidArgument).await;
        registrierung_verbuchen(&state, Dienst::VoiceEdge, false);
        return;
    }

    let edge_id = EdgeId::neu();
    let (handle, mut queue_rx) = EdgeHandle::neu(edge_id);

    if inbound::ok_senden(&mut framed, frame.id, vec![edge_id.to_string()])
        .await
        .is_err()
    {
        return;
    }
    registrierung_verbuchen(&state, Dienst::VoiceEdge, true);
    tracing::info!(peer = %peer, edge_id = %edge_id, "Voice-Edge registriert");

    loop {
        tokio::select! {
            gelesen = framed.next() => {
                match gelesen {
                    Some(Ok(frame)) => {
                        if frame.ist_antwort() {
                            continue;
                        }
                        let antwort = voice_edge_frame(&state, &handle, &frame);
                        if framed.send(antwort).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(peer = %peer, fehler = %e, "Frame-Lesefehler");
                        break;
                    }
                    None => break,
                }
            }
            Some(push) = queue_rx.recv() => {
                if framed.send(push).await.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    let entfernte_server = state.voice.alle_von_edge_entfernen(&edge_id);
    state.gauges_aktualisieren();
    trennung_verbuchen(&state, Dienst::VoiceEdge);
    tracing::info!(
        peer = %peer,
        edge_id = %edge_id,
        entfernte_server,
        "Voice-Edge-Verbindung beendet"
    );
}

fn voice_edge_frame(
    state: &Arc<MasterState>,
    handle: &EdgeHandle,
    frame: &WireFrame,
) -> WireFrame {
    state
        .metriken
        .requests_total
        .with_label_values(&[frame.befehl.as_str()])
        .inc();

    let ergebnis: std::result::Result<Vec<String>, ErrorCode> = (|| {
        match Command::parse(&frame.befehl) {
            Some(Command::Keepalive) => Ok(vec![]),

            // VOICE_SERVER_REGISTERED <server-id> <voip-adresse> <voip-port>
            //                         <max-clients> <location>
            Some(Command::VoiceServerRegistered) => {
                let server_id =
                    ServerId::parse(arg(frame, 0)?).ok_or(ErrorCode::InvalidArgument)?;
                let voip_adresse = arg(frame, 1)?.to_string();
                let voip_port: u16 = arg(frame, 2)?
                    .parse()
                    .map_err(|_| ErrorCode::InvalidArgument)?;
                let max_clients: u32 = arg(frame, 3)?
                    .parse()
                    .map_err(|_| ErrorCode::InvalidArgument)?;
                let location = arg(frame, 4)?.to_string();
                if voip_adresse.is_empty() {
                    return Err(ErrorCode::InvalidArgument);
                }

                state.voice.registrieren(Arc::new(VoiceServerEintrag {
                    server_id,
                    voip_adresse,
                    voip_port,
                    max_clients,
                    location,
                    edge: handle.clone(),
                }));
                state.gauges_aktualisieren();
                Ok(vec![])
            }

            // VOICE_SERVER_UNREGISTERED <server-id>
            Some(Command::VoiceServerUnregistered) => {
                let server_id =
                    ServerId::parse(arg(frame, 0)?).ok_or(ErrorCode::InvalidArgument)?;
                state.voice.entfernen(&server_id);
                state.gauges_aktualisieren();
                Ok(vec![])
            }

            // USER_JOINED_CHANNEL <operator> <user> <kanal>
            Some(Command::UserJoinedChannel) => {
                let operator_id = OperatorId::neu(arg(frame, 0)?);
                let user_id = UserId::neu(arg(frame, 1)?);
                let kanal_id = sonar_core::types::ChannelId::neu(arg(frame, 2)?);

                let operator = state.operatoren.operator_holen(&operator_id);
                if operator.cache.beitreten(&user_id, &kanal_id) {
                    if let Some(kanal) = operator.kanaele.kanal(&kanal_id) {
                        state.voice.belegung_erhoehen(&kanal.server_id);
                    }
                    operator.ereignisse.veroeffentlichen(
                        sonar_core::event::OperatorEreignis::KanalBetreten {
                            user_id,
                            kanal_id,
                        },
                    );
                }
                Ok(vec![])
            }

            // USER_LEFT_CHANNEL <operator> <user> <kanal>
            Some(Command::UserLeftChannel) => {
                let operator_id = OperatorId::neu(arg(frame, 0)?);
                let user_id = UserId::neu(arg(frame, 1)?);
                let kanal_id = sonar_core::types::ChannelId::neu(arg(frame, 2)?);

                let operator = state.operatoren.operator_holen(&operator_id);
                if operator.cache.verlassen(&user_id, &kanal_id) {
                    if let Some(kanal) = operator.kanaele.kanal(&kanal_id) {
                        state.voice.belegung_verringern(&kanal.server_id);
                    }
                    operator.ereignisse.veroeffentlichen(
                        sonar_core::event::OperatorEreignis::KanalVerlassen {
                            user_id,
                            kanal_id,
                        },
                    );
                }
                Ok(vec![])
            }

            _ => Err(ErrorCode::InvalidArgument),
        }
    })();

    match ergebnis {
        Ok(argumente) => WireFrame::antwort_ok(frame.id, argumente),
        Err(code) => {
            state.metriken.fehler_verbuchen(code.als_str());
            WireFrame::antwort_fehler(frame.id, code)
        }
    }
}

// ---------------------------------------------------------------------------
// Event-Dienst
// ---------------------------------------------------------------------------

async fn event_verbindung(
    state: Arc<MasterState>,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut framed = Framed::new(stream, LineCodec::neu());
    let frist = Duration::from_secs(state.config.registrierungs_frist_sek);

    let frame = match inbound::registrierung_erwarten(&mut framed, frist).await {
        Ok(frame) => frame,
        Err(e) => {
            tracing::info!(peer = %peer, fehler = %e, "Event-Abonnement abgebrochen");
            registrierung_verbuchen(&state, Dienst::Event, false);
            return;
        }
    };

    // SUBSCRIBE <operatorId>
    let operator_id = match (Command::parse(&frame.befehl), frame.argumente.first()) {
        (Some(Command::Subscribe), Some(id)) if id_gueltig(id, MAX_OPERATOR_ID_LAENGE) => {
            OperatorId::neu(id.clone())
        }
        _ => {
            let _ = inbound::fehler_senden(&mut framed, frame.id, ErrorCode::InvalidArgument).await;
            registrierung_verbuchen(&state, Dienst::Event, false);
            return;
        }
    };

    let operator = state.operatoren.operator_holen(&operator_id);
    let mut ereignisse = operator.ereignisse.abonnieren();

    if inbound::ok_senden(&mut framed, frame.id, vec![]).await.is_err() {
        return;
    }
    registrierung_verbuchen(&state, Dienst::Event, true);
    tracing::info!(peer = %peer, operator = %operator_id, "Event-Abonnent registriert");

    loop {
        tokio::select! {
            gelesen = framed.next() => {
                match gelesen {
                    Some(Ok(frame)) => {
                        if frame.ist_antwort() {
                            continue;
                        }
                        let antwort = match Command::parse(&frame.befehl) {
                            Some(Command::Keepalive) => WireFrame::antwort_ok(frame.id, vec![]),
                            _ => WireFrame::antwort_fehler(frame.id, ErrorCode::InvalidArgument),
                        };
                        if framed.send(antwort).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(peer = %peer, fehler = %e, "Frame-Lesefehler");
                        break;
                    }
                    None => break,
                }
            }
            ereignis = ereignisse.recv() => {
                match ereignis {
                    Ok(ereignis) => {
                        let frame = WireFrame::neu(0, Command::Event, ereignis.wire_argumente());
                        if framed.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(verpasst)) => {
                        tracing::warn!(
                            peer = %peer,
                            operator = %operator_id,
                            verpasst,
                            "Event-Abonnent zu langsam – wird getrennt"
                        );
                        break;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    trennung_verbuchen(&state, Dienst::Event);
    tracing::info!(peer = %peer, operator = %operator_id, "Event-Verbindung beendet");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

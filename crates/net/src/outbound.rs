//! Basisverhalten fuer ausgehende Verbindungen (Edge -> Master)
//!
//! Eine [`AusgehendeVerbindung`] haelt die Verbindung zum Master dauerhaft:
//! Verbindungsaufbau, Registrierung, Keepalive, Reconnect mit Backoff.
//! Nach jedem Reconnect wird neu registriert und der Handler via
//! [`AusgehendHandler::getrennt`] aufgefordert, alle lokal gehaltenen
//! Clients zu verwerfen – der Master-Zustand ist nach einem Reconnect
//! autoritativ.
//!
//! Das [`VerbindungsHandle`] ist ueber Reconnects hinweg stabil: Anfragen
//! landen in einer Queue, die von der jeweils aktiven Verbindung
//! abgearbeitet wird.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use sonar_protocol::command::Command;
use sonar_protocol::wire::{LineCodec, WireFrame};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::codec::Framed;

use crate::error::NetzFehler;
use crate::request::RequestTracker;

// ---------------------------------------------------------------------------
// Optionen
// ---------------------------------------------------------------------------

/// Zeitparameter einer ausgehenden Verbindung
#[derive(Debug, Clone)]
pub struct VerbindungsOptionen {
    /// Keepalive-Intervall
    pub keepalive: Duration,
    /// Zeitlimit fuer einzelne Anfragen
    pub antwort_timeout: Duration,
    /// Minimaler Reconnect-Backoff
    pub backoff_min: Duration,
    /// Maximaler Reconnect-Backoff
    pub backoff_max: Duration,
    /// Groesse der Sende-Queue
    pub queue_groesse: usize,
}

impl Default for VerbindungsOptionen {
    fn default() -> Self {
        Self {
            keepalive: Duration::from_secs(20),
            antwort_timeout: Duration::from_secs(10),
            backoff_min: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            queue_groesse: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// Handler-Trait
// ---------------------------------------------------------------------------

/// Verhalten das die konkrete Verbindung (User-Edge, Voice-Edge) beisteuert
#[async_trait]
pub trait AusgehendHandler: Send + Sync + 'static {
    /// Wird nach jedem Verbindungsaufbau aufgerufen; sendet den
    /// `REGISTER`-Frame und wartet die Bestaetigung ab
    async fn registrieren(&self, handle: &VerbindungsHandle) -> Result<(), NetzFehler>;

    /// Eingehender Nicht-Antwort-Frame (Push oder Anfrage des Masters)
    async fn nachricht(&self, frame: WireFrame, handle: &VerbindungsHandle);

    /// Verbindungsverlust: alle lokal gehaltenen Clients verwerfen
    async fn getrennt(&self);
}

// ---------------------------------------------------------------------------
// VerbindungsHandle
// ---------------------------------------------------------------------------

/// Stabiles Sende-Handle auf die ausgehende Verbindung
#[derive(Clone)]
pub struct VerbindungsHandle {
    tx: mpsc::Sender<WireFrame>,
    tracker: Arc<RequestTracker>,
    antwort_timeout: Duration,
}

impl VerbindungsHandle {
    /// Sendet einen Frame (wartet wenn die Queue voll ist)
    pub async fn senden(&self, frame: WireFrame) -> Result<(), NetzFehler> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| NetzFehler::QueueGeschlossen)
    }

    /// Sendet einen Frame nicht-blockierend; `false` wenn die Queue voll ist
    pub fn senden_versuchen(&self, frame: WireFrame) -> bool {
        self.tx.try_send(frame).is_ok()
    }

    /// Vergibt eine frische Request-ID (fuer Fire-and-Forget-Anfragen)
    pub fn naechste_id(&self) -> u64 {
        self.tracker.naechste_id()
    }

    /// Stellt eine Anfrage und wartet auf die zugeordnete Antwort
    pub async fn anfrage(
        &self,
        befehl: Command,
        argumente: Vec<String>,
    ) -> Result<WireFrame, NetzFehler> {
        let id = self.tracker.naechste_id();
        let rx = self.tracker.erwarten(id);
        self.senden(WireFrame::neu(id, befehl, argumente)).await?;

        match tokio::time::timeout(self.antwort_timeout, rx).await {
            Err(_) => {
                self.tracker.verwerfen(id);
                Err(NetzFehler::AntwortTimeout)
            }
            Ok(Err(_)) => Err(NetzFehler::Getrennt),
            Ok(Ok(antwort)) => Ok(antwort),
        }
    }

    /// Stellt eine Anfrage und erwartet eine OK-Antwort
    ///
    /// ERROR-Antworten werden zu [`NetzFehler::Abgelehnt`].
    pub async fn anfrage_ok(
        &self,
        befehl: Command,
        argumente: Vec<String>,
    ) -> Result<Vec<String>, NetzFehler> {
        let antwort = self.anfrage(befehl, argumente).await?;
        match antwort.als_antwort() {
            Some(Ok(args)) => Ok(args.to_vec()),
            Some(Err(code)) => Err(NetzFehler::Abgelehnt(code)),
            None => Err(NetzFehler::Protokoll(format!(
                "Antwort erwartet, '{}' erhalten",
                antwort.befehl
            ))),
        }
    }

    /// Leitet eine Antwort an den wartenden Anfragesteller weiter
    pub fn antwort_zuordnen(&self, frame: WireFrame) -> bool {
        self.tracker.abschliessen(frame)
    }
}

// ---------------------------------------------------------------------------
// AusgehendeVerbindung
// ---------------------------------------------------------------------------

/// Dauerhafte ausgehende Verbindung mit Reconnect-Schleife
pub struct AusgehendeVerbindung {
    ziel: String,
    handler: Arc<dyn AusgehendHandler>,
    optionen: VerbindungsOptionen,
    rx: mpsc::Receiver<WireFrame>,
    handle: VerbindungsHandle,
}

impl AusgehendeVerbindung {
    /// Erstellt die Verbindung und gibt das stabile Sende-Handle zurueck
    pub fn neu(
        ziel: String,
        handler: Arc<dyn AusgehendHandler>,
        optionen: VerbindungsOptionen,
    ) -> (Self, VerbindungsHandle) {
        let (tx, rx) = mpsc::channel(optionen.queue_groesse);
        let handle = VerbindungsHandle {
            tx,
            tracker: Arc::new(RequestTracker::neu()),
            antwort_timeout: optionen.antwort_timeout,
        };
        (
            Self {
                ziel,
                handler,
                optionen,
                rx,
                handle: handle.clone(),
            },
            handle,
        )
    }

    /// Betreibt die Verbindung bis zum Shutdown-Signal
    ///
    /// Verbindet, registriert, verarbeitet Frames; bei Verbindungsverlust
    /// werden ausstehende Anfragen abgebrochen, der Handler informiert und
    /// nach Backoff neu verbunden.
    pub async fn betreiben(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = self.optionen.backoff_min;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match TcpStream::connect(&self.ziel).await {
                Ok(stream) => {
                    tracing::info!(ziel = %self.ziel, "Upstream-Verbindung aufgebaut");
                    backoff = self.optionen.backoff_min;

                    self.verbunden(stream, &mut shutdown).await;

                    let abgebrochen = self.handle.tracker.alle_abbrechen();
                    self.handler.getrennt().await;
                    if *shutdown.borrow() {
                        break;
                    }
                    tracing::warn!(
                        ziel = %self.ziel,
                        abgebrochene_anfragen = abgebrochen,
                        "Upstream-Verbindung verloren – lokale Clients verworfen"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        ziel = %self.ziel,
                        fehler = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Upstream-Verbindungsaufbau fehlgeschlagen"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
            backoff = (backoff * 2).min(self.optionen.backoff_max);
        }

        tracing::info!(ziel = %self.ziel, "Upstream-Verbindung beendet");
    }

    /// Verarbeitet eine aufgebaute Verbindung bis zu ihrem Ende
    async fn verbunden(&mut self, stream: TcpStream, shutdown: &mut watch::Receiver<bool>) {
        let mut framed = Framed::new(stream, LineCodec::neu());

        // Registrierung laeuft nebenlaeufig, damit die Schleife unten den
        // REGISTER-Frame aus der Queue abtransportieren kann
        let handler = Arc::clone(&self.handler);
        let handle = self.handle.clone();
        let mut registrierung =
            tokio::spawn(async move { handler.registrieren(&handle).await });
        let mut registriert = false;

        let mut keepalive = tokio::time::interval(self.optionen.keepalive);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keepalive.tick().await; // erster Tick feuert sofort

        let mut letzter_empfang = Instant::now();

        loop {
            tokio::select! {
                ergebnis = &mut registrierung, if !registriert => {
                    match ergebnis {
                        Ok(Ok(())) => {
                            tracing::info!(ziel = %self.ziel, "Upstream-Registrierung abgeschlossen");
                            registriert = true;
                        }
                        Ok(Err(e)) => {
                            tracing::warn!(ziel = %self.ziel, fehler = %e, "Upstream-Registrierung fehlgeschlagen");
                            return;
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "Registrierungs-Task abgebrochen");
                            return;
                        }
                    }
                }

                frame = framed.next() => {
                    match frame {
                        Some(Ok(frame)) => {
                            letzter_empfang = Instant::now();
                            if frame.ist_antwort() {
                                if !self.handle.tracker.abschliessen(frame) {
                                    tracing::trace!("Antwort ohne wartende Anfrage verworfen");
                                }
                            } else {
                                self.handler.nachricht(frame, &self.handle).await;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(fehler = %e, "Upstream-Lesefehler");
                            return;
                        }
                        None => {
                            return;
                        }
                    }
                }

                Some(ausgehend) = self.rx.recv() => {
                    if let Err(e) = framed.send(ausgehend).await {
                        tracing::warn!(fehler = %e, "Upstream-Senden fehlgeschlagen");
                        return;
                    }
                }

                _ = keepalive.tick() => {
                    if letzter_empfang.elapsed() > self.optionen.keepalive * 2 {
                        tracing::warn!(ziel = %self.ziel, "Keepalive-Timeout – Verbindung gilt als tot");
                        return;
                    }
                    let probe = WireFrame::neu(
                        self.handle.tracker.naechste_id(),
                        Command::Keepalive,
                        vec![],
                    );
                    if let Err(e) = framed.send(probe).await {
                        tracing::warn!(fehler = %e, "Keepalive-Senden fehlgeschlagen");
                        return;
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonar_protocol::command::ErrorCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ZaehlHandler {
        registrierungen: AtomicUsize,
        trennungen: AtomicUsize,
        nachrichten: AtomicUsize,
    }

    impl ZaehlHandler {
        fn neu() -> Arc<Self> {
            Arc::new(Self {
                registrierungen: AtomicUsize::new(0),
                trennungen: AtomicUsize::new(0),
                nachrichten: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AusgehendHandler for ZaehlHandler {
        async fn registrieren(&self, handle: &VerbindungsHandle) -> Result<(), NetzFehler> {
            self.registrierungen.fetch_add(1, Ordering::SeqCst);
            handle
                .anfrage_ok(Command::Register, vec!["TEST_EDGE".into()])
                .await?;
            Ok(())
        }

        async fn nachricht(&self, frame: WireFrame, handle: &VerbindungsHandle) {
            self.nachrichten.fetch_add(1, Ordering::SeqCst);
            let _ = handle.senden(WireFrame::antwort_ok(frame.id, vec![])).await;
        }

        async fn getrennt(&self) {
            self.trennungen.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Minimaler Master-Ersatz: akzeptiert eine Verbindung, beantwortet
    /// REGISTER mit OK und schickt danach einen Push
    async fn fake_master(listener: tokio::net::TcpListener) {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, LineCodec::neu());

        let register = framed.next().await.unwrap().unwrap();
        assert_eq!(register.befehl, "REGISTER");
        framed
            .send(WireFrame::antwort_ok(register.id, vec![]))
            .await
            .unwrap();

        framed
            .send(WireFrame::neu(0, Command::UpdateToken, vec!["x".into()]))
            .await
            .unwrap();

        // Antwort des Edges auf den Push abwarten, dann Verbindung halten
        let _ = framed.next().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
    }

    #[tokio::test]
    async fn verbindet_registriert_und_empfaengt_pushes() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let adresse = listener.local_addr().unwrap().to_string();
        tokio::spawn(fake_master(listener));

        let handler = ZaehlHandler::neu();
        let (verbindung, _handle) = AusgehendeVerbindung::neu(
            adresse,
            handler.clone(),
            VerbindungsOptionen {
                antwort_timeout: Duration::from_secs(2),
                ..Default::default()
            },
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(verbindung.betreiben(shutdown_rx));

        // Auf Registrierung und Push warten
        tokio::time::timeout(Duration::from_secs(5), async {
            while handler.nachrichten.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Push nicht angekommen");

        assert_eq!(handler.registrierungen.load(Ordering::SeqCst), 1);

        shutdown_tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
    }

    #[tokio::test]
    async fn reconnect_nach_verbindungsverlust() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let adresse = listener.local_addr().unwrap().to_string();

        // Master-Ersatz der die erste Verbindung sofort fallen laesst
        tokio::spawn(async move {
            // Erste Verbindung: REGISTER beantworten, dann trennen
            let (stream, _) = listener.accept().await.unwrap();
            {
                let mut framed = Framed::new(stream, LineCodec::neu());
                let register = framed.next().await.unwrap().unwrap();
                framed
                    .send(WireFrame::antwort_ok(register.id, vec![]))
                    .await
                    .unwrap();
            } // Drop -> Verbindung zu

            // Zweite Verbindung: normal bedienen
            fake_master(listener).await;
        });

        let handler = ZaehlHandler::neu();
        let (verbindung, _handle) = AusgehendeVerbindung::neu(
            adresse,
            handler.clone(),
            VerbindungsOptionen {
                backoff_min: Duration::from_millis(50),
                backoff_max: Duration::from_millis(200),
                antwort_timeout: Duration::from_secs(2),
                ..Default::default()
            },
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(verbindung.betreiben(shutdown_rx));

        tokio::time::timeout(Duration::from_secs(5), async {
            while handler.registrierungen.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Kein Reconnect erfolgt");

        // Beim Verbindungsverlust muessen die lokalen Clients verworfen worden sein
        assert!(handler.trennungen.load(Ordering::SeqCst) >= 1);

        shutdown_tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
    }

    #[tokio::test]
    async fn anfrage_timeout_ohne_gegenstelle() {
        // Handle ohne laufende Verbindung: Anfrage landet in der Queue,
        // niemand antwortet -> Timeout
        let handler = ZaehlHandler::neu();
        let (_verbindung, handle) = AusgehendeVerbindung::neu(
            "127.0.0.1:1".into(),
            handler,
            VerbindungsOptionen {
                antwort_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );

        let ergebnis = handle.anfrage(Command::Keepalive, vec![]).await;
        assert!(matches!(ergebnis, Err(NetzFehler::AntwortTimeout)));
    }

    #[tokio::test]
    async fn anfrage_ok_uebersetzt_fehler_antworten() {
        let handler = ZaehlHandler::neu();
        let (verbindung, handle) = AusgehendeVerbindung::neu(
            "unbenutzt".into(),
            handler,
            VerbindungsOptionen::default(),
        );

        // Antwort von Hand zuordnen, ohne echte Verbindung
        let anfrage = tokio::spawn({
            let handle = handle.clone();
            async move { handle.anfrage_ok(Command::Keepalive, vec![]).await }
        });

        // Warten bis die Anfrage registriert ist
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.antwort_zuordnen(WireFrame::antwort_fehler(1, ErrorCode::TryAgain));

        let ergebnis = anfrage.await.unwrap();
        assert!(matches!(
            ergebnis,
            Err(NetzFehler::Abgelehnt(ErrorCode::TryAgain))
        ));
        drop(verbindung);
    }
}

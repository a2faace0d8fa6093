//! UDP-Challenge-Response fuer Voice-Server-Registrierungen
//!
//! Vor dem Abschluss einer Registrierung schickt die Voice-Edge eine
//! Challenge-ID (dezimal kodiert, ein Datagramm) an die behauptete
//! VoIP-Adresse und verlangt sie von genau dieser Adresse zurueck. Das
//! wehrt Adress-Spoofing ab: wer die Adresse nicht kontrolliert, sieht die
//! Challenge nie.
//!
//! Die IDs starten zufaellig und steigen monoton. Unbestaetigte Challenges
//! werden nach dem Timeout entfernt – damit sind sowohl die Wartezeit
//! legitimer Server als auch der Speicher fuer verwaiste Challenges
//! beschraenkt.

use dashmap::DashMap;
use rand::RngExt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;

/// Verwaltet ausstehende UDP-Challenges
pub struct ChallengeManager {
    socket: Arc<UdpSocket>,
    naechste_id: AtomicU32,
    ausstehend: Arc<DashMap<u32, PendingChallenge>>,
    timeout: Duration,
}

struct PendingChallenge {
    erwartete_quelle: SocketAddr,
    tx: oneshot::Sender<()>,
}

impl ChallengeManager {
    /// Bindet den Challenge-Socket und startet die Echo-Schleife
    pub async fn neu(bind_adresse: &str, timeout: Duration) -> std::io::Result<Arc<Self>> {
        let socket = Arc::new(UdpSocket::bind(bind_adresse).await?);
        let ausstehend: Arc<DashMap<u32, PendingChallenge>> = Arc::new(DashMap::new());

        tokio::spawn(echo_schleife(socket.clone(), ausstehend.clone()));

        tracing::info!(adresse = %socket.local_addr()?, "Challenge-Socket gebunden");
        Ok(Arc::new(Self {
            socket,
            naechste_id: AtomicU32::new(rand::rng().random()),
            ausstehend,
            timeout,
        }))
    }

    /// Bestaetigt die Erreichbarkeit einer behaupteten Adresse
    ///
    /// Sendet die Challenge und wartet bis zum Timeout auf das Echo von
    /// genau dieser Adresse. `false` bei Timeout oder Sendefehler; der
    /// ausstehende Eintrag wird in jedem Fall entfernt.
    pub async fn bestaetigen(&self, ziel: SocketAddr) -> bool {
        let id = self.naechste_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.ausstehend.insert(
            id,
            PendingChallenge {
                erwartete_quelle: ziel,
                tx,
            },
        );

        let datagramm = id.to_string();
        if let Err(e) = self.socket.send_to(datagramm.as_bytes(), ziel).await {
            tracing::warn!(ziel = %ziel, fehler = %e, "Challenge-Senden fehlgeschlagen");
            self.ausstehend.remove(&id);
            return false;
        }
        tracing::debug!(ziel = %ziel, id, "Challenge gesendet");

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(())) => true,
            _ => {
                self.ausstehend.remove(&id);
                tracing::debug!(ziel = %ziel, id, "Challenge nicht bestaetigt");
                false
            }
        }
    }

    /// Gibt die Anzahl offener Challenges zurueck
    pub fn ausstehend_anzahl(&self) -> usize {
        self.ausstehend.len()
    }

    /// Gibt die lokale Adresse des Challenge-Sockets zurueck
    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// Liest Echos vom Challenge-Socket und bestaetigt passende Eintraege
async fn echo_schleife(socket: Arc<UdpSocket>, ausstehend: Arc<DashMap<u32, PendingChallenge>>) {
    let mut puffer = [0u8; 64];
    loop {
        match socket.recv_from(&mut puffer).await {
            Ok((laenge, quelle)) => {
                let id = std::str::from_utf8(&puffer[..laenge])
                    .ok()
                    .and_then(|text| text.trim().parse::<u32>().ok());
                let Some(id) = id else {
                    tracing::trace!(quelle = %quelle, "Unlesbares Challenge-Echo verworfen");
                    continue;
                };

                // Nur entfernen wenn das Echo von der behaupteten Adresse kommt
                let bestaetigt = ausstehend.remove_if(&id, |_, p| p.erwartete_quelle == quelle);
                match bestaetigt {
                    Some((_, pending)) => {
                        let _ = pending.tx.send(());
                    }
                    None => {
                        tracing::debug!(quelle = %quelle, id, "Echo ohne passende Challenge");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(fehler = %e, "Challenge-Socket-Lesefehler");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

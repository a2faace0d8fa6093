//! Sende-Handles auf Edge-Verbindungen
//!
//! Der Master haelt fuer jede registrierte Edge-Verbindung ein Handle auf
//! deren Sende-Queue. Pushes (Token-Updates, Unregister-Relays) gehen
//! nicht-blockierend ueber dieses Handle; eine volle Queue verwirft die
//! Nachricht statt den aufrufenden Task zu blockieren.

use sonar_core::types::EdgeId;
use sonar_protocol::command::Command;
use sonar_protocol::wire::WireFrame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Groesse der Sende-Queue pro Edge-Verbindung
pub const EDGE_QUEUE_GROESSE: usize = 256;

/// Handle auf die Sende-Queue einer Edge-Verbindung
#[derive(Clone, Debug)]
pub struct EdgeHandle {
    pub edge_id: EdgeId,
    tx: mpsc::Sender<WireFrame>,
    naechste_id: Arc<AtomicU64>,
}

impl EdgeHandle {
    /// Erstellt ein Handle samt Empfangsseite fuer die Verbindungs-Schleife
    pub fn neu(edge_id: EdgeId) -> (Self, mpsc::Receiver<WireFrame>) {
        let (tx, rx) = mpsc::channel(EDGE_QUEUE_GROESSE);
        (
            Self {
                edge_id,
                tx,
                naechste_id: Arc::new(AtomicU64::new(1)),
            },
            rx,
        )
    }

    /// Sendet einen Push nicht-blockierend an die Edge
    ///
    /// Gibt `false` zurueck wenn die Queue voll oder geschlossen ist.
    pub fn senden(&self, befehl: Command, argumente: Vec<String>) -> bool {
        let id = self.naechste_id.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(WireFrame::neu(id, befehl, argumente)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(edge_id = %self.edge_id, "Edge-Queue voll – Push verworfen");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(edge_id = %self.edge_id, "Edge-Queue geschlossen (Verbindung weg)");
                false
            }
        }
    }

    /// Gibt true zurueck wenn die Verbindung noch lebt
    pub fn ist_offen(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_kommt_in_der_queue_an() {
        let (handle, mut rx) = EdgeHandle::neu(EdgeId::neu());
        assert!(handle.senden(Command::UpdateToken, vec!["acme".into(), "u1".into()]));

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.befehl, "UPDATE_TOKEN");
        assert_eq!(frame.argumente[0], "acme");
    }

    #[tokio::test]
    async fn push_ids_sind_monoton() {
        let (handle, mut rx) = EdgeHandle::neu(EdgeId::neu());
        handle.senden(Command::Keepalive, vec![]);
        handle.senden(Command::Keepalive, vec![]);

        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn geschlossene_queue_meldet_fehler() {
        let (handle, rx) = EdgeHandle::neu(EdgeId::neu());
        drop(rx);
        assert!(!handle.senden(Command::Keepalive, vec![]));
        assert!(!handle.ist_offen());
    }
}

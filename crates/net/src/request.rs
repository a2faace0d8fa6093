//! Request/Reply-Zuordnung ueber Request-IDs
//!
//! Jede Verbindung vergibt monoton steigende IDs fuer ihre Anfragen und
//! ordnet eingehende Antworten ueber diese ID wieder zu. Bei
//! Verbindungsverlust werden alle ausstehenden Anfragen abgebrochen, damit
//! keine Aufrufer ewig warten.

use dashmap::DashMap;
use sonar_protocol::wire::WireFrame;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

/// Verwaltet ausstehende Anfragen einer Verbindung
#[derive(Debug, Default)]
pub struct RequestTracker {
    naechste_id: AtomicU64,
    ausstehend: DashMap<u64, oneshot::Sender<WireFrame>>,
}

impl RequestTracker {
    /// Erstellt einen neuen Tracker (IDs beginnen bei 1; 0 ist fuer
    /// unkorrelierte Pushes reserviert)
    pub fn neu() -> Self {
        Self {
            naechste_id: AtomicU64::new(1),
            ausstehend: DashMap::new(),
        }
    }

    /// Vergibt die naechste Request-ID
    pub fn naechste_id(&self) -> u64 {
        self.naechste_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registriert eine wartende Anfrage und gibt den Empfaenger zurueck
    pub fn erwarten(&self, id: u64) -> oneshot::Receiver<WireFrame> {
        let (tx, rx) = oneshot::channel();
        self.ausstehend.insert(id, tx);
        rx
    }

    /// Ordnet eine Antwort der wartenden Anfrage zu
    ///
    /// Gibt `false` zurueck wenn keine Anfrage auf diese ID wartet
    /// (z.B. nach einem Timeout des Aufrufers).
    pub fn abschliessen(&self, antwort: WireFrame) -> bool {
        match self.ausstehend.remove(&antwort.id) {
            Some((_, tx)) => tx.send(antwort).is_ok(),
            None => false,
        }
    }

    /// Entfernt eine wartende Anfrage ohne sie zu beantworten (Timeout)
    pub fn verwerfen(&self, id: u64) {
        self.ausstehend.remove(&id);
    }

    /// Bricht alle ausstehenden Anfragen ab (Verbindungsverlust)
    ///
    /// Die wartenden Empfaenger erhalten einen Abbruch-Fehler.
    /// Gibt die Anzahl der abgebrochenen Anfragen zurueck.
    pub fn alle_abbrechen(&self) -> usize {
        let anzahl = self.ausstehend.len();
        self.ausstehend.clear();
        anzahl
    }

    /// Gibt die Anzahl der aktuell ausstehenden Anfragen zurueck
    pub fn ausstehend_anzahl(&self) -> usize {
        self.ausstehend.len()
    }
}

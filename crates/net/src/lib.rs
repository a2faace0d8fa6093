//! sonar-net – Verbindungs-Basisverhalten
//!
//! Alle konkreten Verbindungen (Master-Dienste, Edge-Upstreams, lokale
//! Edge-Clients) teilen sich dieses Verhalten:
//!
//! - Request/Reply-Zuordnung ueber Request-IDs ([`RequestTracker`])
//! - Registrierungsfrist fuer eingehende Verbindungen ([`inbound`])
//! - Reconnect mit Backoff und Neu-Registrierung fuer ausgehende
//!   Verbindungen ([`outbound`])
//!
//! ## Zustandsmaschine
//! ```text
//! Verbinden -> Registrieren -> Registriert -> Geschlossen
//! ```

pub mod error;
pub mod inbound;
pub mod outbound;
pub mod request;

pub use error::NetzFehler;
pub use outbound::{AusgehendHandler, AusgehendeVerbindung, VerbindungsHandle, VerbindungsOptionen};
pub use request::RequestTracker;

/// Zustand einer Steuerverbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbindungsZustand {
    /// TCP-Verbindung wird aufgebaut
    Verbinden,
    /// Verbunden, REGISTER steht noch aus
    Registrieren,
    /// Registrierung abgeschlossen, Normalbetrieb
    Registriert,
    /// Verbindung wird abgebaut
    Geschlossen,
}

impl VerbindungsZustand {
    /// Gibt true zurueck wenn die Verbindung im Normalbetrieb ist
    pub fn ist_registriert(&self) -> bool {
        matches!(self, Self::Registriert)
    }
}

//! Fehlertypen der Verbindungsschicht

use sonar_protocol::command::ErrorCode;
use thiserror::Error;

/// Fehler der Verbindungsschicht
#[derive(Debug, Error)]
pub enum NetzFehler {
    #[error("Verbindung getrennt")]
    Getrennt,

    #[error("Zeitlimit fuer Antwort ueberschritten")]
    AntwortTimeout,

    #[error("Registrierung nicht innerhalb der Frist abgeschlossen")]
    RegistrierungsTimeout,

    #[error("Sende-Queue geschlossen")]
    QueueGeschlossen,

    #[error("Gegenstelle meldet Fehler: {0}")]
    Abgelehnt(ErrorCode),

    #[error("Protokollverletzung: {0}")]
    Protokoll(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl NetzFehler {
    /// Gibt true zurueck wenn ein erneuter Versuch sinnvoll sein koennte
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(
            self,
            Self::Getrennt | Self::AntwortTimeout | Self::QueueGeschlossen | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wiederholbar_erkennung() {
        assert!(NetzFehler::Getrennt.ist_wiederholbar());
        assert!(NetzFehler::AntwortTimeout.ist_wiederholbar());
        assert!(!NetzFehler::Abgelehnt(ErrorCode::InvalidToken).ist_wiederholbar());
        assert!(!NetzFehler::Protokoll("x".into()).ist_wiederholbar());
    }
}

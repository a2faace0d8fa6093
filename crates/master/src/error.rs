//! Typisierte Domaenen-Fehler der Manager-Schicht
//!
//! Die Manager werfen typisierte Fehler; erst die Dienst-Schicht uebersetzt
//! sie in Wire-Fehler-Codes. Domaenen-Fehler beenden nie die Verbindung.

use sonar_protocol::command::ErrorCode;
use sonar_token::TokenFehler;
use thiserror::Error;

/// Result-Alias fuer Manager-Operationen
pub type DomainResult<T> = std::result::Result<T, DomainFehler>;

/// Alle typisierten Fehler der Manager-Schicht
#[derive(Debug, Error)]
pub enum DomainFehler {
    #[error("Kanal nicht gefunden: {0}")]
    KanalNichtGefunden(String),

    #[error("Benutzer nicht gefunden: {0}")]
    BenutzerNichtGefunden(String),

    #[error("Benutzer {0} ist nicht in Kanal {1}")]
    NichtInDiesemKanal(String, String),

    #[error("Zustand nicht synchron: {0}")]
    NichtSynchron(String),

    #[error("Kein Voice-Server fuer die Kanal-Zuteilung verfuegbar")]
    ZuteilungFehlgeschlagen,

    #[error("Dienst nicht verfuegbar: {0}")]
    NichtVerfuegbar(String),

    #[error(transparent)]
    Token(#[from] TokenFehler),
}

impl DomainFehler {
    /// Uebersetzt den Fehler in den spezifischen Wire-Fehler-Code
    pub fn wire_code(&self) -> ErrorCode {
        match self {
            Self::KanalNichtGefunden(_) => ErrorCode::ChannelNotFound,
            Self::BenutzerNichtGefunden(_) => ErrorCode::UserNotFound,
            Self::NichtInDiesemKanal(_, _) => ErrorCode::NotInThatChannel,
            Self::NichtSynchron(_) => ErrorCode::OutOfSync,
            Self::ZuteilungFehlgeschlagen => ErrorCode::ChannelAllocationFailed,
            Self::NichtVerfuegbar(_) => ErrorCode::Unavailable,
            Self::Token(_) => ErrorCode::InvalidToken,
        }
    }
}

//! Fehlertypen fuer die Token-Verarbeitung

use thiserror::Error;

/// Result-Alias fuer Token-Operationen
pub type TokenResult<T> = std::result::Result<T, TokenFehler>;

/// Fehler beim Signieren oder Verifizieren von Tokens
#[derive(Debug, Error)]
pub enum TokenFehler {
    /// Kodierung kaputt, Payload kein gueltiges JSON oder Signatur falsch
    #[error("Token ungueltig: {0}")]
    Ungueltig(String),

    /// Token aelter als das erlaubte Maximalalter
    #[error("Token abgelaufen: Alter {alter_sek}s, Maximum {max_sek}s")]
    Abgelaufen { alter_sek: i64, max_sek: i64 },

    /// Schluesselmaterial nicht dekodierbar
    #[error("Ungueltiger Schluessel: {0}")]
    SchluesselUngueltig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = TokenFehler::Abgelaufen {
            alter_sek: 120,
            max_sek: 60,
        };
        assert!(e.to_string().contains("120"));
        assert!(e.to_string().contains("60"));
    }
}

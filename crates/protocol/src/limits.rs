//! Protokoll-Konstanten fuer Feldlaengen
//!
//! Die Limits gelten fuer alle Dienste gleichermassen. Ueberschreitungen
//! werden am Dispatch-Punkt mit `INVALID_ARGUMENT` beantwortet, nicht mit
//! einem Verbindungsabbruch.

/// Maximale Laenge einer Operator-ID
pub const MAX_OPERATOR_ID_LAENGE: usize = 32;

/// Maximale Laenge einer Benutzer-ID
pub const MAX_USER_ID_LAENGE: usize = 64;

/// Maximale Laenge einer Kanal-ID
pub const MAX_CHANNEL_ID_LAENGE: usize = 64;

/// Maximale Laenge eines Location-Tags
pub const MAX_LOCATION_LAENGE: usize = 32;

/// Maximale Laenge einer Beschreibung (Benutzer oder Kanal)
pub const MAX_BESCHREIBUNG_LAENGE: usize = 128;

/// Maximale Laenge einer Client-Adresse (dotted quad oder Hostname)
pub const MAX_ADRESSE_LAENGE: usize = 64;

/// Prueft ob ein Feldwert frei von Steuerzeichen ist und das Limit einhaelt
///
/// Leere Werte sind erlaubt (Location und Beschreibungen duerfen leer sein).
pub fn feld_gueltig(wert: &str, max_laenge: usize) -> bool {
    wert.len() <= max_laenge && !wert.chars().any(|c| c.is_control())
}

/// Prueft ein Pflicht-ID-Feld: nicht leer, Limit eingehalten, keine Steuerzeichen
pub fn id_gueltig(wert: &str, max_laenge: usize) -> bool {
    !wert.is_empty() && feld_gueltig(wert, max_laenge)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gueltige_felder() {
        assert!(feld_gueltig("acme", MAX_OPERATOR_ID_LAENGE));
        assert!(feld_gueltig("", MAX_LOCATION_LAENGE));
        assert!(feld_gueltig("User One", MAX_BESCHREIBUNG_LAENGE));
    }

    #[test]
    fn zu_lange_felder() {
        let lang = "x".repeat(MAX_OPERATOR_ID_LAENGE + 1);
        assert!(!feld_gueltig(&lang, MAX_OPERATOR_ID_LAENGE));
        // Genau am Limit ist noch gueltig
        let genau = "x".repeat(MAX_OPERATOR_ID_LAENGE);
        assert!(feld_gueltig(&genau, MAX_OPERATOR_ID_LAENGE));
    }

    #[test]
    fn steuerzeichen_abgelehnt() {
        assert!(!feld_gueltig("a\tb", MAX_USER_ID_LAENGE));
        assert!(!feld_gueltig("a\nb", MAX_USER_ID_LAENGE));
        assert!(!feld_gueltig("a\rb", MAX_USER_ID_LAENGE));
    }

    #[test]
    fn id_darf_nicht_leer_sein() {
        assert!(!id_gueltig("", MAX_USER_ID_LAENGE));
        assert!(id_gueltig("u1", MAX_USER_ID_LAENGE));
    }
}

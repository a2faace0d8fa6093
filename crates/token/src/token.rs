//! Das signierte Token selbst
//!
//! ## Kodierung
//!
//! ```text
//! base64url(json-payload) "." base64url(ed25519-signatur)
//! ```
//!
//! Die Signatur deckt die rohen Payload-Bytes ab. Das Format ist fuer
//! Aufrufer opak; nur Master und Edges interpretieren es.
//!
//! ## Alterspruefung
//!
//! `max_alter_sek >= 0` aktiviert die Pruefung: ein Token faellt durch wenn
//! `jetzt - erstellt_am > max_alter_sek` (strikt groesser – ein Token genau
//! an der Grenze verifiziert noch). Negatives `max_alter_sek` deaktiviert
//! die Pruefung.

use base64::Engine;
use chrono::Utc;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::{TokenFehler, TokenResult};

/// Push-Grund: Token wegen Kanal-Beitritt ausgestellt
pub const TOKEN_GRUND_JOIN: &str = "JOIN";

/// Push-Grund: Token turnusmaessig vor Ablauf erneuert
pub const TOKEN_GRUND_REFRESH: &str = "REFRESH";

/// Unveraenderlicher, signierter Berechtigungsnachweis
///
/// Traegt die vollstaendige Identitaet (Operator, Benutzer, Kanal) sowie
/// die Routing-Adressen: an welchem User-Edge sich der Benutzer melden
/// soll und welcher Voice-Server den Kanal traegt. Kanal- und
/// Voice-Felder sind leer wenn das Token nur die Steuerverbindung
/// autorisiert (Control-Token).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub operator_id: String,
    pub user_id: String,
    pub user_beschreibung: String,
    pub channel_id: String,
    pub channel_beschreibung: String,
    pub location: String,
    /// Erstellungszeitpunkt (Unix-Sekunden)
    pub erstellt_am: i64,
    /// User-Edge an dem sich der Benutzer registrieren soll
    pub edge_adresse: String,
    pub edge_port: u16,
    /// Voice-Server des Kanals (leer/0 bei Control-Tokens)
    pub voip_adresse: String,
    pub voip_port: u16,
}

impl Token {
    /// Gibt das Alter des Tokens in Sekunden zurueck (negativ bei Uhren-Schiefstand)
    pub fn alter_sek(&self) -> i64 {
        Utc::now().timestamp() - self.erstellt_am
    }

    /// Gibt true zurueck wenn das Token an einen Kanal gebunden ist
    pub fn ist_kanal_token(&self) -> bool {
        !self.channel_id.is_empty()
    }

    /// Signiert das Token und gibt die opake Wire-Darstellung zurueck
    pub fn signieren(&self, key: &SigningKey) -> TokenResult<String> {
        let payload = serde_json::to_vec(self)
            .map_err(|e| TokenFehler::Ungueltig(format!("Serialisierung: {e}")))?;
        let signatur = key.sign(&payload);

        let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
        Ok(format!(
            "{}.{}",
            engine.encode(&payload),
            engine.encode(signatur.to_bytes())
        ))
    }

    /// Parst und verifiziert ein Token aus der Wire-Darstellung
    ///
    /// Schlaegt fehl bei kaputter Kodierung, falscher Signatur oder – wenn
    /// `max_alter_sek >= 0` – bei ueberschrittenem Maximalalter.
    pub fn verifizieren(
        roh: &str,
        key: &VerifyingKey,
        max_alter_sek: i64,
    ) -> TokenResult<Token> {
        let (payload_b64, signatur_b64) = roh
            .split_once('.')
            .ok_or_else(|| TokenFehler::Ungueltig("Kein '.'-Trenner".into()))?;

        let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let payload = engine
            .decode(payload_b64)
            .map_err(|e| TokenFehler::Ungueltig(format!("Payload-Base64: {e}")))?;
        let signatur_bytes = engine
            .decode(signatur_b64)
            .map_err(|e| TokenFehler::Ungueltig(format!("Signatur-Base64: {e}")))?;

        let signatur_array: [u8; 64] = signatur_bytes
            .try_into()
            .map_err(|_| TokenFehler::Ungueltig("Signatur hat falsche Laenge".into()))?;
        let signatur = Signature::from_bytes(&signatur_array);

        key.verify(&payload, &signatur)
            .map_err(|_| TokenFehler::Ungueltig("Signatur verifiziert nicht".into()))?;

        let token: Token = serde_json::from_slice(&payload)
            .map_err(|e| TokenFehler::Ungueltig(format!("Payload-JSON: {e}")))?;

        if max_alter_sek >= 0 {
            let alter = token.alter_sek();
            if alter > max_alter_sek {
                return Err(TokenFehler::Abgelaufen {
                    alter_sek: alter,
                    max_sek: max_alter_sek,
                });
            }
        }

        Ok(token)
    }
}

//! Ed25519-Schluesselpaar des Masters
//!
//! Der private Schluessel verbleibt beim Master; die Edges erhalten nur den
//! oeffentlichen Schluessel (Base64 in der Konfiguration).

use base64::Engine;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::Rng;

use crate::error::{TokenFehler, TokenResult};

/// Ed25519-Schluesselpaar fuer die Token-Signierung
pub struct SchluesselPaar {
    signing_key: SigningKey,
}

impl SchluesselPaar {
    /// Generiert ein neues zufaelliges Schluesselpaar
    pub fn generieren() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self {
            signing_key: SigningKey::from_bytes(&bytes),
        }
    }

    /// Erstellt ein Schluesselpaar aus einem privaten Schluessel (32 Bytes)
    pub fn aus_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// Laedt ein Schluesselpaar aus einem Base64-kodierten privaten Schluessel
    pub fn aus_base64(kodiert: &str) -> TokenResult<Self> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(kodiert)
            .map_err(|e| TokenFehler::SchluesselUngueltig(format!("Base64: {e}")))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TokenFehler::SchluesselUngueltig("Erwartet 32 Bytes".into()))?;
        Ok(Self::aus_bytes(&array))
    }

    /// Gibt den privaten Schluessel als Base64 zurueck (fuer die Konfiguration)
    pub fn privat_base64(&self) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.signing_key.to_bytes())
    }

    /// Gibt den oeffentlichen Schluessel als Base64 zurueck
    pub fn oeffentlich_base64(&self) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Gibt den Signierschluessel zurueck
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Gibt den Verifizierschluessel zurueck
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl std::fmt::Debug for SchluesselPaar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SchluesselPaar {{ oeffentlich: {} }}", self.oeffentlich_base64())
    }
}

/// Dekodiert einen oeffentlichen Schluessel aus Base64 (Edge-Konfiguration)
pub fn verifying_key_aus_base64(kodiert: &str) -> TokenResult<VerifyingKey> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(kodiert)
        .map_err(|e| TokenFehler::SchluesselUngueltig(format!("Base64: {e}")))?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| TokenFehler::SchluesselUngueltig("Erwartet 32 Bytes".into()))?;
    VerifyingKey::from_bytes(&array)
        .map_err(|e| TokenFehler::SchluesselUngueltig(format!("Ed25519: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schluessel_generieren() {
        let paar = SchluesselPaar::generieren();
        assert_eq!(paar.verifying_key().to_bytes().len(), 32);
    }

    #[test]
    fn base64_roundtrip_privat() {
        let paar = SchluesselPaar::generieren();
        let kodiert = paar.privat_base64();
        let wieder = SchluesselPaar::aus_base64(&kodiert).unwrap();
        assert_eq!(paar.oeffentlich_base64(), wieder.oeffentlich_base64());
    }

    #[test]
    fn base64_roundtrip_oeffentlich() {
        let paar = SchluesselPaar::generieren();
        let key = verifying_key_aus_base64(&paar.oeffentlich_base64()).unwrap();
        assert_eq!(key, paar.verifying_key());
    }

    #[test]
    fn ungueltiges_base64_abgelehnt() {
        assert!(SchluesselPaar::aus_base64("kein base64 !!!").is_err());
        assert!(verifying_key_aus_base64("zu-kurz").is_err());
    }
}

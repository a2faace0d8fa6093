//! Wire-Format fuer die Steuerverbindungen
//!
//! Zeilenbasiertes Protokoll: Tab-getrennte Felder, Newline-terminiert.
//!
//! ## Zeilen-Format
//!
//! ```text
//! <id>\t<BEFEHL>\t<arg1>\t<arg2>...\n
//! ```
//!
//! Antworten verwenden den Befehls-Tag `REPLY`:
//!
//! ```text
//! <id>\tREPLY\tOK\t<args...>\n
//! <id>\tREPLY\tERROR\t<CODE>\n
//! ```
//!
//! Die `<id>` stellt die Request/Reply-Zuordnung her: der Anfragende vergibt
//! sie, die Gegenstelle kopiert sie in die Antwort. Maximale Zeilenlaenge
//! ist konfigurierbar (Standard: 8 KB).

use bytes::{BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::command::{Command, ErrorCode};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-maximale Zeilenlaenge (8 KB)
pub const DEFAULT_MAX_ZEILEN_LAENGE: usize = 8 * 1024;

/// Wire-Tag fuer erfolgreiche Antworten
pub const STATUS_OK: &str = "OK";

/// Wire-Tag fuer Fehler-Antworten
pub const STATUS_ERROR: &str = "ERROR";

// ---------------------------------------------------------------------------
// WireFrame
// ---------------------------------------------------------------------------

/// Ein dekodierter Protokoll-Frame
///
/// Der Befehls-Tag bleibt als String erhalten, damit unbekannte Befehle bis
/// zum Dispatch-Punkt transportiert und dort mit einer Fehler-Antwort
/// beantwortet werden koennen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame {
    /// Request-ID fuer die Request/Reply-Zuordnung
    pub id: u64,
    /// Befehls-Tag (SCREAMING_SNAKE_CASE)
    pub befehl: String,
    /// Argumente in Protokoll-Reihenfolge
    pub argumente: Vec<String>,
}

impl WireFrame {
    /// Erstellt einen Frame fuer einen bekannten Befehl
    pub fn neu(id: u64, befehl: Command, argumente: Vec<String>) -> Self {
        Self {
            id,
            befehl: befehl.als_str().to_string(),
            argumente,
        }
    }

    /// Erstellt einen Frame mit rohem Befehls-Tag
    pub fn roh(id: u64, befehl: impl Into<String>, argumente: Vec<String>) -> Self {
        Self {
            id,
            befehl: befehl.into(),
            argumente,
        }
    }

    /// Erstellt eine OK-Antwort
    pub fn antwort_ok(id: u64, mut argumente: Vec<String>) -> Self {
        let mut args = vec![STATUS_OK.to_string()];
        args.append(&mut argumente);
        Self::neu(id, Command::Reply, args)
    }

    /// Erstellt eine ERROR-Antwort mit Fehler-Code
    pub fn antwort_fehler(id: u64, code: ErrorCode) -> Self {
        Self::neu(
            id,
            Command::Reply,
            vec![STATUS_ERROR.to_string(), code.als_str().to_string()],
        )
    }

    /// Gibt true zurueck wenn der Frame eine Antwort ist
    pub fn ist_antwort(&self) -> bool {
        self.befehl == Command::Reply.als_str()
    }

    /// Interpretiert den Frame als Antwort
    ///
    /// Gibt `None` zurueck wenn der Frame keine (wohlgeformte) Antwort ist.
    /// Bei `ERROR` ohne bekannten Code wird `ErrorCode::Internal` gemeldet.
    pub fn als_antwort(&self) -> Option<std::result::Result<&[String], ErrorCode>> {
        if !self.ist_antwort() {
            return None;
        }
        match self.argumente.first().map(String::as_str) {
            Some(STATUS_OK) => Some(Ok(&self.argumente[1..])),
            Some(STATUS_ERROR) => {
                let code = self
                    .argumente
                    .get(1)
                    .and_then(|c| ErrorCode::parse(c))
                    .unwrap_or(ErrorCode::Internal);
                Some(Err(code))
            }
            _ => None,
        }
    }

    /// Parst einen Frame aus einer Zeile (ohne Newline)
    pub fn parse_zeile(zeile: &str) -> std::result::Result<Self, String> {
        let zeile = zeile.strip_suffix('\r').unwrap_or(zeile);
        let mut felder = zeile.split('\t');

        let id_feld = felder.next().unwrap_or("");
        let id: u64 = id_feld
            .parse()
            .map_err(|_| format!("Ungueltige Request-ID: '{id_feld}'"))?;

        let befehl = match felder.next() {
            Some(b) if !b.is_empty() => b.to_string(),
            _ => return Err("Befehls-Tag fehlt".to_string()),
        };

        Ok(Self {
            id,
            befehl,
            argumente: felder.map(str::to_string).collect(),
        })
    }

    /// Serialisiert den Frame als Zeile (ohne Newline)
    ///
    /// Schlaegt fehl wenn ein Feld Tab, Newline oder andere Steuerzeichen
    /// enthaelt, da diese das Framing zerstoeren wuerden.
    pub fn als_zeile(&self) -> std::result::Result<String, String> {
        if self.befehl.is_empty() || self.befehl.chars().any(|c| c.is_control()) {
            return Err(format!("Ungueltiger Befehls-Tag: '{}'", self.befehl));
        }
        for arg in &self.argumente {
            if arg.chars().any(|c| c.is_control()) {
                return Err(format!("Argument enthaelt Steuerzeichen: '{arg}'"));
            }
        }

        let mut zeile = format!("{}\t{}", self.id, self.befehl);
        for arg in &self.argumente {
            zeile.push('\t');
            zeile.push_str(arg);
        }
        Ok(zeile)
    }
}

// ---------------------------------------------------------------------------
// LineCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer das zeilenbasierte Steuerprotokoll
///
/// Implementiert `Encoder<WireFrame>` und `Decoder` fuer nahtlose
/// Integration mit `tokio_util::codec::Framed`.
#[derive(Debug, Clone)]
pub struct LineCodec {
    /// Maximale erlaubte Zeilenlaenge in Bytes
    max_zeilen_laenge: usize,
}

impl LineCodec {
    /// Erstellt einen neuen `LineCodec` mit Standard-Limits
    pub fn neu() -> Self {
        Self {
            max_zeilen_laenge: DEFAULT_MAX_ZEILEN_LAENGE,
        }
    }

    /// Erstellt einen `LineCodec` mit benutzerdefinierter maximaler Zeilenlaenge
    pub fn mit_max_laenge(max_zeilen_laenge: usize) -> Self {
        Self { max_zeilen_laenge }
    }

    /// Gibt die konfigurierte maximale Zeilenlaenge zurueck
    pub fn max_zeilen_laenge(&self) -> usize {
        self.max_zeilen_laenge
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Decoder-Implementierung
// ---------------------------------------------------------------------------

impl Decoder for LineCodec {
    type Item = WireFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let newline_pos = src.iter().position(|b| *b == b'\n');

        let pos = match newline_pos {
            Some(pos) => pos,
            None => {
                // Zeilenlimit auch fuer unvollstaendige Zeilen durchsetzen,
                // sonst kann ein Client den Buffer unbegrenzt wachsen lassen
                if src.len() > self.max_zeilen_laenge {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "Zeile zu lang: > {} Bytes ohne Newline",
                            self.max_zeilen_laenge
                        ),
                    ));
                }
                return Ok(None);
            }
        };

        if pos > self.max_zeilen_laenge {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Zeile zu lang: {} Bytes (Maximum: {} Bytes)",
                    pos, self.max_zeilen_laenge
                ),
            ));
        }

        // Zeile inklusive Newline aus dem Buffer nehmen
        let zeile = src.split_to(pos + 1);
        let text = std::str::from_utf8(&zeile[..pos])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("Kein UTF-8: {e}")))?;

        let frame = WireFrame::parse_zeile(text)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok(Some(frame))
    }
}

// ---------------------------------------------------------------------------
// Encoder-Implementierung
// ---------------------------------------------------------------------------

impl Encoder<WireFrame> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, item: WireFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let zeile = item
            .als_zeile()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if zeile.len() + 1 > self.max_zeilen_laenge {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Zeile zu lang: {} Bytes (Maximum: {} Bytes)",
                    zeile.len() + 1,
                    self.max_zeilen_laenge
                ),
            ));
        }

        dst.reserve(zeile.len() + 1);
        dst.put_slice(zeile.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

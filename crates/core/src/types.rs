//! Gemeinsame Identifikationstypen fuer Sonar
//!
//! Operator-, Benutzer- und Kanal-IDs kommen vom Operator-Client und sind
//! deshalb Strings; Server- und Edge-IDs werden prozessintern vergeben und
//! sind UUIDs. Alle verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mandanten-ID (Operator), vergeben vom Operator-Client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperatorId(pub String);

impl OperatorId {
    /// Erstellt eine OperatorId aus einem beliebigen String-Wert
    pub fn neu(wert: impl Into<String>) -> Self {
        Self(wert.into())
    }

    /// Gibt die ID als &str zurueck
    pub fn als_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OperatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operator:{}", self.0)
    }
}

/// Benutzer-ID, eindeutig innerhalb eines Operators
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    /// Erstellt eine UserId aus einem beliebigen String-Wert
    pub fn neu(wert: impl Into<String>) -> Self {
        Self(wert.into())
    }

    /// Gibt die ID als &str zurueck
    pub fn als_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

/// Kanal-ID, eindeutig innerhalb eines Operators
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    /// Erstellt eine ChannelId aus einem beliebigen String-Wert
    pub fn neu(wert: impl Into<String>) -> Self {
        Self(wert.into())
    }

    /// Gibt die ID als &str zurueck
    pub fn als_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel:{}", self.0)
    }
}

/// Eindeutige Voice-Server-ID (prozessintern vergeben)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId(pub Uuid);

impl ServerId {
    /// Erstellt eine neue zufaellige ServerId
    pub fn neu() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parst eine ServerId aus der Wire-Darstellung (UUID-String)
    pub fn parse(wert: &str) -> Option<Self> {
        Uuid::parse_str(wert).ok().map(Self)
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for ServerId {
    fn default() -> Self {
        Self::neu()
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Eindeutige Edge-Verbindungs-ID (prozessintern vergeben)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub Uuid);

impl EdgeId {
    /// Erstellt eine neue zufaellige EdgeId
    pub fn neu() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parst eine EdgeId aus der Wire-Darstellung (UUID-String)
    pub fn parse(wert: &str) -> Option<Self> {
        Uuid::parse_str(wert).ok().map(Self)
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for EdgeId {
    fn default() -> Self {
        Self::neu()
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

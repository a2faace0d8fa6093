//! Operator-Ereignisse
//!
//! Jeder Operator besitzt einen eigenen Event-Strom. Die Ereignisse werden
//! vom Master erzeugt (gespeist durch Edge-Relays) und ueber den
//! Event-Dienst an abonnierte Operator-Clients gestreamt.

use crate::types::{ChannelId, UserId};
use serde::{Deserialize, Serialize};

/// Alle Ereignisse die ueber den Event-Strom eines Operators fliessen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperatorEreignis {
    // --- Benutzer-Ereignisse ---
    /// Ein Benutzer ist ueber einen User-Edge erreichbar geworden
    BenutzerOnline { user_id: UserId },
    /// Ein Benutzer ist nicht mehr erreichbar
    BenutzerOffline { user_id: UserId, grund: String },

    // --- Kanal-Ereignisse ---
    /// Ein Benutzer hat einen Voice-Kanal betreten
    KanalBetreten {
        user_id: UserId,
        kanal_id: ChannelId,
    },
    /// Ein Benutzer hat einen Voice-Kanal verlassen
    KanalVerlassen {
        user_id: UserId,
        kanal_id: ChannelId,
    },
    /// Ein Kanal wurde zerstoert (explizit oder durch den Orphan-Sweep)
    KanalZerstoert { kanal_id: ChannelId, grund: String },
}

impl OperatorEreignis {
    /// Gibt den Wire-Typ-Tag des Ereignisses zurueck
    pub fn wire_typ(&self) -> &'static str {
        match self {
            Self::BenutzerOnline { .. } => "USER_ONLINE",
            Self::BenutzerOffline { .. } => "USER_OFFLINE",
            Self::KanalBetreten { .. } => "USER_JOINED_CHANNEL",
            Self::KanalVerlassen { .. } => "USER_LEFT_CHANNEL",
            Self::KanalZerstoert { .. } => "CHANNEL_DESTROYED",
        }
    }

    /// Gibt die Wire-Argumente des Ereignisses zurueck (Typ-Tag zuerst)
    pub fn wire_argumente(&self) -> Vec<String> {
        match self {
            Self::BenutzerOnline { user_id } => {
                vec![self.wire_typ().into(), user_id.als_str().into()]
            }
            Self::BenutzerOffline { user_id, grund } => {
                vec![self.wire_typ().into(), user_id.als_str().into(), grund.clone()]
            }
            Self::KanalBetreten { user_id, kanal_id } | Self::KanalVerlassen { user_id, kanal_id } => {
                vec![
                    self.wire_typ().into(),
                    user_id.als_str().into(),
                    kanal_id.als_str().into(),
                ]
            }
            Self::KanalZerstoert { kanal_id, grund } => {
                vec![self.wire_typ().into(), kanal_id.als_str().into(), grund.clone()]
            }
        }
    }
}

//! VoiceManager – Registry der verbundenen Voice-Server
//!
//! Voice-Server melden sich ueber Voice-Edges an. Der Manager fuehrt die
//! Zuteilungsentscheidung fuer neue Kanaele: bevorzugt ein Server mit
//! passendem Location-Tag, sonst GeoIP-Naehe zur Client-Adresse, sonst der
//! am wenigsten belegte Server.

use dashmap::DashMap;
use sonar_core::types::{EdgeId, ServerId};
use std::sync::Arc;

use crate::edge::EdgeHandle;
use crate::geoip::{distanz_km, PositionAnbieter};

/// Master-seitiger Eintrag eines registrierten Voice-Servers
#[derive(Debug, Clone)]
pub struct VoiceServerEintrag {
    pub server_id: ServerId,
    /// Oeffentliche VoIP-Adresse die in Tokens eingebettet wird
    pub voip_adresse: String,
    pub voip_port: u16,
    pub max_clients: u32,
    /// Location-Tag (z.B. "eu", "us-east"); leer wenn nicht gesetzt
    pub location: String,
    /// Voice-Edge ueber die dieser Server erreichbar ist
    pub edge: EdgeHandle,
}

/// Registry der verbundenen Voice-Server samt Belegung
#[derive(Clone)]
pub struct VoiceManager {
    inner: Arc<VoiceManagerInner>,
}

struct VoiceManagerInner {
    server: DashMap<ServerId, Arc<VoiceServerEintrag>>,
    /// Aktive Clients pro Server (gespeist aus Join/Leave-Relays)
    belegung: DashMap<ServerId, u32>,
    geoip: Arc<dyn PositionAnbieter>,
}

impl VoiceManager {
    /// Erstellt einen neuen VoiceManager mit dem gegebenen GeoIP-Anbieter
    pub fn neu(geoip: Arc<dyn PositionAnbieter>) -> Self {
        Self {
            inner: Arc::new(VoiceManagerInner {
                server: DashMap::new(),
                belegung: DashMap::new(),
                geoip,
            }),
        }
    }

    /// Registriert einen Voice-Server; ein bestehender Eintrag mit derselben
    /// ID wird ersetzt (Re-Registrierung nach Edge-Reconnect)
    pub fn registrieren(&self, eintrag: Arc<VoiceServerEintrag>) -> bool {
        let server_id = eintrag.server_id;
        let ersetzt = self.inner.server.insert(server_id, eintrag).is_some();
        if ersetzt {
            // Belegung des alten Eintrags ist nach dem Reconnect wertlos
            self.inner.belegung.remove(&server_id);
        }
        tracing::info!(server_id = %server_id, ersetzt, "Voice-Server registriert");
        !ersetzt
    }

    /// Entfernt einen Voice-Server aus der Registry
    pub fn entfernen(&self, server_id: &ServerId) -> Option<Arc<VoiceServerEintrag>> {
        self.inner.belegung.remove(server_id);
        let entfernt = self.inner.server.remove(server_id).map(|(_, e)| e);
        if entfernt.is_some() {
            tracing::info!(server_id = %server_id, "Voice-Server entfernt");
        }
        entfernt
    }

    /// Entfernt alle Voice-Server die ueber eine bestimmte Edge liefen
    ///
    /// Wird beim Verbindungsverlust der Voice-Edge aufgerufen.
    pub fn alle_von_edge_entfernen(&self, edge_id: &EdgeId) -> usize {
        let betroffen: Vec<ServerId> = self
            .inner
            .server
            .iter()
            .filter(|e| e.value().edge.edge_id == *edge_id)
            .map(|e| *e.key())
            .collect();
        for server_id in &betroffen {
            self.entfernen(server_id);
        }
        betroffen.len()
    }

    /// Direkter Lookup (wird vom Orphan-Sweep und von part/destroy genutzt)
    pub fn nach_id(&self, server_id: &ServerId) -> Option<Arc<VoiceServerEintrag>> {
        self.inner.server.get(server_id).map(|e| e.value().clone())
    }

    /// Prueft ob ein Voice-Server aktuell verbunden ist
    pub fn ist_verbunden(&self, server_id: &ServerId) -> bool {
        self.inner.server.contains_key(server_id)
    }

    /// Gibt die Anzahl registrierter Voice-Server zurueck
    pub fn anzahl(&self) -> usize {
        self.inner.server.len()
    }

    /// Verbucht einen Client-Beitritt auf dem Server
    pub fn belegung_erhoehen(&self, server_id: &ServerId) {
        *self.inner.belegung.entry(*server_id).or_insert(0) += 1;
    }

    /// Verbucht einen Client-Austritt auf dem Server
    pub fn belegung_verringern(&self, server_id: &ServerId) {
        if let Some(mut wert) = self.inner.belegung.get_mut(server_id) {
            *wert = wert.saturating_sub(1);
        }
    }

    /// Gibt die aktuelle Belegung eines Servers zurueck
    pub fn belegung(&self, server_id: &ServerId) -> u32 {
        self.inner
            .belegung
            .get(server_id)
            .map(|w| *w)
            .unwrap_or(0)
    }

    /// Waehlt einen Voice-Server fuer einen neuen Kanal
    ///
    /// Reihenfolge:
    /// 1. lebende, nicht ueberlastete Server mit exakt passendem Location-Tag
    /// 2. GeoIP-Naehe der Client-Adresse (wenn keine Location angegeben
    ///    oder kein Tag passt)
    /// 3. der am wenigsten belegte Server
    ///
    /// `None` wenn kein Server verfuegbar ist – der Aufrufer meldet
    /// `CHANNEL_ALLOCATION_FAILED`.
    pub fn server_fuer_kanal_finden(
        &self,
        client_adresse: &str,
        location: &str,
    ) -> Option<Arc<VoiceServerEintrag>> {
        let kandidaten: Vec<Arc<VoiceServerEintrag>> = self
            .inner
            .server
            .iter()
            .map(|e| e.value().clone())
            .filter(|s| self.belegung(&s.server_id) < s.max_clients)
            .collect();

        if kandidaten.is_empty() {
            return None;
        }

        // 1. Expliziter Location-Tag
        if !location.is_empty() {
            if let Some(treffer) = kandidaten
                .iter()
                .filter(|s| s.location == location)
                .min_by_key(|s| self.belegung(&s.server_id))
            {
                return Some(treffer.clone());
            }
        }

        // 2. GeoIP-Naehe zur Client-Adresse
        if let Some(client_position) = self.inner.geoip.lookup(client_adresse) {
            let mut beste: Option<(f64, Arc<VoiceServerEintrag>)> = None;
            for server in &kandidaten {
                if let Some(server_position) = self.inner.geoip.lookup(&server.voip_adresse) {
                    let distanz = distanz_km(&client_position, &server_position);
                    let besser = match &beste {
                        None => true,
                        Some((bisher, _)) => distanz < *bisher,
                    };
                    if besser {
                        beste = Some((distanz, server.clone()));
                    }
                }
            }
            if let Some((_, server)) = beste {
                return Some(server);
            }
        }

        // 3. Geringste Belegung
        kandidaten
            .into_iter()
            .min_by_key(|s| self.belegung(&s.server_id))
    }
}

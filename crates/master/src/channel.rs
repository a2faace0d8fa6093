//! VoiceChannelManager und VoiceCache
//!
//! Der VoiceChannelManager ist die autoritative Zuordnung Kanal ->
//! Voice-Server. Der VoiceCache fuehrt die Benutzer-Mitgliedschaft
//! unabhaengig davon – er wird aus den Join/Leave-Relays der Edges
//! gespeist, nicht vom Kanal-Manager. Die beiden duerfen voruebergehend
//! auseinanderlaufen; der Orphan-Sweep gleicht sie wieder ab.

use dashmap::DashMap;
use sonar_core::types::{ChannelId, ServerId, UserId};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::{DomainFehler, DomainResult};
use crate::voice_manager::{VoiceManager, VoiceServerEintrag};

// ---------------------------------------------------------------------------
// VoiceChannel
// ---------------------------------------------------------------------------

/// Ein Voice-Kanal, gebunden an genau einen Voice-Server
#[derive(Debug)]
pub struct VoiceChannel {
    pub channel_id: ChannelId,
    pub beschreibung: String,
    pub server_id: ServerId,
    zerstoert: AtomicBool,
    orphan_zaehler: AtomicU32,
}

impl VoiceChannel {
    fn neu(channel_id: ChannelId, beschreibung: String, server_id: ServerId) -> Arc<Self> {
        Arc::new(Self {
            channel_id,
            beschreibung,
            server_id,
            zerstoert: AtomicBool::new(false),
            orphan_zaehler: AtomicU32::new(0),
        })
    }

    /// Gibt true zurueck wenn der Kanal als zerstoert markiert ist
    pub fn ist_zerstoert(&self) -> bool {
        self.zerstoert.load(Ordering::Relaxed)
    }

    /// Markiert den Kanal als zerstoert; idempotent
    ///
    /// Gibt `false` zurueck wenn er bereits markiert war.
    pub fn als_zerstoert_markieren(&self) -> bool {
        !self.zerstoert.swap(true, Ordering::Relaxed)
    }

    /// Erhoeht den Orphan-Zaehler und gibt den neuen Stand zurueck
    pub fn orphan_erhoehen(&self) -> u32 {
        self.orphan_zaehler.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Setzt den Orphan-Zaehler zurueck (Kanal bei einem Sweep gesund gesehen)
    pub fn orphan_zuruecksetzen(&self) {
        self.orphan_zaehler.store(0, Ordering::Relaxed);
    }

    /// Gibt den aktuellen Orphan-Stand zurueck
    pub fn orphan_stand(&self) -> u32 {
        self.orphan_zaehler.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// VoiceChannelManager
// ---------------------------------------------------------------------------

/// Autoritative Kanal-Registry eines Operators
#[derive(Default)]
pub struct VoiceChannelManager {
    kanaele: DashMap<ChannelId, Arc<VoiceChannel>>,
}

impl VoiceChannelManager {
    /// Erstellt einen leeren Kanal-Manager
    pub fn neu() -> Self {
        Self::default()
    }

    /// Gibt den lebenden Kanal mit dieser ID zurueck
    pub fn kanal(&self, channel_id: &ChannelId) -> Option<Arc<VoiceChannel>> {
        self.kanaele.get(channel_id).map(|e| e.value().clone())
    }

    /// Erstellt einen Kanal oder verwendet den bestehenden wieder
    ///
    /// Existiert der Kanal und lebt sein gebundener Server noch, wird
    /// derselbe Kanal zurueckgegeben (idempotente Wiederverwendung).
    /// Andernfalls wird an `bevorzugt` oder an eine frische Zuteilung des
    /// VoiceManagers gebunden.
    pub fn kanal_erstellen(
        &self,
        channel_id: &ChannelId,
        beschreibung: &str,
        voice: &VoiceManager,
        bevorzugt: Option<Arc<VoiceServerEintrag>>,
        client_adresse: &str,
        location: &str,
    ) -> DomainResult<Arc<VoiceChannel>> {
        if let Some(bestehend) = self.kanal(channel_id) {
            if !bestehend.ist_zerstoert() && voice.ist_verbunden(&bestehend.server_id) {
                return Ok(bestehend);
            }
            // Gebundener Server ist weg oder Kanal zerstoert -> neu binden
        }

        let server = match bevorzugt {
            Some(server) => server,
            None => voice
                .server_fuer_kanal_finden(client_adresse, location)
                .ok_or(DomainFehler::ZuteilungFehlgeschlagen)?,
        };

        let kanal = VoiceChannel::neu(
            channel_id.clone(),
            beschreibung.to_string(),
            server.server_id,
        );
        self.kanaele.insert(channel_id.clone(), kanal.clone());
        tracing::info!(
            kanal = %channel_id,
            server_id = %server.server_id,
            "Kanal an Voice-Server gebunden"
        );
        Ok(kanal)
    }

    /// Markiert einen Kanal als zerstoert; idempotent
    ///
    /// Gibt `false` zurueck wenn der Kanal unbekannt ist.
    pub fn als_zerstoert_markieren(&self, channel_id: &ChannelId) -> bool {
        match self.kanal(channel_id) {
            Some(kanal) => {
                kanal.als_zerstoert_markieren();
                true
            }
            None => false,
        }
    }

    /// Entfernt einen Kanal aus der lebenden Menge; idempotent
    pub fn unlinken(&self, channel_id: &ChannelId) -> Option<Arc<VoiceChannel>> {
        let entfernt = self.kanaele.remove(channel_id).map(|(_, k)| k);
        if let Some(kanal) = &entfernt {
            kanal.als_zerstoert_markieren();
        }
        entfernt
    }

    /// Unterscheidet "wirklich weg" von "Cache leer, Objekt noch gefuehrt"
    pub fn ist_unlinked_oder_zerstoert(&self, channel_id: &ChannelId) -> bool {
        match self.kanal(channel_id) {
            None => true,
            Some(kanal) => kanal.ist_zerstoert(),
        }
    }

    /// Punkt-Schnappschuss aller lebenden Kanaele
    pub fn alle(&self) -> Vec<Arc<VoiceChannel>> {
        self.kanaele.iter().map(|e| e.value().clone()).collect()
    }

    /// Gibt die Anzahl lebender Kanaele zurueck
    pub fn anzahl(&self) -> usize {
        self.kanaele.len()
    }
}

// ---------------------------------------------------------------------------
// VoiceCache
// ---------------------------------------------------------------------------

/// Benutzer-Mitgliedschafts-Cache eines Operators
///
/// Add/Remove geben bool zurueck; doppelte Signale von den Edges werden
/// toleriert statt Fehler zu werfen.
#[derive(Default)]
pub struct VoiceCache {
    mitglieder: DashMap<ChannelId, Vec<UserId>>,
    benutzer_kanal: DashMap<UserId, ChannelId>,
}

impl VoiceCache {
    /// Erstellt einen leeren Cache
    pub fn neu() -> Self {
        Self::default()
    }

    /// Verbucht einen Kanal-Beitritt
    ///
    /// Ein Beitritt ersetzt eine bestehende Mitgliedschaft in einem anderen
    /// Kanal (ein Benutzer ist in hoechstens einem Kanal). Gibt `false`
    /// zurueck wenn der Benutzer bereits in diesem Kanal war.
    pub fn beitreten(&self, user_id: &UserId, channel_id: &ChannelId) -> bool {
        if let Some(alter) = self.benutzer_kanal.get(user_id).map(|e| e.value().clone()) {
            if alter == *channel_id {
                return false;
            }
            self.aus_mitgliederliste_entfernen(user_id, &alter);
        }

        self.benutzer_kanal
            .insert(user_id.clone(), channel_id.clone());
        self.mitglieder
            .entry(channel_id.clone())
            .or_default()
            .push(user_id.clone());
        true
    }

    /// Verbucht einen Kanal-Austritt
    ///
    /// Gibt `false` zurueck wenn der Benutzer nicht in diesem Kanal war
    /// (doppeltes Signal).
    pub fn verlassen(&self, user_id: &UserId, channel_id: &ChannelId) -> bool {
        match self.benutzer_kanal.get(user_id).map(|e| e.value().clone()) {
            Some(aktuell) if aktuell == *channel_id => {
                self.benutzer_kanal.remove(user_id);
                self.aus_mitgliederliste_entfernen(user_id, channel_id);
                true
            }
            _ => false,
        }
    }

    /// Gibt den gecachten Kanal eines Benutzers zurueck
    pub fn kanal_von(&self, user_id: &UserId) -> Option<ChannelId> {
        self.benutzer_kanal.get(user_id).map(|e| e.value().clone())
    }

    /// Gibt die gecachten Mitglieder eines Kanals zurueck
    pub fn benutzer_in(&self, channel_id: &ChannelId) -> Vec<UserId> {
        self.mitglieder
            .get(channel_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Gibt die Mitgliederzahl eines Kanals zurueck
    pub fn mitglieder_anzahl(&self, channel_id: &ChannelId) -> usize {
        self.mitglieder
            .get(channel_id)
            .map(|e| e.value().len())
            .unwrap_or(0)
    }

    /// Zerstoert den Cache-Eintrag eines Kanals vollstaendig
    ///
    /// Gibt die Anzahl der entfernten Mitgliedschaften zurueck.
    pub fn eintrag_zerstoeren(&self, channel_id: &ChannelId) -> usize {
        let mitglieder = self
            .mitglieder
            .remove(channel_id)
            .map(|(_, m)| m)
            .unwrap_or_default();
        for user_id in &mitglieder {
            // Nur entfernen wenn der Benutzer nicht inzwischen woanders ist
            if self.kanal_von(user_id).as_ref() == Some(channel_id) {
                self.benutzer_kanal.remove(user_id);
            }
        }
        mitglieder.len()
    }

    /// Entfernt einen Benutzer komplett (Verbindungsverlust)
    pub fn benutzer_entfernen(&self, user_id: &UserId) -> Option<ChannelId> {
        let kanal = self.benutzer_kanal.remove(user_id).map(|(_, k)| k);
        if let Some(kanal) = &kanal {
            self.aus_mitgliederliste_entfernen(user_id, kanal);
        }
        kanal
    }

    fn aus_mitgliederliste_entfernen(&self, user_id: &UserId, channel_id: &ChannelId) {
        if let Some(mut liste) = self.mitglieder.get_mut(channel_id) {
            liste.retain(|u| u != user_id);
            let ist_leer = liste.is_empty();
            drop(liste);
            if ist_leer {
                self.mitglieder.remove(channel_id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeHandle;
    use crate::geoip::StatischerPositionAnbieter;
    use sonar_core::types::EdgeId;

    fn test_voice_manager_mit_server() -> (VoiceManager, Arc<VoiceServerEintrag>) {
        let vm = VoiceManager::neu(StatischerPositionAnbieter::leer());
        let (handle, _rx) = EdgeHandle::neu(EdgeId::neu());
        let server = Arc::new(VoiceServerEintrag {
            server_id: ServerId::neu(),
            voip_adresse: "10.0.0.1".into(),
            voip_port: 9000,
            max_clients: 100,
            location: "eu".into(),
            edge: handle,
        });
        vm.registrieren(server.clone());
        (vm, server)
    }

    #[test]
    fn kanal_erstellen_und_wiederverwenden() {
        let (vm, server) = test_voice_manager_mit_server();
        let mgr = VoiceChannelManager::neu();
        let id = ChannelId::neu("c1");

        let erster = mgr
            .kanal_erstellen(&id, "Kanal Eins", &vm, None, "1.2.3.4", "eu")
            .unwrap();
        assert_eq!(erster.server_id, server.server_id);

        // Zweiter Aufruf waehrend der Server lebt: derselbe Kanal
        let zweiter = mgr
            .kanal_erstellen(&id, "Kanal Eins", &vm, None, "1.2.3.4", "eu")
            .unwrap();
        assert!(Arc::ptr_eq(&erster, &zweiter));
        assert_eq!(mgr.anzahl(), 1);
    }

    #[test]
    fn kanal_wird_neu_gebunden_wenn_server_weg() {
        let (vm, server) = test_voice_manager_mit_server();
        let mgr = VoiceChannelManager::neu();
        let id = ChannelId::neu("c1");

        let erster = mgr
            .kanal_erstellen(&id, "Kanal", &vm, None, "1.2.3.4", "")
            .unwrap();

        // Gebundenen Server entfernen, zweiten registrieren
        vm.entfernen(&server.server_id);
        let (handle, _rx) = EdgeHandle::neu(EdgeId::neu());
        let ersatz = Arc::new(VoiceServerEintrag {
            server_id: ServerId::neu(),
            voip_adresse: "10.0.0.2".into(),
            voip_port: 9000,
            max_clients: 100,
            location: String::new(),
            edge: handle,
        });
        vm.registrieren(ersatz.clone());

        let zweiter = mgr
            .kanal_erstellen(&id, "Kanal", &vm, None, "1.2.3.4", "")
            .unwrap();
        assert!(!Arc::ptr_eq(&erster, &zweiter));
        assert_eq!(zweiter.server_id, ersatz.server_id);
    }

    #[test]
    fn kanal_erstellen_ohne_server_schlaegt_fehl() {
        let vm = VoiceManager::neu(StatischerPositionAnbieter::leer());
        let mgr = VoiceChannelManager::neu();
        let ergebnis =
            mgr.kanal_erstellen(&ChannelId::neu("c1"), "x", &vm, None, "1.2.3.4", "");
        assert!(matches!(
            ergebnis,
            Err(DomainFehler::ZuteilungFehlgeschlagen)
        ));
    }

    #[test]
    fn zerstoeren_und_unlinken_idempotent() {
        let (vm, _server) = test_voice_manager_mit_server();
        let mgr = VoiceChannelManager::neu();
        let id = ChannelId::neu("c1");
        mgr.kanal_erstellen(&id, "x", &vm, None, "1.2.3.4", "").unwrap();

        assert!(mgr.als_zerstoert_markieren(&id));
        assert!(mgr.als_zerstoert_markieren(&id)); // zweites Mal: Kanal noch bekannt
        assert!(mgr.ist_unlinked_oder_zerstoert(&id));

        assert!(mgr.unlinken(&id).is_some());
        assert!(mgr.unlinken(&id).is_none()); // idempotent
        assert!(mgr.ist_unlinked_oder_zerstoert(&id));
        assert!(!mgr.als_zerstoert_markieren(&id)); // unbekannt
    }

    #[test]
    fn unbekannter_kanal_gilt_als_unlinked() {
        let mgr = VoiceChannelManager::neu();
        assert!(mgr.ist_unlinked_oder_zerstoert(&ChannelId::neu("nie-gesehen")));
    }

    #[test]
    fn orphan_zaehler() {
        let (vm, _server) = test_voice_manager_mit_server();
        let mgr = VoiceChannelManager::neu();
        let id = ChannelId::neu("c1");
        let kanal = mgr
            .kanal_erstellen(&id, "x", &vm, None, "1.2.3.4", "")
            .unwrap();

        assert_eq!(kanal.orphan_stand(), 0);
        assert_eq!(kanal.orphan_erhoehen(), 1);
        assert_eq!(kanal.orphan_erhoehen(), 2);
        kanal.orphan_zuruecksetzen();
        assert_eq!(kanal.orphan_stand(), 0);
    }

    #[test]
    fn cache_beitreten_und_verlassen() {
        let cache = VoiceCache::neu();
        let u1 = UserId::neu("u1");
        let c1 = ChannelId::neu("c1");

        assert!(cache.beitreten(&u1, &c1));
        assert!(!cache.beitreten(&u1, &c1)); // doppeltes Signal toleriert
        assert_eq!(cache.kanal_von(&u1), Some(c1.clone()));
        assert_eq!(cache.mitglieder_anzahl(&c1), 1);

        assert!(cache.verlassen(&u1, &c1));
        assert!(!cache.verlassen(&u1, &c1)); // doppeltes Signal toleriert
        assert_eq!(cache.kanal_von(&u1), None);
        assert_eq!(cache.mitglieder_anzahl(&c1), 0);
    }

    #[test]
    fn cache_kanalwechsel_ersetzt_mitgliedschaft() {
        let cache = VoiceCache::neu();
        let u1 = UserId::neu("u1");
        let c1 = ChannelId::neu("c1");
        let c2 = ChannelId::neu("c2");

        cache.beitreten(&u1, &c1);
        cache.beitreten(&u1, &c2);

        assert_eq!(cache.kanal_von(&u1), Some(c2.clone()));
        assert_eq!(cache.mitglieder_anzahl(&c1), 0);
        assert_eq!(cache.mitglieder_anzahl(&c2), 1);
    }

    #[test]
    fn cache_verlassen_falscher_kanal() {
        let cache = VoiceCache::neu();
        let u1 = UserId::neu("u1");
        cache.beitreten(&u1, &ChannelId::neu("c1"));

        // Austritt aus einem anderen Kanal aendert nichts
        assert!(!cache.verlassen(&u1, &ChannelId::neu("c2")));
        assert_eq!(cache.kanal_von(&u1), Some(ChannelId::neu("c1")));
    }

    #[test]
    fn cache_eintrag_zerstoeren() {
        let cache = VoiceCache::neu();
        let c1 = ChannelId::neu("c1");
        for i in 0..3 {
            cache.beitreten(&UserId::neu(format!("u{i}")), &c1);
        }

        assert_eq!(cache.eintrag_zerstoeren(&c1), 3);
        assert_eq!(cache.mitglieder_anzahl(&c1), 0);
        assert_eq!(cache.kanal_von(&UserId::neu("u0")), None);
        // Idempotent
        assert_eq!(cache.eintrag_zerstoeren(&c1), 0);
    }

    #[test]
    fn cache_benutzer_entfernen() {
        let cache = VoiceCache::neu();
        let u1 = UserId::neu("u1");
        let c1 = ChannelId::neu("c1");
        cache.beitreten(&u1, &c1);

        assert_eq!(cache.benutzer_entfernen(&u1), Some(c1.clone()));
        assert_eq!(cache.mitglieder_anzahl(&c1), 0);
        assert_eq!(cache.benutzer_entfernen(&u1), None);
    }
}

//! Operator und OperatorManager
//!
//! Ein Operator ist der Mandanten-Namensraum: eigener Kanal-Manager,
//! eigener Mitgliedschafts-Cache, eigener Event-Strom und die Map der
//! aktuell erreichbaren Benutzer. Operatoren entstehen lazy beim ersten
//! Zugriff und werden waehrend der Prozesslaufzeit nie zerstoert.

use dashmap::DashMap;
use sonar_core::types::{OperatorId, UserId};
use std::sync::Arc;

use crate::channel::{VoiceCache, VoiceChannelManager};
use crate::publisher::EventPublisher;
use crate::user_manager::UserEdgeEintrag;

/// Ein ueber einen User-Edge erreichbarer Benutzer
#[derive(Clone)]
pub struct VerbundenerBenutzer {
    pub user_id: UserId,
    pub beschreibung: String,
    /// Adresse des Endgeraets (fuer GeoIP-basierte Zuteilung)
    pub remote_adresse: String,
    /// User-Edge ueber den der Benutzer erreichbar ist
    pub edge: Arc<UserEdgeEintrag>,
}

/// Mandanten-Namensraum eines Operators
pub struct Operator {
    pub operator_id: OperatorId,
    pub kanaele: VoiceChannelManager,
    pub cache: VoiceCache,
    pub ereignisse: EventPublisher,
    /// Aktuell erreichbare Benutzer dieses Operators
    pub benutzer: DashMap<UserId, VerbundenerBenutzer>,
}

impl Operator {
    fn neu(operator_id: OperatorId) -> Arc<Self> {
        Arc::new(Self {
            operator_id,
            kanaele: VoiceChannelManager::neu(),
            cache: VoiceCache::neu(),
            ereignisse: EventPublisher::neu(),
            benutzer: DashMap::new(),
        })
    }

    /// Gibt den verbundenen Benutzer zurueck, falls erreichbar
    pub fn benutzer_holen(&self, user_id: &UserId) -> Option<VerbundenerBenutzer> {
        self.benutzer.get(user_id).map(|e| e.value().clone())
    }

    /// Prueft ob ein Benutzer aktuell erreichbar ist
    pub fn ist_online(&self, user_id: &UserId) -> bool {
        self.benutzer.contains_key(user_id)
    }
}

/// Registry aller Operatoren
///
/// Erster Zugriff erzeugt den Operator atomar ueber die Entry-API der
/// Concurrent-Map – nebenlaeufige Erstzugriffe auf dieselbe ID erhalten
/// garantiert dieselbe Instanz.
#[derive(Clone, Default)]
pub struct OperatorManager {
    operatoren: Arc<DashMap<OperatorId, Arc<Operator>>>,
}

impl OperatorManager {
    /// Erstellt einen leeren OperatorManager
    pub fn neu() -> Self {
        Self::default()
    }

    /// Gibt den Operator zurueck und erzeugt ihn bei Bedarf atomar
    pub fn operator_holen(&self, operator_id: &OperatorId) -> Arc<Operator> {
        self.operatoren
            .entry(operator_id.clone())
            .or_insert_with(|| {
                tracing::info!(operator = %operator_id, "Operator angelegt");
                Operator::neu(operator_id.clone())
            })
            .value()
            .clone()
    }

    /// Gibt den Operator nur zurueck wenn er bereits existiert
    pub fn operator_falls_vorhanden(&self, operator_id: &OperatorId) -> Option<Arc<Operator>> {
        self.operatoren.get(operator_id).map(|e| e.value().clone())
    }

    /// Punkt-Schnappschuss aller Operatoren (Kopie, haelt keine Locks)
    pub fn schnappschuss(&self) -> Vec<Arc<Operator>> {
        self.operatoren.iter().map(|e| e.value().clone()).collect()
    }

    /// Gibt die Anzahl bekannter Operatoren zurueck
    pub fn anzahl(&self) -> usize {
        self.operatoren.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_wird_lazy_angelegt() {
        let mgr = OperatorManager::neu();
        assert_eq!(mgr.anzahl(), 0);
        assert!(mgr.operator_falls_vorhanden(&OperatorId::neu("acme")).is_none());

        let operator = mgr.operator_holen(&OperatorId::neu("acme"));
        assert_eq!(mgr.anzahl(), 1);
        assert_eq!(operator.operator_id, OperatorId::neu("acme"));

        // Zweiter Zugriff: dieselbe Instanz
        let nochmal = mgr.operator_holen(&OperatorId::neu("acme"));
        assert!(Arc::ptr_eq(&operator, &nochmal));
    }

    #[test]
    fn schnappschuss_ist_kopie() {
        let mgr = OperatorManager::neu();
        mgr.operator_holen(&OperatorId::neu("a"));
        mgr.operator_holen(&OperatorId::neu("b"));

        let schnappschuss = mgr.schnappschuss();
        assert_eq!(schnappschuss.len(), 2);

        // Neuer Operator taucht im alten Schnappschuss nicht auf
        mgr.operator_holen(&OperatorId::neu("c"));
        assert_eq!(schnappschuss.len(), 2);
        assert_eq!(mgr.anzahl(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn nebenlaeufiger_erstzugriff_liefert_eine_instanz() {
        let mgr = OperatorManager::neu();
        let id = OperatorId::neu("wettlauf");

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let mgr = mgr.clone();
            let id = id.clone();
            tasks.push(tokio::spawn(async move { mgr.operator_holen(&id) }));
        }

        let mut instanzen = Vec::new();
        for task in tasks {
            instanzen.push(task.await.unwrap());
        }

        // Alle Aufrufer muessen exakt dieselbe Instanz erhalten haben
        let erste = &instanzen[0];
        for instanz in &instanzen {
            assert!(Arc::ptr_eq(erste, instanz));
        }
        assert_eq!(mgr.anzahl(), 1);
    }
}

//! UserManager – User-Edge-Registry und Join-Futures
//!
//! Fuehrt die verbundenen User-Edges (fuer die zufaellige Edge-Wahl bei
//! Control-Tokens) und die Tabelle der JoinChannelFutures: Beitritts-
//! Absichten fuer Benutzer die noch nicht verbunden sind. Meldet sich der
//! Benutzer spaeter an irgendeinem User-Edge an, wird die Absicht als
//! Token-Push mit Grund `JOIN` eingeloest. Nicht eingeloeste Futures
//! verfallen nach einer konfigurierten TTL.

use dashmap::DashMap;
use rand::RngExt;
use sonar_core::types::{ChannelId, EdgeId, OperatorId, UserId};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::edge::EdgeHandle;

/// Master-seitiger Eintrag eines registrierten User-Edges
#[derive(Debug, Clone)]
pub struct UserEdgeEintrag {
    pub edge_id: EdgeId,
    /// Oeffentliche Adresse die in Tokens eingebettet wird
    pub oeffentliche_adresse: String,
    pub oeffentlicher_port: u16,
    pub handle: EdgeHandle,
}

/// Beitritts-Absicht fuer einen (noch) nicht verbundenen Benutzer
#[derive(Debug, Clone)]
pub struct JoinChannelFuture {
    pub operator_id: OperatorId,
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub channel_beschreibung: String,
    pub location: String,
    pub erstellt: Instant,
}

impl JoinChannelFuture {
    /// Prueft ob die Absicht ihre Lebenszeit ueberschritten hat
    pub fn ist_abgelaufen(&self, ttl: Duration) -> bool {
        self.erstellt.elapsed() > ttl
    }
}

/// Registry der User-Edges und der offenen Join-Futures
#[derive(Clone, Default)]
pub struct UserManager {
    inner: Arc<UserManagerInner>,
}

#[derive(Default)]
struct UserManagerInner {
    edges: DashMap<EdgeId, Arc<UserEdgeEintrag>>,
    futures: DashMap<(OperatorId, UserId), JoinChannelFuture>,
}

impl UserManager {
    /// Erstellt einen leeren UserManager
    pub fn neu() -> Self {
        Self::default()
    }

    /// Registriert einen User-Edge
    pub fn edge_registrieren(&self, eintrag: Arc<UserEdgeEintrag>) {
        tracing::info!(
            edge_id = %eintrag.edge_id,
            adresse = %eintrag.oeffentliche_adresse,
            "User-Edge registriert"
        );
        self.inner.edges.insert(eintrag.edge_id, eintrag);
    }

    /// Entfernt einen User-Edge
    pub fn edge_entfernen(&self, edge_id: &EdgeId) -> Option<Arc<UserEdgeEintrag>> {
        let entfernt = self.inner.edges.remove(edge_id).map(|(_, e)| e);
        if entfernt.is_some() {
            tracing::info!(edge_id = %edge_id, "User-Edge entfernt");
        }
        entfernt
    }

    /// Gibt die Anzahl verbundener User-Edges zurueck
    pub fn edge_anzahl(&self) -> usize {
        self.inner.edges.len()
    }

    /// Waehlt gleichverteilt einen der verbundenen User-Edges
    ///
    /// Lastverteilung fuer Control-Tokens die noch an keinen Kanal
    /// gebunden sind.
    pub fn zufaelliger_edge(&self) -> Option<Arc<UserEdgeEintrag>> {
        let eintraege: Vec<Arc<UserEdgeEintrag>> =
            self.inner.edges.iter().map(|e| e.value().clone()).collect();
        if eintraege.is_empty() {
            return None;
        }
        let index = rand::rng().random_range(0..eintraege.len());
        Some(eintraege[index].clone())
    }

    /// Speichert eine Beitritts-Absicht; eine bestehende fuer dasselbe
    /// (Operator, Benutzer)-Paar wird ersetzt
    pub fn join_future_anlegen(&self, future: JoinChannelFuture) {
        let schluessel = (future.operator_id.clone(), future.user_id.clone());
        tracing::debug!(
            operator = %future.operator_id,
            user = %future.user_id,
            kanal = %future.channel_id,
            "Join-Future angelegt"
        );
        self.inner.futures.insert(schluessel, future);
    }

    /// Loest die Beitritts-Absicht eines Benutzers ein (entfernt sie)
    pub fn join_future_einloesen(
        &self,
        operator_id: &OperatorId,
        user_id: &UserId,
    ) -> Option<JoinChannelFuture> {
        self.inner
            .futures
            .remove(&(operator_id.clone(), user_id.clone()))
            .map(|(_, f)| f)
    }

    /// Entfernt alle abgelaufenen Join-Futures
    ///
    /// Wird vom periodischen Sweep aufgerufen; begrenzt das Wachstum der
    /// Tabelle fuer Benutzer die sich nie verbinden.
    pub fn abgelaufene_futures_bereinigen(&self, ttl: Duration) -> usize {
        let vorher = self.inner.futures.len();
        self.inner.futures.retain(|_, f| !f.ist_abgelaufen(ttl));
        let entfernt = vorher - self.inner.futures.len();
        if entfernt > 0 {
            tracing::debug!(entfernt, "Abgelaufene Join-Futures bereinigt");
        }
        entfernt
    }

    /// Gibt die Anzahl offener Join-Futures zurueck
    pub fn futures_anzahl(&self) -> usize {
        self.inner.futures.len()
    }
}

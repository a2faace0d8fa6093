//! OrphanTask – Periodischer Abgleich von Kanal-Zustand und Konnektivitaet
//!
//! Kanaele deren gebundener Voice-Server nicht mehr verbunden ist oder
//! deren Mitgliedschafts-Cache leer ist, sammeln pro Sweep einen
//! Orphan-Zaehler. Ueberschreitet der Zaehler `max_orphan_anzahl`, wird der
//! Kanal zwangs-unlinkt und sein Cache-Eintrag zerstoert. Das ist die
//! Selbstheilung gegen Edges die ohne sauberes Unregister verschwinden
//! (Absturz, Netzpartition).
//!
//! Ein bei einem Sweep gesund gesehener Kanal setzt seinen Zaehler auf
//! null zurueck. Der Sweep raeumt ausserdem abgelaufene Join-Futures ab.

use sonar_core::event::OperatorEreignis;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::state::MasterState;

/// Periodischer Verwaisungs-Sweep
pub struct OrphanTask {
    state: Arc<MasterState>,
}

impl OrphanTask {
    /// Erstellt den Task
    pub fn neu(state: Arc<MasterState>) -> Self {
        Self { state }
    }

    /// Startet den Sweep im festen Intervall bis zum Shutdown-Signal
    pub fn starten(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let intervall_dauer = Duration::from_secs(self.state.config.orphan_intervall_sek);
        tokio::spawn(async move {
            let mut intervall = tokio::time::interval(intervall_dauer);
            intervall.set_missed_tick_behavior(MissedTickBehavior::Delay);
            intervall.tick().await; // erster Tick feuert sofort

            loop {
                tokio::select! {
                    _ = intervall.tick() => {
                        self.durchlauf();
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            tracing::info!("Orphan-Sweep beendet");
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Ein einzelner Sweep ueber alle Kanaele aller Operatoren
    ///
    /// Gibt die Anzahl der entfernten Kanaele zurueck.
    pub fn durchlauf(&self) -> usize {
        let max = self.state.config.max_orphan_anzahl;
        let mut entfernt = 0;

        for operator in self.state.operatoren.schnappschuss() {
            for kanal in operator.kanaele.alle() {
                let server_weg = !self.state.voice.ist_verbunden(&kanal.server_id);
                let cache_leer = operator.cache.mitglieder_anzahl(&kanal.channel_id) == 0;

                if server_weg || cache_leer {
                    let stand = kanal.orphan_erhoehen();
                    tracing::debug!(
                        operator = %operator.operator_id,
                        kanal = %kanal.channel_id,
                        stand,
                        server_weg,
                        cache_leer,
                        "Kanal verwaist gesehen"
                    );
                    if stand > max {
                        operator.kanaele.unlinken(&kanal.channel_id);
                        let mitglieder = operator.cache.eintrag_zerstoeren(&kanal.channel_id);
                        operator
                            .ereignisse
                            .veroeffentlichen(OperatorEreignis::KanalZerstoert {
                                kanal_id: kanal.channel_id.clone(),
                                grund: "ORPHANED".into(),
                            });
                        self.state.metriken.orphan_evictions_total.inc();
                        entfernt += 1;
                        tracing::info!(
                            operator = %operator.operator_id,
                            kanal = %kanal.channel_id,
                            mitglieder,
                            "Verwaister Kanal entfernt"
                        );
                    }
                } else {
                    kanal.orphan_zuruecksetzen();
                }
            }
        }

        let futures_entfernt = self.state.benutzer.abgelaufene_futures_bereinigen(
            Duration::from_secs(self.state.config.join_future_ttl_sek),
        );
        if entfernt > 0 || futures_entfernt > 0 {
            self.state.gauges_aktualisieren();
        }
        entfernt
    }
}

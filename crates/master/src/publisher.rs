//! EventPublisher – Event-Strom eines Operators
//!
//! Jeder Operator besitzt genau einen Publisher. Der Event-Dienst des
//! Masters abonniert ihn pro SUBSCRIBE-Verbindung; nachzuegelnde
//! Abonnenten werden vom broadcast-Kanal abgehaengt statt den Publisher
//! zu blockieren.

use sonar_core::event::OperatorEreignis;
use tokio::sync::broadcast;

/// Groesse des Broadcast-Kanals pro Operator
const EVENT_KANAL_GROESSE: usize = 256;

/// Event-Strom eines Operators
pub struct EventPublisher {
    tx: broadcast::Sender<OperatorEreignis>,
}

impl EventPublisher {
    /// Erstellt einen neuen Publisher
    pub fn neu() -> Self {
        let (tx, _) = broadcast::channel(EVENT_KANAL_GROESSE);
        Self { tx }
    }

    /// Veroeffentlicht ein Ereignis an alle Abonnenten
    ///
    /// Ohne Abonnenten wird das Ereignis verworfen – das ist der Normalfall
    /// fuer Operatoren ohne verbundenen Event-Client.
    pub fn veroeffentlichen(&self, ereignis: OperatorEreignis) {
        let _ = self.tx.send(ereignis);
    }

    /// Abonniert alle zukuenftigen Ereignisse
    pub fn abonnieren(&self) -> broadcast::Receiver<OperatorEreignis> {
        self.tx.subscribe()
    }

    /// Gibt die Anzahl aktiver Abonnenten zurueck
    pub fn abonnenten_anzahl(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::neu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonar_core::types::UserId;

    #[tokio::test]
    async fn ereignisse_erreichen_abonnenten() {
        let publisher = EventPublisher::neu();
        let mut rx = publisher.abonnieren();

        publisher.veroeffentlichen(OperatorEreignis::BenutzerOnline {
            user_id: UserId::neu("u1"),
        });

        let ereignis = rx.try_recv().expect("Ereignis erwartet");
        assert!(matches!(ereignis, OperatorEreignis::BenutzerOnline { .. }));
    }

    #[test]
    fn veroeffentlichen_ohne_abonnenten_ist_harmlos() {
        let publisher = EventPublisher::neu();
        assert_eq!(publisher.abonnenten_anzahl(), 0);
        publisher.veroeffentlichen(OperatorEreignis::BenutzerOffline {
            user_id: UserId::neu("u1"),
            grund: "TEST".into(),
        });
    }

    #[tokio::test]
    async fn mehrere_abonnenten_erhalten_dasselbe_ereignis() {
        let publisher = EventPublisher::neu();
        let mut rx1 = publisher.abonnieren();
        let mut rx2 = publisher.abonnieren();

        publisher.veroeffentlichen(OperatorEreignis::BenutzerOnline {
            user_id: UserId::neu("u1"),
        });

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }
}

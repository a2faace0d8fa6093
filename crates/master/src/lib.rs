//! sonar-master – Der autoritative Kontroll-Server
//!
//! Der Master besitzt den gesamten autoritativen Zustand: Operatoren,
//! Kanaele, Benutzer und Voice-Server. Er nimmt vier Arten von
//! Verbindungen an:
//!
//! - **Operator-Dienst**: RPC-artige Steuerbefehle externer Operator-Clients
//! - **User-Edge-Dienst**: Registrierungs-Relays der User-Edges
//! - **Voice-Edge-Dienst**: Registrierungs-Relays der Voice-Edges
//! - **Event-Dienst**: Event-Streams pro Operator
//!
//! Saemtlicher Zustand lebt im Speicher und wird nach einem Neustart aus
//! den Edge-Registrierungen neu aufgebaut.

pub mod channel;
pub mod edge;
pub mod error;
pub mod geoip;
pub mod operator;
pub mod orphan;
pub mod publisher;
pub mod server;
pub mod service;
pub mod state;
pub mod user_manager;
pub mod voice_manager;

pub use error::DomainFehler;
pub use server::{MasterBindAdressen, MasterServer};
pub use state::{MasterConfig, MasterState};

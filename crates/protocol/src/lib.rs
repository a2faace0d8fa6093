//! sonar-protocol – Das zeilenbasierte Sonar-Steuerprotokoll
//!
//! Alle Steuerverbindungen (Operator-Clients, Edges, Voice-Server) sprechen
//! dasselbe Format: Tab-getrennte Felder, Newline-terminiert, mit einer
//! Request-ID fuer die Request/Reply-Zuordnung.

pub mod command;
pub mod limits;
pub mod wire;

pub use command::{Command, ErrorCode};
pub use wire::{LineCodec, WireFrame};

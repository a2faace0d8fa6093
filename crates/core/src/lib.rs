//! sonar-core – Gemeinsame Typen, Traits und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Sonar-Crates gemeinsam genutzt werden.

pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{Result, SonarError};
pub use event::OperatorEreignis;
pub use types::{ChannelId, EdgeId, OperatorId, ServerId, UserId};

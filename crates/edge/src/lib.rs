//! sonar-edge – Die beiden Edge-Relays
//!
//! Edges sind duenne, zustandsbehaftete Relays mit genau einer
//! Upstream-Verbindung zum Master:
//!
//! - **User-Edge**: nimmt Endbenutzer-Steuerverbindungen an, verifiziert
//!   deren Tokens gegen den oeffentlichen Master-Schluessel und relayed
//!   Registrierungs-Ereignisse; plant pro Verbindung die Token-Erneuerung.
//! - **Voice-Edge**: nimmt Voice-Server-Registrierungen an und bestaetigt
//!   vor dem Abschluss die behauptete VoIP-Adresse per UDP-Challenge.
//!
//! Geht die Master-Verbindung verloren, verwerfen beide Edges alle lokal
//! registrierten Clients mit Grund `TRY_AGAIN` – der Master-Zustand ist
//! nach einem Reconnect autoritativ.

pub mod challenge;
pub mod user_edge;
pub mod voice_edge;

pub use challenge::ChallengeManager;
pub use user_edge::{UserEdgeConfig, UserEdgeServer};
pub use voice_edge::{VoiceEdgeConfig, VoiceEdgeServer};

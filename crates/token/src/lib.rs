//! sonar-token – Signierte Bearer-Tokens
//!
//! Der Master praegt Tokens mit seinem privaten Ed25519-Schluessel; die
//! Edges verifizieren sie mit dem oeffentlichen Schluessel. Ein Token ist
//! eine reine Traeger-Berechtigung: wer ihn besitzt, darf sich mit der
//! eingebetteten Identitaet an der eingebetteten Edge-Adresse registrieren.

pub mod error;
pub mod keys;
pub mod token;

pub use error::TokenFehler;
pub use keys::SchluesselPaar;
pub use token::{Token, TOKEN_GRUND_JOIN, TOKEN_GRUND_REFRESH};

//! GeoIP-Schnittstelle fuer die standortbasierte Server-Auswahl
//!
//! Der Master konsumiert GeoIP ausschliesslich ueber die
//! `Position lookup(adresse)`-Faehigkeit. Die mitgelieferte statische
//! Implementierung arbeitet mit Praefix-Eintraegen aus der Konfiguration;
//! ein echter Provider (MaxMind o.ae.) kann dahinter gesteckt werden ohne
//! den Master zu aendern.

use std::sync::Arc;

/// Geografische Position (Breiten-/Laengengrad in Grad)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub breitengrad: f64,
    pub laengengrad: f64,
}

/// Faehigkeit: IPv4-Adresse -> Position
pub trait PositionAnbieter: Send + Sync + 'static {
    /// Schlaegt die Position einer IPv4-Adresse (dotted quad) nach
    fn lookup(&self, ipv4: &str) -> Option<Position>;
}

/// Grosskreis-Distanz zweier Positionen in Kilometern (Haversine)
pub fn distanz_km(a: &Position, b: &Position) -> f64 {
    const ERDRADIUS_KM: f64 = 6371.0;

    let lat_a = a.breitengrad.to_radians();
    let lat_b = b.breitengrad.to_radians();
    let d_lat = (b.breitengrad - a.breitengrad).to_radians();
    let d_lon = (b.laengengrad - a.laengengrad).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * ERDRADIUS_KM * h.sqrt().asin()
}

/// Statischer Anbieter: Praefix-Tabelle aus der Konfiguration
///
/// Der laengste passende Praefix gewinnt. Gedacht fuer Betriebsumgebungen
/// mit bekannten Adressbereichen und fuer Tests.
pub struct StatischerPositionAnbieter {
    eintraege: Vec<(String, Position)>,
}

impl StatischerPositionAnbieter {
    /// Erstellt einen Anbieter aus (Praefix, Position)-Eintraegen
    pub fn neu(eintraege: Vec<(String, Position)>) -> Arc<Self> {
        Arc::new(Self { eintraege })
    }

    /// Erstellt einen leeren Anbieter (kein Lookup liefert ein Ergebnis)
    pub fn leer() -> Arc<Self> {
        Self::neu(Vec::new())
    }
}

impl PositionAnbieter for StatischerPositionAnbieter {
    fn lookup(&self, ipv4: &str) -> Option<Position> {
        self.eintraege
            .iter()
            .filter(|(praefix, _)| ipv4.starts_with(praefix.as_str()))
            .max_by_key(|(praefix, _)| praefix.len())
            .map(|(_, position)| *position)
    }
}

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

pub type VehicleId = String;

/// Vehicle positions from one feed poll.
pub type PositionSet = AHashMap<VehicleId, Position>;

/// Ordered path as returned by the routing engine.
pub type RawPath = Vec<Position>;

/// Exactly `path_length` rounded points.
pub type SimplifiedPath = Vec<Position>;

pub const DEFAULT_COORDINATE_PRECISION: u32 = 5;

/// WGS84 coordinate in degrees. Serialised as `[lat, lon]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

impl Position {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn rounded(self, precision: u32) -> Self {
        Self {
            lat: round_to(self.lat, precision),
            lon: round_to(self.lon, precision),
        }
    }

    pub fn lerp(self, other: Position, t: f64) -> Self {
        Self {
            lat: self.lat + (other.lat - self.lat) * t,
            lon: self.lon + (other.lon - self.lon) * t,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

impl From<(f64, f64)> for Position {
    fn from((lat, lon): (f64, f64)) -> Self {
        Self { lat, lon }
    }
}

impl From<Position> for (f64, f64) {
    fn from(position: Position) -> Self {
        (position.lat, position.lon)
    }
}

/// Previous and current observation of one vehicle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionPair {
    pub previous: Position,
    pub current: Position,
}

pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_five_places() {
        let position = Position::new(51.5000049, -0.1234567).rounded(5);
        assert_eq!(position, Position::new(51.5, -0.12346));
    }

    #[test]
    fn serialises_as_lat_lon_array() {
        let json = serde_json::to_string(&Position::new(51.5, -0.1)).unwrap();
        assert_eq!(json, "[51.5,-0.1]");

        let parsed: Position = serde_json::from_str("[1.25,2.5]").unwrap();
        assert_eq!(parsed, Position::new(1.25, 2.5));
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(Position::new(51.5, -0.1).is_valid());
        assert!(!Position::new(91.0, 0.0).is_valid());
        assert!(!Position::new(0.0, f64::NAN).is_valid());
    }
}

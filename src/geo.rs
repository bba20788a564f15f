//! Great-circle distance

use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees
    pub latitude: f64,

    /// Longitude in degrees
    pub longitude: f64,
}

impl Coordinates {
    /// Sentinel for "no address yet".
    pub const UNSET: Self = Self {
        latitude: 0.0,
        longitude: 0.0,
    };

    /// Create a new coordinate pair.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether this pair is the unset sentinel.
    #[must_use]
    pub fn is_unset(&self) -> bool {
        is_unset_component(self.latitude) && is_unset_component(self.longitude)
    }

    /// Haversine distance to another pair, in kilometres.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        distance_km(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Haversine great-circle distance in kilometres.
///
/// Identical points, and the all-unset sentinel (every component zero), yield
/// exactly `0.0` so that a missing address never produces a delivery fee.
#[must_use]
#[expect(
    clippy::float_cmp,
    reason = "exact equality is the identical-point sentinel, not a tolerance check"
)]
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let identical = lat1 == lat2 && lon1 == lon2;
    let unset = [lat1, lon1, lat2, lon2]
        .into_iter()
        .all(is_unset_component);

    if identical || unset {
        return 0.0;
    }

    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

fn is_unset_component(value: f64) -> bool {
    value == 0.0 || value.is_nan()
}

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::session::UtcDT;

/// A "part" of a location
pub type LocationComponent = f64;

/// Mean earth radius used for path length calculations
const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
/// A fix exactly as the platform reported it, fields may be garbage
pub struct RawFix {
    pub lat: LocationComponent,
    pub long: LocationComponent,
    /// Horizontal accuracy in meters
    pub accuracy: f64,
    /// Direction of travel in degrees clockwise from true north
    #[serde(default)]
    pub heading: Option<f64>,
    /// Ground speed in meters per second
    #[serde(default)]
    pub speed: Option<f64>,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
/// An accepted location sample, built from a [RawFix]
pub struct GeoSample {
    /// Latitude in decimal degrees
    pub lat: LocationComponent,
    /// Longitude in decimal degrees
    pub long: LocationComponent,
    /// Estimated horizontal error in meters, never negative
    pub accuracy: f64,
    /// Heading in `[0, 360)`, absent when stationary or unsupported
    pub heading: Option<f64>,
    /// Speed in m/s, never negative
    pub speed: Option<f64>,
    /// Capture time, milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl From<RawFix> for GeoSample {
    fn from(raw: RawFix) -> Self {
        let accuracy = if raw.accuracy.is_nan() {
            0.0
        } else {
            raw.accuracy.max(0.0)
        };

        let heading = raw
            .heading
            .filter(|h| h.is_finite())
            .map(|h| h.rem_euclid(360.0));

        let speed = raw.speed.filter(|s| s.is_finite() && *s >= 0.0);

        Self {
            lat: raw.lat,
            long: raw.long,
            accuracy,
            heading,
            speed,
            timestamp: raw.timestamp,
        }
    }
}

impl GeoSample {
    /// Whether both samples sit on exactly the same coordinate
    pub fn same_position(&self, other: &GeoSample) -> bool {
        self.lat == other.lat && self.long == other.long
    }

    pub fn captured_at(&self) -> Option<UtcDT> {
        DateTime::from_timestamp_millis(self.timestamp)
    }

    /// Great-circle distance to another sample in meters (haversine)
    pub fn distance_to(&self, other: &GeoSample) -> f64 {
        let dlat = (other.lat - self.lat).to_radians();
        let dlong = (other.long - self.long).to_radians();
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlong / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_METERS * c
    }
}

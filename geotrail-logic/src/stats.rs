use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tracker_state::{TrackerSnapshot, TrackingStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
/// Live numbers shown next to the trail
pub struct TrailStats {
    /// Points on the path
    pub points: usize,
    /// Accuracy of the current fix, rounded to the meter
    pub accuracy_meters: Option<u32>,
    /// Current speed in km/h, 0 when the platform doesn't report one
    pub speed_kmh: f64,
    /// Current heading rounded to the degree
    pub heading_degrees: Option<u32>,
    /// Length of the path in meters
    pub distance_meters: f64,
    /// Seconds from the first path point to the current fix
    pub elapsed_seconds: Option<f64>,
    /// Tracking but no fix has arrived yet
    pub waiting_for_fix: bool,
}

impl TrailStats {
    pub fn from_snapshot(snapshot: &TrackerSnapshot) -> Self {
        let current = snapshot.current.as_ref();

        let distance_meters: f64 = snapshot
            .path
            .segments()
            .map(|(a, b)| a.distance_to(b))
            .sum();

        let elapsed_seconds = snapshot
            .path
            .first()
            .zip(current)
            .map(|(first, current)| {
                current.timestamp.saturating_sub(first.timestamp) as f64 / 1000.0
            });

        Self {
            points: snapshot.path.len(),
            accuracy_meters: current.map(|c| c.accuracy.round() as u32),
            speed_kmh: current.and_then(|c| c.speed).unwrap_or(0.0) * 3.6,
            heading_degrees: current
                .and_then(|c| c.heading)
                .map(|h| h.round() as u32 % 360),
            distance_meters,
            elapsed_seconds,
            waiting_for_fix: snapshot.status == TrackingStatus::Active && current.is_none(),
        }
    }
}

impl fmt::Display for TrailStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.waiting_for_fix {
            return f.write_str("Waiting for GPS signal...");
        }

        write!(f, "{} pts", self.points)?;

        if let Some(accuracy) = self.accuracy_meters {
            write!(f, " | ±{accuracy} m")?;
        }

        write!(f, " | {:.1} km/h", self.speed_kmh)?;

        match self.heading_degrees {
            Some(heading) => write!(f, " | {heading}°")?,
            None => f.write_str(" | N/A")?,
        }

        if self.distance_meters >= 1000.0 {
            write!(f, " | {:.2} km", self.distance_meters / 1000.0)
        } else {
            write!(f, " | {:.0} m", self.distance_meters)
        }
    }
}

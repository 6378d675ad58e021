//! Pre-flight trajectory profile and matching
//!
//! The profile is a predicted ascent/descent path (habhub KML). During the
//! flight its shape is re-anchored on the balloon and stretched by the ratio
//! of observed to planned vertical rates.

use crate::sonde::leading_float;
use crate::GeoPoint;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Profile has no waypoints")]
    Empty,
    #[error("Profile does not state ascent and landing rates")]
    MissingRates,
    #[error("Malformed waypoint on line {line}: {text}")]
    Malformed { line: usize, text: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProfileError>;

/// Profile point, or an offset from one when returned by a prediction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub longitude: f64,
    pub latitude: f64,
    pub altitude_m: f64,
}

impl Waypoint {
    pub fn new(longitude: f64, latitude: f64, altitude_m: f64) -> Self {
        Self {
            longitude,
            latitude,
            altitude_m,
        }
    }
}

/// Immutable pre-flight prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProfileRecord")]
pub struct TrajectoryProfile {
    waypoints: Vec<Waypoint>,
    apex_index: usize,
    pub planned_ascent_rate_mps: f64,
    pub planned_landing_speed_mps: f64,
}

/// Stored form of a profile; the apex is recomputed when loading
#[derive(Deserialize)]
struct ProfileRecord {
    waypoints: Vec<Waypoint>,
    planned_ascent_rate_mps: f64,
    planned_landing_speed_mps: f64,
}

impl TryFrom<ProfileRecord> for TrajectoryProfile {
    type Error = ProfileError;

    fn try_from(record: ProfileRecord) -> Result<Self> {
        Self::new(
            record.waypoints,
            record.planned_ascent_rate_mps,
            record.planned_landing_speed_mps,
        )
    }
}

impl TrajectoryProfile {
    pub fn new(
        waypoints: Vec<Waypoint>,
        planned_ascent_rate_mps: f64,
        planned_landing_speed_mps: f64,
    ) -> Result<Self> {
        // first waypoint at the maximum altitude
        let apex_index = waypoints
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, w)| match best {
                Some((_, alt)) if alt >= w.altitude_m => best,
                _ => Some((i, w.altitude_m)),
            })
            .map(|(i, _)| i)
            .ok_or(ProfileError::Empty)?;

        Ok(Self {
            waypoints,
            apex_index,
            planned_ascent_rate_mps,
            planned_landing_speed_mps,
        })
    }

    /// Parse a habhub prediction KML document
    ///
    /// Rates come from the line mentioning `Ascent`
    /// (`Ascent rate: 5m/s, descent rate: 6m/s, ...`); waypoints are the
    /// `lng,lat,alt` triples inside the first `<coordinates>` element.
    pub fn parse_kml(text: &str) -> Result<Self> {
        let mut rates = None;
        let mut waypoints = Vec::new();
        let mut in_coordinates = false;

        for (n, line) in text.lines().enumerate() {
            if line.contains("</coordinates>") {
                break;
            }
            if line.contains("Ascent") {
                rates = parse_rates(line);
            }
            if line.contains("<coordinates>") {
                in_coordinates = true;
                continue;
            }
            if in_coordinates && line.contains(',') {
                let values: Vec<f64> = line
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.parse::<f64>())
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|_| malformed(n, line))?;
                if values.len() % 3 != 0 {
                    return Err(malformed(n, line));
                }
                waypoints.extend(values.chunks(3).map(|c| Waypoint::new(c[0], c[1], c[2])));
            }
        }

        let (ascent, landing) = rates.ok_or(ProfileError::MissingRates)?;
        let profile = Self::new(waypoints, ascent, landing)?;
        info!(
            "Profile: {} waypoints, apex {:.0}m, ascent {:.2}m/s, landing {:.2}m/s",
            profile.waypoints.len(),
            profile.apex().altitude_m,
            ascent,
            landing
        );
        Ok(profile)
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn apex_index(&self) -> usize {
        self.apex_index
    }

    pub fn apex(&self) -> Waypoint {
        self.waypoints[self.apex_index]
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }
}

fn malformed(index: usize, line: &str) -> ProfileError {
    ProfileError::Malformed {
        line: index + 1,
        text: line.trim().to_string(),
    }
}

/// Second and fourth fields when splitting on `:` and `m/s`
fn parse_rates(line: &str) -> Option<(f64, f64)> {
    let normalized = line.replace("m/s", ":");
    let fields: Vec<&str> = normalized.split(':').collect();
    if fields.len() < 4 {
        return None;
    }
    Some((leading_float(fields[1]), leading_float(fields[3])))
}

/// Observed over planned, or 1.0 when either is unusable
fn rate_scale(observed: Option<f64>, planned: f64) -> f64 {
    match observed {
        Some(rate) if rate > 0.0 && planned > 0.0 => rate / planned,
        _ => 1.0,
    }
}

/// Forward-only cursor over a profile producing scaled predictions
#[derive(Debug, Clone)]
pub struct TrajectoryMatcher {
    profile: TrajectoryProfile,
    cursor: usize,
}

impl TrajectoryMatcher {
    pub fn new(profile: TrajectoryProfile) -> Self {
        Self { profile, cursor: 0 }
    }

    pub fn profile(&self) -> &TrajectoryProfile {
        &self.profile
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Advance the cursor to the waypoint matching `altitude_m`
    ///
    /// Climbing below the apex, skip waypoints still below the altitude;
    /// otherwise skip waypoints still above it, never before the apex when
    /// falling.
    pub fn find_start(&mut self, altitude_m: f64, climbing: bool) -> Waypoint {
        let waypoints = &self.profile.waypoints;
        let apex = self.profile.apex_index;

        if !climbing {
            self.cursor = self.cursor.max(apex);
        }
        if climbing && altitude_m < waypoints[apex].altitude_m {
            while self.cursor < waypoints.len() && waypoints[self.cursor].altitude_m < altitude_m {
                self.cursor += 1;
            }
        } else {
            while self.cursor < waypoints.len() && waypoints[self.cursor].altitude_m > altitude_m {
                self.cursor += 1;
            }
        }
        self.cursor = self.cursor.min(waypoints.len() - 1);
        waypoints[self.cursor]
    }

    /// Remaining path as offsets from the matched start waypoint
    ///
    /// The ascent part is scaled around the start, the descent part around
    /// the apex and chained onto the end of the ascent part. Altitudes are
    /// the profile's own.
    pub fn prediction(&mut self, altitude_m: f64, climbing: bool, observed_rate: Option<f64>) -> Vec<Waypoint> {
        let (ascent_scale, descent_scale) = if climbing {
            (rate_scale(observed_rate, self.profile.planned_ascent_rate_mps), 1.0)
        } else {
            (1.0, rate_scale(observed_rate, self.profile.planned_landing_speed_mps))
        };

        let start = self.find_start(altitude_m, climbing);
        let waypoints = &self.profile.waypoints;
        let apex = self.profile.apex_index;

        let mut path: Vec<Waypoint> = if self.cursor <= apex {
            waypoints[self.cursor..=apex]
                .iter()
                .map(|w| {
                    Waypoint::new(
                        (w.longitude - start.longitude) * ascent_scale,
                        (w.latitude - start.latitude) * ascent_scale,
                        w.altitude_m,
                    )
                })
                .collect()
        } else {
            Vec::new()
        };

        let (lng_off, lat_off) = path
            .last()
            .map(|w| (w.longitude, w.latitude))
            .unwrap_or((0.0, 0.0));
        let pivot_index = apex.max(self.cursor);
        let pivot = waypoints[pivot_index];
        path.extend(waypoints[pivot_index + 1..].iter().map(|w| {
            Waypoint::new(
                (w.longitude - pivot.longitude) * descent_scale + lng_off,
                (w.latitude - pivot.latitude) * descent_scale + lat_off,
                w.altitude_m,
            )
        }));

        debug!(
            "Prediction from waypoint {} ({} points, scale {:.3}/{:.3})",
            self.cursor,
            path.len(),
            ascent_scale,
            descent_scale
        );

        if path.is_empty() {
            path.push(Waypoint::new(0.0, 0.0, 0.0));
        }
        path
    }

    /// Starting point for a balloon first heard at `altitude_m`
    ///
    /// Returns the matching profile waypoint and a landing estimate mirrored
    /// from the launch point through it.
    pub fn seed_point(&mut self, altitude_m: f64) -> (Waypoint, GeoPoint) {
        let launch = self.find_start(0.0, true);
        let start = self.find_start(altitude_m, true);
        let landing = GeoPoint::on_ground(
            start.longitude * 2.0 - launch.longitude,
            start.latitude * 2.0 - launch.latitude,
        );
        (start, landing)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // The step out of the apex is the profile's own step times the descent
        // scale, whatever the ascent scale
        #[test]
        fn fuzz_continuity_at_apex(
            ascent_rate in 0.5f64..20.0,
            altitude in 0.0f64..29_000.0,
        ) {
            let waypoints = vec![
                Waypoint::new(138.50, 35.60, 0.0),
                Waypoint::new(138.53, 35.62, 10_000.0),
                Waypoint::new(138.58, 35.67, 20_000.0),
                Waypoint::new(138.60, 35.70, 30_000.0),
                Waypoint::new(138.64, 35.69, 12_000.0),
                Waypoint::new(138.66, 35.67, 0.0),
            ];
            let profile = TrajectoryProfile::new(waypoints.clone(), 5.0, 5.0).unwrap();
            let mut matcher = TrajectoryMatcher::new(profile);
            let path = matcher.prediction(altitude, true, Some(ascent_rate));

            let ascent_len = 3 - matcher.cursor() + 1;
            let apex_out = path[ascent_len - 1];
            let after = path[ascent_len];
            prop_assert!((after.longitude - apex_out.longitude - 0.04).abs() < 1e-9);
            prop_assert!((after.latitude - apex_out.latitude + 0.01).abs() < 1e-9);
        }

        // Falling from the apex: the path starts on the apex and every step
        // after it is the profile's step times the descent scale
        #[test]
        fn fuzz_descent_scaled_from_apex(
            landing_speed in 0.5f64..20.0,
            altitude in 30_000.0f64..40_000.0,
        ) {
            let waypoints = vec![
                Waypoint::new(138.50, 35.60, 0.0),
                Waypoint::new(138.58, 35.67, 20_000.0),
                Waypoint::new(138.60, 35.70, 30_000.0),
                Waypoint::new(138.64, 35.69, 12_000.0),
                Waypoint::new(138.66, 35.67, 0.0),
            ];
            let profile = TrajectoryProfile::new(waypoints.clone(), 5.0, 5.0).unwrap();
            let mut matcher = TrajectoryMatcher::new(profile);
            let path = matcher.prediction(altitude, false, Some(landing_speed));
            let scale = landing_speed / 5.0;

            prop_assert_eq!(matcher.cursor(), 2);
            prop_assert_eq!(path.len(), 3);
            prop_assert_eq!(path[0], Waypoint::new(0.0, 0.0, 30_000.0));
            for i in 1..path.len() {
                let d_lng = path[i].longitude - path[i - 1].longitude;
                let d_lat = path[i].latitude - path[i - 1].latitude;
                let w_lng = waypoints[i + 2].longitude - waypoints[i + 1].longitude;
                let w_lat = waypoints[i + 2].latitude - waypoints[i + 1].latitude;
                prop_assert!((d_lng - w_lng * scale).abs() < 1e-9);
                prop_assert!((d_lat - w_lat * scale).abs() < 1e-9);
                prop_assert_eq!(path[i].altitude_m, waypoints[i + 2].altitude_m);
            }
        }
    }
}

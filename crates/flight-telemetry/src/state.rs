//! Live balloon estimate and its persistent snapshot

use crate::codec::{self, decode_altitude, encode_altitude, horizontal_shift};
use crate::geometry::{bearing_distance_elevation, surface_landing_speed, time_to_land};
use crate::packet::Packet;
use crate::prediction::{FieldUpdate, PredictionFieldDecoder, Slot, ASCENT_RATE_FLOOR_M};
use crate::{GeoPoint, METERS_PER_DEGREE, REFERENCE_LANDING_SPEED_MPS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;

/// Predicted landing point and the landing speed it was computed with
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandingPrediction {
    pub longitude: f64,
    pub latitude: f64,
    pub landing_speed_mps: f64,
}

/// Last known state, enough to resume tracking after a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalloonSnapshot {
    pub longitude: f64,
    pub latitude: f64,
    pub altitude_m: f64,
    pub max_altitude_m: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landing: Option<LandingPrediction>,
}

/// Where snapshots are kept between runs
pub trait SnapshotStore {
    fn load(&mut self) -> io::Result<Option<BalloonSnapshot>>;
    fn save(&mut self, snapshot: &BalloonSnapshot) -> io::Result<()>;
}

/// Keeps the latest snapshot in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    latest: Option<BalloonSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(snapshot: BalloonSnapshot) -> Self {
        Self {
            latest: Some(snapshot),
        }
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&mut self) -> io::Result<Option<BalloonSnapshot>> {
        Ok(self.latest.clone())
    }

    fn save(&mut self, snapshot: &BalloonSnapshot) -> io::Result<()> {
        self.latest = Some(snapshot.clone());
        Ok(())
    }
}

/// Continuously revised estimate of the flight
#[derive(Debug, Clone, PartialEq)]
pub struct BalloonState {
    lat_fixed: i64,
    lng_fixed: i64,
    altitude_code: u8,
    altitude_m: f64,
    max_altitude_m: f64,
    field: PredictionFieldDecoder,
    updated_at: DateTime<Utc>,
}

impl BalloonState {
    /// Start from a known position and a landing estimate
    ///
    /// The landing distance is stretched by `landing_speed / 4.5` so that it
    /// matches what a sender scaled to the reference speed would transmit.
    pub fn seed(
        position: GeoPoint,
        max_altitude_m: f64,
        landing: GeoPoint,
        landing_speed_mps: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let altitude_code = encode_altitude(position.altitude_m);
        let look = bearing_distance_elevation(
            &GeoPoint::on_ground(landing.longitude, landing.latitude),
            &GeoPoint::on_ground(position.longitude, position.latitude),
        );
        let distance_m = look.horiz_dist_m * landing_speed_mps / REFERENCE_LANDING_SPEED_MPS;

        Self {
            lat_fixed: codec::to_fixed(position.latitude),
            lng_fixed: codec::to_fixed(position.longitude),
            altitude_code,
            altitude_m: position.altitude_m,
            max_altitude_m: max_altitude_m.max(position.altitude_m),
            field: PredictionFieldDecoder::seeded(
                look.azimuth_deg.to_radians(),
                distance_m,
                landing_speed_mps,
                altitude_code,
            ),
            updated_at: now,
        }
    }

    /// Rebuild from a snapshot; without a stored landing point the estimate
    /// sits just east of the balloon
    pub fn resume(snapshot: &BalloonSnapshot, fallback_landing_speed_mps: f64, now: DateTime<Utc>) -> Self {
        let landing = snapshot.landing.unwrap_or(LandingPrediction {
            longitude: snapshot.longitude + 0.01,
            latitude: snapshot.latitude,
            landing_speed_mps: fallback_landing_speed_mps,
        });
        Self::seed(
            GeoPoint::new(snapshot.longitude, snapshot.latitude, snapshot.altitude_m),
            snapshot.max_altitude_m,
            GeoPoint::on_ground(landing.longitude, landing.latitude),
            landing.landing_speed_mps,
            now,
        )
    }

    /// Apply the altitude code and position fragments of a packet
    pub fn apply_packet(&mut self, packet: &Packet, now: DateTime<Utc>) {
        self.updated_at = now;
        self.altitude_code = packet.altitude_code;
        self.altitude_m = decode_altitude(packet.altitude_code);
        self.max_altitude_m = self.max_altitude_m.max(self.altitude_m);

        let shift = horizontal_shift(self.altitude_m);
        self.lat_fixed = codec::reconcile(self.lat_fixed, packet.lat_fragment, shift);
        self.lng_fixed = codec::reconcile(self.lng_fixed, packet.lng_fragment, shift);
    }

    /// Apply the rotating sixth byte for the slot active when it was received
    pub fn apply_field(&mut self, slot: Slot, field: u8) -> FieldUpdate {
        self.field.apply(slot, field, self.altitude_m, self.altitude_code)
    }

    /// Overwrite with a full-precision fix
    pub fn apply_fix(&mut self, position: GeoPoint, now: DateTime<Utc>) {
        self.updated_at = now;
        self.lat_fixed = codec::to_fixed(position.latitude);
        self.lng_fixed = codec::to_fixed(position.longitude);
        self.altitude_m = position.altitude_m;
        self.altitude_code = encode_altitude(position.altitude_m);
        self.max_altitude_m = self.max_altitude_m.max(position.altitude_m);
    }

    /// Take phase and rates from a measured vertical speed (positive up)
    ///
    /// A descent is reduced to its sea-level landing speed; a climb only
    /// counts above the same floor as the rotating field.
    pub fn apply_vertical_speed(&mut self, vertical_speed_mps: f64) {
        self.field.falling = vertical_speed_mps < 0.0;
        if self.field.falling {
            self.field.landing_speed_mps = surface_landing_speed(vertical_speed_mps, self.altitude_m);
        } else if vertical_speed_mps > 0.0 && self.altitude_m > ASCENT_RATE_FLOOR_M {
            self.field.ascent_rate_mps = Some(vertical_speed_mps);
        }
    }

    pub fn latitude(&self) -> f64 {
        codec::from_fixed(self.lat_fixed)
    }

    pub fn longitude(&self) -> f64 {
        codec::from_fixed(self.lng_fixed)
    }

    pub fn fixed_position(&self) -> (i64, i64) {
        (self.lng_fixed, self.lat_fixed)
    }

    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.longitude(), self.latitude(), self.altitude_m)
    }

    pub fn altitude_code(&self) -> u8 {
        self.altitude_code
    }

    pub fn altitude_m(&self) -> f64 {
        self.altitude_m
    }

    pub fn max_altitude_m(&self) -> f64 {
        self.max_altitude_m
    }

    pub fn falling(&self) -> bool {
        self.field.falling
    }

    pub fn ascent_rate_mps(&self) -> Option<f64> {
        self.field.ascent_rate_mps
    }

    pub fn landing_speed_mps(&self) -> f64 {
        self.field.landing_speed_mps
    }

    pub fn predicted_bearing_rad(&self) -> f64 {
        self.field.bearing_rad
    }

    pub fn predicted_distance_code(&self) -> i64 {
        self.field.distance_code
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Landing distance adjusted to the current landing speed
    ///
    /// While climbing the transmitted distance assumes the reference landing
    /// speed; once falling it already reflects the measured one.
    pub fn scaled_distance_m(&self) -> f64 {
        if self.field.falling || self.field.landing_speed_mps <= 0.0 {
            self.field.distance_m
        } else {
            self.field.distance_m * REFERENCE_LANDING_SPEED_MPS / self.field.landing_speed_mps
        }
    }

    /// Landing point projected from the balloon along the predicted bearing
    pub fn predicted_landing(&self) -> GeoPoint {
        let d = self.scaled_distance_m();
        let bearing = self.field.bearing_rad;
        let latitude = self.latitude();
        GeoPoint::on_ground(
            self.longitude()
                + d * bearing.sin() / (METERS_PER_DEGREE * latitude.to_radians().cos()),
            latitude + d * bearing.cos() / METERS_PER_DEGREE,
        )
    }

    pub fn time_to_land(&self) -> Option<f64> {
        time_to_land(self.altitude_m, self.field.landing_speed_mps)
    }

    pub fn snapshot(&self) -> BalloonSnapshot {
        let landing = self.predicted_landing();
        BalloonSnapshot {
            longitude: self.longitude(),
            latitude: self.latitude(),
            altitude_m: self.altitude_m,
            max_altitude_m: self.max_altitude_m,
            landing: Some(LandingPrediction {
                longitude: landing.longitude,
                latitude: landing.latitude,
                landing_speed_mps: self.field.landing_speed_mps,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{fragment, from_fixed, to_fixed};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T03:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn seeded() -> BalloonState {
        BalloonState::seed(
            GeoPoint::new(138.5, 35.6, 0.0),
            0.0,
            GeoPoint::on_ground(138.6, 35.6),
            REFERENCE_LANDING_SPEED_MPS,
            now(),
        )
    }

    #[test]
    fn test_seed_landing_estimate() {
        let state = seeded();
        assert!((state.predicted_bearing_rad() - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
        let landing = state.predicted_landing();
        assert!((landing.longitude - 138.6).abs() < 1e-3);
        // due east: latitude is the balloon's own, truncated to fixed point
        assert!((landing.latitude - from_fixed(to_fixed(35.6))).abs() < 1e-9);
        assert!((landing.latitude - 35.6).abs() < 1.0 / 65_536.0);
        assert!(!state.falling());
        assert_eq!(state.ascent_rate_mps(), None);
    }

    #[test]
    fn test_seed_scales_distance_with_landing_speed() {
        let slow = seeded();
        let fast = BalloonState::seed(
            GeoPoint::new(138.5, 35.6, 0.0),
            0.0,
            GeoPoint::on_ground(138.6, 35.6),
            9.0,
            now(),
        );
        // while climbing the distance is scaled back by the speed ratio
        assert!((fast.scaled_distance_m() - slow.scaled_distance_m()).abs() < 1e-6);
        assert!(fast.predicted_distance_code() > slow.predicted_distance_code());
    }

    #[test]
    fn test_apply_packet_moves_position() {
        let mut state = seeded();
        let target_lat = to_fixed(35.601);
        let target_lng = to_fixed(138.499);
        let packet = Packet {
            altitude_code: 0x10,
            lat_fragment: fragment(target_lat, 0),
            lng_fragment: fragment(target_lng, 0),
            prediction: None,
        };
        state.apply_packet(&packet, now());
        assert_eq!(state.altitude_m(), 1_000.0);
        assert_eq!(state.max_altitude_m(), 1_000.0);
        assert_eq!(state.fixed_position(), (target_lng, target_lat));
    }

    #[test]
    fn test_max_altitude_is_monotonic() {
        let mut state = seeded();
        let (lng, lat) = state.fixed_position();
        for code in [0x40u8, 0x90, 0x20] {
            let packet = Packet {
                altitude_code: code,
                lat_fragment: fragment(lat, horizontal_shift(decode_altitude(code))),
                lng_fragment: fragment(lng, horizontal_shift(decode_altitude(code))),
                prediction: None,
            };
            state.apply_packet(&packet, now());
        }
        assert_eq!(state.altitude_m(), decode_altitude(0x20));
        assert_eq!(state.max_altitude_m(), decode_altitude(0x90));
        assert_eq!(state.fixed_position(), (lng, lat));
    }

    #[test]
    fn test_time_to_land_uses_landing_speed() {
        let mut state = seeded();
        state.apply_fix(GeoPoint::new(138.5, 35.6, 3_000.0), now());
        let t = state.time_to_land().unwrap();
        assert!((t - time_to_land(3_000.0, 4.5).unwrap()).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_resume() {
        let mut state = seeded();
        state.apply_fix(GeoPoint::new(138.52, 35.61, 12_000.0), now());
        let snapshot = state.snapshot();
        let resumed = BalloonState::resume(&snapshot, 5.0, now());
        assert!((resumed.latitude() - state.latitude()).abs() < 1e-4);
        assert!((resumed.longitude() - state.longitude()).abs() < 1e-4);
        assert_eq!(resumed.altitude_m(), 12_000.0);
        let a = resumed.predicted_landing();
        let b = state.predicted_landing();
        assert!((a.longitude - b.longitude).abs() < 1e-4);
        assert!((a.latitude - b.latitude).abs() < 1e-4);
    }

    #[test]
    fn test_resume_without_landing_uses_fallback() {
        let snapshot = BalloonSnapshot {
            longitude: 138.5,
            latitude: 35.6,
            altitude_m: 500.0,
            max_altitude_m: 28_000.0,
            landing: None,
        };
        let state = BalloonState::resume(&snapshot, 6.0, now());
        assert_eq!(state.landing_speed_mps(), 6.0);
        assert_eq!(state.max_altitude_m(), 28_000.0);
        assert!((state.predicted_bearing_rad() - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn test_vertical_speed() {
        let mut state = seeded();
        state.apply_fix(GeoPoint::new(138.5, 35.6, 1_500.0), now());
        state.apply_vertical_speed(5.0);
        assert!(!state.falling());
        assert_eq!(state.ascent_rate_mps(), None);

        state.apply_fix(GeoPoint::new(138.5, 35.6, 15_000.0), now());
        state.apply_vertical_speed(5.0);
        assert_eq!(state.ascent_rate_mps(), Some(5.0));

        state.apply_vertical_speed(-20.0);
        assert!(state.falling());
        assert!((state.landing_speed_mps() - 20.0 * (-1.0_f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryStore::new();
        assert_eq!(store.load().unwrap(), None);
        let snapshot = seeded().snapshot();
        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), Some(snapshot));
    }

    #[test]
    fn test_snapshot_serde() {
        let snapshot = BalloonSnapshot {
            longitude: 138.5,
            latitude: 35.6,
            altitude_m: 500.0,
            max_altitude_m: 500.0,
            landing: None,
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("landing"));
        let back: BalloonSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}

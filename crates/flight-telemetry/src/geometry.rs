//! Short-range guidance geometry
//!
//! Flat-earth (equirectangular) look angles between two positions and the
//! exponential-atmosphere descent model.

use crate::{GeoPoint, METERS_PER_DEGREE, SCALE_HEIGHT_M};
use serde::{Deserialize, Serialize};

/// 16-point compass rose, clockwise from north
pub const COMPASS_POINTS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

/// Look angles from a base position to a target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LookAngles {
    /// Azimuth from north, clockwise, in [0, 360)
    pub azimuth_deg: f64,
    pub horiz_dist_m: f64,
    /// Elevation above the local horizon
    pub elevation_deg: f64,
}

/// Azimuth, horizontal distance and elevation of `target` seen from `base`
pub fn bearing_distance_elevation(target: &GeoPoint, base: &GeoPoint) -> LookAngles {
    let x = (target.longitude - base.longitude)
        * METERS_PER_DEGREE
        * base.latitude.to_radians().cos();
    let y = (target.latitude - base.latitude) * METERS_PER_DEGREE;

    let mut azimuth_deg = x.atan2(y).to_degrees();
    if azimuth_deg < 0.0 {
        azimuth_deg += 360.0;
    }
    // -0.0 and rounding of tiny negative angles both land here
    if azimuth_deg >= 360.0 {
        azimuth_deg -= 360.0;
    }

    let horiz_dist_m = x.hypot(y);
    let elevation_deg = (target.altitude_m - base.altitude_m)
        .atan2(horiz_dist_m)
        .to_degrees();

    LookAngles {
        azimuth_deg,
        horiz_dist_m,
        elevation_deg,
    }
}

/// Seconds until touchdown from `altitude_m` at sea-level landing speed
///
/// The descent rate decays as `exp(-h / 2H)` with altitude, which integrates
/// to `2H/v (1 - exp(-h / 2H))`. Returns `None` when the landing speed is not
/// a positive finite number.
pub fn time_to_land(altitude_m: f64, landing_speed_mps: f64) -> Option<f64> {
    if !(landing_speed_mps.is_finite() && landing_speed_mps > 0.0) {
        return None;
    }
    let two_h = 2.0 * SCALE_HEIGHT_M;
    Some(two_h / landing_speed_mps * (1.0 - (-altitude_m / two_h).exp()))
}

/// Sea-level landing speed implied by a vertical speed observed at altitude
///
/// `vertical_speed_mps` is positive upwards, so a descending balloon yields a
/// positive landing speed.
pub fn surface_landing_speed(vertical_speed_mps: f64, altitude_m: f64) -> f64 {
    -vertical_speed_mps * (-altitude_m / (2.0 * SCALE_HEIGHT_M)).exp()
}

/// Hour on a 12-hour clock face with the direction of travel at 12
pub fn clock_position(azimuth_deg: f64, heading_deg: f64) -> f64 {
    let mut clock = (azimuth_deg - heading_deg) / 30.0;
    if clock < 0.0 {
        clock += 12.0;
    }
    if clock >= 12.0 {
        clock -= 12.0;
    }
    clock
}

/// Index into [`COMPASS_POINTS`] for an azimuth
pub fn compass_index(azimuth_deg: f64) -> usize {
    ((azimuth_deg / 22.5 + 0.5) as i64).rem_euclid(16) as usize
}

pub fn compass_point(azimuth_deg: f64) -> &'static str {
    COMPASS_POINTS[compass_index(azimuth_deg)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coincident_points() {
        let p = GeoPoint::new(138.5, 35.6, 1200.0);
        let angles = bearing_distance_elevation(&p, &p);
        assert_eq!(angles.azimuth_deg, 0.0);
        assert_eq!(angles.horiz_dist_m, 0.0);
        assert_eq!(angles.elevation_deg, 0.0);
    }

    #[test]
    fn test_straight_up() {
        let base = GeoPoint::new(138.5, 35.6, 0.0);
        let target = GeoPoint::new(138.5, 35.6, 500.0);
        let angles = bearing_distance_elevation(&target, &base);
        assert!((angles.elevation_deg - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_cardinal_directions() {
        let base = GeoPoint::on_ground(138.5, 35.6);

        let north = bearing_distance_elevation(&GeoPoint::on_ground(138.5, 35.7), &base);
        assert!(north.azimuth_deg.abs() < 1e-9);
        assert!((north.horiz_dist_m - 11_111.1).abs() < 0.01);

        let east = bearing_distance_elevation(&GeoPoint::on_ground(138.6, 35.6), &base);
        assert!((east.azimuth_deg - 90.0).abs() < 1e-9);
        let expected = 0.1 * METERS_PER_DEGREE * 35.6_f64.to_radians().cos();
        assert!((east.horiz_dist_m - expected).abs() < 1e-6);

        let south = bearing_distance_elevation(&GeoPoint::on_ground(138.5, 35.5), &base);
        assert!((south.azimuth_deg - 180.0).abs() < 1e-9);

        let west = bearing_distance_elevation(&GeoPoint::on_ground(138.4, 35.6), &base);
        assert!((west.azimuth_deg - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_elevation_sign() {
        let base = GeoPoint::new(138.5, 35.6, 1000.0);
        let below = GeoPoint::new(138.5, 35.61, 0.0);
        assert!(bearing_distance_elevation(&below, &base).elevation_deg < 0.0);
    }

    #[test]
    fn test_time_to_land() {
        // Low altitude: close to h / v
        let t = time_to_land(100.0, 5.0).unwrap();
        assert!((t - 20.0).abs() < 0.2);

        // Descent slows near the ground, so the result is below h / v
        let t = time_to_land(30_000.0, 5.0).unwrap();
        assert!(t < 6_000.0);
        let expected = 15_000.0 / 5.0 * (1.0 - (-2.0_f64).exp());
        assert!((t - expected).abs() < 1e-9);
    }

    #[test]
    fn test_time_to_land_undefined_speed() {
        assert_eq!(time_to_land(1000.0, 0.0), None);
        assert_eq!(time_to_land(1000.0, -3.0), None);
        assert_eq!(time_to_land(1000.0, f64::NAN), None);
    }

    #[test]
    fn test_surface_landing_speed() {
        assert!((surface_landing_speed(-5.0, 0.0) - 5.0).abs() < 1e-12);
        let v = surface_landing_speed(-10.0, 15_000.0);
        assert!((v - 10.0 * (-1.0_f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_clock_position() {
        assert_eq!(clock_position(90.0, 0.0), 3.0);
        assert_eq!(clock_position(0.0, 90.0), 9.0);
        assert_eq!(clock_position(45.0, 45.0), 0.0);
        assert_eq!(clock_position(0.0, 0.0), 0.0);
        let c = clock_position(359.0, 0.0);
        assert!((0.0..12.0).contains(&c));
    }

    #[test]
    fn test_compass_point() {
        assert_eq!(compass_point(0.0), "N");
        assert_eq!(compass_point(11.0), "N");
        assert_eq!(compass_point(12.0), "NNE");
        assert_eq!(compass_point(90.0), "E");
        assert_eq!(compass_point(350.0), "N");
        assert_eq!(compass_point(225.0), "SW");
    }
}

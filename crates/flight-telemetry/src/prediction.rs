//! Rotating prediction field
//!
//! The optional sixth payload byte carries one of three values, chosen by the
//! wall clock in ten-second windows:
//!
//! ```text
//! second  57..06  07..16  17..26  27..36  37..46  47..56
//! slot    Rate    Bearing Distance Rate   Bearing Distance
//! ```

use crate::REFERENCE_LANDING_SPEED_MPS;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Climb rates reported below this altitude are not used
pub const ASCENT_RATE_FLOOR_M: f64 = 2_000.0;

/// Distance code units per metre, per unit of altitude code
const DISTANCE_RESOLUTION: f64 = 0.16;

/// Smallest altitude code used when scaling the distance field
const MIN_DISTANCE_SCALE_CODE: u8 = 16;

/// Meaning of the rotating byte at a given moment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
    /// Falling flag and ascent rate or landing speed
    Rate,
    /// Bearing from the balloon to the predicted landing point
    Bearing,
    /// Low 8 bits of the landing distance code
    Distance,
}

/// Maps wall-clock time onto the slot the sender is transmitting
pub struct SlotSelector;

impl SlotSelector {
    pub fn at(unix_seconds: i64) -> Slot {
        let second = unix_seconds.rem_euclid(60);
        match ((second + 3) / 10) % 3 {
            0 => Slot::Rate,
            1 => Slot::Bearing,
            _ => Slot::Distance,
        }
    }

    pub fn for_time(time: DateTime<Utc>) -> Slot {
        Self::at(time.timestamp())
    }
}

/// Splice the low `bits` of `new` onto the prefix of `prev`
///
/// The prefix moves up or down by `2^bits` when the low bits wrapped, so the
/// result is the value nearest `prev` with those low bits.
pub fn adjust_prefix(prev: i64, new: i64, bits: u32) -> i64 {
    let suffix_mask = (1i64 << bits) - 1;
    let range = 1i64 << bits;
    let half_range = range >> 1;

    let mut prefix = prev & !suffix_mask;
    let diff = (new & suffix_mask) - (prev & suffix_mask);
    if diff < -half_range {
        prefix += range;
    }
    if diff > half_range {
        prefix -= range;
    }
    prefix | (new & suffix_mask)
}

/// Distance (m) represented by a distance code at the given altitude code
pub fn distance_from_code(code: i64, altitude_code: u8) -> f64 {
    code as f64 * f64::from(altitude_code.max(MIN_DISTANCE_SCALE_CODE)) / DISTANCE_RESOLUTION
}

/// Distance code for a distance (m), the sender-side inverse
pub fn code_from_distance(distance_m: f64, altitude_code: u8) -> i64 {
    (distance_m * DISTANCE_RESOLUTION / f64::from(altitude_code.max(MIN_DISTANCE_SCALE_CODE)))
        .round() as i64
}

/// What a rotating byte changed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FieldUpdate {
    Bearing { radians: f64 },
    Rate { falling: bool, speed_mps: f64, applied: bool },
    Distance { code: i64, meters: f64 },
}

/// Accumulated state of the rotating field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionFieldDecoder {
    pub falling: bool,
    pub ascent_rate_mps: Option<f64>,
    pub landing_speed_mps: f64,
    /// Clockwise from north
    pub bearing_rad: f64,
    pub distance_code: i64,
    pub distance_m: f64,
}

impl Default for PredictionFieldDecoder {
    fn default() -> Self {
        Self {
            falling: false,
            ascent_rate_mps: None,
            landing_speed_mps: REFERENCE_LANDING_SPEED_MPS,
            bearing_rad: 0.0,
            distance_code: 0,
            distance_m: 0.0,
        }
    }
}

impl PredictionFieldDecoder {
    /// Seed from a landing estimate the way a sender would have encoded it
    pub fn seeded(bearing_rad: f64, distance_m: f64, landing_speed_mps: f64, altitude_code: u8) -> Self {
        Self {
            landing_speed_mps,
            bearing_rad,
            distance_code: code_from_distance(distance_m, altitude_code),
            distance_m,
            ..Self::default()
        }
    }

    /// Fold one rotating byte into the state
    ///
    /// `altitude_m` and `altitude_code` are those of the packet carrying it.
    pub fn apply(&mut self, slot: Slot, field: u8, altitude_m: f64, altitude_code: u8) -> FieldUpdate {
        match slot {
            Slot::Bearing => {
                self.bearing_rad = f64::from(field) / 256.0 * 2.0 * PI;
                FieldUpdate::Bearing {
                    radians: self.bearing_rad,
                }
            }
            Slot::Rate => {
                self.falling = field & 0x80 == 0x80;
                let speed_mps = f64::from(field & 0x7F) / 10.0;
                let applied = if self.falling {
                    self.landing_speed_mps = speed_mps;
                    true
                } else if altitude_m > ASCENT_RATE_FLOOR_M {
                    self.ascent_rate_mps = Some(speed_mps);
                    true
                } else {
                    false
                };
                FieldUpdate::Rate {
                    falling: self.falling,
                    speed_mps,
                    applied,
                }
            }
            Slot::Distance => {
                self.distance_code = adjust_prefix(self.distance_code, i64::from(field), 8).max(0);
                self.distance_m = distance_from_code(self.distance_code, altitude_code);
                FieldUpdate::Distance {
                    code: self.distance_code,
                    meters: self.distance_m,
                }
            }
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // A fragment equal to x's own low bits leaves x unchanged
        #[test]
        fn fuzz_adjust_prefix_idempotent(x in -1_000_000i64..1_000_000, bits in 1u32..16) {
            let mask = (1i64 << bits) - 1;
            prop_assert_eq!(adjust_prefix(x, x & mask, bits), x);
        }

        // Small moves in either direction are tracked exactly
        #[test]
        fn fuzz_adjust_prefix_tracks_moves(x in 0i64..1_000_000, delta in -127i64..=127) {
            prop_assert_eq!(adjust_prefix(x, (x + delta) & 0xFF, 8), x + delta);
        }
    }
}

//! Adaptive-resolution position codec
//!
//! Vertical resolution is finest near the ground and horizontal fragments
//! get coarser with altitude, so one five-byte packet covers a whole flight.
//!
//! | Altitude band     | Code           | Step   |
//! |-------------------|----------------|--------|
//! | below 8 km        | `0b0xxx_xxxx`  | 62.5 m |
//! | 8 km to 16 km     | `0b10xx_xxxx`  | 125 m  |
//! | 16 km to 47.5 km  | `0b11xx_xxxx`  | 500 m  |

/// Fixed-point scale: 2^16 units per degree
pub const FIXED_POINT_SCALE: f64 = (1u32 << 16) as f64;

/// Bit width of a transmitted latitude/longitude fragment
pub const FRAGMENT_BITS: u32 = 14;

const LOW_BAND_TOP_M: f64 = 8_000.0;
const MID_BAND_TOP_M: f64 = 16_000.0;

/// Encode an altitude into its one-byte band code
///
/// Negative altitudes fall into code 0 and anything above the top band
/// saturates at `0xFF`.
pub fn encode_altitude(altitude_m: f64) -> u8 {
    if altitude_m < LOW_BAND_TOP_M {
        (altitude_m * 0.016).floor().clamp(0.0, 127.0) as u8
    } else if altitude_m < MID_BAND_TOP_M {
        0x80 | ((altitude_m - LOW_BAND_TOP_M) * 0.008).floor().clamp(0.0, 63.0) as u8
    } else {
        0xC0 | ((altitude_m - MID_BAND_TOP_M) * 0.002).floor().clamp(0.0, 63.0) as u8
    }
}

/// Altitude (m) at the bottom of the step a code represents
pub fn decode_altitude(code: u8) -> f64 {
    if code & 0xC0 == 0xC0 {
        f64::from(code & 0x3F) * 1000.0 / 2.0 + MID_BAND_TOP_M
    } else if code & 0x80 == 0x80 {
        f64::from(code & 0x7F) * 1000.0 / 8.0 + LOW_BAND_TOP_M
    } else {
        f64::from(code) * 1000.0 / 16.0
    }
}

/// Vertical step (m) of the band a code belongs to
pub fn altitude_step(code: u8) -> f64 {
    if code & 0xC0 == 0xC0 {
        500.0
    } else if code & 0x80 == 0x80 {
        125.0
    } else {
        62.5
    }
}

/// Bits dropped from the fixed-point value before taking a fragment
pub fn horizontal_shift(altitude_m: f64) -> u32 {
    if altitude_m < 2_000.0 {
        // ~1/4 degree window, ~1.7 m resolution
        0
    } else if altitude_m < 4_000.0 {
        // ~1 degree window, ~7 m resolution
        2
    } else {
        // ~8 degree window, ~55 m resolution
        5
    }
}

/// Value range covered by a fragment at `shift`
pub fn span(shift: u32) -> i64 {
    1i64 << (FRAGMENT_BITS + shift)
}

/// Degrees to 2^16 fixed point, truncating toward zero
pub fn to_fixed(degrees: f64) -> i64 {
    (degrees * FIXED_POINT_SCALE) as i64
}

pub fn from_fixed(value: i64) -> f64 {
    value as f64 / FIXED_POINT_SCALE
}

/// The 14-bit fragment a sender transmits for `value` at `shift`
pub fn fragment(value: i64, shift: u32) -> u16 {
    ((value >> shift) & ((1 << FRAGMENT_BITS) - 1)) as u16
}

/// Rebuild a full-precision value from a fragment
///
/// The fragment replaces bits `shift..14+shift` of `current`; bits below
/// `shift` are kept. The result is then moved by one span when it is more
/// than half a span away from `current`. A move of exactly half a span keeps
/// `current`'s upper bits.
pub fn reconcile(current: i64, fragment: u16, shift: u32) -> i64 {
    let span = span(shift);
    let keep_mask = -span | ((1i64 << shift) - 1);
    let mut value = (current & keep_mask) | ((i64::from(fragment) << shift) & (span - 1));

    let half = span >> 1;
    if value > current {
        if value - current > half {
            value -= span;
        }
    } else if current - value > half {
        value += span;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_altitude_band_edges() {
        assert_eq!(encode_altitude(0.0), 0x00);
        assert_eq!(encode_altitude(7_999.9), 0x7F);
        assert_eq!(encode_altitude(8_000.0), 0x80);
        assert_eq!(encode_altitude(15_999.9), 0xBF);
        assert_eq!(encode_altitude(16_000.0), 0xC0);
        assert_eq!(encode_altitude(47_500.0), 0xFF);

        assert_eq!(decode_altitude(0x80), 8_000.0);
        assert_eq!(decode_altitude(0xC0), 16_000.0);
        assert_eq!(decode_altitude(0x7F), 7_937.5);
        assert_eq!(decode_altitude(0xBF), 15_875.0);
        assert_eq!(decode_altitude(0xFF), 47_500.0);
    }

    #[test]
    fn test_altitude_known_codes() {
        assert_eq!(decode_altitude(0x0A), 625.0);
        assert_eq!(decode_altitude(0x10), 1_000.0);
        assert_eq!(encode_altitude(30_000.0), 0xC0 | 28);
        assert_eq!(decode_altitude(0xC0 | 28), 30_000.0);
    }

    #[test]
    fn test_altitude_out_of_range_clamps() {
        assert_eq!(encode_altitude(-250.0), 0);
        assert_eq!(encode_altitude(80_000.0), 0xFF);
    }

    #[test]
    fn test_horizontal_shift() {
        assert_eq!(horizontal_shift(0.0), 0);
        assert_eq!(horizontal_shift(1_999.0), 0);
        assert_eq!(horizontal_shift(2_000.0), 2);
        assert_eq!(horizontal_shift(3_999.0), 2);
        assert_eq!(horizontal_shift(4_000.0), 5);
        assert_eq!(horizontal_shift(30_000.0), 5);
    }

    #[test]
    fn test_fixed_point_truncates() {
        assert_eq!(to_fixed(1.0), 65_536);
        assert_eq!(to_fixed(-1.5), -98_304);
        assert_eq!(from_fixed(to_fixed(35.25)), 35.25);
    }

    #[test]
    fn test_reconcile_same_fragment_is_identity() {
        for shift in [0, 2, 5] {
            let v = to_fixed(35.68215);
            assert_eq!(reconcile(v, fragment(v, shift), shift), v);
            let w = to_fixed(-122.41);
            assert_eq!(reconcile(w, fragment(w, shift), shift), w);
        }
    }

    #[test]
    fn test_reconcile_keeps_bits_below_shift() {
        let v = to_fixed(35.0) | 0b11;
        let moved = v + 4 * 100;
        let r = reconcile(v, fragment(moved, 2), 2);
        assert_eq!(r & 0b11, 0b11);
        assert_eq!(r, moved);
    }

    #[test]
    fn test_reconcile_wrap_boundaries() {
        for shift in [0u32, 2, 5] {
            let span = span(shift);
            let half = span / 2;
            let step = 1i64 << shift;
            // current sits just below a span boundary so the fragment rolls over
            let base = to_fixed(35.0) - (to_fixed(35.0) & (span - 1));
            let current = base + span - 3 * step;

            // forward across the boundary
            let target = current + 10 * step;
            assert_eq!(reconcile(current, fragment(target, shift), shift), target);

            // back across the boundary
            let current = base + 3 * step;
            let target = current - 10 * step;
            assert_eq!(reconcile(current, fragment(target, shift), shift), target);

            // exactly half a span either way within the same block
            let target = current + half;
            assert_eq!(reconcile(current, fragment(target, shift), shift), target);
            let high = base + span - 3 * step;
            let target = high - half;
            assert_eq!(reconcile(high, fragment(target, shift), shift), target);

            // a half-span tie across the block edge stays in the block
            let target = current - half;
            assert_eq!(reconcile(current, fragment(target, shift), shift), current + half);

            // just under half a span ahead
            let target = current + half - step;
            assert_eq!(reconcile(current, fragment(target, shift), shift), target);
        }
    }

    #[test]
    fn test_reconcile_negative_coordinates() {
        let current = to_fixed(-0.001);
        let target = to_fixed(0.001);
        assert_eq!(reconcile(current, fragment(target, 0), 0), target);
        assert!(from_fixed(reconcile(current, fragment(target, 0), 0)) > 0.0);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(5000))]

        // decode(encode(alt)) stays inside the step below alt
        #[test]
        fn fuzz_altitude_round_trip(alt in 0.0f64..47_500.0) {
            let code = encode_altitude(alt);
            let decoded = decode_altitude(code);
            prop_assert!(decoded <= alt, "decoded {} above {}", decoded, alt);
            prop_assert!(alt - decoded < altitude_step(code) + 1e-6,
                "decoded {} too far below {}", decoded, alt);
            prop_assert_eq!(encode_altitude(decoded), code);
        }

        // Any move of less than half a span at fragment resolution is recovered
        #[test]
        fn fuzz_reconcile_recovers_delta(
            shift in prop::sample::select(vec![0u32, 2, 5]),
            degrees in -179.0f64..179.0,
            delta_steps in any::<i64>(),
        ) {
            let span = span(shift);
            let steps_per_span = span >> shift;
            let delta = (delta_steps.rem_euclid(steps_per_span - 1) - (steps_per_span / 2 - 1)) << shift;
            prop_assert!(delta > -span / 2 && delta < span / 2);

            let v = to_fixed(degrees);
            let target = v + delta;
            prop_assert_eq!(reconcile(v, fragment(target, shift), shift), target);
        }
    }
}

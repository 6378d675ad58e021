//! Radiosonde decoder lines
//!
//! Full-precision fixes printed by RS41 and iMS-100 decoders, e.g.
//!
//! ```text
//! [ 8012] (S1234567) Tue 2024-05-01 03:04:05.000  lat: 35.68215  lon: 138.56045  alt: 10532.18  vH: 12.4  D: 87.1  vV: 5.2 [00000]
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Line markers of a fix that passed the decoder's own error checks
const VALID_MARKERS: [&str; 2] = ["[00000]", "(ok)[OK]"];

/// One decoded radiosonde fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SondeFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    pub horizontal_speed_mps: f64,
    pub direction_deg: f64,
    /// Positive upwards; 0.0 when the decoder did not report it
    pub vertical_speed_mps: f64,
}

impl SondeFix {
    /// Parse a decoder line, `None` unless it carries a valid-frame marker
    pub fn parse(line: &str) -> Option<Self> {
        if !VALID_MARKERS.iter().any(|m| line.contains(m)) {
            return None;
        }
        Some(Self {
            latitude: field_after(line, "lat:"),
            longitude: field_after(line, "lon:"),
            altitude_m: field_after(line, "alt:"),
            horizontal_speed_mps: field_after(line, "vH:"),
            direction_deg: field_after(line, "D:"),
            vertical_speed_mps: field_after(line, "vV:"),
        })
    }
}

/// Number following the first `label` in `line`, 0.0 when absent
fn field_after(line: &str, label: &str) -> f64 {
    line.split_once(label)
        .map(|(_, rest)| leading_float(rest))
        .unwrap_or(0.0)
}

/// Longest numeric prefix after leading whitespace
pub(crate) fn leading_float(text: &str) -> f64 {
    let text = text.trim_start();
    let candidate: String = text
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        .collect();
    (1..=candidate.len())
        .rev()
        .find_map(|end| candidate[..end].parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Vertical speed estimated from successive altitudes
#[derive(Debug, Clone, Default)]
pub struct VerticalRate {
    previous: Option<(f64, DateTime<Utc>)>,
}

impl VerticalRate {
    pub fn new() -> Self {
        Self::default()
    }

    /// m/s since the previous altitude; 0.0 on the first call
    ///
    /// Samples closer than one second apart are treated as one second apart.
    pub fn update(&mut self, altitude_m: f64, at: DateTime<Utc>) -> f64 {
        let rate = match self.previous {
            Some((prev_alt, prev_at)) => {
                let dt = (at - prev_at).num_milliseconds() as f64 / 1000.0;
                (altitude_m - prev_alt) / dt.max(1.0)
            }
            None => 0.0,
        };
        self.previous = Some((altitude_m, at));
        rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const RS41_LINE: &str = "[ 8012] (S1234567) Tue 2024-05-01 03:04:05.000  lat: 35.68215  lon: 138.56045  alt: 10532.18  vH: 12.4  D: 87.1  vV: -5.2 [00000]";

    #[test]
    fn test_parse_rs41() {
        let fix = SondeFix::parse(RS41_LINE).unwrap();
        assert_eq!(fix.latitude, 35.68215);
        assert_eq!(fix.longitude, 138.56045);
        assert_eq!(fix.altitude_m, 10532.18);
        assert_eq!(fix.horizontal_speed_mps, 12.4);
        assert_eq!(fix.direction_deg, 87.1);
        assert_eq!(fix.vertical_speed_mps, -5.2);
    }

    #[test]
    fn test_parse_ims100_marker() {
        let line = "lat: 35.1 lon: 139.2 alt: 800.0 vH: 1.0 D: 10.0 (ok)[OK]";
        let fix = SondeFix::parse(line).unwrap();
        assert_eq!(fix.altitude_m, 800.0);
        assert_eq!(fix.vertical_speed_mps, 0.0);
    }

    #[test]
    fn test_reject_unchecked_frame() {
        assert_eq!(SondeFix::parse("lat: 35.1 lon: 139.2 alt: 800.0 [00100]"), None);
    }

    #[test]
    fn test_leading_float() {
        assert_eq!(leading_float("  12.5m/s"), 12.5);
        assert_eq!(leading_float("-3e2,"), -300.0);
        assert_eq!(leading_float("abc"), 0.0);
        assert_eq!(leading_float("7.-"), 7.0);
    }

    #[test]
    fn test_vertical_rate() {
        let t0 = DateTime::parse_from_rfc3339("2024-05-01T03:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut rate = VerticalRate::new();
        assert_eq!(rate.update(1_000.0, t0), 0.0);
        assert_eq!(rate.update(1_010.0, t0 + Duration::seconds(2)), 5.0);
        assert_eq!(rate.update(1_004.0, t0 + Duration::milliseconds(2_100)), -6.0);
    }
}

//! Input files and the track-log snapshot store

use crate::output::format_point;
use crate::{Result, TrackerError};
use flight_telemetry::{BalloonSnapshot, LandingPrediction, RetrieverState, SnapshotStore, TrajectoryProfile};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Load the pre-flight habhub prediction
pub fn load_profile(path: impl AsRef<Path>) -> Result<TrajectoryProfile> {
    let path = path.as_ref();
    info!("Loading profile from {:?}", path);
    let text = fs::read_to_string(path)?;
    Ok(TrajectoryProfile::parse_kml(&text)?)
}

/// Read the retriever position written by the vehicle's GPS logger
pub fn load_retriever(path: impl AsRef<Path>) -> Result<RetrieverState> {
    parse_retriever(&fs::read_to_string(path)?)
}

/// `lng,lat,alt,speed,heading`
pub fn parse_retriever(text: &str) -> Result<RetrieverState> {
    let values = comma_floats(text.trim());
    match values.as_deref() {
        Some([longitude, latitude, altitude_m, speed, heading_deg, ..]) => Ok(RetrieverState {
            longitude: *longitude,
            latitude: *latitude,
            altitude_m: *altitude_m,
            speed: *speed,
            heading_deg: *heading_deg,
        }),
        _ => Err(TrackerError::Retriever(text.trim().to_string())),
    }
}

fn comma_floats(line: &str) -> Option<Vec<f64>> {
    line.split(',').map(|s| s.trim().parse::<f64>().ok()).collect()
}

/// Erase track files, ignoring those that do not exist
pub fn remove_tracks<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Result<()> {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => info!("Removed {:?}", path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Snapshots kept as the balloon and prediction track files
///
/// Each save appends one `lng,lat,alt` line to the balloon track and, when
/// the snapshot carries a landing prediction, one `lng,lat,speed` line to the
/// prediction track. Loading reads them back: the last balloon line is the
/// position, the largest altitude the maximum, and the last prediction line
/// the landing estimate.
#[derive(Debug, Clone)]
pub struct TrackLogStore {
    balloon_track: PathBuf,
    prediction_track: PathBuf,
}

impl TrackLogStore {
    pub fn new(balloon_track: impl Into<PathBuf>, prediction_track: impl Into<PathBuf>) -> Self {
        Self {
            balloon_track: balloon_track.into(),
            prediction_track: prediction_track.into(),
        }
    }
}

impl SnapshotStore for TrackLogStore {
    fn load(&mut self) -> io::Result<Option<BalloonSnapshot>> {
        let balloon = match read_if_exists(&self.balloon_track)? {
            Some(text) => text,
            None => return Ok(None),
        };

        let mut last = None;
        let mut max_altitude_m = 0.0f64;
        for values in balloon.lines().filter_map(comma_floats) {
            if let [lng, lat, alt, ..] = values[..] {
                max_altitude_m = max_altitude_m.max(alt);
                last = Some((lng, lat, alt));
            }
        }
        let Some((longitude, latitude, altitude_m)) = last else {
            return Ok(None);
        };

        let landing = read_if_exists(&self.prediction_track)?.and_then(|text| {
            text.lines()
                .filter_map(comma_floats)
                .filter_map(|values| match values[..] {
                    [lng, lat, speed, ..] => Some(LandingPrediction {
                        longitude: lng,
                        latitude: lat,
                        landing_speed_mps: speed,
                    }),
                    _ => None,
                })
                .last()
        });

        info!(
            "Resuming from track log: {} lines, last alt {:.0}m",
            balloon.lines().count(),
            altitude_m
        );
        Ok(Some(BalloonSnapshot {
            longitude,
            latitude,
            altitude_m,
            max_altitude_m,
            landing,
        }))
    }

    fn save(&mut self, snapshot: &BalloonSnapshot) -> io::Result<()> {
        append_line(
            &self.balloon_track,
            &format_point(snapshot.longitude, snapshot.latitude, snapshot.altitude_m),
        )?;
        if let Some(landing) = &snapshot.landing {
            append_line(
                &self.prediction_track,
                &format_point(landing.longitude, landing.latitude, landing.landing_speed_mps),
            )?;
        }
        Ok(())
    }
}

fn read_if_exists(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Append `line` and a newline, creating the file if needed
pub fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, NamedTempFile};

    const PROFILE: &str = "<Document>
<description>Ascent rate: 5m/s, descent rate: 6m/s</description>
<coordinates>
138.50,35.60,0
138.60,35.70,30000
138.70,35.66,0
</coordinates>
</Document>
";

    #[test]
    fn test_load_profile() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(PROFILE.as_bytes()).unwrap();

        let profile = load_profile(file.path()).unwrap();
        assert_eq!(profile.len(), 3);
        assert_eq!(profile.apex_index(), 1);
        assert_eq!(profile.planned_landing_speed_mps, 6.0);
    }

    #[test]
    fn test_missing_profile_is_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load_profile(dir.path().join("habhub.kml")),
            Err(TrackerError::Io(_))
        ));
    }

    #[test]
    fn test_parse_retriever() {
        let retriever = parse_retriever("138.56045, 35.68215,0,1.2,187\n").unwrap();
        assert_eq!(retriever.longitude, 138.56045);
        assert_eq!(retriever.latitude, 35.68215);
        assert_eq!(retriever.speed, 1.2);
        assert_eq!(retriever.heading_deg, 187.0);

        assert!(matches!(
            parse_retriever("138.5,35.6"),
            Err(TrackerError::Retriever(_))
        ));
        assert!(parse_retriever("").is_err());
    }

    #[test]
    fn test_store_round_trip() {
        let dir = tempdir().unwrap();
        let mut store = TrackLogStore::new(
            dir.path().join("balloon-track.txt"),
            dir.path().join("prediction-track.txt"),
        );
        assert_eq!(store.load().unwrap(), None);

        store
            .save(&BalloonSnapshot {
                longitude: 138.5,
                latitude: 35.6,
                altitude_m: 12_000.0,
                max_altitude_m: 12_000.0,
                landing: Some(LandingPrediction {
                    longitude: 138.8,
                    latitude: 35.5,
                    landing_speed_mps: 5.5,
                }),
            })
            .unwrap();
        store
            .save(&BalloonSnapshot {
                longitude: 138.51,
                latitude: 35.61,
                altitude_m: 11_500.0,
                max_altitude_m: 12_000.0,
                landing: None,
            })
            .unwrap();

        let snapshot = store.load().unwrap().unwrap();
        assert_eq!(snapshot.longitude, 138.51);
        assert_eq!(snapshot.latitude, 35.61);
        assert_eq!(snapshot.altitude_m, 11_500.0);
        assert_eq!(snapshot.max_altitude_m, 12_000.0);
        assert_eq!(
            snapshot.landing,
            Some(LandingPrediction {
                longitude: 138.8,
                latitude: 35.5,
                landing_speed_mps: 5.5,
            })
        );
    }

    #[test]
    fn test_store_skips_malformed_lines() {
        let dir = tempdir().unwrap();
        let balloon = dir.path().join("balloon-track.txt");
        fs::write(&balloon, "138.5,35.6,100.0\ngarbage\n138.6,35.7\n").unwrap();
        let mut store = TrackLogStore::new(&balloon, dir.path().join("prediction-track.txt"));

        let snapshot = store.load().unwrap().unwrap();
        assert_eq!(snapshot.longitude, 138.5);
        assert_eq!(snapshot.landing, None);
    }

    #[test]
    fn test_remove_tracks() {
        let dir = tempdir().unwrap();
        let present = dir.path().join("balloon-track.txt");
        let absent = dir.path().join("retriever-track.txt");
        fs::write(&present, "1,2,3\n").unwrap();

        remove_tracks([present.as_path(), absent.as_path()]).unwrap();
        assert!(!present.exists());
    }
}

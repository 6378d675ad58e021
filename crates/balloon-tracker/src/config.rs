//! Command line and runtime configuration

use chrono::Duration as ChronoDuration;
use clap::Parser;
use flight_telemetry::SessionConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SERVER: &str = "18.182.16.49:5555";
pub const DEFAULT_STATION_ID: &str = "0055";
pub const CURRENT_LOCATION_TYPE: &str = "00";
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Display names for the first antennas, in priority order
const ANTENNA_NAMES: [&str; 3] = ["E", "D", "U"];

#[derive(Parser, Debug, Clone)]
#[command(
    name = "balloon-tracker",
    about = "Track a balloon over radio and guide the retrieval vehicle"
)]
pub struct Args {
    /// Receiver devices in priority order (missing ones are skipped)
    #[arg(short, long = "device")]
    pub devices: Vec<PathBuf>,

    /// Directory holding the profile, retriever file and all outputs
    #[arg(short, long, default_value = ".")]
    pub workdir: PathBuf,

    /// Pre-flight trajectory profile (habhub KML), relative to the workdir
    #[arg(long, default_value = "habhub.kml")]
    pub profile: PathBuf,

    /// Retriever position file, relative to the workdir
    #[arg(long, default_value = "retriever.txt")]
    pub retriever: PathBuf,

    /// Do not send location datagrams
    #[arg(long)]
    pub local: bool,

    /// Erase previous tracks and start from the profile
    #[arg(long)]
    pub init: bool,

    /// Read radiosonde decoder lines from stdin instead of radio devices
    #[arg(long)]
    pub sonde: bool,

    /// Location server
    #[arg(long, default_value = DEFAULT_SERVER)]
    pub server: String,

    /// Four hex digit station id for location datagrams
    #[arg(long, default_value = DEFAULT_STATION_ID)]
    pub station_id: String,

    /// Receiver line speed; ports are opened 8N1 without flow control
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,

    /// Bound on each receiver read in milliseconds
    #[arg(long, default_value_t = 50)]
    pub read_timeout_ms: u64,

    /// Seconds between guidance records
    #[arg(long, default_value_t = 10)]
    pub guidance_interval_secs: i64,

    /// Also write each guidance record as JSON to this file
    #[arg(long)]
    pub guidance_json: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Output files, all inside the working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFiles {
    pub balloon_track: PathBuf,
    pub retriever_track: PathBuf,
    pub prediction_track: PathBuf,
    pub habhub_landing_track: PathBuf,
    pub flight_log: PathBuf,
    pub voice: PathBuf,
    pub kml: PathBuf,
    pub realtime_kml: PathBuf,
}

impl TrackFiles {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            balloon_track: dir.join("balloon-track.txt"),
            retriever_track: dir.join("retriever-track.txt"),
            prediction_track: dir.join("prediction-track.txt"),
            habhub_landing_track: dir.join("habhub-landing-track.txt"),
            flight_log: dir.join("flight-log.txt"),
            voice: dir.join("voice.txt"),
            kml: dir.join("track.kml"),
            realtime_kml: dir.join("realtime.kml"),
        }
    }

    /// Files erased by `--init`
    pub fn tracks(&self) -> [&Path; 4] {
        [
            &self.balloon_track,
            &self.retriever_track,
            &self.prediction_track,
            &self.habhub_landing_track,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// `(name, path)` in priority order
    pub antennas: Vec<(String, PathBuf)>,
    pub profile: PathBuf,
    pub retriever: PathBuf,
    pub files: TrackFiles,
    /// `None` with `--local`
    pub server: Option<String>,
    pub station_id: String,
    pub location_type: String,
    pub init: bool,
    pub sonde: bool,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub idle_sleep: Duration,
    pub session: SessionConfig,
    pub guidance_json: Option<PathBuf>,
}

impl From<Args> for TrackerConfig {
    fn from(args: Args) -> Self {
        let antennas = args
            .devices
            .into_iter()
            .enumerate()
            .map(|(i, path)| {
                let name = ANTENNA_NAMES
                    .get(i)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| format!("A{}", i));
                (name, path)
            })
            .collect();

        Self {
            antennas,
            profile: args.workdir.join(&args.profile),
            retriever: args.workdir.join(&args.retriever),
            files: TrackFiles::in_dir(&args.workdir),
            server: (!args.local).then_some(args.server),
            station_id: args.station_id,
            location_type: CURRENT_LOCATION_TYPE.to_string(),
            init: args.init,
            sonde: args.sonde,
            baud_rate: args.baud,
            read_timeout: Duration::from_millis(args.read_timeout_ms),
            idle_sleep: Duration::from_secs(1),
            session: SessionConfig {
                guidance_interval: ChronoDuration::seconds(args.guidance_interval_secs.max(1)),
            },
            guidance_json: args.guidance_json.map(|p| args.workdir.join(p)),
        }
    }
}

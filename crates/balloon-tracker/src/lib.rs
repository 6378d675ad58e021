//! Balloon Tracker
//!
//! Ground-side runner around `flight-telemetry`: reads packets from one or
//! more radio receivers (or radiosonde decoder lines on stdin), keeps the
//! flight estimate, and every guidance cycle tells the retrieval vehicle
//! where to look.
//!
//! # Working directory
//!
//! | File                       | Direction | Content                          |
//! |----------------------------|-----------|----------------------------------|
//! | `habhub.kml`               | in        | pre-flight trajectory profile    |
//! | `retriever.txt`            | in        | `lng,lat,alt,speed,heading`      |
//! | `balloon-track.txt`        | out       | decoded balloon positions        |
//! | `prediction-track.txt`     | out       | landing predictions              |
//! | `retriever-track.txt`      | out       | retriever positions              |
//! | `habhub-landing-track.txt` | out       | profile-based landing points     |
//! | `flight-log.txt`           | out       | human-readable log               |
//! | `voice.txt`                | out       | text for a speech synthesizer    |
//! | `track.kml`, `realtime.kml`| out       | Google Earth view                |

use thiserror::Error;

pub mod config;
pub mod loader;
pub mod output;
pub mod radio;
pub mod uplink;

pub use config::{Args, TrackFiles, TrackerConfig};
pub use loader::TrackLogStore;
pub use output::{OutputSink, VoiceOver};
pub use radio::{Antenna, AntennaStats};
pub use uplink::Uplink;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Profile error: {0}")]
    Profile(#[from] flight_telemetry::ProfileError),
    #[error("Malformed retriever position: {0:?}")]
    Retriever(String),
    #[error("Station id and message type must be hex digits: {0:?}")]
    StationId(String),
    #[error("No antenna device found")]
    NoAntenna,
}

pub type Result<T> = std::result::Result<T, TrackerError>;

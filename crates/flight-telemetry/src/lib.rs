//! Flight Telemetry Library
//!
//! Decoding and prediction engine for a balloon tracked over a narrowband
//! radio link: adaptive-resolution position codec, rotating prediction field,
//! pre-flight trajectory matching and retrieval guidance geometry.
//!
//! # Radio payload
//!
//! ```text
//! [0] altitude code     [1] lat high byte     [2] lng high byte
//! [3] lat|lng nibbles   [4] lat|lng low bits  [5] rotating field (optional)
//! ```
//!
//! Latitude and longitude travel as 14-bit fragments of the 2^16 fixed-point
//! value, shifted right by 0, 2 or 5 bits depending on altitude.

use serde::{Deserialize, Serialize};

pub mod codec;
pub mod geometry;
pub mod packet;
pub mod prediction;
pub mod session;
pub mod sonde;
pub mod state;
pub mod trajectory;

pub use packet::{Packet, PacketError, RadioFrame};
pub use prediction::{PredictionFieldDecoder, Slot, SlotSelector};
pub use session::{Guidance, Ingest, SessionConfig, SessionError, TrackingSession};
pub use sonde::{SondeFix, VerticalRate};
pub use state::{BalloonSnapshot, BalloonState, LandingPrediction, MemoryStore, SnapshotStore};
pub use trajectory::{ProfileError, TrajectoryMatcher, TrajectoryProfile, Waypoint};

/// Metres per degree of latitude used by the flat-earth approximation
pub const METERS_PER_DEGREE: f64 = 111_111.0;

/// Atmospheric scale height (m) of the exponential descent model
pub const SCALE_HEIGHT_M: f64 = 7_500.0;

/// Landing speed (m/s) assumed until the balloon reports its own
pub const REFERENCE_LANDING_SPEED_MPS: f64 = 4.5;

/// A geographic position with altitude
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
    pub altitude_m: f64,
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64, altitude_m: f64) -> Self {
        Self {
            longitude,
            latitude,
            altitude_m,
        }
    }

    /// Same horizontal position on the ground
    pub fn on_ground(longitude: f64, latitude: f64) -> Self {
        Self::new(longitude, latitude, 0.0)
    }
}

/// Position and motion of the retrieval vehicle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrieverState {
    pub longitude: f64,
    pub latitude: f64,
    pub altitude_m: f64,
    pub speed: f64,
    pub heading_deg: f64,
}

impl RetrieverState {
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.longitude, self.latitude, self.altitude_m)
    }
}

//! One tracked flight: packet and fix ingestion plus periodic guidance

use crate::geometry::{bearing_distance_elevation, clock_position, compass_point};
use crate::packet::{PacketError, RadioFrame};
use crate::prediction::{FieldUpdate, Slot, SlotSelector};
use crate::sonde::{SondeFix, VerticalRate};
use crate::state::{BalloonSnapshot, BalloonState, SnapshotStore};
use crate::trajectory::{TrajectoryMatcher, TrajectoryProfile};
use crate::{GeoPoint, RetrieverState};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Packet rejected: {0}")]
    Packet(#[from] PacketError),
    #[error("Snapshot store error: {0}")]
    Store(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Minimum spacing between guidance records
    pub guidance_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            guidance_interval: Duration::seconds(10),
        }
    }
}

/// What a single frame did to the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingest {
    pub sender: Option<i64>,
    pub rssi: Option<i64>,
    pub altitude_m: f64,
    /// This frame started the track
    pub seeded: bool,
    pub slot: Option<Slot>,
    pub field: Option<FieldUpdate>,
}

/// Direction to the balloon as seen from the retriever, with the landing forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guidance {
    pub bearing_deg: f64,
    pub horiz_dist_m: f64,
    pub elevation_deg: f64,
    pub clock_position: f64,
    pub compass_point: String,
    pub balloon: BalloonSnapshot,
    pub falling: bool,
    pub ascent_rate_mps: Option<f64>,
    pub landing_speed_mps: f64,
    /// Landing point from the rotating field
    pub predicted_landing: GeoPoint,
    /// Landing point at the end of the re-anchored profile
    pub profile_landing: GeoPoint,
    pub time_to_land_s: Option<f64>,
    /// Profile path re-anchored on the balloon, absolute coordinates
    pub predicted_path: Vec<GeoPoint>,
    pub retriever: RetrieverState,
    pub computed_at: DateTime<Utc>,
}

pub struct TrackingSession {
    config: SessionConfig,
    matcher: TrajectoryMatcher,
    balloon: Option<BalloonState>,
    vertical_rate: VerticalRate,
    last_guidance: Option<DateTime<Utc>>,
}

impl TrackingSession {
    pub fn new(config: SessionConfig, profile: TrajectoryProfile) -> Self {
        Self {
            config,
            matcher: TrajectoryMatcher::new(profile),
            balloon: None,
            vertical_rate: VerticalRate::new(),
            last_guidance: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn profile(&self) -> &TrajectoryProfile {
        self.matcher.profile()
    }

    pub fn is_seeded(&self) -> bool {
        self.balloon.is_some()
    }

    pub fn balloon(&self) -> Option<&BalloonState> {
        self.balloon.as_ref()
    }

    /// Continue a flight from a stored snapshot
    pub fn resume(&mut self, snapshot: &BalloonSnapshot, now: DateTime<Utc>) {
        let fallback = self.matcher.profile().planned_landing_speed_mps;
        let state = BalloonState::resume(snapshot, fallback, now);
        info!(
            "Resumed at {:.5},{:.5} alt {:.0}m (max {:.0}m)",
            state.latitude(),
            state.longitude(),
            state.altitude_m(),
            state.max_altitude_m()
        );
        self.balloon = Some(state);
    }

    /// Resume from `store` if it holds a snapshot; returns whether it did
    pub fn resume_from<S: SnapshotStore + ?Sized>(&mut self, store: &mut S, now: DateTime<Utc>) -> Result<bool> {
        match store.load()? {
            Some(snapshot) => {
                self.resume(&snapshot, now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn save<S: SnapshotStore + ?Sized>(&self, store: &mut S) -> Result<()> {
        if let Some(state) = &self.balloon {
            store.save(&state.snapshot())?;
        }
        Ok(())
    }

    /// Apply one raw receiver chunk
    pub fn ingest(&mut self, raw: &[u8], now: DateTime<Utc>) -> Result<Ingest> {
        self.ingest_frame(&RadioFrame::parse(raw), now)
    }

    /// Apply an already split frame; rejected frames leave the session untouched
    pub fn ingest_frame(&mut self, frame: &RadioFrame, now: DateTime<Utc>) -> Result<Ingest> {
        let packet = frame.packet().map_err(|e| {
            warn!("Dropping frame from {:?}: {}", frame.sender, e);
            e
        })?;

        let altitude_m = crate::codec::decode_altitude(packet.altitude_code);
        let seeded = self.balloon.is_none();
        let matcher = &mut self.matcher;
        let state = self.balloon.get_or_insert_with(|| {
            let (start, landing) = matcher.seed_point(altitude_m);
            info!(
                "First packet at {:.0}m, seeding from profile at {:.5},{:.5}",
                altitude_m, start.latitude, start.longitude
            );
            BalloonState::seed(
                GeoPoint::new(start.longitude, start.latitude, altitude_m),
                altitude_m,
                landing,
                matcher.profile().planned_landing_speed_mps,
                now,
            )
        });

        state.apply_packet(&packet, now);

        let (slot, field) = match packet.prediction {
            Some(byte) => {
                let slot = SlotSelector::for_time(now);
                let update = state.apply_field(slot, byte);
                debug!("Rotating field {:?} = 0x{:02x}: {:?}", slot, byte, update);
                (Some(slot), Some(update))
            }
            None => (None, None),
        };

        debug!(
            "Packet from {:?} rssi {:?}: {:.5},{:.5} alt {:.0}m",
            frame.sender,
            frame.rssi,
            state.latitude(),
            state.longitude(),
            state.altitude_m()
        );

        Ok(Ingest {
            sender: frame.sender,
            rssi: frame.rssi,
            altitude_m: state.altitude_m(),
            seeded,
            slot,
            field,
        })
    }

    /// Apply a full-precision radiosonde fix
    ///
    /// Without a reported vertical speed the rate is derived from successive
    /// fixes.
    pub fn ingest_fix(&mut self, fix: &SondeFix, now: DateTime<Utc>) {
        let position = GeoPoint::new(fix.longitude, fix.latitude, fix.altitude_m);
        let measured = self.vertical_rate.update(fix.altitude_m, now);
        let vertical_speed = if fix.vertical_speed_mps != 0.0 {
            fix.vertical_speed_mps
        } else {
            measured
        };

        let matcher = &mut self.matcher;
        let state = self.balloon.get_or_insert_with(|| {
            let (_, landing) = matcher.seed_point(fix.altitude_m);
            info!("First fix at {:.0}m", fix.altitude_m);
            BalloonState::seed(
                position,
                fix.altitude_m,
                landing,
                matcher.profile().planned_landing_speed_mps,
                now,
            )
        });
        state.apply_fix(position, now);
        state.apply_vertical_speed(vertical_speed);
    }

    pub fn guidance_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_guidance {
            Some(last) => now - last >= self.config.guidance_interval,
            None => true,
        }
    }

    /// Restart the cadence without producing guidance
    pub fn skip_guidance(&mut self, now: DateTime<Utc>) {
        self.last_guidance = Some(now);
    }

    /// Compute guidance for the retriever; `None` until the first packet
    ///
    /// The cadence restarts at `now` either way.
    pub fn guidance(&mut self, retriever: &RetrieverState, now: DateTime<Utc>) -> Option<Guidance> {
        self.last_guidance = Some(now);
        let state = self.balloon.as_ref()?;
        let balloon = state.position();
        let look = bearing_distance_elevation(&balloon, &retriever.position());

        let falling = state.falling();
        let rate = if falling {
            Some(state.landing_speed_mps())
        } else {
            state.ascent_rate_mps()
        };
        let predicted_path: Vec<GeoPoint> = self
            .matcher
            .prediction(state.altitude_m(), !falling, rate)
            .into_iter()
            .map(|w| GeoPoint::new(w.longitude + balloon.longitude, w.latitude + balloon.latitude, w.altitude_m))
            .collect();

        // prediction() never returns an empty path
        let profile_landing = predicted_path
            .last()
            .map(|p| GeoPoint::on_ground(p.longitude, p.latitude))
            .unwrap_or_else(|| GeoPoint::on_ground(balloon.longitude, balloon.latitude));

        Some(Guidance {
            bearing_deg: look.azimuth_deg,
            horiz_dist_m: look.horiz_dist_m,
            elevation_deg: look.elevation_deg,
            clock_position: clock_position(look.azimuth_deg, retriever.heading_deg),
            compass_point: compass_point(look.azimuth_deg).to_string(),
            balloon: state.snapshot(),
            falling,
            ascent_rate_mps: state.ascent_rate_mps(),
            landing_speed_mps: state.landing_speed_mps(),
            predicted_landing: state.predicted_landing(),
            profile_landing,
            time_to_land_s: state.time_to_land(),
            predicted_path,
            retriever: *retriever,
            computed_at: now,
        })
    }
}

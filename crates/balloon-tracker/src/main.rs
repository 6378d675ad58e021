//! Balloon tracker
//!
//! Usage:
//!   balloon-tracker -d /dev/ttyUSB0 -d /dev/ttyUSB1 --workdir flight/
//!   rs41mod --ptu audio.wav | balloon-tracker --sonde --local

use anyhow::{Context, Result};
use balloon_tracker::radio::{poll_antennas, select_frame};
use balloon_tracker::{
    loader, Antenna, Args, OutputSink, TrackLogStore, TrackerConfig, TrackerError, Uplink,
};
use chrono::{Local, Utc};
use clap::Parser;
use flight_telemetry::{SnapshotStore, SondeFix, TrackingSession};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Everything the loop mutates
struct Tracker {
    config: TrackerConfig,
    session: TrackingSession,
    store: TrackLogStore,
    sink: OutputSink,
    uplink: Option<Uplink>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "balloon_tracker=debug,flight_telemetry=debug"
    } else {
        "balloon_tracker=info,flight_telemetry=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = TrackerConfig::from(args);

    if config.init {
        loader::remove_tracks(config.files.tracks())?;
    }

    let profile = loader::load_profile(&config.profile)
        .with_context(|| format!("cannot load profile {:?}", config.profile))?;

    let mut session = TrackingSession::new(config.session.clone(), profile);
    let mut store = TrackLogStore::new(&config.files.balloon_track, &config.files.prediction_track);
    session.resume_from(&mut store, Utc::now())?;

    let sink = OutputSink::new(config.files.clone(), config.guidance_json.clone(), config.sonde);
    sink.write_realtime_kml()?;

    let uplink = match &config.server {
        Some(server) => {
            info!("Sending locations to {}", server);
            Some(Uplink::connect(server, &config.station_id, &config.location_type).await?)
        }
        None => None,
    };

    let mut tracker = Tracker {
        config,
        session,
        store,
        sink,
        uplink,
    };

    if tracker.config.sonde {
        tracker.run_sonde().await
    } else {
        tracker.run_radio().await
    }
}

impl Tracker {
    async fn run_radio(&mut self) -> Result<()> {
        let mut antennas = Vec::new();
        for (name, path) in &self.config.antennas {
            match Antenna::open(
                name.as_str(),
                path,
                self.config.baud_rate,
                self.config.read_timeout,
            ) {
                Ok(antenna) => antennas.push(antenna),
                Err(e) => debug!("{:?} not available: {}", path, e),
            }
        }
        if antennas.is_empty() {
            return Err(TrackerError::NoAntenna.into());
        }

        let read_timeout = self.config.read_timeout;
        loop {
            let chunks = tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                chunks = poll_antennas(&mut antennas, read_timeout) => chunks,
            };

            if chunks.iter().all(Option::is_none) {
                tokio::time::sleep(self.config.idle_sleep).await;
            } else {
                let (reception, rejection) = select_frame(&mut antennas, &chunks);
                match reception {
                    Some(reception) => self.handle_reception(reception).await?,
                    None => {
                        if let Some(e) = rejection {
                            warn!("No valid copy of the frame: {}", e);
                        }
                    }
                }
            }

            if self.session.guidance_due(Utc::now()) {
                let altitude = self.session.balloon().map(|b| b.altitude_m());
                self.guidance_cycle(altitude)?;
            }
        }

        for antenna in &antennas {
            let stats = antenna.stats();
            info!(
                "Antenna {}: {} frames, {} valid, {} short, {} checksum errors",
                antenna.name(),
                stats.frames,
                stats.valid,
                stats.too_short,
                stats.checksum_errors
            );
        }
        Ok(())
    }

    async fn handle_reception(&mut self, reception: balloon_tracker::radio::Reception) -> Result<()> {
        let frame = &reception.frame;

        let mut header = String::new();
        let mut spoken = String::new();
        for (name, rssi) in &reception.heard_by {
            header.push_str(&format!("{}: ", name));
            spoken.push_str(&format!("{} ", name));
            if let Some(rssi) = rssi {
                header.push_str(&format!("{:3} ", rssi));
                spoken.push_str(&format!("{}dB ", -rssi));
            }
        }
        if let Some(sender) = frame.sender {
            header.push_str(&format!(" From {}", sender));
            self.sink.voice().append(&format!(" {} : ", sender));
        }
        self.sink.voice().prepend(&spoken);
        self.sink.log(&format!("{}\n", header))?;

        let now = Utc::now();
        let ingest = match self.session.ingest_frame(frame, now) {
            Ok(ingest) => ingest,
            Err(e) => {
                warn!("{}", e);
                return Ok(());
            }
        };
        debug!("{:?}", ingest);

        let Some(state) = self.session.balloon() else {
            return Ok(());
        };
        let mut snapshot = state.snapshot();
        if ingest.field.is_none() {
            snapshot.landing = None;
        }
        self.store.save(&snapshot)?;
        self.sink.record_balloon(state)?;

        if let Some(uplink) = &self.uplink {
            if let Err(e) = uplink
                .send_position(
                    state.latitude(),
                    state.longitude(),
                    state.altitude_m(),
                    Local::now().naive_local(),
                )
                .await
            {
                warn!("Location uplink failed: {}", e);
            }
        }
        Ok(())
    }

    async fn run_sonde(&mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut updated = false;

        loop {
            let next = tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                next = timeout(Duration::from_secs(1), lines.next_line()) => next,
            };
            match next {
                Ok(Ok(Some(line))) => updated |= self.handle_sonde_line(&line).await?,
                Ok(Ok(None)) => {
                    info!("Decoder input closed");
                    break;
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {}
            }

            if self.session.guidance_due(Utc::now()) {
                let announce = if updated {
                    self.session
                        .balloon()
                        .map(|b| (b.altitude_m() / 100.0).round() * 100.0)
                } else {
                    None
                };
                self.guidance_cycle(announce)?;
                updated = false;
            }
        }
        Ok(())
    }

    /// Returns whether the line carried a valid fix
    async fn handle_sonde_line(&mut self, line: &str) -> Result<bool> {
        self.sink.log(&format!("{}\n", line))?;
        let Some(fix) = SondeFix::parse(line) else {
            return Ok(false);
        };

        let now = Utc::now();
        self.session.ingest_fix(&fix, now);
        if let Some(state) = self.session.balloon() {
            let mut snapshot = state.snapshot();
            snapshot.landing = None;
            self.store.save(&snapshot)?;
        }

        if let Some(uplink) = &self.uplink {
            if let Err(e) = uplink
                .send_position(fix.latitude, fix.longitude, fix.altitude_m, Local::now().naive_local())
                .await
            {
                warn!("Location uplink failed: {}", e);
            }
        }
        Ok(true)
    }

    /// Read the retriever, then log, announce and draw the guidance
    fn guidance_cycle(&mut self, announce_altitude: Option<f64>) -> Result<()> {
        let now = Utc::now();
        let retriever = match loader::load_retriever(&self.config.retriever) {
            Ok(retriever) => retriever,
            Err(e) => {
                warn!("Skipping guidance, retriever position unavailable: {}", e);
                self.session.skip_guidance(now);
                return Ok(());
            }
        };
        self.sink.record_retriever(&retriever)?;

        if let Some(guidance) = self.session.guidance(&retriever, now) {
            self.sink.record_guidance(&guidance, announce_altitude)?;
        }
        Ok(())
    }
}

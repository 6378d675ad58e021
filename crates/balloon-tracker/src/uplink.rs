//! Location datagrams for the flight server
//!
//! The message is a string of hex digits packed two per byte:
//!
//! ```text
//! station(4) YYYYMMDDHHMMSS type(2) NS(2) deg(2) min·10⁴(6) EW(2) deg(4) min·10⁴(6) height(6)
//! ```
//!
//! `NS` and `EW` are the ASCII codes of the hemisphere letters in hex.

use crate::{Result, TrackerError};
use chrono::NaiveDateTime;
use tokio::net::UdpSocket;
use tracing::debug;

/// Degrees and minutes·10⁴ of an absolute coordinate, truncated
fn degrees_minutes(value: f64) -> (u32, u32) {
    let value = value.abs();
    let degrees = value.trunc();
    let minutes = ((value - degrees) * 60.0 * 10_000.0).trunc();
    (degrees as u32, minutes as u32)
}

fn check_hex(text: &str, len: usize) -> Result<()> {
    if text.len() == len && text.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(TrackerError::StationId(text.to_string()))
    }
}

pub fn location_message(
    station_id: &str,
    message_type: &str,
    latitude: f64,
    longitude: f64,
    height_m: f64,
    at: NaiveDateTime,
) -> Result<Vec<u8>> {
    check_hex(station_id, 4)?;
    check_hex(message_type, 2)?;

    let (lat_deg, lat_min) = degrees_minutes(latitude);
    let (lng_deg, lng_min) = degrees_minutes(longitude);
    let north_south = if latitude < 0.0 { b'S' } else { b'N' };
    let east_west = if longitude < 0.0 { b'W' } else { b'E' };

    let text = format!(
        "{}{}{}{:02X}{:02}{:06}{:02X}{:04}{:06}{:06}",
        station_id,
        at.format("%Y%m%d%H%M%S"),
        message_type,
        north_south,
        lat_deg,
        lat_min,
        east_west,
        lng_deg,
        lng_min,
        height_m.max(0.0).trunc() as u64
    );
    debug!("Location message {}", text);
    hex::decode(&text).map_err(|_| TrackerError::StationId(station_id.to_string()))
}

/// Connected UDP socket to the flight server
pub struct Uplink {
    socket: UdpSocket,
    station_id: String,
    message_type: String,
}

impl Uplink {
    pub async fn connect(server: &str, station_id: &str, message_type: &str) -> Result<Self> {
        check_hex(station_id, 4)?;
        check_hex(message_type, 2)?;
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(server).await?;
        Ok(Self {
            socket,
            station_id: station_id.to_string(),
            message_type: message_type.to_string(),
        })
    }

    pub async fn send_position(
        &self,
        latitude: f64,
        longitude: f64,
        height_m: f64,
        at: NaiveDateTime,
    ) -> Result<usize> {
        let message = location_message(
            &self.station_id,
            &self.message_type,
            latitude,
            longitude,
            height_m,
            at,
        )?;
        Ok(self.socket.send(&message).await?)
    }
}

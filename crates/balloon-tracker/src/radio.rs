//! Radio receivers with bounded reads and diversity selection
//!
//! Each receiver is a serial port opened raw at 8N1 without flow control, so
//! payload bytes reach the decoder untouched. Reads are bounded so a silent
//! receiver never stalls the loop.

use flight_telemetry::{PacketError, RadioFrame};
use serde::Serialize;
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, info, warn};

/// Largest chunk taken from a receiver in one read
const READ_CHUNK: usize = 256;

/// Per-receiver reception counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AntennaStats {
    pub frames: u64,
    pub valid: u64,
    pub too_short: u64,
    pub checksum_errors: u64,
    pub last_rssi: Option<i64>,
}

pub struct Antenna<R> {
    name: String,
    reader: R,
    buf: Vec<u8>,
    stats: AntennaStats,
}

impl Antenna<SerialStream> {
    /// Open a receiver port; must be called inside the runtime
    pub fn open(
        name: impl Into<String>,
        path: impl AsRef<Path>,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> io::Result<Self> {
        let path = path.as_ref();
        let port = tokio_serial::new(path.to_string_lossy(), baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(read_timeout)
            .open_native_async()
            .map_err(io::Error::from)?;
        info!("{:?} is connected at {} baud", path, baud_rate);
        Ok(Self::new(name, port))
    }
}

impl<R: AsyncRead + Unpin> Antenna<R> {
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader,
            buf: vec![0; READ_CHUNK],
            stats: AntennaStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &AntennaStats {
        &self.stats
    }

    /// Whatever the receiver has within `limit`; `None` when it stays silent
    pub async fn read_chunk(&mut self, limit: Duration) -> io::Result<Option<Vec<u8>>> {
        match timeout(limit, self.reader.read(&mut self.buf)).await {
            Err(_) => Ok(None),
            Ok(Ok(0)) => Ok(None),
            Ok(Ok(n)) => Ok(Some(self.buf[..n].to_vec())),
            Ok(Err(e)) => Err(e),
        }
    }

    async fn read_logged(&mut self, limit: Duration) -> Option<Vec<u8>> {
        self.read_chunk(limit).await.unwrap_or_else(|e| {
            warn!("Read from antenna {} failed: {}", self.name, e);
            None
        })
    }
}

/// Read every receiver at most twice
///
/// The first pass stops at the first receiver with data; if there was one,
/// a second pass collects the same transmission from the others. The result
/// is indexed like `antennas`.
pub async fn poll_antennas<R: AsyncRead + Unpin>(
    antennas: &mut [Antenna<R>],
    limit: Duration,
) -> Vec<Option<Vec<u8>>> {
    let mut chunks: Vec<Option<Vec<u8>>> = vec![None; antennas.len()];

    for (slot, antenna) in chunks.iter_mut().zip(antennas.iter_mut()) {
        if let Some(chunk) = antenna.read_logged(limit).await {
            *slot = Some(chunk);
            break;
        }
    }

    if chunks.iter().any(Option::is_some) {
        for (slot, antenna) in chunks.iter_mut().zip(antennas.iter_mut()) {
            if slot.is_none() {
                *slot = antenna.read_logged(limit).await;
            }
        }
    }
    chunks
}

/// A frame chosen among the receivers that heard one transmission
#[derive(Debug, Clone, PartialEq)]
pub struct Reception {
    /// Receiver whose copy is used
    pub antenna: usize,
    pub frame: RadioFrame,
    /// `(name, rssi)` of every receiver with data, in priority order
    pub heard_by: Vec<(String, Option<i64>)>,
}

/// Validate each copy in priority order and keep the first good one
///
/// Every copy is counted in its receiver's stats. `None` when no copy
/// passes, the last rejection is returned alongside for logging.
pub fn select_frame<R>(
    antennas: &mut [Antenna<R>],
    chunks: &[Option<Vec<u8>>],
) -> (Option<Reception>, Option<PacketError>) {
    let mut chosen: Option<(usize, RadioFrame)> = None;
    let mut heard_by = Vec::new();
    let mut rejection = None;

    for (i, (antenna, chunk)) in antennas.iter_mut().zip(chunks).enumerate() {
        let Some(raw) = chunk else { continue };
        let frame = RadioFrame::parse(raw);
        let stats = &mut antenna.stats;
        stats.frames += 1;
        if frame.rssi.is_some() {
            stats.last_rssi = frame.rssi;
        }
        heard_by.push((antenna.name.clone(), frame.rssi));

        match frame.packet() {
            Ok(_) => {
                stats.valid += 1;
                if chosen.is_none() {
                    chosen = Some((i, frame));
                }
            }
            Err(e) => {
                match e {
                    PacketError::TooShort { .. } => stats.too_short += 1,
                    PacketError::Checksum { .. } => stats.checksum_errors += 1,
                }
                debug!("Antenna {}: {}", antenna.name, e);
                rejection = Some(e);
            }
        }
    }

    let reception = chosen.map(|(antenna, frame)| Reception {
        antenna,
        frame,
        heard_by,
    });
    (reception, rejection)
}

//! Radio frame and payload parsing
//!
//! A receiver may prefix each payload with `sender,receiver,rssi,` in ASCII.
//! The payload itself is binary; see the crate docs for its layout.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes covered by the checksum and carrying position data
pub const PAYLOAD_LEN: usize = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Frame too short: {len} bytes")]
    TooShort { len: usize },
    #[error("Checksum mismatch (xor 0x{xor:02x})")]
    Checksum { xor: u8 },
}

pub type Result<T> = std::result::Result<T, PacketError>;

/// One chunk read from a receiver, header split off
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioFrame {
    pub sender: Option<i64>,
    pub receiver: Option<i64>,
    pub rssi: Option<i64>,
    pub payload: Vec<u8>,
}

impl RadioFrame {
    /// Split an optional three-field ASCII header from the payload
    pub fn parse(raw: &[u8]) -> Self {
        let commas: Vec<usize> = raw
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == b',')
            .map(|(i, _)| i)
            .take(3)
            .collect();

        if commas.len() < 3 {
            return Self {
                sender: None,
                receiver: None,
                rssi: None,
                payload: raw.to_vec(),
            };
        }

        let header = String::from_utf8_lossy(&raw[..commas[2]]);
        let mut fields = header.split(',').map(leading_int);

        Self {
            sender: fields.next().flatten(),
            receiver: fields.next().flatten(),
            rssi: fields.next().flatten(),
            payload: raw[commas[2] + 1..].to_vec(),
        }
    }

    pub fn packet(&self) -> Result<Packet> {
        Packet::decode(&self.payload)
    }
}

/// Integer prefix of a header field, tolerating padding and trailing junk
fn leading_int(field: &str) -> Option<i64> {
    let field = field.trim();
    let end = field
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(field.len());
    field[..end].parse().ok()
}

/// XOR of all bytes, valid when its two nibbles are equal
pub fn checksum_nibble(data: &[u8]) -> bool {
    let xor = fold_xor(data);
    (xor >> 4) ^ (xor & 0x0F) == 0
}

fn fold_xor(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Decoded position payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub altitude_code: u8,
    pub lat_fragment: u16,
    pub lng_fragment: u16,
    /// Rotating prediction field, when the sender included it
    pub prediction: Option<u8>,
}

impl Packet {
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < PAYLOAD_LEN {
            return Err(PacketError::TooShort { len: data.len() });
        }
        let head = &data[..PAYLOAD_LEN];
        if !checksum_nibble(head) {
            return Err(PacketError::Checksum { xor: fold_xor(head) });
        }

        let lat_fragment = (u16::from(head[1]) << 6)
            | (u16::from(head[3] & 0xF0) >> 2)
            | (u16::from(head[4] & 0xC0) >> 6);
        let lng_fragment = (u16::from(head[2]) << 6)
            | (u16::from(head[3] & 0x0F) << 2)
            | (u16::from(head[4] & 0x30) >> 4);

        Ok(Self {
            altitude_code: head[0],
            lat_fragment,
            lng_fragment,
            prediction: data.get(PAYLOAD_LEN).copied(),
        })
    }

    /// Sender-side layout; the spare low nibble of byte 4 balances the checksum
    pub fn encode(&self) -> Vec<u8> {
        let lat = self.lat_fragment & 0x3FFF;
        let lng = self.lng_fragment & 0x3FFF;
        let mut bytes = vec![
            self.altitude_code,
            (lat >> 6) as u8,
            (lng >> 6) as u8,
            ((((lat >> 2) & 0x0F) << 4) | ((lng >> 2) & 0x0F)) as u8,
            (((lat & 0x03) << 6) | ((lng & 0x03) << 4)) as u8,
        ];
        let xor = fold_xor(&bytes);
        bytes[4] |= (xor >> 4) ^ (xor & 0x0F);
        if let Some(field) = self.prediction {
            bytes.push(field);
        }
        bytes
    }
}

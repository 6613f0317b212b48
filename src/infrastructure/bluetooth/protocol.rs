//! BLE Motion Tracker Protocol
//!
//! Identifiers of the tracker's GATT services and the fixed binary layouts of
//! every characteristic value. All multi-byte fields are little-endian.

use crate::domain::models::{ButtonId, Orientation, Sample, UpdateRate};
use nalgebra::Quaternion;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Advertised local name
pub const LOCAL_NAME: &str = "BLE-MT";

/// Connection Service
pub const CONNECTION_SERVICE_UUID: Uuid = Uuid::from_u128(0x135d1000_6298_da99_f42b_8323f9632aeb);
pub const DISCONNECTION_CHAR_UUID: Uuid = Uuid::from_u128(0x135d1001_6298_da99_f42b_8323f9632aeb);

/// Configuration Service
pub const CONFIGURATION_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x135d2000_6298_da99_f42b_8323f9632aeb);
pub const UPDATE_RATE_CHAR_UUID: Uuid = Uuid::from_u128(0x135d2001_6298_da99_f42b_8323f9632aeb);
pub const RESET_HEADING_CHAR_UUID: Uuid = Uuid::from_u128(0x135d2002_6298_da99_f42b_8323f9632aeb);

/// Measurement Service
pub const MEASUREMENT_SERVICE_UUID: Uuid = Uuid::from_u128(0x135d3000_6298_da99_f42b_8323f9632aeb);
pub const ORIENTATION_CHAR_UUID: Uuid = Uuid::from_u128(0x135d3001_6298_da99_f42b_8323f9632aeb);

/// User-Interface Service
pub const USER_INTERFACE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x135d4000_6298_da99_f42b_8323f9632aeb);
pub const BUTTON_PRESSED_CHAR_UUID: Uuid = Uuid::from_u128(0x135d4001_6298_da99_f42b_8323f9632aeb);

/// Orientation notification size in bytes
///
/// ```text
/// [0-3]   : Timestamp (u32, microseconds since session start)
/// [4-7]   : q_i (f32)
/// [8-11]  : q_j (f32)
/// [12-15] : q_k (f32)
/// [16-19] : q_r (f32, real part last)
/// ```
pub const ORIENTATION_PACKET_SIZE: usize = 20;

/// The fixed set of tracker services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceId {
    Connection,
    Configuration,
    Measurement,
    UserInterface,
}

impl ServiceId {
    pub const ALL: [ServiceId; 4] = [
        ServiceId::Connection,
        ServiceId::Configuration,
        ServiceId::Measurement,
        ServiceId::UserInterface,
    ];

    pub const fn uuid(self) -> Uuid {
        match self {
            Self::Connection => CONNECTION_SERVICE_UUID,
            Self::Configuration => CONFIGURATION_SERVICE_UUID,
            Self::Measurement => MEASUREMENT_SERVICE_UUID,
            Self::UserInterface => USER_INTERFACE_SERVICE_UUID,
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|service| service.uuid() == uuid)
    }
}

/// The fixed set of tracker characteristics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicId {
    Disconnection,
    UpdateRate,
    ResetHeading,
    Orientation,
    ButtonPressed,
}

impl CharacteristicId {
    pub const ALL: [CharacteristicId; 5] = [
        CharacteristicId::Disconnection,
        CharacteristicId::UpdateRate,
        CharacteristicId::ResetHeading,
        CharacteristicId::Orientation,
        CharacteristicId::ButtonPressed,
    ];

    pub const fn uuid(self) -> Uuid {
        match self {
            Self::Disconnection => DISCONNECTION_CHAR_UUID,
            Self::UpdateRate => UPDATE_RATE_CHAR_UUID,
            Self::ResetHeading => RESET_HEADING_CHAR_UUID,
            Self::Orientation => ORIENTATION_CHAR_UUID,
            Self::ButtonPressed => BUTTON_PRESSED_CHAR_UUID,
        }
    }

    /// The service this characteristic belongs to
    pub const fn service(self) -> ServiceId {
        match self {
            Self::Disconnection => ServiceId::Connection,
            Self::UpdateRate | Self::ResetHeading => ServiceId::Configuration,
            Self::Orientation => ServiceId::Measurement,
            Self::ButtonPressed => ServiceId::UserInterface,
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.uuid() == uuid)
    }
}

impl fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnection => "disconnection",
            Self::UpdateRate => "update-rate",
            Self::ResetHeading => "reset-heading",
            Self::Orientation => "orientation",
            Self::ButtonPressed => "button-pressed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("payload is empty")]
    Empty,

    #[error("update rate must be at least 1 Hz")]
    ZeroRate,
}

/// Decoded orientation notification
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationPacket {
    pub timestamp_micros: u32,
    pub i: f32,
    pub j: f32,
    pub k: f32,
    pub r: f32,
}

impl OrientationPacket {
    /// Orientation carried by the packet, widened back to f64.
    pub fn quaternion(&self) -> Quaternion<f64> {
        Quaternion::new(
            f64::from(self.r),
            f64::from(self.i),
            f64::from(self.j),
            f64::from(self.k),
        )
    }
}

/// Encode a timestamp and orientation into the 20-byte measurement layout
pub fn encode_orientation(
    timestamp_micros: u32,
    orientation: &Orientation,
) -> [u8; ORIENTATION_PACKET_SIZE] {
    let q = orientation.quaternion();
    let mut packet = [0u8; ORIENTATION_PACKET_SIZE];
    packet[0..4].copy_from_slice(&timestamp_micros.to_le_bytes());
    packet[4..8].copy_from_slice(&(q.i as f32).to_le_bytes());
    packet[8..12].copy_from_slice(&(q.j as f32).to_le_bytes());
    packet[12..16].copy_from_slice(&(q.k as f32).to_le_bytes());
    packet[16..20].copy_from_slice(&(q.w as f32).to_le_bytes());
    packet
}

pub fn encode_sample(sample: &Sample) -> [u8; ORIENTATION_PACKET_SIZE] {
    encode_orientation(sample.timestamp_micros, &sample.orientation)
}

/// Parse a 20-byte measurement notification
pub fn decode_orientation(bytes: &[u8]) -> Result<OrientationPacket, CodecError> {
    if bytes.len() != ORIENTATION_PACKET_SIZE {
        return Err(CodecError::Length {
            expected: ORIENTATION_PACKET_SIZE,
            actual: bytes.len(),
        });
    }

    let word = |offset: usize| [bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]];

    Ok(OrientationPacket {
        timestamp_micros: u32::from_le_bytes(word(0)),
        i: f32::from_le_bytes(word(4)),
        j: f32::from_le_bytes(word(8)),
        k: f32::from_le_bytes(word(12)),
        r: f32::from_le_bytes(word(16)),
    })
}

pub fn encode_update_rate(rate: UpdateRate) -> [u8; 1] {
    [rate.hz()]
}

/// Parse an update-rate write. Exactly one non-zero byte is accepted.
pub fn decode_update_rate(bytes: &[u8]) -> Result<UpdateRate, CodecError> {
    match bytes {
        [hz] => UpdateRate::new(*hz).ok_or(CodecError::ZeroRate),
        [] => Err(CodecError::Empty),
        _ => Err(CodecError::Length {
            expected: 1,
            actual: bytes.len(),
        }),
    }
}

/// Any written byte triggers a heading reset; the content is ignored.
pub fn decode_reset_heading(bytes: &[u8]) -> Result<(), CodecError> {
    if bytes.is_empty() {
        Err(CodecError::Empty)
    } else {
        Ok(())
    }
}

pub fn encode_button(button: ButtonId) -> [u8; 1] {
    [button]
}

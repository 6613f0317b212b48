use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Device attitude relative to the reference frame.
pub type Orientation = UnitQuaternion<f64>;

/// User (gravity-removed) acceleration in the device frame, in g.
pub type Acceleration = Vector3<f64>;

/// Opaque button or button-group identifier sent in one byte.
pub type ButtonId = u8;

/// Lifecycle of the peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeripheralState {
    Idle,
    Initializing,
    Advertising,
    Connected,
    Measuring,
}

impl PeripheralState {
    pub const ALL: [PeripheralState; 5] = [
        PeripheralState::Idle,
        PeripheralState::Initializing,
        PeripheralState::Advertising,
        PeripheralState::Connected,
        PeripheralState::Measuring,
    ];
}

impl fmt::Display for PeripheralState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Initializing => "Initializing",
            Self::Advertising => "Advertising",
            Self::Connected => "Connected",
            Self::Measuring => "Measuring",
        };
        f.write_str(name)
    }
}

/// Sampling frequency in Hz, never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct UpdateRate(u8);

impl UpdateRate {
    pub const DEFAULT: UpdateRate = UpdateRate(60);

    pub fn new(hz: u8) -> Option<Self> {
        (hz != 0).then_some(Self(hz))
    }

    pub fn hz(self) -> u8 {
        self.0
    }

    /// Time between two samples at this rate
    pub fn period(self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.0))
    }
}

impl Default for UpdateRate {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u8> for UpdateRate {
    type Error = String;

    fn try_from(hz: u8) -> Result<Self, Self::Error> {
        Self::new(hz).ok_or_else(|| "update rate must be at least 1 Hz".to_string())
    }
}

impl From<UpdateRate> for u8 {
    fn from(rate: UpdateRate) -> Self {
        rate.0
    }
}

impl fmt::Display for UpdateRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz", self.0)
    }
}

/// Raw reading taken from a motion source, before heading correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionReading {
    pub attitude: Orientation,
    pub user_acceleration: Acceleration,
}

impl MotionReading {
    pub fn new(attitude: Orientation, user_acceleration: Acceleration) -> Self {
        Self {
            attitude,
            user_acceleration,
        }
    }

    /// Rotation about the vertical (z) axis, in radians.
    pub fn yaw(&self) -> f64 {
        self.attitude.euler_angles().2
    }
}

/// One streamed measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Microseconds since the first sample of the session, wrapping at 2^32.
    pub timestamp_micros: u32,
    pub orientation: Orientation,
    pub acceleration: Acceleration,
}

/// Notifications flowing from the tracker to the host (UI, recorder).
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Status(StatusMessage),
    StateChanged(PeripheralState),
    SampleCount(usize),
    ButtonNotified(ButtonId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

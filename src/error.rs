//! Tracker error kinds
//!
//! Every failure the tracker can report is local and recoverable: the event
//! loop logs it and carries on advertising or streaming.

use crate::domain::models::PeripheralState;
use crate::infrastructure::bluetooth::protocol::{CharacteristicId, CodecError};
use crate::infrastructure::bluetooth::radio::RadioError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// The radio-stack or motion-source handle has been released.
    #[error("tracker is not initialized")]
    NotInitialized,

    #[error("unhandled event {event} in state {state}")]
    UnhandledEvent {
        state: PeripheralState,
        event: String,
    },

    #[error("failed to add service {service}: {reason}")]
    ServiceRegistrationFailed { service: Uuid, reason: String },

    #[error("motion source has no current attitude reading")]
    SensorUnavailable,

    #[error("invalid write to {characteristic}: {source}")]
    InvalidControlWrite {
        characteristic: CharacteristicId,
        #[source]
        source: CodecError,
    },

    #[error("radio stack error: {0}")]
    Radio(#[from] RadioError),

    #[error("motion source error: {0}")]
    Motion(String),
}

pub type Result<T> = std::result::Result<T, TrackerError>;

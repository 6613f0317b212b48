//! Radio Stack Capability
//!
//! The peripheral state machine drives the BLE radio through [`RadioStack`]
//! and receives its callbacks as [`RadioEvent`]s funnelled into the tracker's
//! event channel. Backends never call into the state machine directly.

use crate::infrastructure::bluetooth::gatt::ServiceDescriptor;
use crate::infrastructure::bluetooth::protocol::CharacteristicId;
use thiserror::Error;
use uuid::Uuid;

/// Identifies an outstanding read or write request until it is answered
pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    PoweredOn,
    #[default]
    PoweredOff,
}

/// Advertisement payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub local_name: String,
    pub service_uuids: Vec<Uuid>,
}

/// ATT protocol errors used when a request is refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttError {
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidAttributeValueLength,
}

impl AttError {
    pub fn code(self) -> u8 {
        match self {
            Self::ReadNotPermitted => 0x02,
            Self::WriteNotPermitted => 0x03,
            Self::InvalidAttributeValueLength => 0x0D,
        }
    }
}

/// Answer to a read or write request. Writes succeed with an empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttResponse {
    Success(Vec<u8>),
    Failure(AttError),
}

/// Callbacks delivered by the radio stack, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// The radio changed power state (also sent once at start-up)
    RadioReady,
    ServiceAdded {
        service: Uuid,
        error: Option<String>,
    },
    CentralConnected,
    CentralDisconnected,
    SubscribedTo(CharacteristicId),
    UnsubscribedFrom(CharacteristicId),
    ReadRequested {
        request: RequestId,
        characteristic: CharacteristicId,
    },
    WriteRequested {
        request: RequestId,
        characteristic: CharacteristicId,
        value: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("radio is powered off")]
    PoweredOff,

    #[error("no pending request with id {0}")]
    UnknownRequest(RequestId),

    #[error("characteristic {0} is not registered")]
    NotRegistered(CharacteristicId),

    #[error("peripheral role is not supported on this adapter")]
    Unsupported,

    #[error("{0}")]
    Backend(String),
}

/// The BLE radio in peripheral role.
///
/// Registration and request handling are asynchronous: `register_service`
/// only queues the work and the stack answers with
/// [`RadioEvent::ServiceAdded`]. `notify` must not block.
pub trait RadioStack: Send {
    fn power_state(&self) -> PowerState;

    fn register_service(&mut self, service: &ServiceDescriptor) -> Result<(), RadioError>;

    fn start_advertising(&mut self, advertisement: &Advertisement) -> Result<(), RadioError>;

    fn stop_advertising(&mut self) -> Result<(), RadioError>;

    /// Push a value to every central subscribed to `characteristic`
    fn notify(&mut self, characteristic: CharacteristicId, value: &[u8]) -> Result<(), RadioError>;

    fn respond(&mut self, request: RequestId, response: AttResponse) -> Result<(), RadioError>;
}

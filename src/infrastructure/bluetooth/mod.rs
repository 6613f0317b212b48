//! Bluetooth Module
//!
//! BLE peripheral side of the motion tracker.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      TrackerService                       │
//! │     (event loop - owns the peripheral state machine)      │
//! └──────────────┬──────────────────────────▲────────────────┘
//!                │ RadioStack               │ TrackerEvent
//!                ▼                          │
//!        ┌───────────────┐          ┌───────┴────────┐
//!        │ WinRT/Loopback│──events─▶│  EventSender   │◀── motion ticks
//!        └───────────────┘          └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - UUIDs and the characteristic value codec
//! - [`gatt`] - the tracker's GATT surface
//! - [`radio`] - the radio stack capability and its events
//! - [`peripheral`] - the peripheral state machine
//! - [`service`] - event loop and host handle
//! - [`loopback`] - in-memory radio with a simulated central
//! - `winrt` - platform GATT server (Windows only)

pub mod gatt;
pub mod loopback;
pub mod peripheral;
pub mod protocol;
pub mod radio;
pub mod service;
#[cfg(windows)]
pub mod winrt;

pub use peripheral::{PeripheralConfig, PeripheralStateMachine};
pub use service::{TrackerHandle, TrackerService};

use crate::domain::settings::{RadioBackend, Settings};
use loopback::{LoopbackCentral, LoopbackRadio};
use radio::RadioStack;
use service::EventSender;

/// Open the radio selected in `settings`. The loopback backend also returns
/// its simulated central.
pub async fn open(
    settings: &Settings,
    events: EventSender,
) -> anyhow::Result<(Box<dyn RadioStack>, Option<LoopbackCentral>)> {
    match settings.radio_backend {
        RadioBackend::Native => native(events).await,
        RadioBackend::Loopback => Ok(loopback(events)),
    }
}

fn loopback(events: EventSender) -> (Box<dyn RadioStack>, Option<LoopbackCentral>) {
    let (radio, central) = LoopbackRadio::new(events);
    (Box::new(radio), Some(central))
}

#[cfg(windows)]
async fn native(
    events: EventSender,
) -> anyhow::Result<(Box<dyn RadioStack>, Option<LoopbackCentral>)> {
    let radio = winrt::WinRtRadio::new(events).await?;
    Ok((Box::new(radio), None))
}

#[cfg(not(windows))]
async fn native(
    events: EventSender,
) -> anyhow::Result<(Box<dyn RadioStack>, Option<LoopbackCentral>)> {
    tracing::warn!("No native peripheral backend on this platform, using loopback radio");
    Ok(loopback(events))
}

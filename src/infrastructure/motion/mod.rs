//! Motion Source Backends
//!
//! - [`polling`] - timer-driven source over any [`polling::AttitudeProvider`]
//! - [`synthetic`] - generated attitude for machines without a sensor
//! - `winrt` - platform orientation sensor (Windows only)

pub mod polling;
pub mod synthetic;
#[cfg(windows)]
pub mod winrt;

use crate::domain::motion::MotionSource;
use crate::domain::settings::{MotionBackend, Settings};
use tracing::warn;

/// Build the motion source selected in `settings`
pub fn open(settings: &Settings) -> Box<dyn MotionSource> {
    match settings.motion_backend {
        MotionBackend::Native => match native() {
            Some(source) => source,
            None => {
                warn!("No orientation sensor available, using synthetic motion");
                synthetic(settings)
            }
        },
        MotionBackend::Synthetic => synthetic(settings),
    }
}

fn synthetic(settings: &Settings) -> Box<dyn MotionSource> {
    Box::new(polling::PollingMotionSource::new(
        synthetic::SyntheticAttitude::new(&settings.synthetic),
    ))
}

#[cfg(windows)]
fn native() -> Option<Box<dyn MotionSource>> {
    match winrt::WinRtMotionSource::new() {
        Ok(source) => Some(Box::new(source)),
        Err(e) => {
            warn!("Orientation sensor: {}", e);
            None
        }
    }
}

#[cfg(not(windows))]
fn native() -> Option<Box<dyn MotionSource>> {
    None
}

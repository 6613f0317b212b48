//! Infrastructure Layer
//!
//! Platform-facing pieces: the BLE peripheral, motion backends and logging.

pub mod bluetooth;
pub mod logging;
pub mod motion;

//! BLE motion tracker
//!
//! Streams the host's attitude to a BLE central as a GATT peripheral.

pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod presentation;

#[cfg(test)]
mod testing;

pub use error::{Result, TrackerError};

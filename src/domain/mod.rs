//! Domain Layer
//!
//! Platform-independent tracker types and behavior.

pub mod models;
pub mod motion;
pub mod observer;
pub mod recorder;
pub mod settings;

//! Presentation Layer

pub mod console;

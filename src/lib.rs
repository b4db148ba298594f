//! Traffic-light firmware library.
//!
//! Exposes the engine, transports and drivers for integration testing.
//! All ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod events;
pub mod light;
pub mod transport;

pub mod error;
pub mod pins;

pub mod adapters;
pub mod drivers;

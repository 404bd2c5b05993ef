//! otalink: firmware-update sessions over a websocket for ESP32 devices.
//!
//! Exposes the session logic for integration testing. All ESP-IDF-specific
//! code is guarded by `#[cfg(target_os = "espidf")]` within each module and
//! falls back to in-memory simulation backends elsewhere.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod drivers;
pub mod error;
pub mod ota;

//! Application boundary: the events the OTA core emits and the port traits
//! it consumes.
//!
//! All interaction with flash, boot state, the network and persistent
//! storage happens through the traits in [`ports`], keeping the session
//! logic testable without real peripherals.

pub mod events;
pub mod ports;

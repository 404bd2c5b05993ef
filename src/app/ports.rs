//! Port traits: the hexagonal boundary between the OTA core and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ OtaService (domain)
//! ```
//!
//! Driven adapters (flash, firmware info, websocket sink, config) implement
//! these traits. [`OtaService`](crate::ota::service::OtaService) consumes
//! them via generics, so the session logic never touches hardware directly.
//!
//! Ports used from both the request-handling context and the Session Task
//! take `&self` and must be `Send + Sync`; the Flash Writer is moved into
//! the Session Task for the duration of a session and only needs `Send`.

use std::sync::Arc;

use crate::config::OtaConfig;
use crate::error::{ConfigError, FlashError, TransportError};
use crate::ota::image::FirmwareVersion;
use crate::ota::registry::ClientIdentity;

use super::events::OtaEvent;

// ───────────────────────────────────────────────────────────────
// Flash writer (driven adapter: domain → update partition)
// ───────────────────────────────────────────────────────────────

/// Sequential writer for the inactive OTA partition.
///
/// All calls block on flash I/O and are issued only by the Session Task.
pub trait FlashWriter: Send {
    /// Open the update partition for an image of `total_size` bytes.
    fn begin(&mut self, total_size: u32) -> Result<(), FlashError>;

    /// Append the next chunk. No random access.
    fn write(&mut self, chunk: &[u8]) -> Result<(), FlashError>;

    /// Close and validate the written image.
    fn end(&mut self) -> Result<(), FlashError>;

    /// Select the written image for the next boot.
    fn set_boot_partition(&mut self) -> Result<(), FlashError>;

    /// Discard an open update. No-op when nothing is open.
    fn abort(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Firmware port (driven adapter: domain ↔ running image metadata)
// ───────────────────────────────────────────────────────────────

/// Running-image metadata and boot-state operations.
pub trait FirmwarePort: Send + Sync {
    /// Version of the image currently executing.
    fn running_version(&self) -> Option<FirmwareVersion>;

    /// Version of the image most recently marked invalid, if any.
    fn last_invalid_version(&self) -> Option<FirmwareVersion>;

    /// True when the running image booted for the first time after an
    /// update and still awaits confirmation.
    fn pending_verify(&self) -> bool;

    /// Confirm the running image and cancel rollback.
    fn mark_valid(&self) -> Result<(), FlashError>;

    /// Mark the running image invalid and reboot into the previous one.
    /// Returns only on failure, or in simulation.
    fn mark_invalid_and_rollback(&self) -> Result<(), FlashError>;

    /// Point the boot partition back at the running image, discarding a
    /// completed but not yet booted update.
    fn revert_boot_partition(&self) -> Result<(), FlashError>;

    fn restart(&self);
}

impl<T: FirmwarePort + ?Sized> FirmwarePort for Arc<T> {
    fn running_version(&self) -> Option<FirmwareVersion> {
        (**self).running_version()
    }

    fn last_invalid_version(&self) -> Option<FirmwareVersion> {
        (**self).last_invalid_version()
    }

    fn pending_verify(&self) -> bool {
        (**self).pending_verify()
    }

    fn mark_valid(&self) -> Result<(), FlashError> {
        (**self).mark_valid()
    }

    fn mark_invalid_and_rollback(&self) -> Result<(), FlashError> {
        (**self).mark_invalid_and_rollback()
    }

    fn revert_boot_partition(&self) -> Result<(), FlashError> {
        (**self).revert_boot_partition()
    }

    fn restart(&self) {
        (**self).restart()
    }
}

// ───────────────────────────────────────────────────────────────
// Frame sink (driven adapter: domain → websocket peers)
// ───────────────────────────────────────────────────────────────

/// Outbound side of the duplex connection layer.
pub trait FrameSink: Send + Sync {
    /// Send one binary frame to a single peer.
    fn send(&self, to: &ClientIdentity, frame: &[u8]) -> Result<(), TransportError>;

    /// Push a frame to every connected peer except `except`.
    fn broadcast(&self, frame: &[u8], except: Option<&ClientIdentity>);
}

/// Lets the connection layer keep a handle on the sink it registers peers in.
impl<T: FrameSink + ?Sized> FrameSink for Arc<T> {
    fn send(&self, to: &ClientIdentity, frame: &[u8]) -> Result<(), TransportError> {
        (**self).send(to, frame)
    }

    fn broadcast(&self, frame: &[u8], except: Option<&ClientIdentity>) {
        (**self).broadcast(frame, except)
    }
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`OtaEvent`]s through this port. Adapters
/// decide where they go (serial log, test recorder, etc.).
pub trait EventSink {
    fn emit(&mut self, event: &OtaEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists [`OtaConfig`].
///
/// Implementations validate before persisting; invalid values are rejected
/// with [`ConfigError::ValidationFailed`], never clamped.
pub trait ConfigPort {
    /// Returns [`OtaConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<OtaConfig, ConfigError>;

    fn save(&self, config: &OtaConfig) -> Result<(), ConfigError>;
}

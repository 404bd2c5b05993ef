//! Error types for the OTA session core and its adapters.
//!
//! Same shape as the rest of the firmware: small `Copy` enums with a
//! hand-written `Display`, so errors can cross the Session Task boundary
//! and be logged without allocation. Protocol-level failures that are
//! reported to the client live in [`crate::ota::packet`] as `ErrorCode` /
//! `AbortReason`; the types here describe what went wrong underneath.

use core::fmt;

/// Generic ESP-IDF failure code (`ESP_FAIL`).
pub const ESP_FAIL: i32 = -1;

// ---------------------------------------------------------------------------
// Flash / partition errors
// ---------------------------------------------------------------------------

/// Failure reported by a [`FlashWriter`](crate::app::ports::FlashWriter) or
/// [`FirmwarePort`](crate::app::ports::FirmwarePort) call.
///
/// Each variant carries the native error code so it can be forwarded to
/// the client unchanged (e.g. in an `action_packet` result).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// No inactive OTA partition to write into.
    NoPartition,
    /// Opening the update partition failed.
    Begin(i32),
    /// Writing a chunk failed.
    Write(i32),
    /// Closing / validating the written image failed.
    End(i32),
    /// Selecting the new boot partition failed.
    SetBoot(i32),
    /// An operation was issued without an open update handle.
    NotOpen,
    /// Image-state query or mark operation failed.
    ImageState(i32),
}

impl FlashError {
    /// Native error code carried by this failure.
    pub const fn code(self) -> i32 {
        match self {
            Self::NoPartition | Self::NotOpen => ESP_FAIL,
            Self::Begin(c) | Self::Write(c) | Self::End(c) | Self::SetBoot(c) | Self::ImageState(c) => c,
        }
    }
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPartition => write!(f, "no inactive OTA partition available"),
            Self::Begin(c) => write!(f, "OTA begin failed ({c})"),
            Self::Write(c) => write!(f, "OTA write failed ({c})"),
            Self::End(c) => write!(f, "OTA end failed ({c})"),
            Self::SetBoot(c) => write!(f, "set boot partition failed ({c})"),
            Self::NotOpen => write!(f, "no OTA update in progress"),
            Self::ImageState(c) => write!(f, "image state operation failed ({c})"),
        }
    }
}

impl std::error::Error for FlashError {}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Failure to deliver a frame through a [`FrameSink`](crate::app::ports::FrameSink).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The peer is no longer connected.
    NotConnected,
    /// The underlying socket send failed.
    SendFailed(i32),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "peer not connected"),
            Self::SendFailed(c) => write!(f, "send failed ({c})"),
        }
    }
}

impl std::error::Error for TransportError {}

// ---------------------------------------------------------------------------
// Configuration / storage errors
// ---------------------------------------------------------------------------

/// Errors from [`ConfigPort`](crate::app::ports::ConfigPort) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    /// Underlying storage failed.
    Storage(StorageError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<StorageError> for ConfigError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

/// NVS backend errors behind [`ConfigPort`](crate::app::ports::ConfigPort).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Caller buffer or partition too small.
    Full,
    /// Generic I/O error from the backend.
    IoError,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl std::error::Error for StorageError {}

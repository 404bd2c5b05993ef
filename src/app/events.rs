//! Outbound OTA events.
//!
//! [`OtaService`](crate::ota::service::OtaService) and its Session Task emit
//! these through the [`EventSink`](super::ports::EventSink) port. They are
//! diagnostics only; the client-facing protocol never depends on them.

use crate::ota::packet::{AbortReason, Action, ErrorCode};
use crate::ota::registry::ClientIdentity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaEvent {
    /// A `start_request` was accepted and the Session Task spawned.
    SessionStarted {
        owner: ClientIdentity,
        total_size: u32,
    },

    /// A chunk reached flash.
    Progress { received: u32, total: u32 },

    /// Image written and selected for the next boot.
    Completed { total_size: u32 },

    /// The session ended without completing.
    Aborted {
        reason: AbortReason,
        bytes_received: u32,
    },

    /// A request was answered with an `error_packet`.
    Rejected {
        client: ClientIdentity,
        code: ErrorCode,
    },

    /// An `action_request` ran.
    ActionPerformed { action: Action, result: i32 },
}

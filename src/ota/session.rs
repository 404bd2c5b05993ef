//! The single mutable record of an in-progress transfer.

use std::thread::JoinHandle;
use std::time::Duration;

pub use super::packet::SessionFlags;
use super::packet::{AbortReason, StartRequest};
use super::registry::ClientIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Receiving,
    Finalizing,
    /// Abort decided; the Session Task has not finished cleanup yet.
    Aborted(AbortReason),
}

#[derive(Debug)]
pub struct Session {
    pub state: SessionState,
    pub bytes_received: u32,
    pub total_size: u32,
    pub timeout: Duration,
    pub flags: SessionFlags,
    pub(crate) task: Option<JoinHandle<()>>,
}

impl Session {
    pub const fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            bytes_received: 0,
            total_size: 0,
            timeout: Duration::ZERO,
            flags: SessionFlags {
                reset_after_success: false,
                check_against_last_invalid: false,
                check_against_running_version: false,
            },
            task: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == SessionState::Idle
    }

    pub fn is_receiving(&self) -> bool {
        self.state == SessionState::Receiving
    }

    /// Initialise from an accepted `start_request`.
    pub fn open(&mut self, req: &StartRequest, timeout: Duration) {
        self.state = SessionState::Receiving;
        self.bytes_received = 0;
        self.total_size = req.total_size;
        self.timeout = timeout;
        self.flags = req.flags;
        self.task = None;
    }

    pub fn remaining(&self) -> u32 {
        self.total_size - self.bytes_received
    }

    /// True when `len` more bytes would stay within `total_size`.
    pub fn fits(&self, len: usize) -> bool {
        u32::try_from(len).is_ok_and(|len| len <= self.remaining())
    }

    /// Account for a chunk that reached flash. Returns the new total.
    pub fn advance(&mut self, len: u32) -> u32 {
        debug_assert!(len <= self.remaining());
        self.bytes_received += len;
        self.bytes_received
    }

    /// Size of the next chunk the client should send.
    pub fn next_request(&self, max_chunk: u32) -> u32 {
        self.remaining().min(max_chunk)
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_received == self.total_size
    }

    /// Move `Receiving` to `Aborted`. Finalization is never interrupted and
    /// the first recorded reason wins. Returns whether the state changed.
    pub fn mark_aborted(&mut self, reason: AbortReason) -> bool {
        if self.state != SessionState::Receiving {
            return false;
        }
        self.state = SessionState::Aborted(reason);
        true
    }

    pub fn pending_abort(&self) -> Option<AbortReason> {
        match self.state {
            SessionState::Aborted(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::idle();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::idle()
    }
}

/// Point-in-time copy of the session, safe to hand out of the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub owner: Option<ClientIdentity>,
    pub bytes_received: u32,
    pub total_size: u32,
}

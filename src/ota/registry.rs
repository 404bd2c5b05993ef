//! Client Registry: who owns the active OTA session.
//!
//! At most one identity is bound at a time. Every mutation happens under
//! the service's session lock, so the registry itself holds no lock.

use core::fmt;

use super::packet::ErrorCode;

/// Opaque identity of one websocket peer: server handle plus socket fd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    pub handle: usize,
    pub socket: i32,
}

impl ClientIdentity {
    pub const fn new(handle: usize, socket: i32) -> Self {
        Self { handle, socket }
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}/fd{}", self.handle, self.socket)
    }
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
    owner: Option<ClientIdentity>,
}

impl ClientRegistry {
    pub const fn new() -> Self {
        Self { owner: None }
    }

    /// Claim ownership. Fails with `AlreadyRunning` while anyone is bound,
    /// including the requesting identity itself.
    pub fn bind(&mut self, identity: ClientIdentity) -> Result<(), ErrorCode> {
        if self.owner.is_some() {
            return Err(ErrorCode::AlreadyRunning);
        }
        self.owner = Some(identity);
        Ok(())
    }

    pub fn verify(&self, identity: &ClientIdentity) -> bool {
        self.owner.as_ref() == Some(identity)
    }

    /// Clear ownership. No-op when nobody is bound.
    pub fn release(&mut self) -> Option<ClientIdentity> {
        self.owner.take()
    }

    pub fn owner(&self) -> Option<ClientIdentity> {
        self.owner
    }

    pub fn is_bound(&self) -> bool {
        self.owner.is_some()
    }
}

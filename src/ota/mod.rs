//! OTA firmware-update session protocol over a duplex websocket.
//!
//! Leaf-first: [`packet`] codec, [`registry`] of the owning client,
//! [`session`] record, [`image`] header probe, the request-handling
//! [`service`], the background [`task`] and the [`transport`] trait the
//! connection layer drives.

pub mod image;
pub mod packet;
pub mod registry;
pub mod service;
pub mod session;
mod task;
pub mod transport;

pub use packet::{AbortReason, Action, ErrorCode, Request, Response};
pub use registry::ClientIdentity;
pub use service::OtaService;
pub use session::{SessionState, SessionStatus};
pub use transport::WsHandler;

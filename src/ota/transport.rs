//! Connection-layer capability trait.
//!
//! The websocket binding drives a handler through three callbacks. Only
//! `on_data` is required; the lifecycle hooks default to no-ops.

use crate::app::ports::{EventSink, FirmwarePort, FlashWriter, FrameSink};

use super::registry::ClientIdentity;
use super::service::OtaService;

pub trait WsHandler: Send + Sync {
    /// A peer completed the websocket handshake.
    fn on_open(&self, _client: &ClientIdentity) {}

    /// One whole binary frame arrived from `client`.
    fn on_data(&self, client: &ClientIdentity, frame: &[u8]);

    /// `client` disconnected.
    fn on_close(&self, _client: &ClientIdentity) {}
}

impl<F, P, S, E> WsHandler for OtaService<F, P, S, E>
where
    F: FlashWriter + 'static,
    P: FirmwarePort + 'static,
    S: FrameSink + 'static,
    E: EventSink + Send + 'static,
{
    fn on_data(&self, client: &ClientIdentity, frame: &[u8]) {
        OtaService::on_data(self, client, frame);
    }

    fn on_close(&self, client: &ClientIdentity) {
        OtaService::on_close(self, client);
    }
}

//! Websocket binding on the ESP-IDF HTTP server.
//!
//! [`register`] installs a websocket URI handler on an [`EspHttpServer`] and
//! drives a [`WsHandler`] from it: handshake → `on_open`, binary frame →
//! `on_data`, socket close → `on_close`. [`WsFrameSink`] keeps one detached
//! sender per open socket and implements [`FrameSink`] on top of them, so
//! the Session Task can push frames from outside the httpd task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use esp_idf_svc::http::server::EspHttpServer;
use esp_idf_svc::http::server::ws::EspHttpWsDetachedSender;
use esp_idf_svc::sys::EspError;
use esp_idf_svc::ws::FrameType;
use log::{debug, info, warn};

use crate::app::ports::FrameSink;
use crate::error::TransportError;
use crate::ota::packet::{ErrorCode, Response};
use crate::ota::registry::ClientIdentity;
use crate::ota::transport::WsHandler;

/// Detached senders keyed by peer identity.
#[derive(Default)]
pub struct WsFrameSink {
    peers: Mutex<HashMap<ClientIdentity, EspHttpWsDetachedSender>>,
}

impl WsFrameSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<ClientIdentity, EspHttpWsDetachedSender>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn attach(&self, client: ClientIdentity, sender: EspHttpWsDetachedSender) {
        self.peers().insert(client, sender);
        info!("WS: {} connected", client);
    }

    fn detach(&self, client: &ClientIdentity) {
        if self.peers().remove(client).is_some() {
            info!("WS: {} disconnected", client);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.peers().len()
    }
}

impl FrameSink for WsFrameSink {
    fn send(&self, to: &ClientIdentity, frame: &[u8]) -> Result<(), TransportError> {
        let mut peers = self.peers();
        let sender = peers.get_mut(to).ok_or(TransportError::NotConnected)?;
        sender
            .send(FrameType::Binary(false), frame)
            .map_err(|e| TransportError::SendFailed(e.code()))
    }

    fn broadcast(&self, frame: &[u8], except: Option<&ClientIdentity>) {
        let mut dead = Vec::new();
        let mut peers = self.peers();
        for (client, sender) in peers.iter_mut() {
            if Some(client) == except {
                continue;
            }
            if let Err(e) = sender.send(FrameType::Binary(false), frame) {
                warn!("WS: broadcast to {} failed: {}", client, e);
                dead.push(*client);
            }
        }
        for client in dead {
            peers.remove(&client);
        }
    }
}

/// Install `handler` on `uri`. `server_id` distinguishes identities when
/// several servers share one handler.
pub fn register<H>(
    server: &mut EspHttpServer<'static>,
    uri: &str,
    server_id: usize,
    sink: Arc<WsFrameSink>,
    handler: H,
    max_frame_len: usize,
) -> Result<(), EspError>
where
    H: WsHandler + 'static,
{
    server.ws_handler(uri, move |ws| {
        let client = ClientIdentity::new(server_id, ws.session());

        if ws.is_new() {
            sink.attach(client, ws.create_detached_sender()?);
            handler.on_open(&client);
            return Ok(());
        }
        if ws.is_closed() {
            sink.detach(&client);
            handler.on_close(&client);
            return Ok(());
        }

        let (frame_type, len) = ws.recv(&mut [])?;
        if len > max_frame_len {
            warn!("WS: {}-byte frame from {} exceeds {}", len, client, max_frame_len);
            let reply = Response::Error(ErrorCode::PacketSizeError).encode();
            ws.send(FrameType::Binary(false), reply.as_bytes())?;
            return Ok(());
        }

        let mut frame = vec![0u8; len];
        ws.recv(&mut frame)?;

        match frame_type {
            FrameType::Binary(false) => handler.on_data(&client, &frame),
            FrameType::Binary(true) | FrameType::Continue(_) => {
                // frames must arrive whole
                let reply = Response::Error(ErrorCode::PacketSizeError).encode();
                ws.send(FrameType::Binary(false), reply.as_bytes())?;
            }
            other => debug!("WS: ignoring {:?} from {}", other, client),
        }
        Ok::<(), EspError>(())
    })?;

    info!("WS: handler registered on {}", uri);
    Ok(())
}

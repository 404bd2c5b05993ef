//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing OTA events to the ESP-IDF logger
//! (UART / USB-CDC in production, stderr under `cargo test`).

use log::{debug, info, warn};

use crate::app::events::OtaEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`OtaEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &OtaEvent) {
        match event {
            OtaEvent::SessionStarted { owner, total_size } => {
                info!("OTA | start | owner={} size={}", owner, total_size);
            }
            OtaEvent::Progress { received, total } => {
                debug!(
                    "OTA | progress | {}/{} ({}%)",
                    received,
                    total,
                    u64::from(*received) * 100 / u64::from((*total).max(1))
                );
            }
            OtaEvent::Completed { total_size } => {
                info!("OTA | done | size={}", total_size);
            }
            OtaEvent::Aborted {
                reason,
                bytes_received,
            } => {
                warn!("OTA | abort | reason={} at={}", reason, bytes_received);
            }
            OtaEvent::Rejected { client, code } => {
                info!("OTA | reject | client={} code={}", client, code);
            }
            OtaEvent::ActionPerformed { action, result } => {
                info!("OTA | action | {:?} result={}", action, result);
            }
        }
    }
}

//! OTA service configuration.
//!
//! All tunables for the update endpoint and its Session Task. Values can be
//! overridden via NVS (see [`NvsAdapter`](crate::adapters::nvs::NvsAdapter)).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::ota::image::IMAGE_HEADER_LEN;

const MAX_CHUNK_CEILING: u32 = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtaConfig {
    // --- Endpoint ---
    /// Websocket URI the update handler is registered on
    pub uri: heapless::String<32>,

    // --- Flow control ---
    /// Largest image chunk accepted in one `state_request` frame (bytes)
    pub max_chunk_size: u32,
    /// Idle timeout used when a `start_request` carries 0 (milliseconds)
    pub default_timeout_ms: u16,
    /// Chunks buffered between the request handler and the Session Task
    pub queue_depth: u8,

    // --- Session Task ---
    /// Session Task stack size (KiB)
    pub task_stack_kb: u16,
    /// Session Task FreeRTOS priority
    pub task_priority: u8,
    /// Delay between a successful update and the automatic restart (milliseconds)
    pub reset_delay_ms: u32,

    // --- Network ---
    /// Station connect attempts before giving up
    pub wifi_max_retries: u8,
}

impl OtaConfig {
    /// Idle timeout for a session; `requested_ms == 0` selects the default.
    pub fn timeout_for(&self, requested_ms: u16) -> Duration {
        let ms = if requested_ms == 0 {
            self.default_timeout_ms
        } else {
            requested_ms
        };
        Duration::from_millis(u64::from(ms))
    }

    pub fn reset_delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.reset_delay_ms))
    }

    /// Largest websocket frame the handler has to accept.
    pub fn max_frame_len(&self) -> usize {
        crate::ota::packet::STATE_REQUEST_HEADER_LEN + self.max_chunk_size as usize
    }

    /// Range-check every field. Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.uri.starts_with('/') {
            return Err(ConfigError::ValidationFailed("uri must start with '/'"));
        }
        if !(IMAGE_HEADER_LEN as u32..=MAX_CHUNK_CEILING).contains(&self.max_chunk_size) {
            return Err(ConfigError::ValidationFailed(
                "max_chunk_size must be 288–16384",
            ));
        }
        if self.default_timeout_ms < 100 {
            return Err(ConfigError::ValidationFailed(
                "default_timeout_ms must be at least 100",
            ));
        }
        if !(1..=32).contains(&self.queue_depth) {
            return Err(ConfigError::ValidationFailed("queue_depth must be 1–32"));
        }
        if !(4..=64).contains(&self.task_stack_kb) {
            return Err(ConfigError::ValidationFailed("task_stack_kb must be 4–64"));
        }
        if !(1..=24).contains(&self.task_priority) {
            return Err(ConfigError::ValidationFailed("task_priority must be 1–24"));
        }
        if self.reset_delay_ms > 10_000 {
            return Err(ConfigError::ValidationFailed(
                "reset_delay_ms must be at most 10000",
            ));
        }
        if self.wifi_max_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "wifi_max_retries must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for OtaConfig {
    fn default() -> Self {
        let mut uri = heapless::String::new();
        // "/ota" always fits in 32 bytes
        let _ = uri.push_str("/ota");

        Self {
            uri,

            max_chunk_size: 4096,
            default_timeout_ms: 5000,
            queue_depth: 4,

            task_stack_kb: 8,
            task_priority: 5,
            reset_delay_ms: 1000,

            wifi_max_retries: 5,
        }
    }
}

//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements          | Connects to                         |
//! |-------------|---------------------|-------------------------------------|
//! | `flash`     | FlashWriter         | `esp-ota` partition API / in-memory |
//! | `firmware`  | FirmwarePort        | app descriptors, OTA image state    |
//! | `log_sink`  | EventSink           | Serial log output                   |
//! | `nvs`       | ConfigPort          | NVS / in-memory store               |
//! | `wifi`      | (station bring-up)  | ESP-IDF WiFi STA                    |
//! | `ws_server` | FrameSink           | `EspHttpServer` websocket URI       |

pub mod firmware;
pub mod flash;
pub mod log_sink;
pub mod nvs;
pub mod wifi;
#[cfg(target_os = "espidf")]
pub mod ws_server;

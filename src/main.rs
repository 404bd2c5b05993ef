//! otalink firmware entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Adapters (outer ring)                     │
//! │                                                              │
//! │  OtaFlash        EspFirmware     WsFrameSink   NvsAdapter    │
//! │  (FlashWriter)   (FirmwarePort)  (FrameSink)   (ConfigPort)  │
//! │  WifiAdapter     LogEventSink                                │
//! │                                                              │
//! │  ──────────────── Port Trait Boundary ─────────────────      │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────┐      │
//! │  │  OtaService (request side) · Session Task (flash)  │      │
//! │  └────────────────────────────────────────────────────┘      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::http::server::{Configuration as HttpServerConfig, EspHttpServer};
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::{info, warn};

use otalink::adapters::firmware::EspFirmware;
use otalink::adapters::flash::OtaFlash;
use otalink::adapters::log_sink::LogEventSink;
use otalink::adapters::nvs::NvsAdapter;
use otalink::adapters::wifi::{WifiAdapter, WifiCredentials};
use otalink::adapters::ws_server::{self, WsFrameSink};
use otalink::app::ports::{ConfigPort, FirmwarePort};
use otalink::config::OtaConfig;
use otalink::ota::{OtaService, SessionState};

const STATUS_INTERVAL: Duration = Duration::from_secs(10);

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  otalink v{}                      ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let nvs = NvsAdapter::new(nvs_partition.clone());
    let config = match nvs.load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            OtaConfig::default()
        }
    };

    // ── 3. Running image ──────────────────────────────────────
    let firmware = EspFirmware::new();
    info!(
        "Firmware: running {} (pending verify: {})",
        firmware.running_version().as_deref().unwrap_or("?"),
        firmware.pending_verify()
    );
    if let Some(invalid) = firmware.last_invalid_version() {
        info!("Firmware: last invalid image {}", invalid);
    }

    // ── 4. Network ────────────────────────────────────────────
    let creds = WifiCredentials::from_build_env()?;
    let wifi = WifiAdapter::connect(
        peripherals.modem,
        sys_loop,
        Some(nvs_partition),
        &creds,
        config.wifi_max_retries,
    )?;
    if let Some(ip) = wifi.ip() {
        info!("WiFi: station address {}", ip);
    }

    // ── 5. Websocket endpoint + OTA service ───────────────────
    let mut server = EspHttpServer::new(&HttpServerConfig {
        stack_size: 8192,
        ..Default::default()
    })?;
    let sink = Arc::new(WsFrameSink::new());

    let service = OtaService::new(
        config.clone(),
        OtaFlash::new(),
        firmware,
        Arc::clone(&sink),
        LogEventSink::new(),
    );
    ws_server::register(
        &mut server,
        &config.uri,
        0,
        Arc::clone(&sink),
        service.clone(),
        config.max_frame_len(),
    )?;

    info!("System ready. Waiting for update clients on {}", config.uri);

    // ── 6. Status loop ────────────────────────────────────────
    // `server` and `wifi` must stay alive for the program's lifetime.
    loop {
        std::thread::sleep(STATUS_INTERVAL);
        let status = service.status();
        match status.state {
            SessionState::Idle => info!(
                "Status: idle, {} peer(s), update pending reboot: {}",
                sink.connection_count(),
                service.update_pending_reboot()
            ),
            state => info!(
                "Status: {:?} {}/{} bytes (owner {:?})",
                state, status.bytes_received, status.total_size, status.owner
            ),
        }
    }
}

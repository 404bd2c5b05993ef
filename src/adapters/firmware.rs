//! Running-image metadata and boot-state adapter.
//!
//! On ESP-IDF this reads app descriptors and OTA image states through
//! `esp-idf-sys` and uses `esp-ota` for rollback cancellation and restart.
//! On other targets a scripted in-memory firmware stands in.

use log::{info, warn};

use crate::app::ports::FirmwarePort;
use crate::error::FlashError;
use crate::ota::image::FirmwareVersion;

#[cfg(target_os = "espidf")]
use esp_idf_sys::*;

#[cfg(not(target_os = "espidf"))]
use std::sync::{Mutex, PoisonError};

/// Decode a NUL-padded C char array into a version string.
fn version_from_c(raw: &[u8]) -> Option<FirmwareVersion> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let text = core::str::from_utf8(&raw[..end]).ok()?;
    if text.is_empty() {
        return None;
    }
    let mut version = FirmwareVersion::new();
    version.push_str(text).ok()?;
    Some(version)
}

// ── ESP-IDF backend ───────────────────────────────────────────

#[cfg(target_os = "espidf")]
#[derive(Debug, Default)]
pub struct EspFirmware;

#[cfg(target_os = "espidf")]
impl EspFirmware {
    pub fn new() -> Self {
        Self
    }

    fn desc_version(desc: &esp_app_desc_t) -> Option<FirmwareVersion> {
        // SAFETY: `version` is a fixed-size c_char array inside `desc`.
        let raw = unsafe {
            core::slice::from_raw_parts(desc.version.as_ptr() as *const u8, desc.version.len())
        };
        version_from_c(raw)
    }

    fn check(ret: esp_err_t) -> Result<(), FlashError> {
        if ret == ESP_OK as esp_err_t {
            Ok(())
        } else {
            Err(FlashError::ImageState(ret))
        }
    }
}

#[cfg(target_os = "espidf")]
impl FirmwarePort for EspFirmware {
    fn running_version(&self) -> Option<FirmwareVersion> {
        // SAFETY: returns a pointer to the descriptor of the running image,
        // valid for the program's lifetime.
        let desc = unsafe { esp_app_get_description() };
        if desc.is_null() {
            return None;
        }
        // SAFETY: non-null, static.
        Self::desc_version(unsafe { &*desc })
    }

    fn last_invalid_version(&self) -> Option<FirmwareVersion> {
        // SAFETY: read-only partition table queries.
        unsafe {
            let part = esp_ota_get_last_invalid_partition();
            if part.is_null() {
                return None;
            }
            let mut desc: esp_app_desc_t = core::mem::zeroed();
            if esp_ota_get_partition_description(part, &mut desc) != ESP_OK as esp_err_t {
                return None;
            }
            Self::desc_version(&desc)
        }
    }

    fn pending_verify(&self) -> bool {
        // SAFETY: read-only query of the running partition's OTA state.
        unsafe {
            let running = esp_ota_get_running_partition();
            let mut state: esp_ota_img_states_t = 0;
            esp_ota_get_state_partition(running, &mut state) == ESP_OK as esp_err_t
                && state == esp_ota_img_states_t_ESP_OTA_IMG_PENDING_VERIFY
        }
    }

    fn mark_valid(&self) -> Result<(), FlashError> {
        esp_ota::mark_app_valid().map_err(|e| {
            warn!("OTA: mark_app_valid failed: {:?}", e);
            FlashError::ImageState(crate::error::ESP_FAIL)
        })?;
        info!("OTA: firmware marked valid (rollback cancelled)");
        Ok(())
    }

    fn mark_invalid_and_rollback(&self) -> Result<(), FlashError> {
        warn!("OTA: running image invalidated, rolling back");
        // SAFETY: reboots on success; returns only with an error code.
        Self::check(unsafe { esp_ota_mark_app_invalid_rollback_and_reboot() })
    }

    fn revert_boot_partition(&self) -> Result<(), FlashError> {
        // SAFETY: the running partition pointer is static.
        Self::check(unsafe { esp_ota_set_boot_partition(esp_ota_get_running_partition()) })?;
        info!("OTA: boot partition reverted to running image");
        Ok(())
    }

    fn restart(&self) {
        info!("OTA: restarting");
        esp_ota::restart();
    }
}

// ── Simulation backend ────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
struct SimState {
    running: Option<FirmwareVersion>,
    last_invalid: Option<FirmwareVersion>,
    pending_verify: bool,
    boot_reverted: bool,
    restarts: u32,
}

/// Host stand-in: versions and image state are set by the caller.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
pub struct EspFirmware {
    state: Mutex<SimState>,
}

#[cfg(not(target_os = "espidf"))]
impl EspFirmware {
    pub fn new() -> Self {
        Self::with_versions(Some(env!("CARGO_PKG_VERSION")), None)
    }

    pub fn with_versions(running: Option<&str>, last_invalid: Option<&str>) -> Self {
        let to_version = |s: &str| version_from_c(s.as_bytes());
        Self {
            state: Mutex::new(SimState {
                running: running.and_then(to_version),
                last_invalid: last_invalid.and_then(to_version),
                ..SimState::default()
            }),
        }
    }

    fn sim(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_pending_verify(&self, pending: bool) {
        self.sim().pending_verify = pending;
    }

    pub fn restarts(&self) -> u32 {
        self.sim().restarts
    }

    pub fn boot_reverted(&self) -> bool {
        self.sim().boot_reverted
    }
}

#[cfg(not(target_os = "espidf"))]
impl FirmwarePort for EspFirmware {
    fn running_version(&self) -> Option<FirmwareVersion> {
        self.sim().running.clone()
    }

    fn last_invalid_version(&self) -> Option<FirmwareVersion> {
        self.sim().last_invalid.clone()
    }

    fn pending_verify(&self) -> bool {
        self.sim().pending_verify
    }

    fn mark_valid(&self) -> Result<(), FlashError> {
        let mut sim = self.sim();
        if !sim.pending_verify {
            return Err(FlashError::ImageState(crate::error::ESP_FAIL));
        }
        sim.pending_verify = false;
        info!("OTA(sim): firmware marked valid");
        Ok(())
    }

    fn mark_invalid_and_rollback(&self) -> Result<(), FlashError> {
        let mut sim = self.sim();
        sim.last_invalid = sim.running.take();
        sim.pending_verify = false;
        sim.restarts += 1;
        warn!("OTA(sim): image invalidated, rollback reboot");
        Ok(())
    }

    fn revert_boot_partition(&self) -> Result<(), FlashError> {
        self.sim().boot_reverted = true;
        info!("OTA(sim): boot partition reverted");
        Ok(())
    }

    fn restart(&self) {
        self.sim().restarts += 1;
        info!("OTA(sim): restart requested");
    }
}

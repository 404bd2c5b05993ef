//! Flash writer adapter backed by the `esp-ota` crate.
//!
//! On ESP-IDF targets the image streams into the next OTA partition via
//! `esp_ota::OtaUpdate`; dropping or aborting an open update releases the
//! partition handle. On every other target an in-memory partition stands in
//! so the Session Task can be exercised on the host.

use log::{info, warn};

use crate::app::ports::FlashWriter;
use crate::error::FlashError;

#[cfg(target_os = "espidf")]
use crate::error::ESP_FAIL;

/// Simulated partition size (host only).
#[cfg(not(target_os = "espidf"))]
const SIM_PARTITION_SIZE: usize = 1536 * 1024;

#[cfg(target_os = "espidf")]
struct OpenUpdate(esp_ota::OtaUpdate);

#[cfg(target_os = "espidf")]
struct FinishedUpdate(esp_ota::CompletedOtaUpdate);

// SAFETY: the wrapped handles refer to the static partition table and an
// `esp_ota_handle_t`; ESP-IDF allows using them from any task as long as
// calls are not concurrent, which `&mut self` on `FlashWriter` guarantees.
#[cfg(target_os = "espidf")]
unsafe impl Send for OpenUpdate {}
#[cfg(target_os = "espidf")]
unsafe impl Send for FinishedUpdate {}

pub struct OtaFlash {
    #[cfg(target_os = "espidf")]
    update: Option<OpenUpdate>,
    #[cfg(target_os = "espidf")]
    completed: Option<FinishedUpdate>,

    #[cfg(not(target_os = "espidf"))]
    partition: Vec<u8>,
    #[cfg(not(target_os = "espidf"))]
    open: bool,
    #[cfg(not(target_os = "espidf"))]
    boot_selected: bool,

    expected: u32,
    written: u32,
}

impl OtaFlash {
    pub fn new() -> Self {
        Self {
            #[cfg(target_os = "espidf")]
            update: None,
            #[cfg(target_os = "espidf")]
            completed: None,

            #[cfg(not(target_os = "espidf"))]
            partition: Vec::new(),
            #[cfg(not(target_os = "espidf"))]
            open: false,
            #[cfg(not(target_os = "espidf"))]
            boot_selected: false,

            expected: 0,
            written: 0,
        }
    }

    /// Bytes written into the currently open (or last completed) image.
    pub fn written(&self) -> u32 {
        self.written
    }

    /// Simulated partition contents.
    #[cfg(not(target_os = "espidf"))]
    pub fn image(&self) -> &[u8] {
        &self.partition
    }

    /// True once `set_boot_partition` succeeded in simulation.
    #[cfg(not(target_os = "espidf"))]
    pub fn boot_selected(&self) -> bool {
        self.boot_selected
    }
}

impl Default for OtaFlash {
    fn default() -> Self {
        Self::new()
    }
}

// ── ESP-IDF backend ───────────────────────────────────────────

#[cfg(target_os = "espidf")]
impl FlashWriter for OtaFlash {
    fn begin(&mut self, total_size: u32) -> Result<(), FlashError> {
        // SAFETY: read-only query of the static partition table.
        let target = unsafe { esp_idf_sys::esp_ota_get_next_update_partition(core::ptr::null()) };
        if target.is_null() {
            return Err(FlashError::NoPartition);
        }
        // SAFETY: non-null pointer into the static partition table.
        let capacity = unsafe { (*target).size };
        if total_size > capacity {
            warn!("OTA flash: image of {} bytes exceeds partition ({} bytes)", total_size, capacity);
            return Err(FlashError::Begin(esp_idf_sys::ESP_ERR_INVALID_SIZE as i32));
        }

        self.abort();
        let update = esp_ota::OtaUpdate::begin().map_err(|e| {
            warn!("esp-ota begin failed: {:?}", e);
            FlashError::Begin(ESP_FAIL)
        })?;
        self.update = Some(OpenUpdate(update));
        self.completed = None;
        self.expected = total_size;
        self.written = 0;
        info!("OTA flash: begin ({} bytes, partition {} bytes)", total_size, capacity);
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), FlashError> {
        let update = self.update.as_mut().ok_or(FlashError::NotOpen)?;
        update.0.write(chunk).map_err(|e| {
            warn!("esp-ota write failed: {:?}", e);
            FlashError::Write(ESP_FAIL)
        })?;
        self.written += chunk.len() as u32;
        Ok(())
    }

    fn end(&mut self) -> Result<(), FlashError> {
        let update = self.update.take().ok_or(FlashError::NotOpen)?;
        if self.written != self.expected {
            warn!("OTA flash: closing {} of {} bytes", self.written, self.expected);
        }
        let completed = update.0.finalize().map_err(|e| {
            warn!("esp-ota finalize failed: {:?}", e);
            FlashError::End(ESP_FAIL)
        })?;
        self.completed = Some(FinishedUpdate(completed));
        info!("OTA flash: image closed ({} bytes)", self.written);
        Ok(())
    }

    fn set_boot_partition(&mut self) -> Result<(), FlashError> {
        let completed = self.completed.as_mut().ok_or(FlashError::NotOpen)?;
        completed.0.set_as_boot_partition().map_err(|e| {
            warn!("esp-ota set_as_boot_partition failed: {:?}", e);
            FlashError::SetBoot(ESP_FAIL)
        })?;
        self.completed = None;
        info!("OTA flash: boot partition updated");
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(update) = self.update.take() {
            if let Err(e) = update.0.abort() {
                warn!("esp-ota abort failed: {:?}", e);
            }
            warn!("OTA flash: update aborted after {} bytes", self.written);
        }
        self.completed = None;
    }
}

// ── Simulation backend ────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl FlashWriter for OtaFlash {
    fn begin(&mut self, total_size: u32) -> Result<(), FlashError> {
        if total_size as usize > SIM_PARTITION_SIZE {
            return Err(FlashError::Begin(ESP_ERR_INVALID_SIZE));
        }
        self.partition.clear();
        self.partition.reserve(total_size as usize);
        self.open = true;
        self.boot_selected = false;
        self.expected = total_size;
        self.written = 0;
        info!("OTA flash(sim): begin ({} bytes)", total_size);
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), FlashError> {
        if !self.open {
            return Err(FlashError::NotOpen);
        }
        if self.partition.len() + chunk.len() > SIM_PARTITION_SIZE {
            return Err(FlashError::Write(ESP_ERR_INVALID_SIZE));
        }
        self.partition.extend_from_slice(chunk);
        self.written += chunk.len() as u32;
        Ok(())
    }

    fn end(&mut self) -> Result<(), FlashError> {
        if !self.open {
            return Err(FlashError::NotOpen);
        }
        self.open = false;
        if self.written != self.expected {
            return Err(FlashError::End(ESP_ERR_OTA_VALIDATE_FAILED));
        }
        Ok(())
    }

    fn set_boot_partition(&mut self) -> Result<(), FlashError> {
        if self.open || self.written != self.expected {
            return Err(FlashError::SetBoot(ESP_ERR_OTA_VALIDATE_FAILED));
        }
        self.boot_selected = true;
        info!("OTA flash(sim): boot partition updated");
        Ok(())
    }

    fn abort(&mut self) {
        if self.open {
            warn!("OTA flash(sim): update aborted after {} bytes", self.written);
        }
        self.open = false;
        self.partition.clear();
    }
}

/// `ESP_ERR_INVALID_SIZE`, mirrored for the simulation backend.
#[cfg(not(target_os = "espidf"))]
const ESP_ERR_INVALID_SIZE: i32 = 0x104;
/// `ESP_ERR_OTA_VALIDATE_FAILED`, mirrored for the simulation backend.
#[cfg(not(target_os = "espidf"))]
const ESP_ERR_OTA_VALIDATE_FAILED: i32 = 0x1503;

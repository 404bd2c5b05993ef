//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements [`ConfigPort`]. On ESP32 each call opens the config namespace on the default NVS partition through
//! `esp_idf_svc::nvs::EspNvs`; the simulation backend is a `HashMap`.
//!
//! [`OtaConfig`] is stored as a `postcard` blob and validated on both load
//! and save. A stored blob that fails to decode or validate is ignored in
//! favour of the defaults.

use log::{info, warn};

use crate::app::ports::ConfigPort;
use crate::config::OtaConfig;
use crate::error::{ConfigError, StorageError};

#[cfg(not(target_os = "espidf"))]
use std::cell::RefCell;
#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

const CONFIG_NAMESPACE: &str = "otalink";
const CONFIG_KEY: &str = "otacfg";

/// Upper bound for the encoded config blob.
const MAX_CONFIG_BLOB: usize = 128;

pub struct NvsAdapter {
    #[cfg(target_os = "espidf")]
    partition: EspDefaultNvsPartition,
    #[cfg(not(target_os = "espidf"))]
    store: RefCell<HashMap<String, Vec<u8>>>,
}

#[cfg(target_os = "espidf")]
impl NvsAdapter {
    pub fn new(partition: EspDefaultNvsPartition) -> Self {
        info!("NvsAdapter: ESP-IDF NVS backend");
        Self { partition }
    }

    fn open(&self, namespace: &str, read_write: bool) -> Result<EspNvs<NvsDefault>, StorageError> {
        EspNvs::new(self.partition.clone(), namespace, read_write).map_err(|e| {
            warn!("NvsAdapter: open '{}' failed: {}", namespace, e);
            StorageError::IoError
        })
    }

    fn get(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let nvs = self.open(namespace, false)?;
        match nvs.blob_len(key) {
            Ok(Some(len)) if len > buf.len() => return Err(StorageError::Full),
            Ok(Some(_)) => {}
            Ok(None) => return Err(StorageError::NotFound),
            Err(_) => return Err(StorageError::IoError),
        }
        match nvs.get_blob(key, buf) {
            Ok(Some(data)) => Ok(data.len()),
            Ok(None) => Err(StorageError::NotFound),
            Err(_) => Err(StorageError::IoError),
        }
    }

    fn put(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let mut nvs = self.open(namespace, true)?;
        nvs.set_blob(key, data).map_err(|e| {
            warn!("NvsAdapter: write {}::{} failed: {}", namespace, key, e);
            StorageError::IoError
        })
    }
}

#[cfg(not(target_os = "espidf"))]
impl NvsAdapter {
    pub fn new() -> Self {
        info!("NvsAdapter: simulation backend");
        Self {
            store: RefCell::new(HashMap::new()),
        }
    }

    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    fn get(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let store = self.store.borrow();
        let data = store
            .get(&Self::composite_key(namespace, key))
            .ok_or(StorageError::NotFound)?;
        if data.len() > buf.len() {
            return Err(StorageError::Full);
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn put(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.store
            .borrow_mut()
            .insert(Self::composite_key(namespace, key), data.to_vec());
        Ok(())
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for NvsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<OtaConfig, ConfigError> {
        let mut buf = [0u8; MAX_CONFIG_BLOB];
        let len = match self.get(CONFIG_NAMESPACE, CONFIG_KEY, &mut buf) {
            Ok(len) => len,
            Err(StorageError::NotFound) => {
                info!("NvsAdapter: no stored config, using defaults");
                return Ok(OtaConfig::default());
            }
            Err(e) => return Err(e.into()),
        };

        let config: OtaConfig = match postcard::from_bytes(&buf[..len]) {
            Ok(config) => config,
            Err(_) => {
                warn!("NvsAdapter: stored config corrupted, using defaults");
                return Ok(OtaConfig::default());
            }
        };
        if let Err(e) = config.validate() {
            warn!("NvsAdapter: stored config rejected ({}), using defaults", e);
            return Ok(OtaConfig::default());
        }
        info!("NvsAdapter: loaded config ({} bytes)", len);
        Ok(config)
    }

    fn save(&self, config: &OtaConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let mut buf = [0u8; MAX_CONFIG_BLOB];
        let bytes = postcard::to_slice(config, &mut buf).map_err(|_| ConfigError::Corrupted)?;
        self.put(CONFIG_NAMESPACE, CONFIG_KEY, bytes)?;
        info!("NvsAdapter: config saved ({} bytes)", bytes.len());
        Ok(())
    }
}

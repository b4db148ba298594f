//! Persistent settings on the NVS partition.
//!
//! Holds two blobs: the configuration override (`trafficlight/config`)
//! and the device-twin connection string (`auth/twin_cs`).  Both are
//! reached through [`StoragePort`], so the boot code reads them the same
//! way on the device and in host tests.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `EspNvs` handles on the default
//!   partition.  With `CONFIG_NVS_ENCRYPTION` the partition is encrypted
//!   transparently, which is what keeps the shared access key at rest.
//! - **all other targets**: a `namespace::key` map in memory.

use log::{info, warn};

use crate::app::ports::StoragePort;
use crate::config::TrafficLightConfig;
use crate::error::{ConfigError, StorageError};

const CONFIG_NAMESPACE: &str = "trafficlight";
const CONFIG_KEY: &str = "config";

/// Largest blob we read back (config JSON, connection string).
const MAX_BLOB_SIZE: usize = 2048;

const CRED_NAMESPACE: &str = "auth";
const TWIN_CS_KEY: &str = "twin_cs";

#[cfg(target_os = "espidf")]
mod esp {
    use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
    use esp_idf_svc::sys::{ESP_ERR_NVS_NOT_FOUND, EspError};
    use log::warn;

    use crate::error::StorageError;

    pub(super) fn open(
        partition: &EspDefaultNvsPartition,
        namespace: &str,
        read_write: bool,
    ) -> Result<EspNvs<NvsDefault>, StorageError> {
        EspNvs::new(partition.clone(), namespace, read_write).map_err(storage_error)
    }

    pub(super) fn storage_error(e: EspError) -> StorageError {
        if e.code() == ESP_ERR_NVS_NOT_FOUND as i32 {
            // A namespace that was never written cannot be opened read-only.
            StorageError::NotFound
        } else {
            warn!("NVS: {}", e);
            StorageError::IoError
        }
    }
}

pub struct NvsAdapter {
    #[cfg(target_os = "espidf")]
    partition: esp_idf_svc::nvs::EspDefaultNvsPartition,

    #[cfg(not(target_os = "espidf"))]
    store: std::cell::RefCell<std::collections::HashMap<String, Vec<u8>>>,
}

impl NvsAdapter {
    /// Storage on the default partition (already initialised by
    /// `EspDefaultNvsPartition::take`).
    #[cfg(target_os = "espidf")]
    pub fn new(partition: esp_idf_svc::nvs::EspDefaultNvsPartition) -> Self {
        info!("NVS: default partition");
        Self { partition }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Self {
        info!("NVS(sim): in-memory store");
        Self {
            store: std::cell::RefCell::default(),
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn slot(namespace: &str, key: &str) -> String {
        format!("{namespace}::{key}")
    }

    // ── Configuration ─────────────────────────────────────────

    /// Resolve the boot configuration: NVS blob → embedded JSON → defaults.
    pub fn load_config(&self) -> TrafficLightConfig {
        let mut buf = vec![0u8; MAX_BLOB_SIZE];
        let stored = match self.read(CONFIG_NAMESPACE, CONFIG_KEY, &mut buf) {
            Ok(len) => Some(&buf[..len]),
            Err(StorageError::NotFound) => None,
            Err(e) => {
                warn!("NVS: config read failed ({}), ignoring stored config", e);
                None
            }
        };
        TrafficLightConfig::resolve(stored)
    }

    /// Validate and persist a configuration override.
    pub fn save_config(&mut self, config: &TrafficLightConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let bytes = serde_json::to_vec(config).map_err(|_| ConfigError::Parse)?;
        self.write(CONFIG_NAMESPACE, CONFIG_KEY, &bytes)
            .map_err(|_| ConfigError::ValidationFailed("config could not be persisted"))?;
        info!("NVS: config saved ({} bytes)", bytes.len());
        Ok(())
    }

    // ── Twin credential ───────────────────────────────────────

    /// Twin connection string from the encrypted "auth" namespace.
    pub fn twin_connection_string(&self) -> Result<String, StorageError> {
        let mut buf = vec![0u8; MAX_BLOB_SIZE];
        let len = self.read(CRED_NAMESPACE, TWIN_CS_KEY, &mut buf)?;
        buf.truncate(len);
        String::from_utf8(buf).map_err(|_| StorageError::IoError)
    }

    pub fn store_twin_connection_string(&mut self, cs: &str) -> Result<(), StorageError> {
        self.write(CRED_NAMESPACE, TWIN_CS_KEY, cs.as_bytes())
    }
}

impl StoragePort for NvsAdapter {
    #[cfg(target_os = "espidf")]
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let nvs = esp::open(&self.partition, namespace, false)?;
        match nvs.blob_len(key).map_err(esp::storage_error)? {
            None => Err(StorageError::NotFound),
            Some(len) if len > buf.len() => Err(StorageError::TooLarge),
            Some(_) => nvs
                .get_blob(key, buf)
                .map_err(esp::storage_error)?
                .map(<[u8]>::len)
                .ok_or(StorageError::NotFound),
        }
    }

    #[cfg(target_os = "espidf")]
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if data.len() > MAX_BLOB_SIZE {
            return Err(StorageError::TooLarge);
        }
        let mut nvs = esp::open(&self.partition, namespace, true)?;
        nvs.set_blob(key, data).map_err(esp::storage_error)
    }

    #[cfg(target_os = "espidf")]
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        let mut nvs = esp::open(&self.partition, namespace, true)?;
        nvs.remove(key).map(|_| ()).map_err(esp::storage_error)
    }

    #[cfg(target_os = "espidf")]
    fn exists(&self, namespace: &str, key: &str) -> bool {
        esp::open(&self.partition, namespace, false)
            .and_then(|nvs| nvs.contains(key).map_err(esp::storage_error))
            .unwrap_or(false)
    }

    #[cfg(not(target_os = "espidf"))]
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let store = self.store.borrow();
        let data = store
            .get(&Self::slot(namespace, key))
            .ok_or(StorageError::NotFound)?;
        let dst = buf.get_mut(..data.len()).ok_or(StorageError::TooLarge)?;
        dst.copy_from_slice(data);
        Ok(data.len())
    }

    #[cfg(not(target_os = "espidf"))]
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if data.len() > MAX_BLOB_SIZE {
            return Err(StorageError::TooLarge);
        }
        self.store
            .borrow_mut()
            .insert(Self::slot(namespace, key), data.to_vec());
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.store.borrow_mut().remove(&Self::slot(namespace, key));
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.store
            .borrow()
            .contains_key(&Self::slot(namespace, key))
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for NvsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

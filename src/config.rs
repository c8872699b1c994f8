//! Store and offload configuration
//!
//! Configuration is plain data with sensible defaults; it can be loaded from a TOML
//! document when a host application wants to tune pools and workgroup sizes.

use crate::error::{SoaError, SoaResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoaConfig {
    pub store: StoreConfig,
    pub offload: OffloadConfig,
}

/// Column store sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Rows reserved in every column (and the identity table) on construction
    pub initial_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 1024,
        }
    }
}

/// Accelerator settings shared by the host and GPU back-ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadConfig {
    /// Worker threads for the host accelerator pool
    pub worker_threads: usize,
    /// Prefix for host worker thread names
    pub thread_name_prefix: String,
    /// Default workgroup size for WGSL kernels
    pub workgroup_size: u32,
    /// Label prefix for device buffers and pipelines
    pub device_label: String,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get().max(1),
            thread_name_prefix: "soa-offload".to_string(),
            workgroup_size: 64,
            device_label: "soa-cache".to_string(),
        }
    }
}

impl SoaConfig {
    /// Parse a TOML document; missing keys fall back to defaults
    pub fn from_toml_str(source: &str) -> SoaResult<Self> {
        let config: SoaConfig =
            toml::from_str(source).map_err(|e| SoaError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> SoaResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| SoaError::Config(format!("{}: {}", path.display(), e)))?;
        log::debug!("[SoaConfig] Loading configuration from {}", path.display());
        Self::from_toml_str(&source)
    }

    fn validate(&self) -> SoaResult<()> {
        if self.offload.worker_threads == 0 {
            return Err(SoaError::Config(
                "offload.worker_threads must be at least 1".to_string(),
            ));
        }
        if self.offload.workgroup_size == 0 {
            return Err(SoaError::Config(
                "offload.workgroup_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

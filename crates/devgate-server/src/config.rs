//! Gateway configuration.
//!
//! Configuration is a JSON document with these sections:
//! - the service name used in logs
//! - device queue sizing and an optional device cap
//! - service discovery options
//! - logging level and format

use std::path::Path;

use devgate_device::DEFAULT_QUEUE_SIZE;
use devgate_discovery::DiscoveryOptions;
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// Default service name.
pub const DEFAULT_SERVICE_NAME: &str = "devgate";

/// Default interval between health status log lines.
pub const DEFAULT_STATUS_INTERVAL_SECS: u64 = 60;

/// Per-device settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Outbound queue capacity for each device.
    pub queue_size: usize,
    /// Maximum number of distinct connected devices; unlimited when absent.
    pub max_devices: Option<usize>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            max_devices: None,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Name of this service.
    pub service_name: String,
    /// Device settings.
    pub device: DeviceConfig,
    /// Service discovery settings.
    pub discovery: DiscoveryOptions,
    /// Logging settings.
    pub log: LogConfig,
    /// Seconds between health status log lines; zero disables them.
    pub status_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            device: DeviceConfig::default(),
            discovery: DiscoveryOptions::default(),
            log: LogConfig::default(),
            status_interval_secs: DEFAULT_STATUS_INTERVAL_SECS,
        }
    }
}

impl GatewayConfig {
    /// Load and validate configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails validation.
    pub fn load(path: impl AsRef<Path>) -> ServerResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ServerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the result is invalid.
    pub fn from_json(content: &str) -> ServerResult<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: impl AsRef<Path>) -> ServerResult<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ServerError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] describing the first problem found.
    pub fn validate(&self) -> ServerResult<()> {
        if self.service_name.trim().is_empty() {
            return Err(ServerError::Config("service_name cannot be empty".to_string()));
        }

        if self.device.queue_size == 0 {
            return Err(ServerError::Config(
                "device.queue_size must be greater than zero".to_string(),
            ));
        }

        if self.device.max_devices == Some(0) {
            return Err(ServerError::Config(
                "device.max_devices must be greater than zero when set".to_string(),
            ));
        }

        if self.discovery.vnode_count == 0 {
            return Err(ServerError::Config(
                "discovery.vnode_count must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

//! Configuration file structures for fuelslice.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`PartitionEntry`]: A partition to load at startup

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{FuelConfig, PartitionId, RuntimeConfig, Value};

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.scheduler]
/// max_partitions = 2
/// on_completed = "retire"
///
/// [runtime.fuel]
/// budget = 10_000_000
/// yield_after = 100
///
/// [[partitions]]
/// id = 0
/// path = "./fib.wasm"
/// args = [{ i32 = 10 }]
///
/// [[partitions]]
/// id = 1
/// path = "./fib.wasm"
/// yielding = false
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (engine, scheduler and fuel defaults).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Partitions to load at startup.
    #[serde(default)]
    pub partitions: Vec<PartitionEntry>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        debug!(path = %path.as_ref().display(), "Configuration file read");

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// A partition to load at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PartitionEntry {
    /// Registry slot for the partition.
    pub id: PartitionId,

    /// Path to the WebAssembly module file.
    pub path: String,

    /// Exported function invoked on every call.
    #[serde(default = "defaults::entry_point")]
    pub entry_point: String,

    /// Arguments passed to the entry point on every call.
    #[serde(default = "defaults::args")]
    pub args: Vec<Value>,

    /// Suspend the call every `yield_after` fuel units.
    #[serde(default = "defaults::yielding")]
    pub yielding: bool,

    /// Overrides `runtime.fuel.budget`.
    #[serde(default)]
    pub budget: Option<u64>,

    /// Overrides `runtime.fuel.yield_after`.
    #[serde(default)]
    pub yield_after: Option<u64>,
}

impl PartitionEntry {
    /// Fuel budget for this partition.
    pub fn budget(&self, defaults: &FuelConfig) -> u64 {
        self.budget.unwrap_or(defaults.budget)
    }

    /// Yield-after quantum for this partition, or `None` when it runs
    /// without intermediate suspension.
    pub fn quantum(&self, defaults: &FuelConfig) -> Option<u64> {
        self.yielding
            .then(|| self.yield_after.unwrap_or(defaults.yield_after))
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

/// Default value functions for serde.
mod defaults {
    use crate::Value;

    pub fn entry_point() -> String {
        "main".to_string()
    }

    pub fn args() -> Vec<Value> {
        vec![Value::I32(10)]
    }

    pub const fn yielding() -> bool {
        true
    }
}

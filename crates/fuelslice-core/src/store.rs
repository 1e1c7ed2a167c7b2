//! Store data of a Wasmtime partition.
//!
//! Every partition owns one `Store<PartitionContext>` for its whole life.
//! Host functions reach the partition through the store data, which is where
//! guest log lines accumulate.

use std::time::Instant;

use wasmtime::Store;

use crate::WasmEngine;
use fuelslice_common::{EngineError, PartitionId};

/// Data attached to a partition's store.
pub struct PartitionContext {
    /// Owner of the store.
    pub partition_id: PartitionId,

    /// Guest log lines, oldest first. Kept across calls.
    pub logs: Vec<LogEntry>,
}

/// One line logged by the guest through `env.log`.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Severity.
    pub level: LogLevel,
    /// Message text, lossily decoded from guest memory.
    pub message: String,
    /// When the host received the line.
    pub recorded_at: Instant,
}

/// Guest log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// `0`
    Debug,
    /// `1`, and any unknown level.
    Info,
    /// `2`
    Warn,
    /// `3`
    Error,
}

impl LogLevel {
    /// Decode the level argument of `env.log`.
    pub fn from_guest(level: i32) -> Self {
        match level {
            0 => Self::Debug,
            2 => Self::Warn,
            3 => Self::Error,
            _ => Self::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        })
    }
}

impl PartitionContext {
    /// Empty store data for `partition_id`.
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            partition_id,
            logs: Vec::new(),
        }
    }

    /// Record a guest log line.
    pub fn log(&mut self, level: LogLevel, message: String) {
        self.logs.push(LogEntry {
            level,
            message,
            recorded_at: Instant::now(),
        });
    }

    /// Remove and return every recorded line.
    pub fn take_logs(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.logs)
    }
}

/// Fresh store for one partition, seeded with the engine's instantiation
/// fuel so start functions can run. The first fuel injection overwrites it.
///
/// # Errors
///
/// A context error if the fuel cannot be set.
pub fn create_store(
    engine: &WasmEngine,
    partition_id: PartitionId,
) -> Result<Store<PartitionContext>, EngineError> {
    let mut store = Store::new(engine.inner(), PartitionContext::new(partition_id));

    store
        .set_fuel(engine.config().instantiation_fuel)
        .map_err(|e| EngineError::Context {
            reason: format!("Failed to seed instantiation fuel: {e}"),
        })?;

    Ok(store)
}

/// Fuel left in a store, or `None` if fuel metering is off.
pub fn remaining_fuel(store: &Store<PartitionContext>) -> Option<u64> {
    store.get_fuel().ok()
}

//! Configuration structures for fuelslice.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (pooling, instantiation fuel)
//! - [`SchedulerConfig`]: Registry size, cycle limit and slice dispositions
//! - [`FuelConfig`]: Default fuel budget and yield policy for partitions

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for the scheduler and
/// its engine. It is usually loaded from the `[runtime]` table of a TOML file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Scheduling loop configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Default fuel settings for partitions.
    #[serde(default)]
    pub fuel: FuelConfig,
}

/// Wasmtime engine configuration.
///
/// These settings affect the shared engine used to compile modules and
/// create partition stores.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator for instance creation.
    ///
    /// The pool is sized to the scheduler's `max_partitions`, since the
    /// partition set is fixed at setup time.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Memory per instance slot in megabytes.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Fuel placed in a fresh store so that start functions can run during
    /// instantiation. Replaced by the first fuel injection.
    #[serde(default = "defaults::instantiation_fuel")]
    pub instantiation_fuel: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            instance_memory_mb: defaults::instance_memory_mb(),
            instantiation_fuel: defaults::instantiation_fuel(),
        }
    }
}

/// What the scheduler does with a partition after a `Completed` or `Failed`
/// slice.
///
/// A `Yielded` slice always rotates to the next partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    /// Keep the index: the same partition is invoked again next cycle.
    #[default]
    Stay,
    /// Advance to the next partition; this one is invoked again on its turn.
    Rotate,
    /// Remove the partition from the rotation.
    Retire,
}

/// Scheduling loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Number of partition slots in the registry.
    #[serde(default = "defaults::max_partitions")]
    pub max_partitions: usize,

    /// Stop after this many cycles. `None` runs until cancelled or until no
    /// partition remains in the rotation.
    #[serde(default)]
    pub max_cycles: Option<u64>,

    /// Disposition after a `Completed` slice.
    #[serde(default)]
    pub on_completed: Disposition,

    /// Disposition after a `Failed` slice.
    #[serde(default)]
    pub on_failed: Disposition,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_partitions: defaults::max_partitions(),
            max_cycles: None,
            on_completed: Disposition::default(),
            on_failed: Disposition::default(),
        }
    }
}

/// Default fuel settings applied to partitions that don't override them.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FuelConfig {
    /// Fuel injected into a partition.
    ///
    /// Fuel is an abstract unit consumed roughly once per executed
    /// WebAssembly instruction.
    #[serde(default = "defaults::budget")]
    pub budget: u64,

    /// Fuel units after which a yielding partition is suspended.
    #[serde(default = "defaults::yield_after")]
    pub yield_after: u64,

    /// Re-inject the budget after a partition completes a call.
    #[serde(default)]
    pub refill_on_complete: bool,
}

impl Default for FuelConfig {
    fn default() -> Self {
        Self {
            budget: defaults::budget(),
            yield_after: defaults::yield_after(),
            refill_on_complete: false,
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn pooling_allocator() -> bool {
        false
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn instantiation_fuel() -> u64 {
        1_000_000
    }

    pub const fn max_partitions() -> usize {
        8
    }

    pub const fn budget() -> u64 {
        10_000_000
    }

    pub const fn yield_after() -> u64 {
        100
    }
}

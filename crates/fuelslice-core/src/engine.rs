//! The shared Wasmtime engine.
//!
//! One [`WasmEngine`] serves every partition. Fuel metering is always on,
//! since fuel is the only thing that bounds a slice, and async support is
//! always on because suspension at a fuel boundary only exists for async
//! calls. The pooling allocator is optional and, when enabled, reserves one
//! slot per partition.

use std::sync::Arc;

use tracing::info;
use wasmtime::{Config, Engine, InstanceAllocationStrategy, OptLevel, PoolingAllocationConfig};

use fuelslice_common::{EngineConfig, PartitionError};

/// Fuel-metered, async-capable Wasmtime engine sized for a partition table.
///
/// Holds no per-partition state. Cloning shares the underlying engine.
///
/// ```ignore
/// use fuelslice_common::EngineConfig;
/// use fuelslice_core::WasmEngine;
///
/// let engine = WasmEngine::new(&EngineConfig::default(), 4)?;
/// assert_eq!(engine.max_partitions(), 4);
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
    max_partitions: usize,
}

impl WasmEngine {
    /// Build the engine for at most `max_partitions` partitions.
    ///
    /// # Errors
    ///
    /// `EngineFatal` if Wasmtime rejects the configuration or cannot reserve
    /// the pooling allocator's slots.
    pub fn new(config: &EngineConfig, max_partitions: usize) -> Result<Self, PartitionError> {
        let mut wasmtime_config = Config::new();
        wasmtime_config
            .async_support(true)
            .consume_fuel(true)
            .cranelift_opt_level(OptLevel::Speed);

        if config.pooling_allocator {
            wasmtime_config.allocation_strategy(InstanceAllocationStrategy::Pooling(
                pooling_limits(config, max_partitions),
            ));
            info!(
                max_partitions,
                instance_memory_mb = config.instance_memory_mb,
                "Pooling allocator enabled"
            );
        }

        let engine = Engine::new(&wasmtime_config)
            .map_err(|e| PartitionError::engine_fatal(format!("Wasmtime engine rejected: {e}")))?;

        info!(max_partitions, "Wasmtime engine ready");

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
            max_partitions,
        })
    }

    /// The Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Configuration the engine was built from.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Partition slots the engine was sized for.
    pub fn max_partitions(&self) -> usize {
        self.max_partitions
    }

    /// Whether instances come from the pooling allocator.
    pub fn is_pooling_enabled(&self) -> bool {
        self.config.pooling_allocator
    }
}

/// One core instance, memory and table per partition.
fn pooling_limits(config: &EngineConfig, max_partitions: usize) -> PoolingAllocationConfig {
    let slots = u32::try_from(max_partitions).unwrap_or(u32::MAX);
    let mut pooling = PoolingAllocationConfig::default();

    pooling
        .total_core_instances(slots)
        .total_memories(slots)
        .total_tables(slots)
        .max_memory_size(config.instance_memory_mb as usize * 1024 * 1024);

    pooling
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("max_partitions", &self.max_partitions)
            .field("pooling_allocator", &self.config.pooling_allocator)
            .field("instance_memory_mb", &self.config.instance_memory_mb)
            .finish_non_exhaustive()
    }
}

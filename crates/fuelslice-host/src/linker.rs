//! Linker wiring.
//!
//! Every partition is instantiated through the runner's single linker, so a
//! host function registered here is importable by all of them.

use tracing::info;
use wasmtime::Linker;

use fuelslice_common::{PartitionError, RuntimeConfig};
use fuelslice_core::{InstanceRunner, PartitionContext, WasmEngine};

use crate::logging::host_log;

/// Wasmtime runner for `config` with every host function linked.
///
/// # Errors
///
/// `EngineFatal` if the engine cannot be built, `InvalidConfig` if a host
/// function cannot be linked.
pub fn create_runner(config: &RuntimeConfig) -> Result<InstanceRunner, PartitionError> {
    let engine = WasmEngine::new(&config.engine, config.scheduler.max_partitions)?;
    let mut runner = InstanceRunner::new(engine);

    register_all(runner.linker_mut())?;

    Ok(runner)
}

/// Link every host function:
///
/// | import    | signature                         |
/// |-----------|-----------------------------------|
/// | `env.log` | `(level: i32, ptr: i32, len: i32)`|
///
/// # Errors
///
/// `InvalidConfig` if an import name is already taken.
pub fn register_all(linker: &mut Linker<PartitionContext>) -> Result<(), PartitionError> {
    linker
        .func_wrap("env", "log", host_log)
        .map_err(|e| PartitionError::invalid_config(format!("Cannot link env.log: {e}")))?;

    info!(imports = "env.log", "Host functions linked");
    Ok(())
}

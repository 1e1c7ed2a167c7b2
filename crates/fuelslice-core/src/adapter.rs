//! The execution engine boundary.
//!
//! The scheduler never talks to Wasmtime directly. It drives partitions
//! through [`ExecutionEngine`], which exposes exactly the capabilities the
//! scheduling core needs: compile, create an isolated context, instantiate,
//! configure fuel, look up an export, and start and poll a resumable call.
//!
//! # Resumable calls
//!
//! Starting a call moves the partition's context into the call handle. Each
//! [`ExecutionEngine::poll`] either hands the call back
//! ([`CallProgress::Suspended`]) or consumes it and returns the context
//! together with the outcome ([`CallProgress::Finished`]). A call therefore
//! cannot be resolved twice, and a context cannot be touched while a call on
//! it is in flight.

use fuelslice_common::{CallFault, EngineError, PartitionId, Value};

/// Result of polling a resumable call once.
#[derive(Debug)]
pub enum CallProgress<C, X> {
    /// The engine suspended the call at a fuel boundary. Poll again to resume.
    Suspended(C),

    /// The call ran to an end and released its context.
    Finished {
        /// The execution context the call was running in.
        context: X,
        /// Results on completion, or the fault that ended the call.
        outcome: Result<Vec<Value>, CallFault>,
    },
}

impl<C, X> CallProgress<C, X> {
    /// Returns `true` if the call was suspended.
    pub fn is_suspended(&self) -> bool {
        matches!(self, CallProgress::Suspended(_))
    }
}

/// Capabilities the scheduling core consumes from an execution engine.
///
/// One engine value is shared by all partitions; every context it creates is
/// owned by exactly one partition.
pub trait ExecutionEngine {
    /// A compiled module.
    type Module;
    /// An isolated, fuel-capable execution context.
    type Context;
    /// A module instance living in a context.
    type Instance;
    /// A callable export.
    type Callable;
    /// An in-flight resumable call. Owns the context it runs in.
    type Call;

    /// Compile a module binary.
    fn compile(&self, bytes: &[u8]) -> Result<Self::Module, EngineError>;

    /// Create a fresh execution context for a partition.
    fn new_context(&self, partition_id: PartitionId) -> Result<Self::Context, EngineError>;

    /// Instantiate a module in a context.
    fn instantiate(
        &self,
        context: &mut Self::Context,
        module: &Self::Module,
    ) -> Result<Self::Instance, EngineError>;

    /// Set the context's fuel counter.
    fn set_fuel(&self, context: &mut Self::Context, amount: u64) -> Result<(), EngineError>;

    /// Configure the fuel interval after which an in-flight call is
    /// suspended. `None` disables intermediate suspension.
    fn set_yield_interval(
        &self,
        context: &mut Self::Context,
        interval: Option<u64>,
    ) -> Result<(), EngineError>;

    /// Fuel left in the context.
    fn fuel_remaining(&self, context: &Self::Context) -> u64;

    /// Look up a function export by name.
    fn lookup_export(
        &self,
        context: &mut Self::Context,
        instance: &Self::Instance,
        name: &str,
    ) -> Option<Self::Callable>;

    /// Start a resumable call. The context moves into the call until the
    /// call finishes.
    fn start_call(
        &self,
        context: Self::Context,
        callable: Self::Callable,
        args: &[Value],
    ) -> Self::Call;

    /// Poll a call once without blocking.
    fn poll(&self, call: Self::Call) -> CallProgress<Self::Call, Self::Context>;

    /// Fuel left in the context owned by an in-flight call, if the engine can
    /// observe it while the call is suspended.
    fn call_fuel_remaining(&self, _call: &Self::Call) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_progress_is_suspended() {
        let suspended: CallProgress<u8, ()> = CallProgress::Suspended(1);
        assert!(suspended.is_suspended());

        let finished: CallProgress<u8, ()> = CallProgress::Finished {
            context: (),
            outcome: Err(CallFault::OutOfFuel),
        };
        assert!(!finished.is_suspended());
    }
}

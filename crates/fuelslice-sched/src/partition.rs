//! Partition lifecycle and the per-partition slice operation.
//!
//! A [`Partition`] is one isolated guest program: its execution context, its
//! compiled module and instance, its fuel policy, and at most one in-flight
//! resumable call. While a call is in flight the context lives inside the
//! call handle, so nothing can touch it until the call finishes.

use tracing::{debug, error, info, instrument, warn};

use fuelslice_common::{CallFault, PartitionError, PartitionId, SliceFailure, Value};
use fuelslice_core::{CallProgress, ExecutionEngine};

use crate::fuel::{FuelManager, FuelPolicy, Injection};

/// Exported function invoked on every call, with its fixed arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryPoint {
    /// Export name.
    pub name: String,
    /// Arguments passed on every call.
    pub args: Vec<Value>,
}

impl EntryPoint {
    /// Create an entry point.
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

impl Default for EntryPoint {
    fn default() -> Self {
        Self::new("main", vec![Value::I32(10)])
    }
}

/// Status reported by one slice.
#[derive(Debug, Clone, PartialEq)]
pub enum SliceOutcome {
    /// The call returned. The partition is idle again.
    Completed(Vec<Value>),
    /// The engine suspended the call; the next slice resumes it.
    Yielded,
    /// The call could not start or ended abnormally. The partition is idle
    /// again and can be re-invoked.
    Failed(SliceFailure),
}

impl SliceOutcome {
    /// Returns `true` for `Completed`.
    pub fn is_completed(&self) -> bool {
        matches!(self, SliceOutcome::Completed(_))
    }

    /// Returns `true` for `Yielded`.
    pub fn is_yielded(&self) -> bool {
        matches!(self, SliceOutcome::Yielded)
    }

    /// Returns `true` for `Failed`.
    pub fn is_failed(&self) -> bool {
        matches!(self, SliceOutcome::Failed(_))
    }
}

/// Slice counters of one partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionStats {
    /// Slices run.
    pub slices: u64,
    /// Calls started.
    pub calls_started: u64,
    /// `Yielded` slices.
    pub yields: u64,
    /// `Completed` slices.
    pub completions: u64,
    /// `Failed` slices.
    pub failures: u64,
}

/// Fuel accounting of an idle partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuelReport {
    /// Fuel left in the context.
    pub remaining: u64,
    /// Amount set by the last injection.
    pub injected: u64,
    /// Fuel consumed since the last injection.
    pub used: u64,
}

/// Where the partition's context currently lives.
enum CallSlot<E: ExecutionEngine> {
    /// No call in flight; the partition holds its context.
    Idle(E::Context),
    /// A call is suspended and owns the context.
    InFlight(E::Call),
    /// Only observed if a slice was interrupted by a panic.
    Vacant,
}

/// One isolated guest program instance.
pub struct Partition<E: ExecutionEngine> {
    id: PartitionId,
    entry: EntryPoint,
    module: E::Module,
    instance: E::Instance,
    slot: CallSlot<E>,
    fuel: FuelManager,
    injected: u64,
    pending_result: Option<Vec<Value>>,
    retired: bool,
    stats: PartitionStats,
}

impl<E: ExecutionEngine> Partition<E> {
    /// Allocate a context, compile `bytes` and instantiate the module.
    ///
    /// On failure everything built so far is dropped before the error is
    /// returned. Id validation is the registry's job.
    ///
    /// # Errors
    ///
    /// `ContextFailed`, `CompileFailed` or `InstantiateFailed`, tagged with
    /// the partition id.
    #[instrument(skip(engine, bytes, entry), fields(bytes_len = bytes.len(), entry_point = %entry.name))]
    pub fn load(
        engine: &E,
        id: PartitionId,
        bytes: &[u8],
        entry: EntryPoint,
    ) -> Result<Self, PartitionError> {
        let mut context = engine
            .new_context(id)
            .map_err(|e| PartitionError::from_engine(id, e))?;

        let module = engine
            .compile(bytes)
            .map_err(|e| PartitionError::from_engine(id, e))?;

        let instance = engine
            .instantiate(&mut context, &module)
            .map_err(|e| PartitionError::from_engine(id, e))?;

        info!(partition_id = id, "Partition instantiated");

        Ok(Self {
            id,
            entry,
            module,
            instance,
            slot: CallSlot::Idle(context),
            fuel: FuelManager::new(0, FuelPolicy::None),
            injected: 0,
            pending_result: None,
            retired: false,
            stats: PartitionStats::default(),
        })
    }

    /// Apply a fuel policy: set the counter and the yield interval from the
    /// manager's next injection, and keep the manager for refills.
    ///
    /// # Errors
    ///
    /// `CallInFlight` while a call is suspended; `FuelConfigFailed` if the
    /// engine rejects the values.
    pub fn inject_fuel(
        &mut self,
        engine: &E,
        manager: FuelManager,
    ) -> Result<Injection, PartitionError> {
        let CallSlot::Idle(context) = &mut self.slot else {
            return Err(PartitionError::CallInFlight {
                partition_id: self.id,
            });
        };

        let remaining = engine.fuel_remaining(context);
        let injection = manager.next_injection(remaining);

        engine
            .set_fuel(context, injection.amount)
            .map_err(|e| PartitionError::from_engine(self.id, e))?;
        engine
            .set_yield_interval(context, injection.yield_after)
            .map_err(|e| PartitionError::from_engine(self.id, e))?;

        self.fuel = manager;
        self.injected = injection.amount;

        info!(
            partition_id = self.id,
            amount = injection.amount,
            top_up = injection.top_up,
            yield_after = ?injection.yield_after,
            "Fuel injected"
        );

        Ok(injection)
    }

    /// Re-apply the current fuel manager.
    ///
    /// # Errors
    ///
    /// Same as [`Partition::inject_fuel`].
    pub fn refill(&mut self, engine: &E) -> Result<Injection, PartitionError> {
        self.inject_fuel(engine, self.fuel)
    }

    /// Run one fuel-bounded slice.
    ///
    /// Starts a new call if none is in flight, then polls the in-flight call
    /// exactly once.
    #[instrument(skip(self, engine), fields(partition_id = self.id))]
    pub fn run_slice(&mut self, engine: &E) -> SliceOutcome {
        self.stats.slices += 1;

        let call = match std::mem::replace(&mut self.slot, CallSlot::Vacant) {
            CallSlot::InFlight(call) => call,
            CallSlot::Idle(mut context) => {
                let Some(func) = engine.lookup_export(&mut context, &self.instance, &self.entry.name)
                else {
                    self.slot = CallSlot::Idle(context);
                    warn!(entry_point = %self.entry.name, "Entry point not found");
                    return self.record(SliceOutcome::Failed(SliceFailure::EntryPointNotFound {
                        name: self.entry.name.clone(),
                    }));
                };

                self.stats.calls_started += 1;
                debug!(entry_point = %self.entry.name, "Starting call");
                engine.start_call(context, func, &self.entry.args)
            }
            CallSlot::Vacant => {
                error!("Execution context lost");
                return self.record(SliceOutcome::Failed(SliceFailure::Fault(
                    CallFault::engine("execution context lost"),
                )));
            }
        };

        let outcome = match engine.poll(call) {
            CallProgress::Suspended(call) => {
                self.slot = CallSlot::InFlight(call);
                SliceOutcome::Yielded
            }
            CallProgress::Finished { context, outcome } => {
                self.slot = CallSlot::Idle(context);
                match outcome {
                    Ok(results) => {
                        self.pending_result = Some(results.clone());
                        SliceOutcome::Completed(results)
                    }
                    Err(fault) => SliceOutcome::Failed(fault.into()),
                }
            }
        };

        self.record(outcome)
    }

    fn record(&mut self, outcome: SliceOutcome) -> SliceOutcome {
        match &outcome {
            SliceOutcome::Completed(results) => {
                self.stats.completions += 1;
                debug!(?results, "Call completed");
            }
            SliceOutcome::Yielded => {
                self.stats.yields += 1;
                debug!("Call yielded");
            }
            SliceOutcome::Failed(failure) => {
                self.stats.failures += 1;
                warn!(%failure, class = ?failure.class(), "Slice failed");
            }
        }
        outcome
    }

    /// Partition id.
    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// Entry point invoked on every call.
    pub fn entry_point(&self) -> &EntryPoint {
        &self.entry
    }

    /// Compiled module handle.
    pub fn module(&self) -> &E::Module {
        &self.module
    }

    /// Execution context, unless a call currently owns it.
    pub fn context(&self) -> Option<&E::Context> {
        match &self.slot {
            CallSlot::Idle(context) => Some(context),
            CallSlot::InFlight(_) | CallSlot::Vacant => None,
        }
    }

    /// Returns `true` while a call is suspended mid-flight.
    pub fn is_in_flight(&self) -> bool {
        matches!(self.slot, CallSlot::InFlight(_))
    }

    /// Results of the last completed call.
    pub fn pending_result(&self) -> Option<&[Value]> {
        self.pending_result.as_deref()
    }

    /// Take the results of the last completed call.
    pub fn take_result(&mut self) -> Option<Vec<Value>> {
        self.pending_result.take()
    }

    /// Current fuel manager.
    pub fn fuel_manager(&self) -> &FuelManager {
        &self.fuel
    }

    /// Fuel left, if observable. While a call is in flight this depends on
    /// whether the engine can see into a suspended call.
    pub fn fuel_remaining(&self, engine: &E) -> Option<u64> {
        match &self.slot {
            CallSlot::Idle(context) => Some(engine.fuel_remaining(context)),
            CallSlot::InFlight(call) => engine.call_fuel_remaining(call),
            CallSlot::Vacant => None,
        }
    }

    /// Fuel accounting since the last injection, if observable.
    pub fn fuel_report(&self, engine: &E) -> Option<FuelReport> {
        self.fuel_remaining(engine).map(|remaining| FuelReport {
            remaining,
            injected: self.injected,
            used: self.injected.saturating_sub(remaining),
        })
    }

    /// Slice counters.
    pub fn stats(&self) -> PartitionStats {
        self.stats
    }

    /// Returns `true` once the scheduler has taken the partition out of the
    /// rotation.
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub(crate) fn retire(&mut self) {
        self.retired = true;
    }

    /// Release the partition's call, instance, context and module.
    pub fn release(self) {
        let in_flight = self.is_in_flight();
        if in_flight {
            warn!(partition_id = self.id, "Dropping in-flight call");
        }
        info!(partition_id = self.id, stats = ?self.stats, "Partition released");
    }
}

impl<E: ExecutionEngine> std::fmt::Debug for Partition<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("id", &self.id)
            .field("entry_point", &self.entry.name)
            .field("in_flight", &self.is_in_flight())
            .field("retired", &self.retired)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

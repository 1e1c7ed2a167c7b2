//! Fuel-sliced round-robin scheduler.
//!
//! Each cycle selects the partition at the current ring position, runs one
//! slice on it, and updates the position from the slice outcome:
//!
//! ```text
//!   SelectNext ──► RunSlice ──► Dispatch ──┐
//!       ▲                                  │
//!       └──────────────────────────────────┘
//! ```
//!
//! The ring is the occupied, non-retired slots in id order. A `Yielded`
//! slice always advances to the next partition; `Completed` and `Failed`
//! apply the configured [`Disposition`].

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, instrument, warn};

use fuelslice_common::{Disposition, PartitionEntry, PartitionError, PartitionId, SchedulerConfig};
use fuelslice_core::ExecutionEngine;

use crate::fuel::{FuelManager, Injection};
use crate::partition::{EntryPoint, FuelReport, Partition, SliceOutcome};
use crate::registry::PartitionRegistry;

/// Result of one scheduling cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceReport {
    /// Cycle number, starting at 1.
    pub cycle: u64,
    /// Partition that ran.
    pub partition_id: PartitionId,
    /// What the slice reported.
    pub outcome: SliceOutcome,
}

/// Why [`Scheduler::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The cycle limit was reached.
    CycleLimit,
    /// The cancel flag was set.
    Cancelled,
    /// No active partition remains.
    Idle,
}

/// Totals of one [`Scheduler::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Cycles executed.
    pub cycles: u64,
    /// `Yielded` slices.
    pub yields: u64,
    /// `Completed` slices.
    pub completions: u64,
    /// `Failed` slices.
    pub failures: u64,
    /// Why the loop stopped.
    pub stop_reason: StopReason,
}

/// Lifetime counters of a scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Cycles executed by `run_cycle`.
    pub cycles: u64,
    /// Slices run, including manual ones.
    pub slices: u64,
    /// Refills applied after completed calls.
    pub refills: u64,
    /// Partitions retired from the ring.
    pub retired: u64,
}

/// Cooperative scheduler over a fixed set of partitions.
///
/// Owns the execution engine and every partition. The registry is declared
/// before the engine so partitions are always released first.
pub struct Scheduler<E: ExecutionEngine> {
    registry: PartitionRegistry<E>,
    engine: E,
    current: usize,
    on_completed: Disposition,
    on_failed: Disposition,
    stats: SchedulerStats,
}

impl<E: ExecutionEngine> Scheduler<E> {
    /// Create a scheduler with `config.max_partitions` empty slots.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `max_partitions` is zero.
    pub fn new(engine: E, config: &SchedulerConfig) -> Result<Self, PartitionError> {
        if config.max_partitions == 0 {
            return Err(PartitionError::invalid_config(
                "max_partitions must be at least 1",
            ));
        }

        info!(
            max_partitions = config.max_partitions,
            on_completed = ?config.on_completed,
            on_failed = ?config.on_failed,
            "Scheduler created"
        );

        Ok(Self {
            registry: PartitionRegistry::new(config.max_partitions),
            engine,
            current: 0,
            on_completed: config.on_completed,
            on_failed: config.on_failed,
            stats: SchedulerStats::default(),
        })
    }

    /// Load a module into slot `id`.
    ///
    /// The slot is checked before anything is allocated, so an invalid or
    /// occupied id leaves the engine untouched.
    ///
    /// # Errors
    ///
    /// `InvalidId`, `SlotOccupied`, or a resource error from the load.
    pub fn load_partition(
        &mut self,
        id: PartitionId,
        bytes: &[u8],
        entry: EntryPoint,
    ) -> Result<(), PartitionError> {
        self.registry.ensure_vacant(id)?;
        let partition = Partition::load(&self.engine, id, bytes, entry)?;
        self.registry.register(partition)
    }

    /// Read a configured partition's module file and load it.
    ///
    /// # Errors
    ///
    /// `LoadIo` if the file cannot be read, otherwise as
    /// [`Scheduler::load_partition`].
    pub fn load_file(&mut self, entry: &PartitionEntry) -> Result<(), PartitionError> {
        self.registry.ensure_vacant(entry.id)?;

        let bytes = std::fs::read(&entry.path).map_err(|source| PartitionError::LoadIo {
            partition_id: entry.id,
            path: entry.path.clone(),
            source,
        })?;
        debug!(partition_id = entry.id, path = %entry.path, size = bytes.len(), "Module file read");

        self.load_partition(
            entry.id,
            &bytes,
            EntryPoint::new(entry.entry_point.clone(), entry.args.clone()),
        )
    }

    /// Apply a fuel policy to partition `id`.
    ///
    /// # Errors
    ///
    /// `InvalidId`, `NotLoaded`, `CallInFlight` or `FuelConfigFailed`.
    pub fn inject_fuel(
        &mut self,
        id: PartitionId,
        manager: FuelManager,
    ) -> Result<Injection, PartitionError> {
        self.registry
            .lookup_mut(id)?
            .inject_fuel(&self.engine, manager)
    }

    /// Run one slice on partition `id` outside the ring. The ring position is
    /// not changed.
    ///
    /// # Errors
    ///
    /// `InvalidId` or `NotLoaded`.
    pub fn run_slice(&mut self, id: PartitionId) -> Result<SliceOutcome, PartitionError> {
        let partition = self.registry.lookup_mut(id)?;
        Ok(drive(&self.engine, partition, &mut self.stats))
    }

    /// Run exactly one scheduling cycle.
    ///
    /// Returns `None` when no active partition remains.
    #[instrument(skip(self), fields(cycle = self.stats.cycles + 1))]
    pub fn run_cycle(&mut self) -> Option<SliceReport> {
        let ring = self.active_ids();
        if ring.is_empty() {
            return None;
        }
        if self.current >= ring.len() {
            self.current = 0;
        }

        let id = ring[self.current];
        let partition = self.registry.lookup_mut(id).ok()?;
        let outcome = drive(&self.engine, partition, &mut self.stats);
        self.stats.cycles += 1;

        let disposition = match &outcome {
            SliceOutcome::Yielded => Disposition::Rotate,
            SliceOutcome::Completed(_) => self.on_completed,
            SliceOutcome::Failed(_) => self.on_failed,
        };

        match disposition {
            Disposition::Stay => {}
            Disposition::Rotate => self.current = (self.current + 1) % ring.len(),
            Disposition::Retire => {
                partition.retire();
                self.stats.retired += 1;
                let remaining = ring.len() - 1;
                self.current = if remaining == 0 {
                    0
                } else {
                    self.current % remaining
                };
                info!(partition_id = id, remaining, "Partition retired");
            }
        }

        debug!(
            partition_id = id,
            ?disposition,
            next_index = self.current,
            "Cycle dispatched"
        );

        Some(SliceReport {
            cycle: self.stats.cycles,
            partition_id: id,
            outcome,
        })
    }

    /// Run cycles until `limit` cycles have run, `cancel` is set, or no
    /// active partition remains.
    ///
    /// `cancel` is checked between cycles; a suspended call is left in
    /// flight and dropped at shutdown.
    pub fn run(&mut self, limit: Option<u64>, cancel: &AtomicBool) -> RunSummary {
        let mut summary = RunSummary {
            cycles: 0,
            yields: 0,
            completions: 0,
            failures: 0,
            stop_reason: StopReason::Idle,
        };

        info!(?limit, active = self.active_ids().len(), "Scheduling loop started");

        loop {
            if limit.is_some_and(|limit| summary.cycles >= limit) {
                summary.stop_reason = StopReason::CycleLimit;
                break;
            }
            if cancel.load(Ordering::Relaxed) {
                summary.stop_reason = StopReason::Cancelled;
                break;
            }

            let Some(report) = self.run_cycle() else {
                summary.stop_reason = StopReason::Idle;
                break;
            };

            summary.cycles += 1;
            match report.outcome {
                SliceOutcome::Completed(_) => summary.completions += 1,
                SliceOutcome::Yielded => summary.yields += 1,
                SliceOutcome::Failed(_) => summary.failures += 1,
            }
        }

        info!(
            cycles = summary.cycles,
            yields = summary.yields,
            completions = summary.completions,
            failures = summary.failures,
            stop_reason = ?summary.stop_reason,
            "Scheduling loop stopped"
        );

        summary
    }

    /// Ids of the partitions in the ring, in rotation order.
    pub fn active_ids(&self) -> Vec<PartitionId> {
        self.registry
            .iter()
            .filter(|partition| !partition.is_retired())
            .map(Partition::id)
            .collect()
    }

    /// Current ring position.
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Partition in slot `id`.
    ///
    /// # Errors
    ///
    /// `InvalidId` or `NotLoaded`.
    pub fn partition(&self, id: PartitionId) -> Result<&Partition<E>, PartitionError> {
        self.registry.lookup(id)
    }

    /// Fuel accounting of partition `id`, if observable.
    ///
    /// # Errors
    ///
    /// `InvalidId` or `NotLoaded`.
    pub fn fuel_report(&self, id: PartitionId) -> Result<Option<FuelReport>, PartitionError> {
        Ok(self.registry.lookup(id)?.fuel_report(&self.engine))
    }

    /// The partition registry.
    pub fn registry(&self) -> &PartitionRegistry<E> {
        &self.registry
    }

    /// The execution engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Lifetime counters.
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Release every partition, then the engine. Returns how many partitions
    /// were released.
    pub fn shutdown(self) -> usize {
        let Self {
            mut registry,
            engine,
            ..
        } = self;

        let released = registry.teardown_all();
        drop(registry);
        drop(engine);

        info!(released, "Scheduler shut down");
        released
    }
}

/// Run one slice and apply a refill if the call completed.
fn drive<E: ExecutionEngine>(
    engine: &E,
    partition: &mut Partition<E>,
    stats: &mut SchedulerStats,
) -> SliceOutcome {
    let outcome = partition.run_slice(engine);
    stats.slices += 1;

    if outcome.is_completed() && partition.fuel_manager().refills_on_complete() {
        match partition.refill(engine) {
            Ok(injection) => {
                stats.refills += 1;
                debug!(
                    partition_id = partition.id(),
                    top_up = injection.top_up,
                    "Fuel refilled after completion"
                );
            }
            Err(e) => warn!(partition_id = partition.id(), error = %e, "Refill failed"),
        }
    }

    outcome
}

impl<E: ExecutionEngine> std::fmt::Debug for Scheduler<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("registry", &self.registry)
            .field("current", &self.current)
            .field("on_completed", &self.on_completed)
            .field("on_failed", &self.on_failed)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

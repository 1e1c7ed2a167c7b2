//! Partition registry and fuel-sliced cooperative scheduler.
//!
//! Everything here is generic over [`fuelslice_core::ExecutionEngine`], so
//! the same scheduler drives Wasmtime in production and the simulated engine
//! in tests.
//!
//! - [`Partition`]: One isolated guest program and its resumable call
//! - [`PartitionRegistry`]: Fixed slot table of partitions
//! - [`Scheduler`]: Round-robin loop over the registry
//! - [`FuelManager`]: Budget and yield policy of one partition
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::AtomicBool;
//!
//! use fuelslice_common::SchedulerConfig;
//! use fuelslice_core::SimEngine;
//! use fuelslice_sched::{EntryPoint, FuelManager, FuelPolicy, Scheduler};
//!
//! let mut scheduler = Scheduler::new(SimEngine::new(), &SchedulerConfig::default()).unwrap();
//! scheduler
//!     .load_partition(0, b"sim work=250 result=55", EntryPoint::default())
//!     .unwrap();
//! scheduler
//!     .inject_fuel(0, FuelManager::new(1_000, FuelPolicy::FixedQuantum(100)))
//!     .unwrap();
//!
//! let summary = scheduler.run(Some(3), &AtomicBool::new(false));
//! assert_eq!(summary.yields, 2);
//! assert_eq!(summary.completions, 1);
//! assert_eq!(scheduler.shutdown(), 1);
//! ```

pub mod fuel;
pub mod partition;
pub mod registry;
pub mod scheduler;

pub use fuel::{FuelManager, FuelPolicy, Injection};
pub use partition::{EntryPoint, FuelReport, Partition, PartitionStats, SliceOutcome};
pub use registry::PartitionRegistry;
pub use scheduler::{RunSummary, Scheduler, SchedulerStats, SliceReport, StopReason};

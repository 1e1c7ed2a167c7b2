//! Common types, errors, and configuration for fuelslice.
//!
//! This crate provides shared functionality used across the fuelslice workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for the engine, scheduler and fuel policy
//! - The [`Value`] type exchanged with guest entry points

pub mod config;
pub mod config_file;
pub mod error;
pub mod value;

pub use config::{Disposition, EngineConfig, FuelConfig, RuntimeConfig, SchedulerConfig};
pub use config_file::{ConfigFile, ConfigFileError, PartitionEntry};
pub use error::{CallFault, EngineError, ErrorClass, PartitionError, SliceFailure};
pub use value::Value;

/// Identifier of a partition slot, in `[0, max_partitions)`.
pub type PartitionId = usize;

//! Error types for fuelslice.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`PartitionError`]: Failures of partition setup and management operations
//! - [`SliceFailure`]: Why a single scheduling slice reported `Failed`
//! - [`CallFault`]: How an in-flight guest call ended abnormally
//! - [`EngineError`]: Errors returned by an execution engine adapter

use std::io;

use thiserror::Error;

use crate::PartitionId;

/// Coarse classification of failures.
///
/// The class decides how a caller reacts: configuration errors are rejected
/// before anything is allocated, resource errors leave no partial partition
/// behind, lookup and execution failures are local to one slice, and fatal
/// engine errors abort startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Invalid id, occupied slot, or an operation not allowed in the current state.
    Config,
    /// Compile, context allocation, instantiation, or fuel configuration failure.
    Resource,
    /// Exported entry point missing or not a function.
    Lookup,
    /// Trap, fuel exhaustion, or engine error during a call.
    Execution,
    /// The engine itself could not be created or is unusable.
    EngineFatal,
}

/// Errors from partition setup and management.
///
/// Every variant that concerns a single partition carries its id so that a
/// caller can decide whether to retry loading that partition alone.
#[derive(Error, Debug)]
pub enum PartitionError {
    /// The partition id is outside `[0, max)`.
    #[error("Invalid partition id {partition_id} (max {max})")]
    InvalidId {
        /// The rejected id.
        partition_id: PartitionId,
        /// Number of slots in the registry.
        max: usize,
    },

    /// The slot is already loaded.
    #[error("Partition {partition_id} already loaded")]
    SlotOccupied {
        /// The occupied slot.
        partition_id: PartitionId,
    },

    /// Nothing is loaded in the slot.
    #[error("Partition {partition_id} not loaded")]
    NotLoaded {
        /// The empty slot.
        partition_id: PartitionId,
    },

    /// Fuel cannot be injected while a call is suspended mid-flight.
    #[error("Partition {partition_id} has a call in flight")]
    CallInFlight {
        /// The busy partition.
        partition_id: PartitionId,
    },

    /// The module binary could not be read.
    #[error("Failed to read module for partition {partition_id} from '{path}': {source}")]
    LoadIo {
        /// Target partition.
        partition_id: PartitionId,
        /// Path that failed.
        path: String,
        #[source]
        source: io::Error,
    },

    /// The engine rejected the module binary.
    #[error("Compilation failed for partition {partition_id}: {reason}")]
    CompileFailed {
        /// Target partition.
        partition_id: PartitionId,
        /// Description of the compilation failure.
        reason: String,
    },

    /// A fresh execution context could not be allocated.
    #[error("Context allocation failed for partition {partition_id}: {reason}")]
    ContextFailed {
        /// Target partition.
        partition_id: PartitionId,
        /// Description of the failure.
        reason: String,
    },

    /// Instantiation failed or trapped.
    #[error("Instantiation failed for partition {partition_id}: {reason}")]
    InstantiateFailed {
        /// Target partition.
        partition_id: PartitionId,
        /// Description of the failure.
        reason: String,
    },

    /// Setting the fuel counter or the yield interval failed.
    #[error("Fuel configuration failed for partition {partition_id}: {reason}")]
    FuelConfigFailed {
        /// Target partition.
        partition_id: PartitionId,
        /// Description of the failure.
        reason: String,
    },

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// The engine could not be created.
    #[error("Engine failure: {reason}")]
    EngineFatal {
        /// Description of the failure.
        reason: String,
    },
}

impl PartitionError {
    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a new `EngineFatal` error.
    pub fn engine_fatal(reason: impl Into<String>) -> Self {
        Self::EngineFatal {
            reason: reason.into(),
        }
    }

    /// Attach a partition id to an adapter error raised during setup.
    pub fn from_engine(partition_id: PartitionId, err: EngineError) -> Self {
        match err {
            EngineError::Compile { reason } => Self::CompileFailed {
                partition_id,
                reason,
            },
            EngineError::Context { reason } => Self::ContextFailed {
                partition_id,
                reason,
            },
            EngineError::Instantiate { reason } => Self::InstantiateFailed {
                partition_id,
                reason,
            },
            EngineError::Fuel { reason } => Self::FuelConfigFailed {
                partition_id,
                reason,
            },
        }
    }

    /// Failure class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidId { .. }
            | Self::SlotOccupied { .. }
            | Self::NotLoaded { .. }
            | Self::CallInFlight { .. }
            | Self::InvalidConfig { .. } => ErrorClass::Config,
            Self::LoadIo { .. }
            | Self::CompileFailed { .. }
            | Self::ContextFailed { .. }
            | Self::InstantiateFailed { .. }
            | Self::FuelConfigFailed { .. } => ErrorClass::Resource,
            Self::EngineFatal { .. } => ErrorClass::EngineFatal,
        }
    }

    /// The partition this error concerns, if any.
    pub fn partition_id(&self) -> Option<PartitionId> {
        match self {
            Self::InvalidId { partition_id, .. }
            | Self::SlotOccupied { partition_id }
            | Self::NotLoaded { partition_id }
            | Self::CallInFlight { partition_id }
            | Self::LoadIo { partition_id, .. }
            | Self::CompileFailed { partition_id, .. }
            | Self::ContextFailed { partition_id, .. }
            | Self::InstantiateFailed { partition_id, .. }
            | Self::FuelConfigFailed { partition_id, .. } => Some(*partition_id),
            Self::InvalidConfig { .. } | Self::EngineFatal { .. } => None,
        }
    }
}

/// Errors returned by an execution engine adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The module binary was rejected.
    #[error("Compilation failed: {reason}")]
    Compile {
        /// Description of the failure.
        reason: String,
    },

    /// An execution context could not be created.
    #[error("Context creation failed: {reason}")]
    Context {
        /// Description of the failure.
        reason: String,
    },

    /// Instantiation failed or trapped.
    #[error("Instantiation failed: {reason}")]
    Instantiate {
        /// Description of the failure.
        reason: String,
    },

    /// Fuel or yield interval could not be configured.
    #[error("Fuel configuration failed: {reason}")]
    Fuel {
        /// Description of the failure.
        reason: String,
    },
}

impl EngineError {
    /// Create a new `Compile` error.
    pub fn compile(reason: impl Into<String>) -> Self {
        Self::Compile {
            reason: reason.into(),
        }
    }

    /// Create a new `Instantiate` error.
    pub fn instantiate(reason: impl Into<String>) -> Self {
        Self::Instantiate {
            reason: reason.into(),
        }
    }

    /// Create a new `Fuel` error.
    pub fn fuel(reason: impl Into<String>) -> Self {
        Self::Fuel {
            reason: reason.into(),
        }
    }
}

/// How an in-flight call ended abnormally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallFault {
    /// The fuel counter reached zero.
    #[error("Fuel exhausted: CPU limit exceeded")]
    OutOfFuel,

    /// The guest trapped.
    #[error("Wasm trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
        /// Trap code if available.
        code: Option<String>,
    },

    /// The engine reported an error that is not a guest trap.
    #[error("Engine error: {reason}")]
    Engine {
        /// Description of the error.
        reason: String,
    },
}

impl CallFault {
    /// Create a new `Trap` fault without a code.
    pub fn trap(message: impl Into<String>) -> Self {
        Self::Trap {
            message: message.into(),
            code: None,
        }
    }

    /// Create a new `Engine` fault.
    pub fn engine(reason: impl Into<String>) -> Self {
        Self::Engine {
            reason: reason.into(),
        }
    }
}

/// Reason a slice reported `Failed`.
///
/// Slice failures are local to one partition: the scheduling loop carries on
/// with the other partitions and the failed one stays instantiated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SliceFailure {
    /// The entry point is not exported or is not a function.
    #[error("Entry point '{name}' not found or not a function")]
    EntryPointNotFound {
        /// The requested export name.
        name: String,
    },

    /// The call faulted.
    #[error(transparent)]
    Fault(#[from] CallFault),
}

impl SliceFailure {
    /// Failure class of this slice failure.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::EntryPointNotFound { .. } => ErrorClass::Lookup,
            Self::Fault(_) => ErrorClass::Execution,
        }
    }

    /// Returns `true` if the call ran out of fuel.
    pub fn is_out_of_fuel(&self) -> bool {
        matches!(self, Self::Fault(CallFault::OutOfFuel))
    }
}

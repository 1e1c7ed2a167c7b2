//! Execution engines for fuelslice.
//!
//! The scheduler only sees [`ExecutionEngine`]. This crate ships two
//! implementations of it:
//!
//! - [`InstanceRunner`]: Wasmtime, one `Store<PartitionContext>` per
//!   partition, resumable calls as boxed futures
//! - [`SimEngine`]: a deterministic fake that burns one fuel unit per unit
//!   of simulated work, for tests
//!
//! Supporting Wasmtime pieces:
//!
//! - [`WasmEngine`]: the shared fuel-metered engine
//! - [`CompiledModule`]: a module compiled from binary or WAT
//! - [`PartitionContext`]: store data, including guest logs
//!
//! # Call lifecycle
//!
//! ```text
//!  Context ──start_call──► Call ──poll──► Suspended(Call) ──poll──► ...
//!     ▲                                        │
//!     └──────── Finished { context, outcome } ◄┘
//! ```

pub mod adapter;
pub mod engine;
pub mod instance;
pub mod module;
pub mod sim;
pub mod store;

pub use adapter::{CallProgress, ExecutionEngine};
pub use engine::WasmEngine;
pub use instance::{InstanceRunner, WasmtimeCall};
pub use module::{CompiledModule, ModuleFormat};
pub use sim::{SimEngine, SimProgram};
pub use store::{LogEntry, LogLevel, PartitionContext};

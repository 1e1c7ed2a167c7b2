//! Host side of fuelslice partitions.
//!
//! [`create_runner`] builds the Wasmtime [`InstanceRunner`] the scheduler
//! drives, with every host import linked:
//!
//! - [`logging`]: `env.log`, guest log lines recorded per partition
//!
//! [`InstanceRunner`]: fuelslice_core::InstanceRunner

pub mod linker;
pub mod logging;

pub use linker::{create_runner, register_all};
pub use logging::GuestMemoryError;

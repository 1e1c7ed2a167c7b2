//! `env.log`: guest logging.
//!
//! A guest log line is kept in the partition's store data and forwarded to
//! `tracing` under the `guest` target, tagged with the partition id.

use std::ops::Range;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use wasmtime::{Caller, Extern};

use fuelslice_core::{LogLevel, PartitionContext};

/// Why a guest log line was dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuestMemoryError {
    /// Negative pointer or length, or `ptr + len` overflows.
    #[error("invalid range ptr={ptr} len={len}")]
    BadRange {
        /// Pointer passed by the guest.
        ptr: i32,
        /// Length passed by the guest.
        len: i32,
    },

    /// The guest does not export `memory`.
    #[error("guest exports no memory")]
    NoMemory,

    /// The range lies past the end of linear memory.
    #[error("range {}..{} outside memory of {memory_size} bytes", .range.start, .range.end)]
    OutOfBounds {
        /// Requested byte range.
        range: Range<usize>,
        /// Size of linear memory in bytes.
        memory_size: usize,
    },
}

/// Byte range `[ptr, ptr + len)` of guest memory.
pub fn guest_range(ptr: i32, len: i32) -> Result<Range<usize>, GuestMemoryError> {
    let bad = || GuestMemoryError::BadRange { ptr, len };
    let start = usize::try_from(ptr).map_err(|_| bad())?;
    let len = usize::try_from(len).map_err(|_| bad())?;
    let end = start.checked_add(len).ok_or_else(bad)?;
    Ok(start..end)
}

/// Copy a message out of the calling guest's exported `memory`.
pub fn read_guest_message(
    caller: &mut Caller<'_, PartitionContext>,
    ptr: i32,
    len: i32,
) -> Result<String, GuestMemoryError> {
    let range = guest_range(ptr, len)?;
    let memory = caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or(GuestMemoryError::NoMemory)?;

    let data = memory.data(&*caller);
    let memory_size = data.len();
    data.get(range.clone())
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .ok_or(GuestMemoryError::OutOfBounds { range, memory_size })
}

/// Record a guest log line and forward it to `tracing`.
pub fn record(ctx: &mut PartitionContext, level: LogLevel, message: String) {
    let partition_id = ctx.partition_id;
    match level {
        LogLevel::Debug => debug!(target: "guest", partition_id, "{message}"),
        LogLevel::Info => info!(target: "guest", partition_id, "{message}"),
        LogLevel::Warn => warn!(target: "guest", partition_id, "{message}"),
        LogLevel::Error => error!(target: "guest", partition_id, "{message}"),
    }
    ctx.log(level, message);
}

/// Body of the `env.log(level, ptr, len)` import.
pub fn host_log(mut caller: Caller<'_, PartitionContext>, level: i32, ptr: i32, len: i32) {
    match read_guest_message(&mut caller, ptr, len) {
        Ok(message) => record(caller.data_mut(), LogLevel::from_guest(level), message),
        Err(e) => warn!(
            partition_id = caller.data().partition_id,
            error = %e,
            "Guest log dropped"
        ),
    }
}

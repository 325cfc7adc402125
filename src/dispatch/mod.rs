//! # Element-wise Dispatch
//!
//! Applies a compiled function to every index of a range:
//!
//! `out[i] = f(arg0[i], arg1[i], ...)` for `i` in `[start, end)`
//!
//! - [`apply`] runs on the calling thread.
//! - [`dispatch_parallel`] splits the range across pool workers and returns a
//!   [`Batch`] that must be joined to get the buffers back.

pub mod partition;
pub mod scheduler;
#[cfg(test)]
mod test;

pub use partition::{partition, IndexSet, PartitionMode};
pub use scheduler::{dispatch_parallel, join, Batch};

use crate::buffers::{Buffers, RawArgs};
use crate::compiler::FunctionHandle;
use crate::error::{ConfigError, Result};

/// Apply `handle` to every index in `[start, end)`, writing the output column.
pub fn apply(handle: &FunctionHandle, buffers: &mut Buffers, start: usize, end: usize) -> Result<()> {
    buffers.validate(handle.signature(), start, end)?;
    let raw = buffers.raw();
    run(handle, &raw, &IndexSet::Range { start, end });
    Ok(())
}

/// Apply `handle` to `first, first+step, ...` below `end`.
pub fn apply_strided(
    handle: &FunctionHandle,
    buffers: &mut Buffers,
    first: usize,
    end: usize,
    step: usize,
) -> Result<()> {
    if step == 0 {
        return Err(ConfigError::InvalidSetting {
            key: "step".to_string(),
            value: "0".to_string(),
        }
        .into());
    }
    buffers.validate(handle.signature(), first.min(end), end)?;
    let raw = buffers.raw();
    run(handle, &raw, &IndexSet::Strided { first, end, step });
    Ok(())
}

/// Run the kernel over one index set. Bounds must already be validated.
pub(crate) fn run(handle: &FunctionHandle, raw: &RawArgs, set: &IndexSet) {
    let (first, end, step) = set.bounds();
    if first >= end {
        return;
    }
    let kernel = handle.kernel();
    // SAFETY: every pointer in `raw` addresses a column of at least `end`
    // elements of the type the kernel was generated for (checked by
    // `Buffers::validate`), and no other thread writes the indices of `set`.
    unsafe {
        kernel(
            raw.inputs.as_ptr(),
            raw.output,
            first as i64,
            end as i64,
            step as i64,
        );
    }
}

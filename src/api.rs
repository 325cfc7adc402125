//! The four-call surface: make, call, call in parallel, wait.
//!
//! These run on the process-wide [`Compiler`](crate::compiler::Compiler) and
//! [`WorkerPool`](crate::utils::WorkerPool). Configure either with its
//! `init_global` before the first call, or let them come up from the
//! environment.
//!
//! ```ignore
//! use generic_jit::prelude::*;
//!
//! let f = make_c_function(1, "return x*x;", &[("double", "x")], "double")?;
//! let batch = call_c_function_parallel(&f, Buffers::in_place(vec![0.0, 1.0, 2.0, 3.0]), 0, 4, 2, 2)?;
//! let buffers = wait_for_parallel_finish(batch)?;
//! assert_eq!(buffers.output_as::<f64>(), Some(&[0.0, 1.0, 4.0, 9.0][..]));
//! ```

use crate::buffers::Buffers;
use crate::compiler::{self, FunctionHandle};
use crate::dispatch::{self, Batch, PartitionMode};
use crate::error::{ConfigError, Result};
use crate::types::Signature;
use crate::utils::pool;

/// How call arguments are laid out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgLayout {
    /// One column per parameter plus an output column (layout 1).
    ColumnTuple,
}

impl ArgLayout {
    pub fn from_code(code: i64) -> std::result::Result<Self, ConfigError> {
        match code {
            1 => Ok(ArgLayout::ColumnTuple),
            other => Err(ConfigError::UnknownLayout(other)),
        }
    }
}

/// Compile `source` with the given `(type, name)` parameters and return type.
pub fn make_c_function(
    version: i64,
    source: &str,
    params: &[(&str, &str)],
    return_type: &str,
) -> Result<FunctionHandle> {
    ArgLayout::from_code(version)?;
    let signature = Signature::parse(params, return_type)?;
    compiler::global()?.compile(source, &signature)
}

/// Apply `function` over `[start, end)` on the calling thread.
pub fn call_c_function(
    function: &FunctionHandle,
    buffers: &mut Buffers,
    start: usize,
    end: usize,
) -> Result<()> {
    dispatch::apply(function, buffers, start, end)
}

/// Apply `function` over `[start, end)` with `num_threads` pool tasks.
///
/// `chunk_mode` 1 interleaves indices between tasks, 2 gives each task a
/// contiguous chunk.
pub fn call_c_function_parallel(
    function: &FunctionHandle,
    buffers: Buffers,
    start: usize,
    end: usize,
    num_threads: usize,
    chunk_mode: i64,
) -> Result<Batch> {
    let mode = PartitionMode::from_code(chunk_mode)?;
    dispatch::dispatch_parallel(pool::global()?, function, buffers, start, end, num_threads, mode)
}

/// Block until `batch` is done and return its buffers.
pub fn wait_for_parallel_finish(batch: Batch) -> Result<Buffers> {
    dispatch::join(batch)
}

//! # Generic-JIT
//!
//! Compile a scalar C snippet at runtime and apply it element-wise over numeric
//! columns, either on the calling thread or split across a worker pool.
//!
//! - [`compiler`] turns a snippet and a typed signature into a [`FunctionHandle`]
//! - [`dispatch`] applies a handle serially or in parallel
//! - [`api`] exposes the four-call surface on process-wide instances

pub mod api;
pub mod buffers;
pub mod compiler;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod types;
pub mod utils;

pub use api::{
    call_c_function, call_c_function_parallel, make_c_function, wait_for_parallel_finish,
    ArgLayout,
};
pub use buffers::{Arg, Buffers, Column};
pub use compiler::{Compiler, FunctionHandle};
pub use config::{CompilerConfig, PoolConfig};
pub use dispatch::{Batch, PartitionMode};
pub use error::{ConfigError, JitError, RangeError, Result};
pub use types::{Element, Param, ScalarType, Signature};
pub use utils::WorkerPool;

/// Re-export commonly used items
pub mod prelude {
    pub use crate::api::{
        call_c_function, call_c_function_parallel, make_c_function, wait_for_parallel_finish,
    };
    pub use crate::buffers::{Buffers, Column};
    pub use crate::compiler::FunctionHandle;
    pub use crate::dispatch::PartitionMode;
    pub use crate::error::{JitError, Result};
}

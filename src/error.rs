//! Error types shared by the compiler, the dispatchers and the worker pool.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::ScalarType;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, JitError>;

#[derive(Debug, Error)]
pub enum JitError {
    /// The snippet was rejected, either by the lexical checks or by the toolchain.
    #[error("compile error:\n{diagnostic}")]
    Compile { diagnostic: String },

    #[error("failed to run C toolchain `{program}`: {source}")]
    Toolchain {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to load compiled artifact {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    #[error("range error: {0}")]
    Range(#[from] RangeError),

    /// First failure observed while joining a parallel batch.
    #[error("worker {worker} failed: {message}")]
    Worker { worker: usize, message: String },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("worker pool is shut down")]
    PoolClosed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl JitError {
    pub(crate) fn compile(diagnostic: impl Into<String>) -> Self {
        JitError::Compile {
            diagnostic: diagnostic.into(),
        }
    }
}

/// Index and buffer-length precondition violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("start {start} is past end {end}")]
    Inverted { start: usize, end: usize },

    #[error("end {end} exceeds buffer length {len}")]
    OutOfBounds { end: usize, len: usize },

    #[error("{buffer} has length {found}, expected {expected}")]
    LengthMismatch {
        buffer: String,
        expected: usize,
        found: usize,
    },

    #[error("at least one worker thread is required")]
    NoWorkers,
}

/// Signature, binding and settings problems detected before any work starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported element type `{0}`")]
    UnsupportedType(String),

    #[error("invalid parameter name `{0}`")]
    InvalidName(String),

    #[error("parameter `{0}` is declared more than once")]
    DuplicateParam(String),

    #[error("function takes {expected} argument(s), {found} bound")]
    ArityMismatch { expected: usize, found: usize },

    #[error("argument {position} is {found}, function expects {expected}")]
    ArgumentType {
        position: usize,
        expected: ScalarType,
        found: ScalarType,
    },

    #[error("output buffer is {found}, function returns {expected}")]
    OutputType {
        expected: ScalarType,
        found: ScalarType,
    },

    #[error("unknown argument layout {0}")]
    UnknownLayout(i64),

    #[error("unknown partition mode {0}")]
    UnknownPartitionMode(i64),

    #[error("invalid value `{value}` for {key}")]
    InvalidSetting { key: String, value: String },

    #[error("{0} is already initialized")]
    AlreadyInitialized(&'static str),
}

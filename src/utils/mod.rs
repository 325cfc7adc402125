//! Runtime support: the worker pool and CPU pinning for its threads.

pub mod cpu_affinity;
pub mod pool;

pub use cpu_affinity::CpuPinGuard;
pub use pool::WorkerPool;

/// C compiler name detected at build time
pub const C_COMPILER_NAME: Option<&str> = option_env!("C_COMPILER_NAME");

/// Whether `build.rs` found a working C toolchain for the JIT tests.
#[cfg(test)]
pub(crate) fn toolchain_available() -> bool {
    cfg!(jit_toolchain_detected)
}

/// Route `log` output to the test harness (`RUST_LOG=debug cargo test`).
#[cfg(test)]
pub(crate) fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

//! Fixed-size worker pool fed by a task queue.
//!
//! Threads are created once, when the pool is built, and pull boxed jobs from
//! a shared crossbeam channel until the pool is dropped.

use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};

use super::cpu_affinity::{core_for_worker, CpuPinGuard};
use crate::config::PoolConfig;
use crate::error::{ConfigError, JitError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    config: PoolConfig,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let (sender, receiver) = channel::unbounded::<Job>();

        let mut workers = Vec::with_capacity(config.threads);
        for index in 0..config.threads {
            let receiver = receiver.clone();
            let core = if config.pin_workers {
                core_for_worker(index)
            } else {
                None
            };
            let handle = thread::Builder::new()
                .name(format!("{}-{}", config.name_prefix, index))
                .spawn(move || worker_loop(receiver, core))?;
            workers.push(handle);
        }

        log::debug!(
            "worker pool started with {} thread(s){}",
            config.threads,
            if config.pin_workers { ", pinned" } else { "" }
        );

        Ok(Self {
            sender: Some(sender),
            workers,
            config,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(PoolConfig::from_env()?)
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Queue `job` for the next idle worker.
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(JitError::PoolClosed)?;
        sender.send(Box::new(job)).map_err(|_| JitError::PoolClosed)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the queue lets every worker finish what is queued and exit.
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        log::debug!("worker pool stopped");
    }
}

fn worker_loop(receiver: Receiver<Job>, core: Option<usize>) {
    let _pin = core.map(CpuPinGuard::with_core);
    while let Ok(job) = receiver.recv() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            log::error!(
                "job panicked on {}",
                thread::current().name().unwrap_or("worker")
            );
        }
    }
}

static GLOBAL: OnceLock<WorkerPool> = OnceLock::new();
// Held while the global is built so two first callers never both construct one.
static GLOBAL_INIT: parking_lot::Mutex<()> = parking_lot::const_mutex(());

/// Install the process-wide pool. Fails if it already exists.
pub fn init_global(config: PoolConfig) -> Result<&'static WorkerPool> {
    let _guard = GLOBAL_INIT.lock();
    if GLOBAL.get().is_some() {
        return Err(ConfigError::AlreadyInitialized("global worker pool").into());
    }
    let pool = WorkerPool::new(config)?;
    Ok(GLOBAL.get_or_init(|| pool))
}

/// The process-wide pool, created from the environment on first use.
pub fn global() -> Result<&'static WorkerPool> {
    if let Some(pool) = GLOBAL.get() {
        return Ok(pool);
    }
    let _guard = GLOBAL_INIT.lock();
    if let Some(pool) = GLOBAL.get() {
        return Ok(pool);
    }
    let pool = WorkerPool::from_env()?;
    Ok(GLOBAL.get_or_init(|| pool))
}

//! Parallel dispatch onto the worker pool.
//!
//! A dispatch moves its [`Buffers`] into a [`Batch`]. The workers write the
//! output column through raw pointers while the batch holds the only owner,
//! so nothing can observe the columns until [`Batch::join`] hands them back.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, TryRecvError};

use super::partition::{partition, PartitionMode};
use super::run;
use crate::buffers::Buffers;
use crate::compiler::FunctionHandle;
use crate::error::{JitError, RangeError, Result};
use crate::utils::pool::WorkerPool;

static NEXT_BATCH: AtomicU64 = AtomicU64::new(1);

struct WorkerOutcome {
    worker: usize,
    result: std::result::Result<(), String>,
}

/// Work in flight on the pool. Join it to get the buffers back.
///
/// Dropping a batch without joining blocks until every worker is done with
/// the buffers, then frees them.
#[must_use = "a batch must be joined to get its buffers back"]
pub struct Batch {
    id: u64,
    buffers: Option<Buffers>,
    results: Receiver<WorkerOutcome>,
    outstanding: usize,
    reported: Vec<bool>,
    failure: Option<JitError>,
}

impl Batch {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of tasks the range was split into.
    pub fn workers(&self) -> usize {
        self.reported.len()
    }

    /// Whether every task has reported, without blocking.
    pub fn is_finished(&mut self) -> bool {
        while self.outstanding > 0 {
            match self.results.try_recv() {
                Ok(outcome) => self.record(outcome),
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => self.abandon(),
            }
        }
        true
    }

    /// Block until every task has finished, then return the buffers or the
    /// first failure.
    pub fn join(mut self) -> Result<Buffers> {
        self.wait();
        if let Some(err) = self.failure.take() {
            return Err(err);
        }
        log::debug!("batch {} joined", self.id);
        self.buffers.take().ok_or_else(|| JitError::Worker {
            worker: 0,
            message: "batch buffers already released".to_string(),
        })
    }

    fn wait(&mut self) {
        while self.outstanding > 0 {
            match self.results.recv() {
                Ok(outcome) => self.record(outcome),
                Err(_) => self.abandon(),
            }
        }
    }

    fn record(&mut self, outcome: WorkerOutcome) {
        self.outstanding -= 1;
        if let Some(flag) = self.reported.get_mut(outcome.worker) {
            *flag = true;
        }
        if let Err(message) = outcome.result {
            log::error!("batch {} worker {} failed: {}", self.id, outcome.worker, message);
            self.fail(JitError::Worker {
                worker: outcome.worker,
                message,
            });
        }
    }

    // Every sender is gone: the remaining tasks were dropped without running.
    fn abandon(&mut self) {
        let worker = self.reported.iter().position(|done| !done).unwrap_or(0);
        log::error!(
            "batch {}: {} task(s) dropped before completion",
            self.id,
            self.outstanding
        );
        self.outstanding = 0;
        self.fail(JitError::Worker {
            worker,
            message: "worker task dropped before completion".to_string(),
        });
    }

    fn fail(&mut self, err: JitError) {
        if self.failure.is_none() {
            self.failure = Some(err);
        }
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("id", &self.id)
            .field("workers", &self.workers())
            .field("outstanding", &self.outstanding)
            .finish()
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        if self.outstanding > 0 {
            log::debug!("batch {} dropped before join, waiting for workers", self.id);
            self.wait();
        }
    }
}

/// Split `[start, end)` into `threads` index sets and run one pool task per set.
///
/// All validation happens before anything is queued.
pub fn dispatch_parallel(
    pool: &WorkerPool,
    handle: &FunctionHandle,
    mut buffers: Buffers,
    start: usize,
    end: usize,
    threads: usize,
    mode: PartitionMode,
) -> Result<Batch> {
    if threads == 0 {
        return Err(RangeError::NoWorkers.into());
    }
    buffers.validate(handle.signature(), start, end)?;

    let sets = partition(start, end, threads, mode);
    log::trace!("{mode} partition of {start}..{end}: {sets:?}");

    let raw = Arc::new(buffers.raw());
    let tasks = sets
        .into_iter()
        .map(|set| {
            let handle = handle.clone();
            let raw = Arc::clone(&raw);
            move || run(&handle, &raw, &set)
        })
        .collect();
    launch(pool, buffers, tasks)
}

/// Wait for `batch` and take its buffers back.
pub fn join(batch: Batch) -> Result<Buffers> {
    batch.join()
}

/// Queue one pool task per element of `tasks`, each reporting to the returned batch.
pub(crate) fn launch<F>(pool: &WorkerPool, buffers: Buffers, tasks: Vec<F>) -> Result<Batch>
where
    F: FnOnce() + Send + 'static,
{
    let (sender, results) = channel::unbounded();
    let mut batch = Batch {
        id: NEXT_BATCH.fetch_add(1, Ordering::Relaxed),
        buffers: Some(buffers),
        results,
        outstanding: 0,
        reported: vec![false; tasks.len()],
        failure: None,
    };

    for (worker, task) in tasks.into_iter().enumerate() {
        let task_sender = sender.clone();
        let queued = pool.execute(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(task)).map_err(panic_message);
            let _ = task_sender.send(WorkerOutcome { worker, result });
        });
        if let Err(err) = queued {
            // Tasks already queued still hold pointers into the buffers.
            drop(sender);
            batch.wait();
            return Err(err);
        }
        batch.outstanding += 1;
    }

    log::debug!("batch {} queued {} task(s)", batch.id, batch.outstanding);
    Ok(batch)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

//! Job queue and result channel shared by pool workers.

use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Message sent from workers to the coordinator.
#[derive(Debug)]
pub enum WorkerMessage<R> {
    /// A job finished. `job` is its index in submission order.
    Completed {
        worker_id: usize,
        job: usize,
        result: R,
    },
    /// Worker drained the queue and is exiting.
    Finished { worker_id: usize, jobs_completed: u64 },
}

/// Channel endpoints for a worker.
pub struct WorkerChannels<J, R> {
    /// Jobs to run, tagged with their submission index.
    pub jobs: Receiver<(usize, J)>,
    /// Send messages to coordinator.
    pub to_coordinator: Sender<WorkerMessage<R>>,
}

/// Channel endpoints for the coordinator.
pub struct CoordinatorChannels<J, R> {
    /// Enqueue jobs for any idle worker.
    pub to_workers: Sender<(usize, J)>,
    /// Receive messages from workers.
    pub from_workers: Receiver<WorkerMessage<R>>,
}

/// Create a job queue shared by `num_workers` workers and one result channel.
pub fn create_channels<J, R>(num_workers: usize) -> (CoordinatorChannels<J, R>, Vec<WorkerChannels<J, R>>) {
    // Both directions unbounded: the whole batch is queued up front
    let (job_tx, job_rx) = unbounded();
    let (result_tx, result_rx) = unbounded();

    let workers = (0..num_workers)
        .map(|_| WorkerChannels {
            jobs: job_rx.clone(),
            to_coordinator: result_tx.clone(),
        })
        .collect();

    let coordinator = CoordinatorChannels {
        to_workers: job_tx,
        from_workers: result_rx,
    };
    (coordinator, workers)
}

/// State shared by all workers behind a single mutex.
///
/// A worker that panics while holding the lock does not poison the state for
/// the others; the guard is recovered from the poison error.
#[derive(Debug, Default)]
pub struct SharedState<T> {
    inner: Mutex<T>,
}

impl<T> SharedState<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access to the state.
    pub fn with<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        f(&mut self.lock())
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

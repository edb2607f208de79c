//! Pool coordinator that manages worker threads.

use crate::error::Result;
use crate::search::parallel::channel::{
    CoordinatorChannels, WorkerChannels, WorkerMessage, create_channels,
};
use crate::search::parallel::config::PoolConfig;
use std::time::{Duration, Instant};
use tracing::debug;

/// Result of running a batch of jobs.
#[derive(Debug)]
pub struct PoolResult<R> {
    /// One result per job, in submission order.
    pub results: Vec<R>,
    /// Jobs completed by each worker.
    pub worker_statistics: Vec<(usize, u64)>,
    pub elapsed_time: Duration,
}

/// Run `work` over every job on a fixed-size pool of threads.
///
/// Jobs are pulled from a shared queue, so there is no ordering guarantee
/// between them; results are put back in submission order. `work` receives
/// the job's index alongside the job. A panic in any worker is re-raised
/// here once the other workers have drained the queue.
pub fn run_pool<J, R, F>(jobs: Vec<J>, config: &PoolConfig, work: F) -> Result<PoolResult<R>>
where
    J: Send,
    R: Send,
    F: Fn(usize, J) -> R + Sync,
{
    let start_time = Instant::now();
    let total = jobs.len();
    let num_workers = config.workers_for(total);
    debug!(jobs = total, workers = num_workers, "starting pool");

    let (coordinator, worker_channels) = create_channels(num_workers);
    let CoordinatorChannels {
        to_workers,
        from_workers,
    } = coordinator;
    for job in jobs.into_iter().enumerate() {
        // The receivers are alive until the workers exit, so this cannot fail
        let _ = to_workers.send(job);
    }
    // Workers exit once the closed queue drains
    drop(to_workers);

    let work = &work;
    std::thread::scope(|scope| -> Result<PoolResult<R>> {
        let mut handles = Vec::with_capacity(num_workers);
        for (worker_id, channels) in worker_channels.into_iter().enumerate() {
            let handle = std::thread::Builder::new()
                .name(format!("worker-{}", worker_id))
                .stack_size(config.stack_size)
                .spawn_scoped(scope, move || run_worker(worker_id, channels, work))?;
            handles.push(handle);
        }

        let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();
        let mut worker_statistics = Vec::with_capacity(num_workers);
        // Ends when every worker has dropped its sender
        for message in from_workers.iter() {
            match message {
                WorkerMessage::Completed { job, result, .. } => slots[job] = Some(result),
                WorkerMessage::Finished {
                    worker_id,
                    jobs_completed,
                } => worker_statistics.push((worker_id, jobs_completed)),
            }
        }

        for handle in handles {
            if let Err(panic) = handle.join() {
                std::panic::resume_unwind(panic);
            }
        }

        worker_statistics.sort_unstable();
        let elapsed_time = start_time.elapsed();
        debug!(elapsed = ?elapsed_time, "pool finished");
        Ok(PoolResult {
            results: slots.into_iter().flatten().collect(),
            worker_statistics,
            elapsed_time,
        })
    })
}

/// Worker loop: run jobs until the queue is closed and empty.
fn run_worker<J, R, F>(worker_id: usize, channels: WorkerChannels<J, R>, work: &F)
where
    F: Fn(usize, J) -> R,
{
    let mut jobs_completed = 0;
    for (job, input) in channels.jobs.iter() {
        let result = work(job, input);
        jobs_completed += 1;
        let message = WorkerMessage::Completed {
            worker_id,
            job,
            result,
        };
        if channels.to_coordinator.send(message).is_err() {
            break;
        }
    }
    let _ = channels.to_coordinator.send(WorkerMessage::Finished {
        worker_id,
        jobs_completed,
    });
}

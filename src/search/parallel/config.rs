//! Configuration for the worker pool.

/// Stack size for pool threads. Term walks recurse through long let chains.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads to spawn.
    pub num_workers: usize,
    /// Stack size of each worker thread in bytes.
    pub stack_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get(),
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl PoolConfig {
    /// Set the number of workers (at least one).
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    /// Set the number of workers from an Option, keeping the CPU count on None.
    pub fn with_workers_option(self, num_workers: Option<usize>) -> Self {
        match num_workers {
            Some(n) => self.with_workers(n),
            None => self,
        }
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    /// Workers actually spawned for a batch of `jobs` jobs.
    pub fn workers_for(&self, jobs: usize) -> usize {
        self.num_workers.min(jobs).max(1)
    }
}

//! Fixed-size worker pool for independent synthesis jobs.
//!
//! The pool consists of:
//! - A **coordinator** that queues every job, collects results and joins the workers
//! - Multiple **workers** that pull jobs from a shared crossbeam queue
//! - **Shared state** behind a single mutex for anything workers accumulate together
//!
//! # Example
//!
//! ```ignore
//! let config = PoolConfig::default().with_workers(4);
//! let accepted = SharedState::new(Vec::new());
//! let result = run_pool(patterns, &config, |_, pattern| {
//!     let rule = synthesize(&pattern);
//!     accepted.with(|rules| rules.push(rule.clone()));
//!     rule
//! })?;
//! ```

pub mod channel;
pub mod config;
pub mod coordinator;

pub use channel::SharedState;
pub use config::PoolConfig;
pub use coordinator::run_pool;

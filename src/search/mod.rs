//! Program search
//!
//! - `symbolic`: counterexample-guided synthesis of equivalent programs and bounds
//! - `parallel`: the worker pool that runs independent synthesis jobs

pub mod config;
pub mod parallel;
pub mod result;
pub mod symbolic;

pub use config::{BoundDirection, CegisConfig};
pub use parallel::{PoolConfig, SharedState, run_pool};
pub use result::SynthesisStatistics;
pub use symbolic::Synthesizer;

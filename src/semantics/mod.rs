//! Semantics of the term language: evaluation, simplification and solving

pub mod concrete;
pub mod interval;
pub mod linear;
pub mod model;
pub mod simplify;
pub mod smt;

// Re-export main functionality
pub use concrete::{evaluate, evaluate_bool, evaluate_int};
pub use interval::Interval;
pub use simplify::{Simplifier, can_prove, simplify};
pub use smt::{SatResult, SmtSolver, SolverConfig, Z3Solver};

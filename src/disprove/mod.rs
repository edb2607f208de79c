//! Disproving boolean terms without a solver
//!
//! A goal is broken into convex pieces (no min, max or select), and each
//! piece is turned into a system of linear equalities over opaque terms.
//! A beam search then applies substitutions, eliminations and case
//! analyses, looking for a system the accumulated knowledge proves
//! infeasible. Success on every piece means the goal is identically false.
//!
//! The search is sound but incomplete: `false` only means no disproof was
//! found.

pub mod beam;
pub mod convex;
pub mod equality;
pub mod normal_form;
pub mod system;

pub use beam::{DisproveConfig, disprove, disprove_nonconvex};

/// Variables whose names start with `c` stand for constant wildcards
pub fn is_wildcard_constant(name: &str) -> bool {
    name.starts_with('c')
}

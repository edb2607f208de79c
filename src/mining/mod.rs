//! Rewrite rule mining
//!
//! - `patterns`: candidate left-hand sides drawn from corpus terms
//! - `orchestrator`: the search over those patterns and constant generalization
//! - `guard`: synthesis and verification of rule predicates
//! - `filter`: canonicalizing and pruning a rule set
//! - `reduction_order`: the order every accepted rule must decrease
//! - `matcher`: generality between left-hand sides
//! - `rules`: the rule type and its file formats
//! - `blacklist`: patterns known not to simplify

pub mod blacklist;
pub mod filter;
pub mod guard;
pub mod matcher;
pub mod orchestrator;
pub mod patterns;
pub mod reduction_order;
pub mod rules;

pub use crate::disprove::is_wildcard_constant;
pub use filter::{FilterConfig, filter_rules};
pub use guard::{GuardConfig, check_rule};
pub use orchestrator::{MiningConfig, find_rules};
pub use rules::{Rule, read_rules, write_rule_files};

/// Stand-in solvers for tests that must not depend on an installed binary
#[cfg(test)]
pub(crate) mod testing {
    use crate::ir::{Binding, Expr};
    use crate::semantics::{SatResult, SmtSolver, evaluate_bool, simplify};
    use crate::validation::{grid_inputs, input_vars};

    /// Searches every assignment of at most five variables over `[-4, 4]`.
    /// Answers unsat when nothing in the grid satisfies the goal, which is
    /// only sound for goals whose witnesses are small.
    pub struct GridSolver;

    impl SmtSolver for GridSolver {
        fn satisfy(&self, goal: &Expr, _comment: &str) -> SatResult {
            let goal = simplify(goal);
            if goal.is_true() {
                return SatResult::Sat(Binding::new());
            }
            if goal.is_false() {
                return SatResult::Unsat;
            }
            let vars = input_vars(&[&goal]);
            if vars.len() > 5 {
                return SatResult::Unknown;
            }
            grid_inputs(&vars, -4, 4)
                .into_iter()
                .find(|b| evaluate_bool(&goal, b) == Some(true))
                .map_or(SatResult::Unsat, SatResult::Sat)
        }

        fn name(&self) -> &str {
            "grid"
        }
    }

    /// Never decides anything
    pub struct UnknownSolver;

    impl SmtSolver for UnknownSolver {
        fn satisfy(&self, _goal: &Expr, _comment: &str) -> SatResult {
            SatResult::Unknown
        }

        fn name(&self) -> &str {
            "unknown"
        }
    }
}

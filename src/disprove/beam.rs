//! Beam search over constraint systems

use super::convex::decompose;
use super::is_wildcard_constant;
use super::system::{ConstraintSystem, Session};
use crate::ir::Expr;
use crate::ir::analysis::var_names;
use crate::semantics::simplify;
use std::collections::{BTreeSet, HashSet, VecDeque};
use tracing::{debug, trace};

/// Configuration for the disprover
#[derive(Debug, Clone)]
pub struct DisproveConfig {
    /// Systems kept after each expansion
    pub beam_width: usize,
    pub max_cases: usize,
    pub max_steps: usize,
    pub max_clauses: usize,
}

impl Default for DisproveConfig {
    fn default() -> Self {
        Self {
            beam_width: 16,
            max_cases: 10,
            max_steps: 2000,
            max_clauses: 256,
        }
    }
}

impl DisproveConfig {
    pub fn with_beam_width(mut self, width: usize) -> Self {
        self.beam_width = width.max(1);
        self
    }
}

/// Outcome of disproving a non-convex goal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disproof {
    /// The goal is identically false
    pub disproved: bool,
    /// A condition on the wildcard constants that holds wherever the goal
    /// holds. `false` when disproved, `true` when nothing was learned.
    pub implication: Expr,
}

/// True only if `goal` is false for every assignment. Min, max and select
/// are handled opaquely; use `disprove_nonconvex` for goals containing them.
pub fn disprove(goal: &Expr, config: &DisproveConfig) -> bool {
    search(goal, config, None)
}

/// `disprove`, also collecting facts about wildcard constants that every
/// solution of `goal` satisfies
pub fn disprove_with_implications(
    goal: &Expr,
    config: &DisproveConfig,
    implications: &mut BTreeSet<Expr>,
) -> bool {
    search(goal, config, Some(implications))
}

fn search(goal: &Expr, config: &DisproveConfig, mut implications: Option<&mut BTreeSet<Expr>>) -> bool {
    if goal.is_false() {
        return true;
    }

    let mut session = Session::new();
    let mut root = ConstraintSystem::root(&mut session);
    root.add_term(&mut session, goal);
    root.finalize(&session);

    let mut local = BTreeSet::new();
    let mut visited = HashSet::new();
    let mut beam = VecDeque::from([root]);
    let mut steps = 0;
    while let Some(next) = beam.pop_front() {
        if steps >= config.max_steps {
            debug!(goal = %goal, steps, "step budget exhausted");
            break;
        }
        if !visited.insert(next.structural_hash()) {
            continue;
        }
        steps += 1;

        if implications.is_some() {
            for c in next.constraints() {
                let names = var_names(&c);
                if !names.is_empty() && names.iter().all(|n| is_wildcard_constant(n)) {
                    local.insert(c);
                }
            }
        }

        trace!(
            id = next.id,
            parent = next.parent_id,
            step = %next.substitution.as_ref().map_or_else(String::new, |s| s.to_string()),
            score = next.score,
            system = %next.to_expr(),
            "top of beam"
        );
        if next.infeasible(&session) {
            debug!(goal = %goal, steps, "disproved");
            if let Some(out) = implications.as_deref_mut() {
                out.insert(Expr::bool(false));
            }
            return true;
        }

        next.make_children(&mut session, &mut beam);
        beam.make_contiguous().sort_by(|a, b| a.score.total_cmp(&b.score));
        beam.truncate(config.beam_width);
    }

    if let Some(out) = implications {
        for (name, bounds) in session.knowledge.bounded_vars() {
            if !is_wildcard_constant(name) {
                continue;
            }
            let c = Expr::var(name.as_str());
            if let Some(max) = bounds.max {
                out.insert(Expr::le(c.clone(), Expr::int(max)));
            }
            if let Some(min) = bounds.min {
                out.insert(Expr::le(Expr::int(min), c));
            }
        }
        out.extend(local.into_iter().map(|c| simplify(&c)));
    }
    debug!(goal = %goal, steps, "no disproof found");
    false
}

/// Decompose `goal` into convex pieces and disprove each one. The
/// implication is the disjunction of what each undisproved piece implies.
pub fn disprove_nonconvex(goal: &Expr, config: &DisproveConfig) -> Disproof {
    let pieces = decompose(goal, config.max_cases, config.max_clauses);
    debug!(goal = %goal, pieces = pieces.len(), "disproving non-convex goal");

    let mut disproved = true;
    let mut combined = BTreeSet::new();
    for piece in &pieces {
        let mut implications = BTreeSet::new();
        if !disprove_with_implications(piece, config, &mut implications) {
            debug!(piece = %piece, "piece not disproved");
            disproved = false;
        }
        if implications.is_empty() {
            combined.insert(Expr::bool(true));
            continue;
        }
        let m = simplify(&Expr::and_all(implications));
        if !m.is_false() {
            combined.insert(m);
        }
    }

    let implication = if combined.is_empty() {
        Expr::bool(false)
    } else {
        simplify(&Expr::or_all(combined))
    };
    Disproof {
        disproved,
        implication,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Binding, Value};
    use crate::parser::parse_bool_expr;
    use crate::semantics::evaluate_bool;

    fn config() -> DisproveConfig {
        DisproveConfig::default()
    }

    fn satisfiable_on_grid(goal: &Expr) -> bool {
        let names: Vec<String> = var_names(goal).into_iter().collect();
        let mut env = Binding::new();
        fn go(goal: &Expr, names: &[String], env: &mut Binding) -> bool {
            let Some((first, rest)) = names.split_first() else {
                return evaluate_bool(goal, env) == Some(true);
            };
            for v in -5..=5 {
                env.insert(first.clone(), Value::Int(v));
                if go(goal, rest, env) {
                    return true;
                }
            }
            false
        }
        go(goal, &names, &mut env)
    }

    #[test]
    fn test_disproves_min_bound() {
        let goal = parse_bool_expr("!(min(x, 10) <= 10)").unwrap();
        let result = disprove_nonconvex(&goal, &config());
        assert!(result.disproved);
        assert!(result.implication.is_false());
    }

    #[test]
    fn test_disproves_linear_contradictions() {
        let goals = [
            "x < y && y < x",
            "x + 1 <= y && y <= x",
            "x == y + 1 && y == x + 1",
            "x*2 == y*2 + 1",
        ];
        for text in goals {
            let goal = parse_bool_expr(text).unwrap();
            assert!(disprove(&goal, &config()), "{}", text);
        }
    }

    #[test]
    fn test_disproves_with_division() {
        let goals = ["x % 4 == 5", "(x / 3)*3 == x + 1", "x / 2 < 0 && 0 <= x"];
        for text in goals {
            let goal = parse_bool_expr(text).unwrap();
            assert!(disprove_nonconvex(&goal, &config()).disproved, "{}", text);
        }
    }

    #[test]
    fn test_never_disproves_satisfiable_goals() {
        let goals = [
            "x < y",
            "x*y == 6",
            "min(x, y) + 1 == max(x, y)",
            "x % 3 == 2 && x < 0",
            "x / 2 == y && y < 0",
            "select(x < y, x, y) == 3",
            "x*x == 4 && x < 0",
            "!(x <= y) && y*2 == x",
        ];
        for text in goals {
            let goal = parse_bool_expr(text).unwrap();
            assert!(satisfiable_on_grid(&goal), "{} should be satisfiable", text);
            assert!(!disprove_nonconvex(&goal, &config()).disproved, "{}", text);
        }
    }

    #[test]
    fn test_disproofs_are_sound() {
        let goals = [
            "x*2 - x != x",
            "min(x, y) < max(x, y) && x == y",
            "max(x, 3) < 3",
            "x % 2 == 1 && (x / 2)*2 == x",
            "select(0 < x, x, 0 - x) < 0",
            "x < y && x*2 + 1 == y*2",
            "x*y < 0 && 0 <= x && 0 <= y",
        ];
        for text in goals {
            let goal = parse_bool_expr(text).unwrap();
            if disprove_nonconvex(&goal, &config()).disproved {
                assert!(!satisfiable_on_grid(&goal), "{} was disproved but holds somewhere", text);
            }
        }
    }

    #[test]
    fn test_implication_bounds_wildcards() {
        let goal = parse_bool_expr("x + c0 < x").unwrap();
        let result = disprove_nonconvex(&goal, &config());
        assert!(!result.disproved);
        // Only a negative constant makes the goal satisfiable
        for v in -3..=3 {
            let mut env = Binding::new();
            env.insert("c0".into(), Value::Int(v));
            let holds = evaluate_bool(&result.implication, &env);
            assert_eq!(holds, Some(v < 0), "{} at c0={}", result.implication, v);
        }
    }

    #[test]
    fn test_beam_width_is_respected() {
        let config = DisproveConfig::default().with_beam_width(0);
        assert_eq!(config.beam_width, 1);
        let goal = parse_bool_expr("x < y && y < x").unwrap();
        assert!(disprove(&goal, &config));
    }
}

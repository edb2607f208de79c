//! Synthesis of symbolic bounds
//!
//! A bound of `e` is written over the `.min` / `.max` companions of its
//! variables: an upper bound `b` satisfies `e <= b` whenever every variable
//! `v` lies in `[v.min, v.max]`. Variables are bounded one at a time; each
//! round's result becomes the next round's target.

use super::synthesis::{Problem, Synthesizer};
use crate::error::Result;
use crate::ir::analysis::{
    constants, count_leaves, divisors_nonzero, free_vars, inline_lets, uses_var,
};
use crate::ir::{BinOp, Binding, Expr, ExprKind, Type};
use crate::search::config::BoundDirection;
use crate::search::result::SynthesisResult;
use crate::search::symbolic::sketch::{ProgramSketch, encode};
use crate::semantics::simplify;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Each leaf may be read this many times per occurrence in the target
const BOUND_USE_FACTOR: i64 = 4;

pub fn min_name(var: &str) -> String {
    format!("{}.min", var)
}

pub fn max_name(var: &str) -> String {
    format!("{}.max", var)
}

/// Interval-arithmetic bounds of an integer expression in which each
/// variable of `ranged` spans `[v.min, v.max]` and every other variable is
/// fixed. `None` when some operator has no usable rule.
pub fn symbolic_bounds(e: &Expr, ranged: &BTreeSet<String>) -> Option<(Expr, Expr)> {
    let e = inline_lets(e);
    let (lo, hi) = bounds_of(&e, ranged)?;
    Some((simplify(&lo), simplify(&hi)))
}

fn bounds_of(e: &Expr, ranged: &BTreeSet<String>) -> Option<(Expr, Expr)> {
    if !e.ty().is_int() {
        return None;
    }
    if !ranged.iter().any(|v| uses_var(e, v)) {
        return Some((e.clone(), e.clone()));
    }
    match e.kind() {
        ExprKind::Var { name, .. } => Some((
            Expr::var(min_name(name)),
            Expr::var(max_name(name)),
        )),
        ExprKind::Binary(op, a, b) => {
            let (alo, ahi) = bounds_of(a, ranged)?;
            match op {
                BinOp::Add => {
                    let (blo, bhi) = bounds_of(b, ranged)?;
                    Some((Expr::add(alo, blo), Expr::add(ahi, bhi)))
                }
                BinOp::Sub => {
                    let (blo, bhi) = bounds_of(b, ranged)?;
                    Some((Expr::sub(alo, bhi), Expr::sub(ahi, blo)))
                }
                BinOp::Mul => {
                    if let Some(k) = b.as_int() {
                        return Some(scale(alo, ahi, k, Expr::mul));
                    }
                    let (blo, bhi) = bounds_of(b, ranged)?;
                    if let Some(k) = a.as_int() {
                        return Some(scale(blo, bhi, k, |x, k| Expr::mul(k, x)));
                    }
                    // A factor with no range contributes one end, not two
                    let mut products = Vec::new();
                    for x in [&alo, &ahi] {
                        for y in [&blo, &bhi] {
                            let p = Expr::mul(x.clone(), y.clone());
                            if !products.contains(&p) {
                                products.push(p);
                            }
                        }
                    }
                    let lo = Expr::pack(BinOp::Min, products.iter().cloned())?;
                    let hi = Expr::pack(BinOp::Max, products)?;
                    Some((lo, hi))
                }
                BinOp::Min | BinOp::Max => {
                    let (blo, bhi) = bounds_of(b, ranged)?;
                    Some((
                        Expr::binary(*op, alo, blo),
                        Expr::binary(*op, ahi, bhi),
                    ))
                }
                BinOp::Div => match b.as_int()? {
                    0 => Some((Expr::int(0), Expr::int(0))),
                    k => Some(scale(alo, ahi, k, Expr::div)),
                },
                BinOp::Mod => match b.as_int()? {
                    0 => Some((Expr::int(0), Expr::int(0))),
                    k => Some((Expr::int(0), Expr::int(k.unsigned_abs() as i64 - 1))),
                },
                _ => None,
            }
        }
        ExprKind::Select(_, t, f) => {
            let (tlo, thi) = bounds_of(t, ranged)?;
            let (flo, fhi) = bounds_of(f, ranged)?;
            Some((Expr::min(tlo, flo), Expr::max(thi, fhi)))
        }
        _ => None,
    }
}

/// Apply a monotone operation by a constant, swapping ends when it is negative
fn scale(lo: Expr, hi: Expr, k: i64, op: impl Fn(Expr, Expr) -> Expr) -> (Expr, Expr) {
    let (lo, hi) = (op(lo, Expr::int(k)), op(hi, Expr::int(k)));
    if k < 0 { (hi, lo) } else { (lo, hi) }
}

fn pick(bounds: (Expr, Expr), direction: BoundDirection) -> Expr {
    match direction {
        BoundDirection::Upper => bounds.1,
        BoundDirection::Lower => bounds.0,
    }
}

/// Integer variables of `e`, in name order
fn int_vars(e: &Expr) -> Vec<String> {
    free_vars(e)
        .into_iter()
        .filter(|(_, (ty, _))| ty.is_int())
        .map(|(name, _)| name)
        .collect()
}

impl Synthesizer<'_> {
    /// Find a bound of `target` built from programs of `size` instructions.
    /// Fails if any variable's round fails.
    pub fn synthesize_bound(
        &mut self,
        target: &Expr,
        direction: BoundDirection,
        size: usize,
    ) -> Result<Expr> {
        let vars = int_vars(target);
        let uses: BTreeMap<String, usize> = free_vars(target)
            .into_iter()
            .map(|(name, (_, count))| (name, count))
            .collect();
        let mut current = simplify(target);
        let mut counterexamples: Vec<Binding> = Vec::new();

        for k in 0..vars.len() {
            let var = &vars[k];
            for c in counterexamples.iter_mut() {
                if let Some(v) = c.get(var).copied() {
                    c.entry(min_name(var)).or_insert(v);
                    c.entry(max_name(var)).or_insert(v);
                }
            }

            let problem = self.bound_problem(&current, &vars[..=k], &uses, direction, size);
            current = self.run(&problem, Some(direction), &mut counterexamples)?;
            debug!(var = %var, bound = %current, "bounded variable");
        }
        info!(target = %target, bound = %current, %direction, size, "synthesized bound");
        Ok(current)
    }

    fn bound_problem(
        &self,
        target: &Expr,
        bounded: &[String],
        uses: &BTreeMap<String, usize>,
        direction: BoundDirection,
        size: usize,
    ) -> Problem {
        let budget_of =
            |name: &str| uses.get(name).copied().unwrap_or(1).max(1) as i64 * BOUND_USE_FACTOR;

        let mut leaves = Vec::new();
        let mut budget = Vec::new();
        for name in bounded {
            for companion in [min_name(name), max_name(name)] {
                leaves.push(Expr::var(companion));
                budget.push(budget_of(name));
            }
        }
        for (name, (ty, _)) in free_vars(target) {
            let is_companion = bounded
                .iter()
                .any(|b| name == min_name(b) || name == max_name(b));
            if !is_companion && !bounded.contains(&name) {
                budget.push(budget_of(&name));
                leaves.push(Expr::typed_var(name, ty));
            }
        }
        for c in constants(target) {
            leaves.push(Expr::int(c));
            budget.push(BOUND_USE_FACTOR);
        }

        // The newly bounded variable is the only one ranging in this round
        let var = bounded.last().cloned().unwrap_or_default();
        let ranged = BTreeSet::from([var.clone()]);
        let max_leaves = self.config.max_leaves.unwrap_or_else(|| {
            symbolic_bounds(target, &ranged)
                .map(|b| count_leaves(&pick(b, direction)))
                .unwrap_or_else(|| count_leaves(target))
                .max(1)
        });

        let sketch = ProgramSketch::new(size);
        let encoded = encode(&leaves, &budget, &sketch.slots(), Type::Int, max_leaves);
        let relation = match direction {
            BoundDirection::Upper => Expr::le(target.clone(), encoded.value.clone()),
            BoundDirection::Lower => Expr::ge(target.clone(), encoded.value.clone()),
        };
        let works = encoded.bind(Expr::and(relation, encoded.well_formed.clone()));
        let v = Expr::var(var.clone());
        let assumptions = Expr::and_all([
            divisors_nonzero(target),
            Expr::le(Expr::var(min_name(&var)), v.clone()),
            Expr::le(v, Expr::var(max_name(&var))),
        ]);

        let mut inputs: BTreeMap<String, Type> = free_vars(target)
            .into_iter()
            .map(|(name, (ty, _))| (name, ty))
            .collect();
        for leaf in &leaves {
            if let ExprKind::Var { name, ty } = leaf.kind() {
                inputs.insert(name.clone(), *ty);
            }
        }
        inputs.insert(var, Type::Int);

        Problem {
            description: format!("{} bound of {} at size {}", direction, target, size),
            sketch,
            encoded,
            works,
            assumptions,
            inputs: inputs.into_iter().collect(),
        }
    }

    /// Bound `target`, trying sizes `1..=max_size`. When synthesis fails the
    /// interval-arithmetic bound over all variables is returned instead;
    /// its `size` is then `None`.
    pub fn bound(&mut self, target: &Expr, direction: BoundDirection, max_size: usize) -> SynthesisResult {
        self.reset();
        let start = Instant::now();
        for size in 1..=max_size {
            self.statistics.sizes_tried += 1;
            match self.synthesize_bound(target, direction, size) {
                Ok(bound) => {
                    self.statistics.elapsed_time = start.elapsed();
                    return SynthesisResult::with_program(
                        target.clone(),
                        bound,
                        size,
                        self.statistics.clone(),
                    );
                }
                Err(e) => debug!(target = %target, size, error = %e, "no bound at this size"),
            }
        }
        self.statistics.elapsed_time = start.elapsed();

        let ranged: BTreeSet<String> = int_vars(target).into_iter().collect();
        let mut result = SynthesisResult::no_program(target.clone(), self.statistics.clone());
        match symbolic_bounds(target, &ranged) {
            Some(bounds) => result.program = Some(pick(bounds, direction)),
            None => warn!(target = %target, "no interval bound available"),
        }
        result
    }
}

/// Evaluate `bound` against `target` on every grid point where each variable
/// lies within its companions. Returns false on the first violation.
pub fn bound_holds_on_grid(target: &Expr, bound: &Expr, direction: BoundDirection, min: i64, max: i64) -> bool {
    use crate::ir::Value;
    use crate::semantics::evaluate_int;
    use crate::validation::grid_inputs;

    let vars: Vec<(String, Type)> = int_vars(target).into_iter().map(|v| (v, Type::Int)).collect();
    let companions: Vec<(String, Type)> = vars
        .iter()
        .flat_map(|(v, _)| [(min_name(v), Type::Int), (max_name(v), Type::Int)])
        .collect();
    for ranges in grid_inputs(&companions, min, max) {
        for point in grid_inputs(&vars, min, max) {
            let inside = vars.iter().all(|(v, _)| {
                let x = point.get(v).and_then(Value::as_int);
                let lo = ranges.get(&min_name(v)).and_then(Value::as_int);
                let hi = ranges.get(&max_name(v)).and_then(Value::as_int);
                matches!((lo, x, hi), (Some(lo), Some(x), Some(hi)) if lo <= x && x <= hi)
            });
            if !inside {
                continue;
            }
            let mut env = ranges.clone();
            env.extend(point.iter().map(|(k, v)| (k.clone(), *v)));
            let (Some(t), Some(b)) = (evaluate_int(target, &env), evaluate_int(bound, &env)) else {
                continue;
            };
            let ok = match direction {
                BoundDirection::Upper => t <= b,
                BoundDirection::Lower => t >= b,
            };
            if !ok {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Value;
    use crate::mining::testing::{GridSolver, UnknownSolver};
    use crate::parser::parse_expr;
    use crate::search::config::CegisConfig;
    use crate::semantics::{SolverConfig, Z3Solver, evaluate_int};

    fn ranged(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_symbolic_bounds_linear() {
        let e = parse_expr("x*2 - y + 3").unwrap();
        let (lo, hi) = symbolic_bounds(&e, &ranged(&["x", "y"])).unwrap();
        assert!(bound_holds_on_grid(&e, &lo, BoundDirection::Lower, -2, 2));
        assert!(bound_holds_on_grid(&e, &hi, BoundDirection::Upper, -2, 2));
        assert!(uses_var(&hi, "x.max") && uses_var(&hi, "y.min"));
    }

    #[test]
    fn test_symbolic_bounds_negative_scale_swaps() {
        let e = parse_expr("x*-3").unwrap();
        let (lo, hi) = symbolic_bounds(&e, &ranged(&["x"])).unwrap();
        assert!(uses_var(&lo, "x.max"));
        assert!(uses_var(&hi, "x.min"));
    }

    #[test]
    fn test_symbolic_bounds_product_and_mod() {
        let e = parse_expr("x*y").unwrap();
        let (lo, hi) = symbolic_bounds(&e, &ranged(&["x", "y"])).unwrap();
        assert!(bound_holds_on_grid(&e, &lo, BoundDirection::Lower, -2, 2));
        assert!(bound_holds_on_grid(&e, &hi, BoundDirection::Upper, -2, 2));
        let e = parse_expr("x % 4").unwrap();
        let (lo, hi) = symbolic_bounds(&e, &ranged(&["x"])).unwrap();
        assert_eq!((lo, hi), (Expr::int(0), Expr::int(3)));
    }

    #[test]
    fn test_symbolic_bounds_fixed_variables_pass_through() {
        let e = parse_expr("x*y").unwrap();
        let (_, hi) = symbolic_bounds(&e, &ranged(&["x"])).unwrap();
        assert!(uses_var(&hi, "y"));
        assert!(!uses_var(&hi, "y.max"));
        assert_eq!(count_leaves(&hi), 4);
        assert!(symbolic_bounds(&parse_expr("x / y").unwrap(), &ranged(&["x", "y"])).is_none());
    }

    #[test]
    fn test_bound_check_rejects_wrong_bound() {
        let e = parse_expr("x + 1").unwrap();
        let wrong = parse_expr("x.max").unwrap();
        assert!(!bound_holds_on_grid(&e, &wrong, BoundDirection::Upper, -2, 2));
    }

    #[test]
    fn test_product_bound_is_valid() {
        // Whatever path produces it, the bound of x*y must hold on the grid
        let solver = Z3Solver::new(SolverConfig::with_timeout_secs(5));
        let target = parse_expr("x*y").unwrap();
        let config = CegisConfig::default().with_max_counterexamples(20);
        let mut synth = Synthesizer::new(&solver, config);
        let result = synth.bound(&target, BoundDirection::Upper, 1);
        let bound = result.program.expect("interval fallback always applies to x*y");
        assert!(bound_holds_on_grid(&target, &bound, BoundDirection::Upper, -2, 2));
    }

    #[test]
    fn test_grid_solver_bounds_min_with_constant() {
        let target = parse_expr("min(x, 3)").unwrap();
        let mut synth = Synthesizer::new(&GridSolver, CegisConfig::default());
        let bound = synth
            .synthesize_bound(&target, BoundDirection::Upper, 1)
            .unwrap();
        assert!(bound_holds_on_grid(&target, &bound, BoundDirection::Upper, -3, 3));
        assert!(!uses_var(&bound, "x"));
        assert!(count_leaves(&bound) <= 2);
    }

    #[test]
    fn test_product_bound_over_small_ranges() {
        let target = parse_expr("x*y").unwrap();
        let mut synth = Synthesizer::new(&UnknownSolver, CegisConfig::default());
        let result = synth.bound(&target, BoundDirection::Upper, 2);
        assert_eq!(result.size, None);
        let bound = result.program.unwrap();
        assert!(bound_holds_on_grid(&target, &bound, BoundDirection::Upper, 0, 2));
        let ranges: Binding = [("x.min", 0), ("x.max", 2), ("y.min", 0), ("y.max", 2)]
            .into_iter()
            .map(|(n, v)| (n.to_string(), Value::Int(v)))
            .collect();
        assert_eq!(evaluate_int(&bound, &ranges), Some(4));
    }

    #[test]
    fn test_synthesize_simple_upper_bound() {
        let solver = Z3Solver::default();
        if !solver.is_available() {
            return;
        }
        let target = parse_expr("x + 1").unwrap();
        let mut synth = Synthesizer::new(&solver, CegisConfig::default());
        let bound = synth
            .synthesize_bound(&target, BoundDirection::Upper, 1)
            .unwrap();
        assert!(bound_holds_on_grid(&target, &bound, BoundDirection::Upper, -3, 3));
        assert!(count_leaves(&bound) <= 2);
    }
}

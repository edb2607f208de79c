//! Counterexample-guided inductive synthesis (CEGIS)
//!
//! The loop alternates two solver questions over a fixed program sketch:
//! 1. Does the current candidate fail on some input? Cheap seeded fuzzing is
//!    tried first; the solver is only asked when fuzzing finds nothing.
//! 2. Which slot assignment works on every counterexample seen so far?
//!
//! An unsat answer to (1) means the candidate is correct for all inputs.
//! An unsat answer to (2) means no program of this size exists.

use crate::error::{Result, SuperoptError, invariant_violation};
use crate::ir::analysis::{
    count_leaves, divisors_nonzero, free_vars, inline_lets, substitute_binding,
};
use crate::ir::{Binding, Expr, Type, Value, format_binding};
use crate::search::config::{BoundDirection, CegisConfig};
use crate::search::result::{SynthesisResult, SynthesisStatistics};
use crate::search::symbolic::sketch::{EncodedProgram, ProgramSketch, describe_assignment, encode};
use crate::semantics::concrete::evaluate_exact;
use crate::semantics::{SatResult, SmtSolver, evaluate, evaluate_bool, simplify};
use crate::validation::random_binding;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::time::Instant;
use tracing::{debug, info, trace};

/// A sketch instantiated against one target
pub(crate) struct Problem {
    /// Human-readable description, used in solver comments and logs
    pub description: String,
    pub sketch: ProgramSketch,
    pub encoded: EncodedProgram,
    /// Holds when the program is acceptable on one input
    pub works: Expr,
    /// Only inputs satisfying this must be handled
    pub assumptions: Expr,
    /// Variables a counterexample assigns
    pub inputs: Vec<(String, Type)>,
}

impl Problem {
    /// The candidate program for a slot assignment, simplified
    pub fn program(&self, assignment: &Binding) -> Expr {
        let program = substitute_binding(&self.encoded.program(), assignment);
        simplify(&inline_lets(&simplify(&program)))
    }

    /// Candidate's value at one input
    pub fn value_at(&self, assignment: &Binding, input: &Binding) -> Option<Value> {
        evaluate(&self.encoded.program(), &merged(assignment, input))
    }

    fn assignment_from(&self, model: &Binding) -> Binding {
        self.sketch
            .slot_names()
            .into_iter()
            .map(|name| {
                let value = model.get(&name).copied().unwrap_or(Value::Int(0));
                (name, value)
            })
            .collect()
    }

    fn input_from(&self, model: &Binding) -> Binding {
        self.inputs
            .iter()
            .map(|(name, ty)| {
                let value = model
                    .get(name)
                    .copied()
                    .filter(|v| v.ty() == *ty)
                    .unwrap_or(Value::zero(*ty));
                (name.clone(), value)
            })
            .collect()
    }
}

pub(crate) fn merged(a: &Binding, b: &Binding) -> Binding {
    let mut env = a.clone();
    env.extend(b.iter().map(|(k, v)| (k.clone(), *v)));
    env
}

/// Synthesizes programs against a solver
pub struct Synthesizer<'a> {
    pub(crate) solver: &'a dyn SmtSolver,
    pub(crate) config: CegisConfig,
    pub(crate) statistics: SynthesisStatistics,
}

impl<'a> Synthesizer<'a> {
    pub fn new(solver: &'a dyn SmtSolver, config: CegisConfig) -> Self {
        Self {
            solver,
            config,
            statistics: SynthesisStatistics::new(),
        }
    }

    pub fn config(&self) -> &CegisConfig {
        &self.config
    }

    /// Statistics accumulated since construction or the last `reset`
    pub fn statistics(&self) -> &SynthesisStatistics {
        &self.statistics
    }

    pub fn reset(&mut self) {
        self.statistics = SynthesisStatistics::new();
    }

    /// Search for the smallest equivalent program, trying sizes
    /// `1..=max_size` in order
    pub fn superoptimize(&mut self, target: &Expr, max_size: usize) -> SynthesisResult {
        self.reset();
        let start = Instant::now();
        for size in 1..=max_size {
            self.statistics.sizes_tried += 1;
            match self.synthesize(target, size) {
                Ok(program) => {
                    self.statistics.elapsed_time = start.elapsed();
                    return SynthesisResult::with_program(
                        target.clone(),
                        program,
                        size,
                        self.statistics.clone(),
                    );
                }
                Err(e) => debug!(target = %target, size, error = %e, "no program at this size"),
            }
        }
        self.statistics.elapsed_time = start.elapsed();
        SynthesisResult::no_program(target.clone(), self.statistics.clone())
    }

    /// Find a program of exactly `size` instructions equivalent to `target`
    /// wherever `target` is defined
    pub fn synthesize(&mut self, target: &Expr, size: usize) -> Result<Expr> {
        let vars = free_vars(target);
        let leaves: Vec<Expr> = vars
            .iter()
            .map(|(name, (ty, _))| Expr::typed_var(name.clone(), *ty))
            .collect();
        let budget: Vec<i64> = vars.values().map(|(_, uses)| *uses as i64).collect();
        let max_leaves = self
            .config
            .max_leaves
            .unwrap_or_else(|| count_leaves(target).saturating_sub(1).max(1));

        let sketch = ProgramSketch::new(size);
        let encoded = encode(&leaves, &budget, &sketch.slots(), target.ty(), max_leaves);
        let works = encoded.bind(Expr::and(
            Expr::eq(target.clone(), encoded.value.clone()),
            encoded.well_formed.clone(),
        ));
        let problem = Problem {
            description: format!("{} at size {}", target, size),
            sketch,
            encoded,
            works,
            assumptions: divisors_nonzero(target),
            inputs: vars.iter().map(|(n, (ty, _))| (n.clone(), *ty)).collect(),
        };

        let mut counterexamples = Vec::new();
        let program = self.run(&problem, None, &mut counterexamples)?;
        info!(target = %target, program = %program, size, "synthesized equivalent program");
        Ok(program)
    }

    /// The CEGIS loop. `counterexamples` may arrive non-empty and keeps
    /// everything found.
    pub(crate) fn run(
        &mut self,
        problem: &Problem,
        tighten: Option<BoundDirection>,
        counterexamples: &mut Vec<Binding>,
    ) -> Result<Expr> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut current = problem.sketch.zero_assignment();
        let mut tightening_budget = self.config.max_tightening_rounds;

        loop {
            if counterexamples.len() > self.config.max_counterexamples {
                return Err(SuperoptError::exhausted(format!(
                    "more than {} counterexamples for {}",
                    self.config.max_counterexamples, problem.description
                )));
            }

            if let Some(direction) = tighten {
                if !counterexamples.is_empty() && tightening_budget > 0 {
                    self.tighten(problem, direction, counterexamples, &mut current, &mut tightening_budget);
                }
            }

            trace!(candidate = %problem.program(&current), "checking candidate");
            match self.find_counterexamples(problem, &current, &mut rng)? {
                None => return Ok(problem.program(&current)),
                Some(found) => counterexamples.extend(found),
            }

            current = self.resynthesize(problem, counterexamples)?;
            debug!(
                program = %describe_assignment(&problem.sketch, &current),
                counterexamples = counterexamples.len(),
                "new candidate"
            );

            if counterexamples.len() > self.config.sanity_check_after {
                self.sanity_check(problem, &current, counterexamples);
            }
        }
    }

    /// `Ok(None)` when the candidate is proven correct
    fn find_counterexamples(
        &mut self,
        problem: &Problem,
        current: &Binding,
        rng: &mut ChaCha8Rng,
    ) -> Result<Option<Vec<Binding>>> {
        let refutes = Expr::and(problem.assumptions.clone(), Expr::not(problem.works.clone()));

        let mut found = Vec::new();
        for _ in 0..self.config.fuzz_rounds {
            let input = random_binding(
                &problem.inputs,
                rng,
                self.config.fuzz_min,
                self.config.fuzz_max,
            );
            if evaluate_bool(&refutes, &merged(current, &input)) == Some(true) {
                debug!(input = %format_binding(&input), "fuzzing counterexample");
                found.push(input);
                self.statistics.fuzz_counterexamples += 1;
                if found.len() >= self.config.max_fuzz_hits {
                    break;
                }
            }
        }
        if !found.is_empty() {
            return Ok(Some(found));
        }

        self.statistics.solver_queries += 1;
        let goal = substitute_binding(&refutes, current);
        let comment = format!("finding counterexamples for {}", problem.description);
        match self.solver.satisfy(&goal, &comment) {
            SatResult::Unsat => Ok(None),
            SatResult::Sat(model) => {
                let input = problem.input_from(&model);
                if evaluate_exact(&refutes, &merged(current, &input)) == Some(Value::Bool(false)) {
                    invariant_violation(format!(
                        "solver counterexample {} does not refute the candidate for {}",
                        format_binding(&input),
                        problem.description
                    ));
                }
                debug!(input = %format_binding(&input), "solver counterexample");
                self.statistics.solver_counterexamples += 1;
                Ok(Some(vec![input]))
            }
            SatResult::Unknown => Err(SuperoptError::unknown(comment)),
        }
    }

    fn works_on_all(problem: &Problem, counterexamples: &[Binding]) -> Expr {
        Expr::and_all(
            counterexamples
                .iter()
                .map(|c| substitute_binding(&problem.works, c)),
        )
    }

    fn resynthesize(&mut self, problem: &Problem, counterexamples: &[Binding]) -> Result<Binding> {
        self.statistics.solver_queries += 1;
        let goal = Self::works_on_all(problem, counterexamples);
        let comment = format!("finding program for {}", problem.description);
        match self.solver.satisfy(&goal, &comment) {
            SatResult::Sat(model) => {
                self.statistics.candidates += 1;
                Ok(problem.assignment_from(&model))
            }
            SatResult::Unsat => Err(SuperoptError::exhausted(format!(
                "no program for {} fits {} counterexamples",
                problem.description,
                counterexamples.len()
            ))),
            SatResult::Unknown => Err(SuperoptError::unknown(comment)),
        }
    }

    fn sanity_check(&self, problem: &Problem, current: &Binding, counterexamples: &[Binding]) {
        for c in counterexamples {
            if evaluate_exact(&problem.works, &merged(current, c)) == Some(Value::Bool(false)) {
                invariant_violation(format!(
                    "synthesized program {} fails counterexample {} for {}",
                    problem.program(current),
                    format_binding(c),
                    problem.description
                ));
            }
        }
    }

    /// Greedily replace the candidate by programs that are no looser on any
    /// counterexample and strictly tighter on at least one
    fn tighten(
        &mut self,
        problem: &Problem,
        direction: BoundDirection,
        counterexamples: &[Binding],
        current: &mut Binding,
        budget: &mut usize,
    ) {
        let symbolic: Vec<Expr> = counterexamples
            .iter()
            .map(|c| substitute_binding(&problem.encoded.program(), c))
            .collect();
        let works = Self::works_on_all(problem, counterexamples);

        while *budget > 0 {
            *budget -= 1;
            let mut tighter = Vec::new();
            let mut no_looser = Vec::new();
            for (c, program_at_c) in counterexamples.iter().zip(&symbolic) {
                let Some(best) = problem.value_at(current, c).and_then(|v| v.as_int()) else {
                    continue;
                };
                let best = Expr::int(best);
                let p = program_at_c.clone();
                if direction.is_upper() {
                    tighter.push(Expr::lt(p.clone(), best.clone()));
                    no_looser.push(Expr::le(p, best));
                } else {
                    tighter.push(Expr::gt(p.clone(), best.clone()));
                    no_looser.push(Expr::ge(p, best));
                }
            }
            let goal = Expr::and_all([works.clone(), Expr::or_all(tighter), Expr::and_all(no_looser)]);

            self.statistics.solver_queries += 1;
            let comment = format!("finding tighter program for {}", problem.description);
            match self.solver.satisfy(&goal, &comment) {
                SatResult::Sat(model) => {
                    *current = problem.assignment_from(&model);
                    self.statistics.tightenings += 1;
                    debug!(candidate = %problem.program(current), "tightened bound");
                }
                SatResult::Unsat => break,
                SatResult::Unknown => {
                    debug!("tightening query inconclusive");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::testing::GridSolver;
    use crate::parser::parse_expr;
    use crate::semantics::Z3Solver;
    use crate::validation::agree_on_grid;

    #[test]
    fn test_grid_solver_finds_single_leaf_program() {
        let target = parse_expr("(x - x) + y").unwrap();
        let mut synth = Synthesizer::new(&GridSolver, CegisConfig::default());
        let result = synth.superoptimize(&target, 1);
        assert_eq!(result.program, Some(Expr::var("y")));
        assert_eq!(result.size, Some(1));
        // The all-zero starting candidate copies x, so at least one resynthesis ran
        assert!(synth.statistics().candidates > 0);
    }

    #[test]
    fn test_simplifies_x_times_two_minus_x() {
        let solver = Z3Solver::default();
        if !solver.is_available() {
            return;
        }
        let target = parse_expr("x*2 - x").unwrap();
        let mut synth = Synthesizer::new(&solver, CegisConfig::default());
        let result = synth.superoptimize(&target, 2);
        assert_eq!(result.program, Some(Expr::var("x")));
        assert_eq!(result.size, Some(1));
        assert!(synth.statistics().solver_queries > 0);
    }

    #[test]
    fn test_synthesized_programs_agree_on_grid() {
        let solver = Z3Solver::default();
        if !solver.is_available() {
            return;
        }
        let mut synth = Synthesizer::new(&solver, CegisConfig::default());
        for text in ["max(x, y) + min(x, y)", "(x + 3) - (x + 1)", "select(x < y, y, x) - x"] {
            let target = parse_expr(text).unwrap();
            let result = synth.superoptimize(&target, 2);
            if let Some(program) = &result.program {
                assert!(agree_on_grid(&target, program, -5, 5), "{} -> {}", target, program);
                assert!(count_leaves(program) < count_leaves(&target));
            }
        }
    }

    #[test]
    fn test_no_program_without_solver() {
        let solver = Z3Solver::new(
            crate::semantics::SolverConfig::default().with_binary("definitely-not-a-solver"),
        );
        let target = parse_expr("x*y + x").unwrap();
        let mut synth = Synthesizer::new(&solver, CegisConfig::default());
        let result = synth.superoptimize(&target, 1);
        assert!(!result.found());
        assert_eq!(result.statistics.sizes_tried, 1);
    }

    #[test]
    fn test_problem_program_is_simplified() {
        let target = parse_expr("x + 0*y").unwrap();
        let sketch = ProgramSketch::new(1);
        let leaves = [Expr::var("x"), Expr::var("y")];
        let encoded = encode(&leaves, &[1, 1], &sketch.slots(), Type::Int, 2);
        let problem = Problem {
            description: String::new(),
            works: encoded.bind(Expr::eq(target.clone(), encoded.value.clone())),
            sketch,
            encoded,
            assumptions: Expr::bool(true),
            inputs: vec![("x".into(), Type::Int), ("y".into(), Type::Int)],
        };
        // add x, 5 with two leaves reads the constant 3
        let assignment: Binding = [("op0", 1), ("op1", 0), ("op2", 5), ("op3", 0)]
            .into_iter()
            .map(|(n, v)| (n.to_string(), Value::Int(v)))
            .collect();
        assert_eq!(problem.program(&assignment).to_string(), "x + 3");
        let input: Binding = [("x".to_string(), Value::Int(4)), ("y".to_string(), Value::Int(0))]
            .into_iter()
            .collect();
        assert_eq!(problem.value_at(&assignment, &input), Some(Value::Int(7)));
    }
}

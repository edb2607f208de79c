//! Guards for rules with wildcard constants
//!
//! A guard is a condition on a rule's wildcards under which its two sides
//! agree. Every candidate is checked first with the disprover on
//! `guard && lhs != rhs`, and only then with the solver.
//!
//! Candidates come from three places, tried in order:
//! - the negation of what the disprover learns about the constants from a
//!   failing rule
//! - a counterexample-guided search over comparison templates on the
//!   constants, restricted to templates every observed instance satisfies
//! - instantiating the rule at solver counterexamples, with the constants
//!   left symbolic, and trimming the result clause by clause

use super::is_wildcard_constant;
use super::rules::{Rule, implicit_predicate};
use crate::disprove::normal_form::{push_negation, to_dnf};
use crate::disprove::{DisproveConfig, disprove, disprove_nonconvex};
use crate::error::{Result, SuperoptError};
use crate::ir::analysis::{free_vars, substitute_binding};
use crate::ir::{Binding, Expr, Type, Value, format_binding};
use crate::semantics::smt::complete_binding;
use crate::semantics::{SatResult, Simplifier, SmtSolver, evaluate_bool, simplify};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub disprove: DisproveConfig,
    pub max_rounds: usize,
    /// Instantiated terms accumulated before falling back to clause trimming
    pub max_terms: usize,
    pub max_clauses: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            disprove: DisproveConfig::default(),
            max_rounds: 16,
            max_terms: 4,
            max_clauses: 64,
        }
    }
}

/// Outcome of checking a guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Counterexample(Binding),
}

fn failure(lhs: &Expr, rhs: &Expr) -> Expr {
    Expr::ne(lhs.clone(), rhs.clone())
}

/// Check that `lhs == rhs` wherever `guard` and the implicit predicate hold
pub fn verify_guard(
    lhs: &Expr,
    rhs: &Expr,
    guard: &Expr,
    solver: &dyn SmtSolver,
    config: &GuardConfig,
) -> Result<Verdict> {
    let goal = Expr::and_all([guard.clone(), implicit_predicate(lhs), failure(lhs, rhs)]);
    if disprove_nonconvex(&goal, &config.disprove).disproved {
        debug!(lhs = %lhs, rhs = %rhs, guard = %guard, "guard verified by disproof");
        return Ok(Verdict::Valid);
    }
    let comment = format!("guard check: {} -> {} if {}", lhs, rhs, guard);
    match solver.satisfy(&goal, &comment) {
        SatResult::Unsat => Ok(Verdict::Valid),
        SatResult::Sat(mut binding) => {
            complete_binding(&mut binding, &goal);
            Ok(Verdict::Counterexample(binding))
        }
        SatResult::Unknown => Err(SuperoptError::unknown(comment)),
    }
}

/// Wildcard constants of a term, in name order
pub fn wildcard_constants(e: &Expr) -> Vec<String> {
    free_vars(e)
        .into_iter()
        .filter(|(name, (ty, _))| is_wildcard_constant(name) && ty.is_int())
        .map(|(name, _)| name)
        .collect()
}

/// Candidate guard atoms over the given constants, weakest first
pub fn templates(constants: &[String]) -> Vec<Expr> {
    let zero = || Expr::int(0);
    let mut out = Vec::new();
    for c in constants {
        let c = Expr::var(c.as_str());
        out.push(Expr::ne(c.clone(), zero()));
        out.push(Expr::le(zero(), c.clone()));
        out.push(Expr::le(c.clone(), zero()));
        out.push(Expr::lt(zero(), c.clone()));
        out.push(Expr::lt(c, zero()));
    }
    for (i, a) in constants.iter().enumerate() {
        for b in &constants[i + 1..] {
            let (a, b) = (Expr::var(a.as_str()), Expr::var(b.as_str()));
            out.push(Expr::le(a.clone(), b.clone()));
            out.push(Expr::le(b.clone(), a.clone()));
            out.push(Expr::lt(a.clone(), b.clone()));
            out.push(Expr::lt(b.clone(), a.clone()));
            out.push(Expr::eq(Expr::modulo(a.clone(), b.clone()), zero()));
            out.push(Expr::eq(Expr::modulo(b.clone(), a.clone()), zero()));
            out.push(Expr::eq(a.clone(), b.clone()));
            out.push(Expr::eq(Expr::add(a, b), zero()));
        }
    }
    out
}

fn admits_all(guard: &Expr, instances: &[Binding]) -> bool {
    instances
        .iter()
        .all(|instance| evaluate_bool(guard, instance) == Some(true))
}

/// Greedy cover: pick atoms until every counterexample falsifies one
fn cover(atoms: &[Expr], counterexamples: &[Binding]) -> Option<Vec<Expr>> {
    let excludes = |atom: &Expr, point: &Binding| evaluate_bool(atom, point) == Some(false);
    let mut open: Vec<&Binding> = counterexamples.iter().collect();
    let mut chosen = Vec::new();
    while !open.is_empty() {
        let mut best: Option<(usize, &Expr)> = None;
        for atom in atoms {
            let hits = open.iter().filter(|p| excludes(atom, p)).count();
            if hits > best.map_or(0, |(h, _)| h) {
                best = Some((hits, atom));
            }
        }
        let (_, atom) = best?;
        open.retain(|p| !excludes(atom, p));
        chosen.push(atom.clone());
    }
    Some(chosen)
}

/// Search for a conjunction of templates that makes the rule valid and
/// admits every observed instance
fn template_guard(
    lhs: &Expr,
    rhs: &Expr,
    instances: &[Binding],
    solver: &dyn SmtSolver,
    config: &GuardConfig,
) -> Result<Expr> {
    let constants = wildcard_constants(lhs);
    let atoms: Vec<Expr> = templates(&constants)
        .into_iter()
        .filter(|atom| admits_all(atom, instances))
        .collect();

    let mut counterexamples: Vec<Binding> = Vec::new();
    let mut guard = Expr::bool(true);
    for round in 0..config.max_rounds {
        match verify_guard(lhs, rhs, &guard, solver, config)? {
            Verdict::Valid => {
                debug!(lhs = %lhs, guard = %guard, round, "template guard found");
                return Ok(guard);
            }
            Verdict::Counterexample(point) => {
                debug!(lhs = %lhs, guard = %guard, counterexample = %format_binding(&point), "guard too weak");
                counterexamples.push(point);
                let Some(chosen) = cover(&atoms, &counterexamples) else {
                    return Err(SuperoptError::exhausted(format!(
                        "no template guard excludes the counterexamples for {} -> {}",
                        lhs, rhs
                    )));
                };
                guard = simplify(&Expr::and_all(chosen));
            }
        }
    }
    Err(SuperoptError::exhausted(format!(
        "template guard search for {} -> {} ran out of rounds",
        lhs, rhs
    )))
}

/// Weakest guard found under which `lhs` rewrites to `rhs`. `instances`
/// are bindings of the wildcard constants at which the rule is known to
/// hold; the guard must admit all of them.
pub fn synthesize_guard(
    lhs: &Expr,
    rhs: &Expr,
    instances: &[Binding],
    solver: &dyn SmtSolver,
    config: &GuardConfig,
) -> Result<Expr> {
    let goal = Expr::and(implicit_predicate(lhs), failure(lhs, rhs));
    let disproof = disprove_nonconvex(&goal, &config.disprove);
    if disproof.disproved {
        return Ok(Expr::bool(true));
    }

    // Every failure satisfies the implication, so its negation excludes them
    let candidate = simplify(&Expr::not(disproof.implication));
    if !candidate.is_const() && admits_all(&candidate, instances) {
        if verify_guard(lhs, rhs, &candidate, solver, config)? == Verdict::Valid {
            debug!(lhs = %lhs, guard = %candidate, "guard from disprover implication");
            return Ok(candidate);
        }
    }

    template_guard(lhs, rhs, instances, solver, config)
}

fn one(ty: Type) -> Value {
    match ty {
        Type::Int => Value::Int(1),
        Type::Bool => Value::Bool(true),
    }
}

/// Guard built by instantiating the rule's non-constant wildcards at
/// solver counterexamples
pub fn instantiation_guard(
    lhs: &Expr,
    rhs: &Expr,
    solver: &dyn SmtSolver,
    config: &GuardConfig,
) -> Result<Expr> {
    let holds = simplify(&Expr::eq(lhs.clone(), rhs.clone()));
    let implicit = implicit_predicate(lhs);
    let wildcards: Vec<(String, Type)> = free_vars(&holds)
        .into_iter()
        .filter(|(name, _)| !is_wildcard_constant(name))
        .map(|(name, (ty, _))| (name, ty))
        .collect();

    // Initial guess: the rule at all-zero wildcards, and with each one set to one
    let mut point: Binding = wildcards
        .iter()
        .map(|(name, ty)| (name.clone(), Value::zero(*ty)))
        .collect();
    let mut terms = vec![simplify(&substitute_binding(&holds, &point))];
    for (name, ty) in &wildcards {
        point.insert(name.clone(), one(*ty));
        terms.push(simplify(&substitute_binding(&holds, &point)));
        point.insert(name.clone(), Value::zero(*ty));
    }
    let mut guard = simplify(&Expr::and_all(terms));

    let mut round = 0;
    loop {
        if round > config.max_terms {
            debug!(lhs = %lhs, guard = %guard, "too many instantiated terms, trimming");
            return Ok(trim_clauses(&guard, &holds, &implicit, solver, config));
        }
        let goal = Expr::and_all([implicit.clone(), guard.clone(), Expr::not(holds.clone())]);
        let comment = format!("instantiation guard: {} -> {}", lhs, rhs);
        match solver.satisfy(&goal, &comment) {
            SatResult::Unsat => return Ok(guard),
            SatResult::Sat(mut binding) => {
                complete_binding(&mut binding, &holds);
                binding.retain(|name, _| !is_wildcard_constant(name));
                let term = simplify(&substitute_binding(&holds, &binding));
                guard = simplify(&Expr::and(guard, term));
            }
            SatResult::Unknown => return Err(SuperoptError::unknown(comment)),
        }
        round += 1;
    }
}

/// Simplify each literal of a clause given the ones before it
fn tighten_clause(clause: &BTreeSet<Expr>, implicit: &Expr) -> Expr {
    let mut knowledge = Simplifier::new();
    knowledge.learn_true(implicit);
    let mut kept = Vec::new();
    for literal in clause {
        let literal = knowledge.simplify(literal);
        if literal.is_false() {
            return literal;
        }
        if !literal.is_true() {
            knowledge.learn_true(&literal);
            kept.push(literal);
        }
    }
    Expr::and_all(kept)
}

/// Keep the clauses of `guard`'s normal form that are sufficient on their
/// own. A clause the solver cannot decide is dropped.
fn trim_clauses(
    guard: &Expr,
    holds: &Expr,
    implicit: &Expr,
    solver: &dyn SmtSolver,
    config: &GuardConfig,
) -> Expr {
    let mut kept = Vec::new();
    for clause in to_dnf(&push_negation(guard), config.max_clauses) {
        let clause = tighten_clause(&clause, implicit);
        if clause.is_false() {
            continue;
        }
        let goal = Expr::and_all([implicit.clone(), clause.clone(), Expr::not(holds.clone())]);
        if disprove(&goal, &config.disprove) {
            kept.push(clause);
            continue;
        }
        match solver.satisfy(&goal, "clause trimming") {
            SatResult::Unsat => kept.push(clause),
            SatResult::Sat(_) => {}
            SatResult::Unknown => warn!(clause = %clause, "solver could not decide clause, dropping it"),
        }
    }
    simplify(&Expr::or_all(kept))
}

/// Verify a rule's guard, synthesizing a new one if it is missing or wrong.
/// A rule that cannot be repaired comes back with a `false` guard.
pub fn check_rule(rule: &Rule, solver: &dyn SmtSolver, config: &GuardConfig) -> Rule {
    if !rule.predicate.is_false() {
        match verify_guard(&rule.lhs, &rule.rhs, &rule.predicate, solver, config) {
            Ok(Verdict::Valid) => {
                debug!(rule = %rule, "verified");
                return rule.clone();
            }
            Ok(Verdict::Counterexample(point)) => {
                warn!(rule = %rule, counterexample = %format_binding(&point), "incorrect rule");
            }
            Err(e) => warn!(rule = %rule, error = %e, "could not verify rule"),
        }
    }

    info!(lhs = %rule.lhs, rhs = %rule.rhs, "re-synthesizing guard");
    let guard = match synthesize_guard(&rule.lhs, &rule.rhs, &[], solver, config) {
        Ok(guard) => Ok(guard),
        Err(SuperoptError::SearchExhausted(reason)) => {
            debug!(reason = %reason, "falling back to instantiation");
            instantiation_guard(&rule.lhs, &rule.rhs, solver, config)
        }
        Err(e) => Err(e),
    };
    match guard {
        Ok(guard) => {
            if guard != rule.predicate {
                info!(from = %rule.predicate, to = %guard, "rewrote guard");
            }
            rule.clone().with_predicate(guard)
        }
        Err(e) => {
            warn!(rule = %rule, error = %e, "guard synthesis failed");
            rule.clone().with_predicate(Expr::bool(false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::testing::GridSolver;
    use crate::parser::{parse_bool_expr, parse_expr};
    use crate::validation::grid_inputs;

    fn sides(lhs: &str, rhs: &str) -> (Expr, Expr) {
        (parse_expr(lhs).unwrap(), parse_expr(rhs).unwrap())
    }

    /// The rule holds on the grid wherever the guard does
    fn sound_on_grid(lhs: &Expr, rhs: &Expr, guard: &Expr) {
        let vars = crate::validation::input_vars(&[lhs, rhs, guard]);
        let implicit = implicit_predicate(lhs);
        for input in grid_inputs(&vars, -4, 4) {
            if evaluate_bool(guard, &input) == Some(true) && evaluate_bool(&implicit, &input) == Some(true) {
                assert_eq!(
                    crate::semantics::evaluate(lhs, &input),
                    crate::semantics::evaluate(rhs, &input),
                    "{} -> {} if {} fails at {}",
                    lhs,
                    rhs,
                    guard,
                    format_binding(&input)
                );
            }
        }
    }

    #[test]
    fn test_unconditional_rule_needs_no_guard() {
        let (lhs, rhs) = sides("(c0 + x) - c0", "x");
        let guard = synthesize_guard(&lhs, &rhs, &[], &GridSolver, &GuardConfig::default()).unwrap();
        assert!(guard.is_true());
    }

    #[test]
    fn test_guard_excludes_failures() {
        let cases = [("max(x, c0) - c0", "max(x - c0, 0)"), ("min(x*c0, c1)", "x*c0"), ("(x*c0)/c0", "x")];
        for (l, r) in cases {
            let (lhs, rhs) = sides(l, r);
            match synthesize_guard(&lhs, &rhs, &[], &GridSolver, &GuardConfig::default()) {
                Ok(guard) => sound_on_grid(&lhs, &rhs, &guard),
                Err(e) => assert!(e.is_recoverable(), "{}", e),
            }
        }
    }

    #[test]
    fn test_guard_admits_observed_instances() {
        let (lhs, rhs) = sides("(x / c0)*c0 + x % c0", "x");
        let instance: Binding = [("c0".to_string(), Value::Int(3))].into();
        let guard = synthesize_guard(&lhs, &rhs, &[instance.clone()], &GridSolver, &GuardConfig::default());
        if let Ok(guard) = guard {
            assert_eq!(evaluate_bool(&guard, &instance), Some(true));
            sound_on_grid(&lhs, &rhs, &guard);
        }
    }

    #[test]
    fn test_templates_cover_pairs() {
        let atoms = templates(&["c0".to_string(), "c1".to_string()]);
        assert_eq!(atoms.len(), 5 * 2 + 8);
        assert_eq!(atoms[0].to_string(), "c0 != 0");
        let has = |text: &str| atoms.contains(&parse_bool_expr(text).unwrap());
        assert!(has("c0 % c1 == 0"));
        assert!(has("c0 + c1 == 0"));
    }

    #[test]
    fn test_cover_is_greedy() {
        let atoms = templates(&["c0".to_string()]);
        let points: Vec<Binding> = [-2, -1]
            .into_iter()
            .map(|v| [("c0".to_string(), Value::Int(v))].into())
            .collect();
        let chosen = cover(&atoms, &points).unwrap();
        assert_eq!(chosen.len(), 1);
        assert_eq!(chosen[0].to_string(), "0 <= c0");

        let zero: Binding = [("c0".to_string(), Value::Int(0))].into();
        let none = cover(&[parse_bool_expr("c0 == 0").unwrap()], &[zero]);
        assert!(none.is_none());
    }

    #[test]
    fn test_check_rule_keeps_valid_rules() {
        let (lhs, rhs) = sides("x*2 - x", "x");
        let rule = Rule::new(lhs, rhs);
        assert_eq!(check_rule(&rule, &GridSolver, &GuardConfig::default()), rule);
    }

    #[test]
    fn test_check_rule_repairs_guard() {
        let (lhs, rhs) = sides("max(x, c0) - c0", "x - c0");
        let rule = Rule::new(lhs.clone(), rhs.clone());
        let checked = check_rule(&rule, &GridSolver, &GuardConfig::default());
        assert!(!checked.predicate.is_true());
        sound_on_grid(&lhs, &rhs, &checked.predicate);
    }

    #[test]
    fn test_instantiation_guard_is_sufficient() {
        let (lhs, rhs) = sides("select(c0 < x, x, c0)", "x");
        let guard = instantiation_guard(&lhs, &rhs, &GridSolver, &GuardConfig::default()).unwrap();
        sound_on_grid(&lhs, &rhs, &guard);
    }
}

//! Cleaning up a set of rewrite rules
//!
//! Rules are checked (and their guards repaired) on the worker pool, put
//! into a canonical form, and then filtered: duplicates, rules with false
//! guards, rules that do not reduce the term order, rules that invent
//! variables, and rules dominated by a more general rule are all dropped.

use super::guard::{GuardConfig, check_rule};
use super::is_wildcard_constant;
use super::matcher::more_general_than;
use super::patterns::wildcard_name;
use super::reduction_order::valid_reduction_order;
use super::rules::{FOLD, Rule, implicit_predicate, inject_folds, node_name, remove_folds};
use crate::error::{Result, invariant_violation};
use crate::ir::analysis::{free_vars, substitute, var_names, visit};
use crate::ir::{BinOp, Expr, ExprKind};
use crate::search::{PoolConfig, run_pool};
use crate::semantics::{SmtSolver, can_prove, simplify};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub guard: GuardConfig,
    pub pool: PoolConfig,
    /// Verify every rule and repair its guard before filtering
    pub check: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            guard: GuardConfig::default(),
            pool: PoolConfig::default(),
            check: true,
        }
    }
}

impl FilterConfig {
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }
}

/// Why a rule was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rejection {
    Duplicate,
    FalseGuard,
    ReductionOrder,
    FreshVariable,
    Dominated,
    NoVariableEliminated,
}

/// Run the whole pipeline over `rules`
pub fn filter_rules(rules: Vec<Rule>, solver: &dyn SmtSolver, config: &FilterConfig) -> Result<Vec<Rule>> {
    let total = rules.len();
    let rules = if config.check {
        run_pool(rules, &config.pool, |_, rule| check_rule(&rule, solver, &config.guard))?.results
    } else {
        rules
    };

    let mut rules: Vec<Rule> = rules
        .into_iter()
        .map(|r| canonicalize_names(&relax_constants(&normalize_comparison(r))))
        .collect();
    rules.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));

    let mut rejected: BTreeMap<Rejection, usize> = BTreeMap::new();
    let mut reject = |rule: &Rule, why: Rejection| {
        debug!(rule = %rule, reason = ?why, "dropping rule");
        *rejected.entry(why).or_insert(0) += 1;
    };

    let mut kept: Vec<Rule> = Vec::new();
    for rule in rules {
        let duplicate = kept
            .last()
            .is_some_and(|last| last.lhs == rule.lhs && last.predicate == rule.predicate);
        if duplicate {
            reject(&rule, Rejection::Duplicate);
            continue;
        }
        if rule.predicate.is_false() {
            reject(&rule, Rejection::FalseGuard);
            continue;
        }
        if !valid_reduction_order(&rule.lhs, &rule.rhs) {
            reject(&rule, Rejection::ReductionOrder);
            continue;
        }
        if valid_reduction_order(&rule.rhs, &rule.lhs) {
            invariant_violation(format!(
                "reduction order holds in both directions for {} and {}",
                rule.lhs, rule.rhs
            ));
        }
        if has_fresh_variable(&rule) {
            reject(&rule, Rejection::FreshVariable);
            continue;
        }
        kept.push(rule);
    }

    let mut out = Vec::new();
    for (i, rule) in kept.iter().enumerate() {
        if is_dominated(i, &kept) {
            reject(rule, Rejection::Dominated);
            continue;
        }
        if !eliminates_a_use(rule) {
            reject(rule, Rejection::NoVariableEliminated);
            continue;
        }
        out.push(rule.clone());
    }
    info!(input = total, kept = out.len(), rejected = ?rejected, "filtered rules");
    Ok(out)
}

/// Rewrite `x <= y` and `x != y` rules as `y < x` and `x == y` rules with a
/// negated replacement, when negating the replacement costs nothing
pub fn normalize_comparison(rule: Rule) -> Rule {
    let flipped = match rule.lhs.as_binary() {
        Some((BinOp::Le, a, b)) => Expr::lt(b.clone(), a.clone()),
        Some((BinOp::Ne, a, b)) => Expr::eq(b.clone(), a.clone()),
        _ => return rule,
    };
    let rhs = &rule.rhs;
    let negated = if rhs.is_const() {
        simplify(&Expr::not(rhs.clone()))
    } else {
        match rhs.kind() {
            ExprKind::Binary(BinOp::Le, a, b) => Expr::lt(b.clone(), a.clone()),
            ExprKind::Binary(BinOp::Lt, a, b) => Expr::le(b.clone(), a.clone()),
            ExprKind::Binary(BinOp::Eq, a, b) => Expr::ne(a.clone(), b.clone()),
            ExprKind::Binary(BinOp::Ne, a, b) => Expr::eq(a.clone(), b.clone()),
            ExprKind::Not(a) => a.clone(),
            _ => return rule,
        }
    };
    Rule {
        lhs: flipped,
        rhs: negated,
        predicate: rule.predicate,
    }
}

/// Names used inside `fold(...)` once constant subterms are wrapped
fn folded_names(e: &Expr) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    visit(&inject_folds(e), &mut |node| {
        if let ExprKind::Call { name, args, .. } = node.kind() {
            if name == FOLD {
                for arg in args {
                    names.extend(var_names(arg));
                }
            }
        }
    });
    names
}

/// A wildcard constant that is never folded and never constrained matches
/// any term, so it becomes an ordinary wildcard
pub fn relax_constants(rule: &Rule) -> Rule {
    let mut pinned = folded_names(&rule.rhs);
    pinned.extend(var_names(&rule.predicate));
    pinned.extend(var_names(&implicit_predicate(&rule.lhs)));

    let mut used: BTreeSet<String> = var_names(&rule.lhs);
    used.extend(var_names(&rule.rhs));
    used.extend(var_names(&rule.predicate));

    let mut renaming = BTreeMap::new();
    for (name, (ty, _)) in free_vars(&rule.lhs) {
        if !is_wildcard_constant(&name) || pinned.contains(&name) || !ty.is_int() {
            continue;
        }
        let fresh = (0..).map(wildcard_name).find(|n| !used.contains(n));
        if let Some(fresh) = fresh {
            used.insert(fresh.clone());
            renaming.insert(name, Expr::typed_var(fresh, ty));
        }
    }
    if renaming.is_empty() {
        return rule.clone();
    }
    Rule {
        lhs: substitute(&rule.lhs, &renaming),
        rhs: remove_folds(&substitute(&rule.rhs, &renaming)),
        predicate: rule.predicate.clone(),
    }
}

/// Rename wildcards to `x, y, z, ...` and constants to `c0, c1, ...` in
/// order of first appearance in the left-hand side
pub fn canonicalize_names(rule: &Rule) -> Rule {
    let mut order: Vec<(String, crate::ir::Type)> = Vec::new();
    for e in [&rule.lhs, &rule.rhs, &rule.predicate] {
        visit(e, &mut |node| {
            if let ExprKind::Var { name, ty } = node.kind() {
                if !order.iter().any(|(n, _)| n == name) {
                    order.push((name.clone(), *ty));
                }
            }
        });
    }
    let (mut wildcards, mut constants) = (0, 0);
    let mut renaming = BTreeMap::new();
    for (name, ty) in order {
        let new_name = if is_wildcard_constant(&name) {
            constants += 1;
            format!("c{}", constants - 1)
        } else {
            wildcards += 1;
            wildcard_name(wildcards - 1)
        };
        renaming.insert(name, Expr::typed_var(new_name, ty));
    }
    Rule {
        lhs: substitute(&rule.lhs, &renaming),
        rhs: substitute(&rule.rhs, &renaming),
        predicate: substitute(&rule.predicate, &renaming),
    }
}

/// Node names of the root and its children, then the sides and guard
fn sort_key(rule: &Rule) -> (Vec<&'static str>, &Expr, &Expr) {
    let mut types = vec![node_name(&rule.lhs)];
    types.extend(rule.lhs.children().into_iter().map(node_name));
    (types, &rule.lhs, &rule.predicate)
}

fn has_fresh_variable(rule: &Rule) -> bool {
    let lhs = var_names(&rule.lhs);
    var_names(&rule.rhs).iter().any(|name| !lhs.contains(name))
}

/// True if some other rule matches everything `kept[i]` matches, under a
/// guard that `kept[i]`'s guard implies. Of two rules dominating each
/// other, the later one survives.
fn is_dominated(i: usize, kept: &[Rule]) -> bool {
    let rule = &kept[i];
    let dominates = |general: &Rule, specific: &Rule| {
        more_general_than(&general.lhs, &specific.lhs).is_some_and(|binding| {
            let implied = substitute(&general.predicate, &binding);
            can_prove(&Expr::or(Expr::not(specific.predicate.clone()), implied))
        })
    };
    for (j, other) in kept.iter().enumerate() {
        if i == j || !dominates(other, rule) {
            continue;
        }
        if !dominates(rule, other) || i < j {
            debug!(rule = %rule, by = %other, "too specific");
            return true;
        }
    }
    false
}

/// At least one occurrence of a non-constant wildcard disappears
fn eliminates_a_use(rule: &Rule) -> bool {
    let rhs = free_vars(&rule.rhs);
    free_vars(&rule.lhs).iter().any(|(name, (_, uses))| {
        !is_wildcard_constant(name) && rhs.get(name).map_or(0, |(_, r)| *r) < *uses
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::testing::GridSolver;
    use crate::parser::{parse_bool_expr, parse_expr};

    fn parse(text: &str) -> Expr {
        parse_bool_expr(text).or_else(|_| parse_expr(text)).unwrap()
    }

    fn rule(lhs: &str, rhs: &str) -> Rule {
        Rule::new(parse(lhs), parse(rhs))
    }

    fn unchecked() -> FilterConfig {
        FilterConfig::default()
            .with_check(false)
            .with_pool(PoolConfig::default().with_workers(2))
    }

    #[test]
    fn test_normalize_comparison() {
        let r = normalize_comparison(rule("x <= x + 1", "true"));
        assert_eq!(r.lhs.to_string(), "x + 1 < x");
        assert!(r.rhs.is_false());

        let r = normalize_comparison(rule("x != y", "y != x"));
        assert_eq!(r.lhs.to_string(), "y == x");
        assert_eq!(r.rhs.to_string(), "y == x");

        assert_eq!(normalize_comparison(rule("x < y", "false")), rule("x < y", "false"));
        let both = normalize_comparison(rule("min(x, y) <= x", "min(x, y) <= x"));
        assert_eq!(both.rhs.to_string(), "x < min(x, y)");
        // Replacements that cannot be negated for free are left alone
        let select = rule("x <= y", "select(x < 0, x <= y, x <= y)");
        assert_eq!(normalize_comparison(select.clone()), select);
    }

    #[test]
    fn test_relax_unpinned_constants() {
        let r = relax_constants(&rule("(c0 + x) - c0", "x"));
        assert_eq!(r.lhs.to_string(), "y + x - y");

        // Folded constants stay constants
        let r = relax_constants(&rule("(x + c0) + c1", "x + (c0 + c1)"));
        assert_eq!(r, rule("(x + c0) + c1", "x + (c0 + c1)"));

        // As do constants the implicit predicate constrains
        let r = relax_constants(&rule("(x*c0)/c0", "x"));
        assert_eq!(r.lhs.to_string(), "x*c0/c0");
    }

    #[test]
    fn test_canonical_names() {
        let r = canonicalize_names(&rule("min(b, a + c3) - b", "min(a + c3 - b, 0)"));
        assert_eq!(r.lhs.to_string(), "min(x, y + c0) - x");
        assert_eq!(r.rhs.to_string(), "min(y + c0 - x, 0)");
    }

    #[test]
    fn test_drops_bad_rules() {
        let rules = vec![
            rule("x - x", "0"),
            rule("x - x", "0"),
            rule("x + y", "y + x"),
            rule("x + 0", "y"),
            rule("x*2 - x", "x").with_predicate(Expr::bool(false)),
        ];
        let out = filter_rules(rules, &GridSolver, &unchecked()).unwrap();
        assert_eq!(out, vec![rule("x - x", "0")]);
    }

    #[test]
    fn test_dominance_filter() {
        let rules = vec![
            rule("(x + 3) - x", "3"),
            rule("(x + y) - x", "y"),
            rule("min(x, y) - min(x, y)", "0"),
            rule("x - x", "0"),
        ];
        let out = filter_rules(rules, &GridSolver, &unchecked()).unwrap();
        let lhs: Vec<String> = out.iter().map(|r| r.lhs.to_string()).collect();
        assert_eq!(lhs.len(), 2, "{:?}", lhs);
        assert!(lhs.contains(&"x + y - x".to_string()));
        assert!(lhs.contains(&"x - x".to_string()));
    }

    #[test]
    fn test_filtering_twice_changes_nothing() {
        let rules = vec![
            rule("x <= x + 1", "true"),
            rule("b != a", "a != b"),
            rule("(c0 + x) - c0", "x"),
            rule("(x + 3) - x", "3"),
            rule("(b + a) - b", "a"),
            rule("x*c0 - x*c1", "x*(c0 - c1)").with_predicate(parse("c1 < c0")),
            rule("x*2 - x*5", "x*-3"),
            rule("x - x", "0"),
        ];
        let once = filter_rules(rules, &GridSolver, &unchecked()).unwrap();
        assert!(!once.is_empty());
        let twice = filter_rules(once.clone(), &GridSolver, &unchecked()).unwrap();
        assert_eq!(twice, once);
    }

    #[test]
    fn test_guarded_rules_are_not_dominated_by_stronger_guards() {
        let general = rule("x*c0 - x*c1", "x*(c0 - c1)").with_predicate(parse("c1 < c0"));
        let covered = rule("x*5 - x*2", "x*3");
        let uncovered = rule("x*2 - x*5", "x*-3");
        let out = filter_rules(vec![general.clone(), covered, uncovered.clone()], &GridSolver, &unchecked()).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.contains(&general));
        assert!(out.contains(&uncovered));
    }

    #[test]
    fn test_checking_repairs_and_sorts() {
        let rules = vec![
            rule("max(x, c0) - c0", "max(x - c0, 0)"),
            rule("min(x, y) + max(x, y)", "x + y"),
            rule("x*2 - x", "x + 1"),
        ];
        let config = FilterConfig::default().with_pool(PoolConfig::default().with_workers(2));
        let out = filter_rules(rules, &GridSolver, &config).unwrap();
        let roots: Vec<&str> = out.iter().map(|r| r.root_name()).collect();
        assert_eq!(roots, vec!["Add", "Sub"]);
        assert!(out.iter().all(|r| r.predicate.is_true()));
    }
}

//! Mining rewrite rules from a corpus of terms
//!
//! Every subterm shape of the corpus becomes a candidate left-hand side.
//! Each candidate is handed to the synthesizer with a budget of one fewer
//! operation than it has; anything found is a rule. Rules that differ only
//! in their literal constants are then merged into one rule over wildcard
//! constants, guarded by a synthesized predicate.

use super::blacklist::Blacklist;
use super::filter::{FilterConfig, filter_rules};
use super::guard::{GuardConfig, synthesize_guard};
use super::matcher::more_general_than;
use super::patterns::{ConstantGeneralizer, PatternInfo, lhs_patterns, reassociated_variants};
use super::reduction_order::valid_reduction_order;
use super::rules::Rule;
use crate::error::{Result, SuperoptError};
use crate::ir::analysis::{count_leaves, inline_lets};
use crate::ir::{Binding, Expr, ExprKind, Value};
use crate::search::{CegisConfig, PoolConfig, SharedState, Synthesizer, run_pool};
use crate::semantics::{SmtSolver, evaluate_int, simplify};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MiningConfig {
    /// Largest left-hand side searched, in operations
    pub max_lhs_ops: usize,
    pub max_pattern_nodes: usize,
    pub max_wildcards: usize,
    /// Patterns with more leaves than this are not reassociated
    pub max_reassociation_leaves: usize,
    pub cegis: CegisConfig,
    pub guard: GuardConfig,
    pub pool: PoolConfig,
    pub blacklist: Option<PathBuf>,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            max_lhs_ops: 6,
            max_pattern_nodes: 12,
            max_wildcards: 6,
            max_reassociation_leaves: 8,
            cegis: CegisConfig::default(),
            guard: GuardConfig::default(),
            pool: PoolConfig::default(),
            blacklist: None,
        }
    }
}

impl MiningConfig {
    pub fn with_max_lhs_ops(mut self, ops: usize) -> Self {
        self.max_lhs_ops = ops;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_blacklist(mut self, path: Option<PathBuf>) -> Self {
        self.blacklist = path;
        self
    }
}

/// Counts reported at the end of a mining run
#[derive(Debug, Clone, Default)]
pub struct MiningStatistics {
    pub already_simple: usize,
    pub repeated_shapes: usize,
    pub patterns: usize,
    pub searched: usize,
    pub found: usize,
    pub blacklisted: usize,
}

/// Simplified corpus terms, one per constant-generalized shape
fn prepare_corpus(corpus: &[Expr], stats: &mut MiningStatistics) -> Vec<Expr> {
    let mut seen = BTreeSet::new();
    let mut shapes: BTreeMap<Expr, usize> = BTreeMap::new();
    let mut out = Vec::new();
    for e in corpus {
        let e = simplify(&inline_lets(e));
        if e.is_const() || e.is_leaf() {
            stats.already_simple += 1;
            continue;
        }
        if !seen.insert(e.clone()) {
            continue;
        }
        let count = shapes.entry(ConstantGeneralizer::generalize_one(&e)).or_insert(0);
        *count += 1;
        if *count > 1 {
            stats.repeated_shapes += 1;
            continue;
        }
        out.push(e);
    }
    out
}

/// Candidate left-hand sides, bucketed by operation count
fn candidate_patterns(
    terms: &[Expr],
    blacklist: &Blacklist,
    config: &MiningConfig,
    stats: &mut MiningStatistics,
) -> Vec<(usize, Expr)> {
    let mut patterns = BTreeSet::new();
    let mut shapes = BTreeSet::new();
    for e in terms {
        for p in lhs_patterns(e, config.max_pattern_nodes, config.max_wildcards) {
            if blacklist.contains(&p) || patterns.contains(&p) {
                continue;
            }
            if shapes.insert(ConstantGeneralizer::generalize_one(&p)) {
                patterns.insert(p);
            }
        }
    }
    stats.patterns = patterns.len();

    let mut jobs = Vec::new();
    for lhs_ops in 1..=config.max_lhs_ops {
        for p in &patterns {
            let info = PatternInfo::of(p);
            if info.leaves() == lhs_ops + 1 && !info.has_unsupported_ir && info.is_interesting() {
                jobs.push((lhs_ops, p.clone()));
            }
        }
    }
    jobs
}

/// A variant of `pattern` that the simplifier shrinks once its
/// associative chains are reordered
fn reassociate(pattern: &Expr, config: &MiningConfig) -> Option<Expr> {
    let leaves = count_leaves(pattern);
    reassociated_variants(pattern, config.max_reassociation_leaves)
        .into_iter()
        .map(|v| simplify(&v))
        .find(|v| count_leaves(v) < leaves)
}

struct Accepted {
    rules: Vec<Rule>,
    blacklist: Blacklist,
}

/// Search every candidate pattern for a smaller equivalent
fn search_patterns(
    jobs: Vec<(usize, Expr)>,
    blacklist: Blacklist,
    solver: &dyn SmtSolver,
    config: &MiningConfig,
) -> Result<(Vec<Rule>, Blacklist)> {
    let shared = SharedState::new(Accepted {
        rules: Vec::new(),
        blacklist,
    });

    let outcome = run_pool(jobs, &config.pool, |_, (lhs_ops, pattern)| -> Result<()> {
        let found = match reassociate(&pattern, config) {
            Some(rhs) => Some(rhs),
            None => {
                let mut synthesizer = Synthesizer::new(solver, config.cegis.clone());
                synthesizer.superoptimize(&pattern, lhs_ops).program
            }
        };

        shared.with(|accepted| match found {
            Some(rhs) if valid_reduction_order(&pattern, &rhs) => {
                info!(lhs = %pattern, rhs = %rhs, "found rule");
                accepted.rules.push(Rule::new(pattern, rhs));
                Ok(())
            }
            _ => accepted.blacklist.record(&pattern),
        })
    })?;
    for result in outcome.results {
        result?;
    }

    let accepted = shared.into_inner();
    Ok((accepted.rules, accepted.blacklist))
}

/// Drop rules whose left-hand side is an instance of another rule's
fn keep_most_general(rules: Vec<Rule>) -> Vec<Rule> {
    let strictly_more_general = |a: &Rule, b: &Rule| {
        more_general_than(&a.lhs, &b.lhs).is_some() && more_general_than(&b.lhs, &a.lhs).is_none()
    };
    rules
        .iter()
        .filter(|r| !rules.iter().any(|other| strictly_more_general(other, *r)))
        .cloned()
        .collect()
}

/// Small combinations of wildcard constants, tried in order when a literal
/// on the right-hand side does not appear on the left
fn constant_expressions(names: &[String]) -> Vec<Expr> {
    let mut out = Vec::new();
    for a in names {
        out.push(Expr::sub(Expr::int(0), Expr::var(a.as_str())));
    }
    for a in names {
        for b in names {
            let (x, y) = (Expr::var(a.as_str()), Expr::var(b.as_str()));
            if a < b {
                out.push(Expr::add(x.clone(), y.clone()));
                out.push(Expr::mul(x.clone(), y.clone()));
            }
            if a != b {
                out.push(Expr::sub(x.clone(), y.clone()));
                out.push(Expr::div(x, y));
            }
        }
    }
    out
}

/// Replace literals in `rhs` with wildcard constants, or with a combination
/// of them that evaluates to the same value. Literals that cannot be
/// expressed stay as they are.
fn generalize_rhs(rhs: &Expr, binding: &Binding) -> Expr {
    match rhs.kind() {
        ExprKind::Int(v) => {
            let value = Value::Int(*v);
            if let Some((name, _)) = binding.iter().find(|(_, bound)| **bound == value) {
                return Expr::var(name.as_str());
            }
            let names: Vec<String> = binding.keys().cloned().collect();
            constant_expressions(&names)
                .into_iter()
                .find(|candidate| evaluate_int(candidate, binding) == Some(*v))
                .unwrap_or_else(|| rhs.clone())
        }
        _ => rhs.map_children(|c| generalize_rhs(c, binding)),
    }
}

/// A rule with its literals abstracted, and the values they had
fn generalize_rule(rule: &Rule) -> (Expr, Expr, Binding) {
    let mut generalizer = ConstantGeneralizer::new();
    let lhs = generalizer.generalize(&rule.lhs);
    let binding: Binding = generalizer
        .binding
        .iter()
        .filter_map(|(name, e)| e.as_int().map(|v| (name.clone(), Value::Int(v))))
        .collect();
    let rhs = generalize_rhs(&rule.rhs, &binding);
    (lhs, rhs, binding)
}

/// Merge rules that differ only in their constants into guarded rules over
/// wildcard constants. Rules whose guard cannot be found are kept as they
/// were.
pub fn generalize_constants(rules: Vec<Rule>, solver: &dyn SmtSolver, config: &MiningConfig) -> Result<Vec<Rule>> {
    let mut out = Vec::new();
    let mut clusters: BTreeMap<(Expr, Expr), (Vec<Binding>, Vec<Rule>)> = BTreeMap::new();
    for rule in rules {
        let (lhs, rhs, binding) = generalize_rule(&rule);
        if binding.is_empty() {
            out.push(rule);
            continue;
        }
        let (instances, members) = clusters.entry((lhs, rhs)).or_default();
        instances.push(binding);
        members.push(rule);
    }

    let jobs: Vec<_> = clusters.into_iter().collect();
    let generalized = run_pool(jobs, &config.pool, |_, ((lhs, rhs), (instances, members))| {
        match synthesize_guard(&lhs, &rhs, &instances, solver, &config.guard) {
            Ok(guard) if !guard.is_false() => {
                debug!(lhs = %lhs, rhs = %rhs, guard = %guard, instances = instances.len(), "generalized");
                Ok(vec![Rule::new(lhs, rhs).with_predicate(guard)])
            }
            Ok(_) => Ok(members),
            Err(SuperoptError::SolverUnknown(query)) => {
                warn!(lhs = %lhs, query = %query, "solver gave up, keeping concrete rules");
                Ok(members)
            }
            Err(e) if e.is_recoverable() => {
                debug!(lhs = %lhs, error = %e, "no guard, keeping concrete rules");
                Ok(members)
            }
            Err(e) => Err(e),
        }
    })?;
    for rules in generalized.results {
        out.extend(rules?);
    }
    Ok(out)
}

/// Mine rewrite rules from `corpus`
pub fn find_rules(corpus: &[Expr], solver: &dyn SmtSolver, config: &MiningConfig) -> Result<Vec<Rule>> {
    let mut stats = MiningStatistics::default();
    let blacklist = match &config.blacklist {
        Some(path) => Blacklist::load(path)?,
        None => Blacklist::in_memory(),
    };
    let initially_blacklisted = blacklist.len();

    let terms = prepare_corpus(corpus, &mut stats);
    let jobs = candidate_patterns(&terms, &blacklist, config, &mut stats);
    stats.searched = jobs.len();
    info!(corpus = corpus.len(), terms = terms.len(), patterns = stats.patterns, jobs = jobs.len(), "searching patterns");

    let (rules, blacklist) = search_patterns(jobs, blacklist, solver, config)?;
    stats.found = rules.len();
    stats.blacklisted = blacklist.len() - initially_blacklisted;

    let rules = generalize_constants(keep_most_general(rules), solver, config)?;
    let filter = FilterConfig {
        guard: config.guard.clone(),
        pool: config.pool.clone(),
        check: false,
    };
    let rules = filter_rules(rules, solver, &filter)?;
    info!(?stats, rules = rules.len(), "mining finished");
    Ok(rules)
}

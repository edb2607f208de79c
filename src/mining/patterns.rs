//! Candidate left-hand sides
//!
//! Every connected piece of a term's DAG that contains its root node is a
//! candidate pattern: the nodes outside the piece become wildcards. The
//! walk keeps an explicit queue of (rejected, included, frontier) states and
//! never includes a variable as an inner node.

use crate::ir::analysis::count_leaves;
use crate::ir::arena::{TermArena, TermId};
use crate::ir::{BinOp, Expr, ExprKind};
use std::collections::{BTreeMap, BTreeSet};

const WILDCARD_NAMES: [&str; 6] = ["x", "y", "z", "w", "u", "v"];

/// Cap on reassociated variants of a single term
const MAX_VARIANTS: usize = 512;

/// Name of the `index`-th wildcard in first-seen order
pub fn wildcard_name(index: usize) -> String {
    match WILDCARD_NAMES.get(index) {
        Some(name) => name.to_string(),
        None => format!("v{}", index),
    }
}

struct Frame {
    rejected: BTreeSet<TermId>,
    included: BTreeSet<TermId>,
    frontier: BTreeSet<TermId>,
}

impl Frame {
    fn may_include(&self, arena: &TermArena, id: TermId) -> bool {
        !self.rejected.contains(&id)
            && !self.included.contains(&id)
            && !matches!(arena.expr(id).kind(), ExprKind::Var { .. })
    }
}

/// Every pattern of at most `max_nodes` non-wildcard nodes and at most
/// `max_wildcards` distinct wildcards that matches some subterm of `e`
pub fn lhs_patterns(e: &Expr, max_nodes: usize, max_wildcards: usize) -> BTreeSet<Expr> {
    let mut arena = TermArena::new();
    arena.intern(e);

    let mut patterns = BTreeSet::new();
    for root in arena.ids() {
        // Leaves cannot be simplified
        if arena.node(root).is_leaf() {
            continue;
        }
        let mut queue = vec![Frame {
            rejected: BTreeSet::new(),
            included: BTreeSet::new(),
            frontier: BTreeSet::from([root]),
        }];
        while let Some(frame) = queue.pop() {
            let next = frame
                .frontier
                .iter()
                .copied()
                .find(|&id| frame.may_include(&arena, id));
            let Some(id) = next else {
                if !frame.included.is_empty() {
                    if let Some(p) = build_pattern(&arena, root, &frame.included, max_wildcards) {
                        patterns.insert(p);
                    }
                }
                continue;
            };

            let mut frontier = frame.frontier.clone();
            frontier.remove(&id);

            if frame.included.len() < max_nodes {
                let mut included = frame.included.clone();
                included.insert(id);
                let mut grown = frontier.clone();
                for child in arena.node(id).children() {
                    if frame.may_include(&arena, child) {
                        grown.insert(child);
                    }
                }
                queue.push(Frame {
                    rejected: frame.rejected.clone(),
                    included,
                    frontier: grown,
                });
            }

            let mut rejected = frame.rejected;
            rejected.insert(id);
            queue.push(Frame {
                rejected,
                included: frame.included,
                frontier,
            });
        }
    }
    patterns
}

fn build_pattern(
    arena: &TermArena,
    root: TermId,
    included: &BTreeSet<TermId>,
    max_wildcards: usize,
) -> Option<Expr> {
    let mut wildcards = Vec::new();
    let pattern = rebuild(arena, root, included, &mut wildcards);
    (wildcards.len() <= max_wildcards).then_some(pattern)
}

fn rebuild(
    arena: &TermArena,
    id: TermId,
    included: &BTreeSet<TermId>,
    wildcards: &mut Vec<TermId>,
) -> Expr {
    let original = arena.expr(id);
    if !included.contains(&id) {
        let index = match wildcards.iter().position(|&w| w == id) {
            Some(i) => i,
            None => {
                wildcards.push(id);
                wildcards.len() - 1
            }
        };
        return Expr::typed_var(wildcard_name(index), original.ty());
    }
    if original.is_leaf() {
        return original.clone();
    }
    let mut children = Vec::new();
    for child in arena.node(id).children() {
        children.push(rebuild(arena, child, included, wildcards));
    }
    original.with_children(children)
}

/// Shape statistics used to decide whether a pattern is worth a CEGIS run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternInfo {
    pub var_leaves: usize,
    pub constants: usize,
    /// Division by a non-constant, or anything the solver cannot reason about
    pub has_unsupported_ir: bool,
    pub has_repeated_var: bool,
}

impl PatternInfo {
    pub fn of(e: &Expr) -> Self {
        let mut info = PatternInfo::default();
        let mut seen = BTreeSet::new();
        info.visit(e, &mut seen);
        info
    }

    fn visit(&mut self, e: &Expr, seen: &mut BTreeSet<String>) {
        match e.kind() {
            ExprKind::Int(_) | ExprKind::Bool(_) => {
                self.constants += 1;
                return;
            }
            ExprKind::Var { name, .. } => {
                self.var_leaves += 1;
                if !seen.insert(name.clone()) {
                    self.has_repeated_var = true;
                }
                return;
            }
            ExprKind::Binary(BinOp::Div | BinOp::Mod, _, b) if !b.is_const() => {
                self.has_unsupported_ir = true;
            }
            ExprKind::Call { .. } | ExprKind::Let { .. } => {
                self.has_unsupported_ir = true;
                return;
            }
            _ => {}
        }
        for child in e.children() {
            self.visit(child, seen);
        }
    }

    pub fn leaves(&self) -> usize {
        self.var_leaves + self.constants
    }

    /// Patterns without a repeated wildcard or a constant rarely simplify
    pub fn is_interesting(&self) -> bool {
        self.has_repeated_var || self.constants > 0
    }
}

/// Replaces integer literals with wildcard constants `c0`, `c1`, ...
/// Equal literals share a wildcard, across every term passed to the same
/// generalizer.
#[derive(Debug, Default)]
pub struct ConstantGeneralizer {
    names: BTreeMap<i64, String>,
    /// The literal each wildcard stands for
    pub binding: BTreeMap<String, Expr>,
}

impl ConstantGeneralizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generalize(&mut self, e: &Expr) -> Expr {
        match e.kind() {
            ExprKind::Int(v) => {
                if let Some(name) = self.names.get(v) {
                    return Expr::var(name.as_str());
                }
                let name = format!("c{}", self.names.len());
                self.names.insert(*v, name.clone());
                self.binding.insert(name.clone(), e.clone());
                Expr::var(name)
            }
            _ => e.map_children(|c| self.generalize(c)),
        }
    }

    /// Generalize a term whose constants should not be shared with anything
    pub fn generalize_one(e: &Expr) -> Expr {
        Self::new().generalize(e)
    }
}

fn is_associative(op: BinOp) -> bool {
    matches!(
        op,
        BinOp::Add | BinOp::Mul | BinOp::Min | BinOp::Max | BinOp::And | BinOp::Or
    )
}

/// Every reassociation and reordering of the associative-commutative chains
/// in `e`, capped in number. Terms with more than `max_leaves` leaves are
/// returned unchanged.
pub fn reassociated_variants(e: &Expr, max_leaves: usize) -> Vec<Expr> {
    if count_leaves(e) > max_leaves {
        return vec![e.clone()];
    }
    let mut out: Vec<Expr> = variants(e).into_iter().collect();
    out.truncate(MAX_VARIANTS);
    out
}

fn variants(e: &Expr) -> BTreeSet<Expr> {
    if e.is_leaf() {
        return BTreeSet::from([e.clone()]);
    }
    match e.as_binary() {
        Some((op, _, _)) if is_associative(op) => {
            let operands: Vec<Vec<Expr>> = e
                .unpack(op)
                .iter()
                .map(|o| variants(o).into_iter().collect())
                .collect();
            let mut out = BTreeSet::new();
            for choice in cartesian(&operands) {
                for order in permutations(choice.len()) {
                    let chain = order.iter().map(|&i| choice[i].clone());
                    if let Some(v) = Expr::pack(op, chain) {
                        out.insert(v);
                    }
                    if out.len() >= MAX_VARIANTS {
                        return out;
                    }
                }
            }
            out
        }
        _ => {
            let children: Vec<Vec<Expr>> = e
                .children()
                .into_iter()
                .map(|c| variants(c).into_iter().collect())
                .collect();
            cartesian(&children)
                .into_iter()
                .map(|choice| e.with_children(choice))
                .collect()
        }
    }
}

/// One item from each list, every combination, capped
fn cartesian(lists: &[Vec<Expr>]) -> Vec<Vec<Expr>> {
    let mut out: Vec<Vec<Expr>> = vec![Vec::new()];
    for list in lists {
        let mut next = Vec::new();
        'outer: for prefix in &out {
            for item in list {
                let mut combined = prefix.clone();
                combined.push(item.clone());
                next.push(combined);
                if next.len() >= MAX_VARIANTS {
                    break 'outer;
                }
            }
        }
        out = next;
    }
    out
}

/// Index permutations of `0..n` in lexicographic order
fn permutations(n: usize) -> Vec<Vec<usize>> {
    let mut current: Vec<usize> = (0..n).collect();
    let mut out = vec![current.clone()];
    loop {
        let Some(i) = (1..n).rev().find(|&i| current[i - 1] < current[i]) else {
            return out;
        };
        let pivot = i - 1;
        let Some(j) = (i..n).rev().find(|&j| current[j] > current[pivot]) else {
            return out;
        };
        current.swap(pivot, j);
        current[i..].reverse();
        out.push(current.clone());
        if out.len() >= MAX_VARIANTS {
            return out;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expr;
    use crate::semantics::simplify;
    use crate::validation::agree_on_grid;

    fn patterns(text: &str) -> Vec<String> {
        lhs_patterns(&parse_expr(text).unwrap(), 12, 6)
            .into_iter()
            .map(|p| p.to_string())
            .collect()
    }

    #[test]
    fn test_patterns_of_small_term() {
        let found = patterns("x*2 - x");
        for expected in ["x*2 - x", "x - y", "x*y - x", "x*2", "x*y"] {
            assert!(found.contains(&expected.to_string()), "missing {} in {:?}", expected, found);
        }
        // Variables never stay inner nodes, and leaves are never roots
        assert!(!found.contains(&"x".to_string()));
        assert!(!found.contains(&"2".to_string()));
    }

    #[test]
    fn test_shared_subterms_share_wildcards() {
        let found = patterns("(a + b) - (a + b)");
        assert!(found.contains(&"x - x".to_string()), "{:?}", found);
        assert!(found.contains(&"x + y - (x + y)".to_string()), "{:?}", found);
    }

    #[test]
    fn test_wildcard_cap() {
        let e = parse_expr("a + b + c + d + e + f + g").unwrap();
        let found = lhs_patterns(&e, 12, 6);
        assert!(!found.is_empty());
        assert!(found.iter().all(|p| crate::ir::analysis::var_names(p).len() <= 6));
        assert!(!found.contains(&e));
    }

    #[test]
    fn test_wildcard_names() {
        assert_eq!(wildcard_name(0), "x");
        assert_eq!(wildcard_name(5), "v");
        assert_eq!(wildcard_name(6), "v6");
    }

    #[test]
    fn test_pattern_info() {
        let info = PatternInfo::of(&parse_expr("x*2 - x").unwrap());
        assert_eq!(info.leaves(), 3);
        assert!(info.has_repeated_var);
        assert!(info.is_interesting());
        assert!(!info.has_unsupported_ir);

        let info = PatternInfo::of(&parse_expr("x / y").unwrap());
        assert!(info.has_unsupported_ir);
        assert!(!info.is_interesting());
    }

    #[test]
    fn test_constant_generalization() {
        let mut generalizer = ConstantGeneralizer::new();
        let lhs = generalizer.generalize(&parse_expr("(x + 3)*4 - 3").unwrap());
        let rhs = generalizer.generalize(&parse_expr("x*4 + 9").unwrap());
        assert_eq!(lhs.to_string(), "(x + c0)*c1 - c0");
        assert_eq!(rhs.to_string(), "x*c1 + c2");
        assert_eq!(generalizer.binding["c2"], Expr::int(9));
    }

    #[test]
    fn test_reassociation_finds_cancellation() {
        let e = parse_expr("(x + y) + (z - y)").unwrap();
        let variants = reassociated_variants(&e, 8);
        assert!(variants.len() > 1);
        for v in &variants {
            assert!(agree_on_grid(&e, v, -3, 3), "{} vs {}", e, v);
        }
        let e = parse_expr("min(min(x, 3), min(y, 5))").unwrap();
        let best = reassociated_variants(&e, 8)
            .iter()
            .map(|v| count_leaves(&simplify(v)))
            .min();
        assert_eq!(best, Some(3));
    }

    #[test]
    fn test_reassociation_leaf_cap() {
        let e = parse_expr("a + b + c + d + e").unwrap();
        assert_eq!(reassociated_variants(&e, 4), vec![e]);
    }
}

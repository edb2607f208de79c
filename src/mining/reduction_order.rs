//! Well-founded ordering on terms
//!
//! A rule `lhs -> rhs` is only accepted if `rhs` is strictly smaller than
//! `lhs` under this order, which guarantees that repeated rewriting
//! terminates. The order compares, in turn: occurrences of each variable,
//! non-linear operations, leaves, operations, a histogram of operators in
//! priority order, whether the root is additive, whether the right child is
//! constant, and finally the weight of the root operator.

use super::is_wildcard_constant;
use super::rules::FOLD;
use crate::ir::analysis::free_vars;
use crate::ir::{BinOp, Expr, ExprKind};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Histogram buckets, most expensive first. Sub shares the Add bucket and
/// Max shares the Min bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Bucket {
    Select,
    Div,
    Mul,
    Mod,
    Add,
    Min,
    Not,
    Or,
    And,
    Ge,
    Gt,
    Le,
    Lt,
    Ne,
    Eq,
}

fn bucket(e: &Expr) -> Option<Bucket> {
    Some(match e.kind() {
        ExprKind::Select(..) => Bucket::Select,
        ExprKind::Not(_) => Bucket::Not,
        ExprKind::Binary(op, _, _) => match op {
            BinOp::Div => Bucket::Div,
            BinOp::Mul => Bucket::Mul,
            BinOp::Mod => Bucket::Mod,
            BinOp::Add | BinOp::Sub => Bucket::Add,
            BinOp::Min | BinOp::Max => Bucket::Min,
            BinOp::Or => Bucket::Or,
            BinOp::And => Bucket::And,
            BinOp::Ge => Bucket::Ge,
            BinOp::Gt => Bucket::Gt,
            BinOp::Le => Bucket::Le,
            BinOp::Lt => Bucket::Lt,
            BinOp::Ne => Bucket::Ne,
            BinOp::Eq => Bucket::Eq,
        },
        _ => return None,
    })
}

/// Weight of the root node type
fn root_weight(e: &Expr) -> u32 {
    match e.kind() {
        ExprKind::Select(..) => 21,
        ExprKind::Binary(op, _, _) => match op {
            BinOp::Div => 20,
            BinOp::Mul => 19,
            BinOp::Mod => 18,
            BinOp::Sub => 17,
            BinOp::Add => 16,
            BinOp::Max | BinOp::Min => 14,
            BinOp::Or => 12,
            BinOp::And => 11,
            BinOp::Ge => 10,
            BinOp::Gt => 9,
            BinOp::Le => 8,
            BinOp::Lt => 7,
            BinOp::Ne => 6,
            BinOp::Eq => 5,
        },
        ExprKind::Not(_) => 13,
        ExprKind::Call { .. } | ExprKind::Let { .. } => 4,
        ExprKind::Bool(_) => 1,
        ExprKind::Int(_) | ExprKind::Var { .. } => 0,
    }
}

fn is_fold(e: &Expr) -> bool {
    matches!(e.kind(), ExprKind::Call { name, .. } if name == FOLD)
}

/// Pre-order walk that treats `fold(...)` as an opaque leaf
fn walk(e: &Expr, f: &mut impl FnMut(&Expr)) {
    f(e);
    if !is_fold(e) {
        for child in e.children() {
            walk(child, f);
        }
    }
}

#[derive(Debug, Default)]
struct Profile {
    nonlinear: usize,
    leaves: usize,
    histogram: BTreeMap<Bucket, usize>,
}

impl Profile {
    fn of(e: &Expr) -> Self {
        let mut profile = Profile::default();
        walk(e, &mut |node| {
            if node.is_leaf() || is_fold(node) {
                profile.leaves += 1;
            }
            if matches!(node.as_binary(), Some((BinOp::Mul | BinOp::Div | BinOp::Mod, _, _))) {
                profile.nonlinear += 1;
            }
            if let Some(b) = bucket(node) {
                *profile.histogram.entry(b).or_insert(0) += 1;
            }
        });
        profile
    }

    fn ops(&self) -> usize {
        self.histogram.values().sum()
    }
}

/// Compare the histograms bucket by bucket, most expensive first
fn compare_histograms(lhs: &Profile, rhs: &Profile) -> Ordering {
    let buckets: std::collections::BTreeSet<&Bucket> =
        lhs.histogram.keys().chain(rhs.histogram.keys()).collect();
    for b in buckets {
        let l = lhs.histogram.get(b).copied().unwrap_or(0);
        let r = rhs.histogram.get(b).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn is_additive(e: &Expr) -> bool {
    matches!(e.as_binary(), Some((BinOp::Add | BinOp::Sub, _, _)))
}

fn right_child_is_constant(e: &Expr) -> bool {
    let Some((_, _, b)) = e.as_binary() else {
        return false;
    };
    match b.kind() {
        ExprKind::Int(_) | ExprKind::Bool(_) => true,
        ExprKind::Var { name, .. } => is_wildcard_constant(name),
        _ => is_fold(b),
    }
}

/// Decide a tier: Some(true) if `lhs` is bigger, Some(false) if smaller
fn decide(ordering: Ordering) -> Option<bool> {
    match ordering {
        Ordering::Greater => Some(true),
        Ordering::Less => Some(false),
        Ordering::Equal => None,
    }
}

/// True if rewriting `lhs` to `rhs` strictly decreases the term order
pub fn valid_reduction_order(lhs: &Expr, rhs: &Expr) -> bool {
    let lhs_vars = free_vars(lhs);
    let rhs_vars = free_vars(rhs);

    // No variable may gain uses. Wildcard constants only match constants,
    // so they cannot make the order fail.
    for (name, (_, uses)) in &rhs_vars {
        if is_wildcard_constant(name) {
            continue;
        }
        match lhs_vars.get(name) {
            Some((_, lhs_uses)) if lhs_uses >= uses => {}
            _ => return false,
        }
    }
    let loses_a_use = lhs_vars.iter().any(|(name, (_, uses))| {
        !is_wildcard_constant(name) && rhs_vars.get(name).is_none_or(|(_, r)| uses > r)
    });
    if loses_a_use {
        return true;
    }

    let l = Profile::of(lhs);
    let r = Profile::of(rhs);
    let tiers = [
        l.nonlinear.cmp(&r.nonlinear),
        l.leaves.cmp(&r.leaves),
        l.ops().cmp(&r.ops()),
        compare_histograms(&l, &r),
    ];
    if let Some(decided) = tiers.into_iter().find_map(decide) {
        return decided;
    }

    match (is_additive(lhs), is_additive(rhs)) {
        (false, true) => return true,
        (true, false) => return false,
        _ => {}
    }
    match (right_child_is_constant(lhs), right_child_is_constant(rhs)) {
        (false, true) => return true,
        (true, false) => return false,
        _ => {}
    }
    // A tie is not a reduction
    root_weight(lhs) < root_weight(rhs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::rules::inject_folds;
    use crate::parser::{parse_bool_expr, parse_expr};

    fn ordered(lhs: &str, rhs: &str) -> bool {
        valid_reduction_order(&parse_expr(lhs).unwrap(), &parse_expr(rhs).unwrap())
    }

    #[test]
    fn test_removing_a_use_is_a_reduction() {
        assert!(ordered("x*2 - x", "x"));
        assert!(ordered("x - x", "0"));
        assert!(ordered("min(x, y) + max(x, y)", "x + y"));
        assert!(!ordered("x", "x*2 - x"));
    }

    #[test]
    fn test_new_variables_are_rejected() {
        assert!(!ordered("x + 0", "y"));
        assert!(!ordered("x*3", "x + x + x"));
    }

    #[test]
    fn test_wildcard_constants_do_not_count() {
        assert!(ordered("(x + c0) - c0", "x"));
        let lhs = parse_expr("(x*c0)*c1").unwrap();
        let rhs = inject_folds(&parse_expr("x*(c0*c1)").unwrap());
        assert_eq!(rhs.to_string(), "x*fold(c0*c1)");
        assert!(valid_reduction_order(&lhs, &rhs));
    }

    #[test]
    fn test_nonlinear_ops_dominate() {
        assert!(ordered("(x*4)/2", "x*2"));
        assert!(!ordered("x*2", "(x*4)/2"));
        // A pure reassociation is a tie, which is never a reduction
        assert!(!ordered("(x*2)*y", "x*(y*2)"));
        assert!(!ordered("x*(y*2)", "(x*2)*y"));
    }

    #[test]
    fn test_additive_root_and_constant_child() {
        // Same counts everywhere, the rhs moves the constant to the right
        assert!(ordered("(x + 1) - y", "x - y + 1"));
        assert!(!ordered("x - y + 1", "(x + 1) - y"));
        assert!(ordered("min(x + 1, y + 1)", "min(x, y) + 1"));
    }

    #[test]
    fn test_order_is_antisymmetric() {
        let pairs = [
            ("x + y", "y + x"),
            ("min(x, y)", "min(y, x)"),
            ("x < y", "y > x"),
            ("(x + 1) - y", "x - y + 1"),
            ("x*2 - x", "x"),
        ];
        for (a, b) in pairs {
            let (a, b) = (parse_bool_expr(a).or_else(|_| parse_expr(a)).unwrap(),
                parse_bool_expr(b).or_else(|_| parse_expr(b)).unwrap());
            assert!(
                !(valid_reduction_order(&a, &b) && valid_reduction_order(&b, &a)),
                "{} <-> {}",
                a,
                b
            );
        }
    }
}

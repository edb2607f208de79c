//! Boolean normal forms

use crate::ir::{BinOp, Expr, ExprKind};
use std::collections::BTreeSet;

/// A conjunction of literals
pub type Clause = BTreeSet<Expr>;

/// Rewrite boolean selects as `(c && t) || (!c && f)`
pub fn remove_select(e: &Expr) -> Expr {
    match e.kind() {
        ExprKind::Select(c, t, f) if t.ty().is_bool() => {
            let c = remove_select(c);
            Expr::or(
                Expr::and(c.clone(), remove_select(t)),
                Expr::and(Expr::not(c), remove_select(f)),
            )
        }
        _ => e.map_children(remove_select),
    }
}

/// Apply De Morgan's laws until negations sit only on atoms. Negated
/// comparisons are flipped, and integer disequality becomes a disjunction
/// of strict comparisons.
pub fn push_negation(e: &Expr) -> Expr {
    match e.kind() {
        ExprKind::Not(a) => negated(a),
        ExprKind::Binary(BinOp::Ne, a, b) if a.ty().is_int() => Expr::or(
            Expr::lt(push_negation(a), push_negation(b)),
            Expr::lt(push_negation(b), push_negation(a)),
        ),
        _ => e.map_children(push_negation),
    }
}

fn negated(e: &Expr) -> Expr {
    match e.kind() {
        ExprKind::Bool(b) => Expr::bool(!b),
        ExprKind::Not(a) => push_negation(a),
        ExprKind::Binary(BinOp::And, a, b) => Expr::or(negated(a), negated(b)),
        ExprKind::Binary(BinOp::Or, a, b) => Expr::and(negated(a), negated(b)),
        ExprKind::Binary(op, a, b) if a.ty().is_int() => {
            let (a, b) = (push_negation(a), push_negation(b));
            match op {
                BinOp::Lt => Expr::le(b, a),
                BinOp::Le => Expr::lt(b, a),
                BinOp::Gt => Expr::le(a, b),
                BinOp::Ge => Expr::lt(a, b),
                BinOp::Eq => Expr::or(Expr::lt(a.clone(), b.clone()), Expr::lt(b, a)),
                BinOp::Ne => Expr::eq(a, b),
                _ => Expr::not(Expr::binary(*op, a, b)),
            }
        }
        ExprKind::Binary(BinOp::Eq, a, b) => Expr::ne(push_negation(a), push_negation(b)),
        ExprKind::Binary(BinOp::Ne, a, b) => Expr::eq(push_negation(a), push_negation(b)),
        _ => Expr::not(push_negation(e)),
    }
}

/// Disjunctive normal form. A conjunction whose expansion would exceed
/// `max_clauses` clauses is kept whole as a single literal.
pub fn to_dnf(e: &Expr, max_clauses: usize) -> Vec<Clause> {
    match e.kind() {
        ExprKind::Binary(BinOp::Or, a, b) => {
            let mut clauses = to_dnf(a, max_clauses);
            for clause in to_dnf(b, max_clauses) {
                if !clauses.contains(&clause) {
                    clauses.push(clause);
                }
            }
            clauses
        }
        ExprKind::Binary(BinOp::And, a, b) => {
            let left = to_dnf(a, max_clauses);
            let right = to_dnf(b, max_clauses);
            if left.len().saturating_mul(right.len()) > max_clauses {
                return vec![Clause::from([e.clone()])];
            }
            let mut clauses: Vec<Clause> = Vec::new();
            for l in &left {
                for r in &right {
                    let clause: Clause = l.union(r).cloned().collect();
                    if !clauses.contains(&clause) {
                        clauses.push(clause);
                    }
                }
            }
            clauses
        }
        _ => vec![Clause::from([e.clone()])],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Binding, Value};
    use crate::parser::parse_bool_expr;
    use crate::semantics::evaluate_bool;

    fn agree(a: &Expr, b: &Expr) {
        for x in -3..=3 {
            for y in -3..=3 {
                for p in [false, true] {
                    let mut env = Binding::new();
                    env.insert("x".into(), Value::Int(x));
                    env.insert("y".into(), Value::Int(y));
                    env.insert("p".into(), Value::Bool(p));
                    assert_eq!(evaluate_bool(a, &env), evaluate_bool(b, &env), "{} vs {}", a, b);
                }
            }
        }
    }

    #[test]
    fn test_push_negation() {
        let e = parse_bool_expr("!(x < y && (p || x == y))").unwrap();
        let pushed = push_negation(&e);
        let mut negations = 0;
        crate::ir::analysis::visit(&pushed, &mut |n| {
            if let ExprKind::Not(inner) = n.kind() {
                assert!(inner.as_var().is_some(), "negation of {}", inner);
                negations += 1;
            }
        });
        assert_eq!(negations, 1);
        agree(&e, &pushed);
    }

    #[test]
    fn test_remove_select() {
        let e = parse_bool_expr("select(x < y, p, y <= 0)").unwrap();
        let removed = remove_select(&e);
        assert!(!matches!(removed.kind(), ExprKind::Select(..)));
        agree(&e, &removed);
    }

    #[test]
    fn test_dnf_distributes() {
        let e = parse_bool_expr("(x < 0 || p) && (y < 0 || x == y)").unwrap();
        let clauses = to_dnf(&e, 64);
        assert_eq!(clauses.len(), 4);
        assert!(clauses.iter().all(|c| c.len() == 2));
        let rebuilt = Expr::or_all(clauses.into_iter().map(Expr::and_all));
        agree(&e, &rebuilt);
    }

    #[test]
    fn test_dnf_cap_keeps_conjunction() {
        let e = parse_bool_expr("(x < 0 || p) && (y < 0 || x == y)").unwrap();
        let clauses = to_dnf(&e, 2);
        assert_eq!(clauses, vec![Clause::from([e])]);
    }
}

//! Pattern matching between rule left-hand sides
//!
//! `more_general_than(a, b)` asks whether every term matched by pattern `b`
//! is also matched by pattern `a`. Wildcards in `a` bind to subterms of `b`;
//! constant wildcards (`c*`) only bind to literals or other constant
//! wildcards. Commutative operators may match with their operands swapped,
//! so the search keeps a stack of alternatives. Each alternative shares its
//! binding map until it needs to extend it.

use super::is_wildcard_constant;
use crate::ir::{Expr, ExprKind};
use std::collections::BTreeMap;
use std::rc::Rc;

pub type Bindings = BTreeMap<String, Expr>;

/// One partial match: pattern/term pairs still to match, and the bindings
/// made so far
struct Attempt {
    pending: Vec<(Expr, Expr)>,
    bindings: Rc<Bindings>,
}

fn can_bind(name: &str, term: &Expr) -> bool {
    if !is_wildcard_constant(name) {
        return true;
    }
    match term.kind() {
        ExprKind::Int(_) | ExprKind::Bool(_) => true,
        ExprKind::Var { name, .. } => is_wildcard_constant(name),
        _ => false,
    }
}

/// Bindings under which `general` becomes `specific`, if any
pub fn more_general_than(general: &Expr, specific: &Expr) -> Option<Bindings> {
    let mut stack = vec![Attempt {
        pending: vec![(general.clone(), specific.clone())],
        bindings: Rc::new(Bindings::new()),
    }];

    'attempts: while let Some(mut attempt) = stack.pop() {
        while let Some((pattern, term)) = attempt.pending.pop() {
            if pattern.ty() != term.ty() {
                continue 'attempts;
            }
            match (pattern.kind(), term.kind()) {
                (ExprKind::Var { name, .. }, _) => {
                    match attempt.bindings.get(name) {
                        Some(bound) if *bound == term => {}
                        Some(_) => continue 'attempts,
                        None if can_bind(name, &term) => {
                            Rc::make_mut(&mut attempt.bindings).insert(name.clone(), term.clone());
                        }
                        None => continue 'attempts,
                    }
                }
                (ExprKind::Int(_) | ExprKind::Bool(_), _) => {
                    if pattern != term {
                        continue 'attempts;
                    }
                }
                (ExprKind::Binary(op, a, b), ExprKind::Binary(op2, c, d)) if op == op2 => {
                    if op.is_commutative() && a != b {
                        let mut swapped = attempt.pending.clone();
                        swapped.push((a.clone(), d.clone()));
                        swapped.push((b.clone(), c.clone()));
                        stack.push(Attempt {
                            pending: swapped,
                            bindings: Rc::clone(&attempt.bindings),
                        });
                    }
                    attempt.pending.push((a.clone(), c.clone()));
                    attempt.pending.push((b.clone(), d.clone()));
                }
                (ExprKind::Not(a), ExprKind::Not(b)) => {
                    attempt.pending.push((a.clone(), b.clone()));
                }
                (ExprKind::Select(..), ExprKind::Select(..))
                | (ExprKind::Call { .. }, ExprKind::Call { .. })
                | (ExprKind::Let { .. }, ExprKind::Let { .. }) => {
                    let same_head = match (pattern.kind(), term.kind()) {
                        (ExprKind::Call { name: n1, args: a1, .. }, ExprKind::Call { name: n2, args: a2, .. }) => {
                            n1 == n2 && a1.len() == a2.len()
                        }
                        (ExprKind::Let { name: n1, .. }, ExprKind::Let { name: n2, .. }) => n1 == n2,
                        _ => true,
                    };
                    if !same_head {
                        continue 'attempts;
                    }
                    for (p, t) in pattern.children().into_iter().zip(term.children()) {
                        attempt.pending.push((p.clone(), t.clone()));
                    }
                }
                _ => continue 'attempts,
            }
        }
        return Some(Rc::unwrap_or_clone(attempt.bindings));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::analysis::substitute;
    use crate::parser::{parse_bool_expr, parse_expr};

    fn general(a: &str, b: &str) -> Option<Bindings> {
        more_general_than(&parse_expr(a).unwrap(), &parse_expr(b).unwrap())
    }

    #[test]
    fn test_wildcards_bind_subterms() {
        let b = general("x + y", "(z*2) + 3").unwrap();
        assert_eq!(b["x"].to_string(), "z*2");
        assert_eq!(b["y"].to_string(), "3");
        assert!(general("x - x", "y - z").is_none());
        assert!(general("x - x", "(y + 1) - (y + 1)").is_some());
    }

    #[test]
    fn test_constant_wildcards_only_bind_constants() {
        assert!(general("x + c0", "y + 4").is_some());
        assert!(general("x + c0", "y + c1").is_some());
        assert!(general("x + c0", "y + z").is_none());
        assert!(general("x + 4", "y + c0").is_none());
    }

    #[test]
    fn test_commutative_operands_backtrack() {
        // The first orientation binds x to y*2 and then cannot match x*2 with y
        let b = general("min(x*2, x)", "min(y, y*2)").unwrap();
        assert_eq!(b["x"].to_string(), "y");
        assert!(general("x - y*2", "(z + 1) - w*2").is_some());
        assert!(general("x - y*2", "z - 2").is_none());
    }

    #[test]
    fn test_binding_reconstructs_specific() {
        let cases = [
            ("select(x < y, x, y)", "select(a + 1 < b, a + 1, b)"),
            ("max(x, y) - min(x, y)", "max(z, 3) - min(z, 3)"),
        ];
        for (g, s) in cases {
            let g = parse_expr(g).unwrap();
            let s = parse_expr(s).unwrap();
            let b = more_general_than(&g, &s).unwrap();
            assert_eq!(substitute(&g, &b), s);
        }
        let g = parse_bool_expr("x < y || b").unwrap();
        let s = parse_bool_expr("z < 3 || (z < 4)").unwrap();
        assert!(more_general_than(&g, &s).is_some());
    }

    #[test]
    fn test_more_general_is_reflexive_not_symmetric() {
        assert!(general("x + y", "x + y").is_some());
        assert!(general("x + y", "x + x").is_some());
        assert!(general("x + x", "x + y").is_none());
    }
}

//! Decomposition of a boolean term into convex pieces
//!
//! Min, max and select are lifted outward until they sit directly under
//! boolean structure, products with a variable of unknown sign are forked
//! on that sign, and the goal is then case-split on every select condition.
//! The disjunction of the resulting pieces is equivalent to the goal, and
//! no piece contains min, max or an integer select below the case cap.

use super::normal_form::{push_negation, remove_select, to_dnf};
use crate::ir::analysis::{inline_lets, visit};
use crate::ir::{BinOp, Expr, ExprKind};
use crate::semantics::{Simplifier, simplify};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarSign {
    Positive,
    NonNegative,
    NonPositive,
    Negative,
}

/// Pushes min, max and select outward through arithmetic and comparisons
#[derive(Default)]
struct MinMaxLifter {
    signs: HashMap<String, Vec<VarSign>>,
}

impl MinMaxLifter {
    fn sign(&self, name: &str) -> Option<VarSign> {
        self.signs.get(name).and_then(|s| s.last().copied())
    }

    fn with_sign(&mut self, name: &str, sign: VarSign, e: &Expr) -> Expr {
        self.signs.entry(name.to_string()).or_default().push(sign);
        let out = self.lift(e);
        if let Some(scope) = self.signs.get_mut(name) {
            scope.pop();
        }
        out
    }

    /// An integer variable whose sign is not yet known in this scope
    fn unsigned_var<'e>(&self, e: &'e Expr) -> Option<&'e str> {
        e.as_var().filter(|name| self.sign(name).is_none())
    }

    fn lift(&mut self, e: &Expr) -> Expr {
        match e.kind() {
            ExprKind::Binary(op, a, b) => match op {
                BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => self.arithmetic(*op, a, b),
                BinOp::Lt | BinOp::Le => {
                    let (a, b) = (self.lift(a), self.lift(b));
                    self.compare(*op, a, b)
                }
                BinOp::Gt => self.lift(&Expr::lt(b.clone(), a.clone())),
                BinOp::Ge => self.lift(&Expr::le(b.clone(), a.clone())),
                BinOp::Eq if a.ty().is_int() => {
                    let (a, b) = (self.lift(a), self.lift(b));
                    match lift_out(BinOp::Eq, &a, &b) {
                        Some(lifted) => self.lift(&lifted),
                        None => Expr::eq(a, b),
                    }
                }
                BinOp::Ne if a.ty().is_int() => self.lift(&Expr::or(
                    Expr::lt(a.clone(), b.clone()),
                    Expr::lt(b.clone(), a.clone()),
                )),
                BinOp::Ne => self.lift(&Expr::or(
                    Expr::and(a.clone(), Expr::not(b.clone())),
                    Expr::and(Expr::not(a.clone()), b.clone()),
                )),
                _ => e.map_children(|c| self.lift(c)),
            },
            ExprKind::Not(a) => self.negated(a),
            ExprKind::Select(c, t, f) => self.select(e, c, t, f),
            _ => e.map_children(|c| self.lift(c)),
        }
    }

    fn arithmetic(&mut self, op: BinOp, a: &Expr, b: &Expr) -> Expr {
        let a = self.lift(a);
        let b = self.lift(b);

        // Fork on the sign of a variable factor or divisor
        let fork_on = match op {
            BinOp::Mul => self.unsigned_var(&b).or_else(|| self.unsigned_var(&a)),
            BinOp::Div => self.unsigned_var(&b),
            _ => None,
        };
        if let Some(name) = fork_on {
            let v = Expr::var(name);
            let zero = Expr::int(0);
            let e = Expr::binary(op, a.clone(), b.clone());
            let forked = Expr::select(
                Expr::lt(zero.clone(), v.clone()),
                e.clone(),
                Expr::select(Expr::lt(v, zero.clone()), e, zero),
            );
            return self.lift(&forked);
        }

        if let Some(lifted) = lift_out(op, &a, &b) {
            return self.lift(&lifted);
        }
        if op == BinOp::Mul {
            if let Some((x, y)) = a.as_op(BinOp::Add) {
                let distributed = Expr::add(
                    Expr::mul(x.clone(), b.clone()),
                    Expr::mul(y.clone(), b.clone()),
                );
                return self.lift(&distributed);
            }
            if let Some((x, y)) = b.as_op(BinOp::Add) {
                let distributed = Expr::add(
                    Expr::mul(a.clone(), x.clone()),
                    Expr::mul(a.clone(), y.clone()),
                );
                return self.lift(&distributed);
            }
        }
        Expr::binary(op, a, b)
    }

    fn compare(&mut self, op: BinOp, a: Expr, b: Expr) -> Expr {
        let cmp = |x: &Expr, y: &Expr| Expr::binary(op, x.clone(), y.clone());
        let rewritten = if let Some((x, y)) = a.as_op(BinOp::Min) {
            Expr::or(cmp(x, &b), cmp(y, &b))
        } else if let Some((x, y)) = b.as_op(BinOp::Min) {
            Expr::and(cmp(&a, x), cmp(&a, y))
        } else if let Some((x, y)) = a.as_op(BinOp::Max) {
            Expr::and(cmp(x, &b), cmp(y, &b))
        } else if let Some((x, y)) = b.as_op(BinOp::Max) {
            Expr::or(cmp(&a, x), cmp(&a, y))
        } else if let Some(lifted) = lift_out(op, &a, &b) {
            lifted
        } else {
            return Expr::binary(op, a, b);
        };
        self.lift(&rewritten)
    }

    fn negated(&mut self, a: &Expr) -> Expr {
        match a.kind() {
            ExprKind::Binary(BinOp::And, p, q) => {
                let (p, q) = (self.negated(p), self.negated(q));
                Expr::or(p, q)
            }
            ExprKind::Binary(BinOp::Or, p, q) => {
                let (p, q) = (self.negated(p), self.negated(q));
                Expr::and(p, q)
            }
            ExprKind::Not(inner) => self.lift(inner),
            ExprKind::Binary(op, p, q) if p.ty().is_int() => {
                let (p, q) = (p.clone(), q.clone());
                match op {
                    BinOp::Lt => self.lift(&Expr::le(q, p)),
                    BinOp::Le => self.lift(&Expr::lt(q, p)),
                    BinOp::Gt => self.lift(&Expr::le(p, q)),
                    BinOp::Ge => self.lift(&Expr::lt(p, q)),
                    BinOp::Eq => self.lift(&Expr::ne(p, q)),
                    BinOp::Ne => self.lift(&Expr::eq(p, q)),
                    _ => Expr::not(self.lift(a)),
                }
            }
            _ => Expr::not(self.lift(a)),
        }
    }

    fn select(&mut self, e: &Expr, c: &Expr, t: &Expr, f: &Expr) -> Expr {
        if let Some((l, r)) = c.as_op(BinOp::Lt) {
            // select(0 < v, ...)
            if let (Some(0), Some(name)) = (l.as_int(), r.as_var()) {
                match self.sign(name) {
                    Some(VarSign::Positive) => return self.lift(t),
                    Some(VarSign::Negative | VarSign::NonPositive) => return self.lift(f),
                    _ => {}
                }
                let cond = self.lift(c);
                let t = self.with_sign(name, VarSign::Positive, t);
                let f = self.with_sign(name, VarSign::NonPositive, f);
                return Expr::select(cond, t, f);
            }
            // select(v < 0, ...)
            if let (Some(name), Some(0)) = (l.as_var(), r.as_int()) {
                match self.sign(name) {
                    Some(VarSign::Negative) => return self.lift(t),
                    Some(VarSign::Positive | VarSign::NonNegative) => return self.lift(f),
                    _ => {}
                }
                let cond = self.lift(c);
                let t = self.with_sign(name, VarSign::Negative, t);
                let f = self.with_sign(name, VarSign::NonNegative, f);
                return Expr::select(cond, t, f);
            }
        }
        e.map_children(|child| self.lift(child))
    }
}

/// Move a min, max or select operand of `op` outside it
fn lift_out(op: BinOp, a: &Expr, b: &Expr) -> Option<Expr> {
    let apply = |x: &Expr, y: &Expr| Expr::binary(op, x.clone(), y.clone());
    let lt = |x: &Expr, y: &Expr| Expr::lt(x.clone(), y.clone());
    match (a.kind(), b.kind()) {
        (ExprKind::Binary(BinOp::Min, x, y), _) => {
            Some(Expr::select(lt(x, y), apply(x, b), apply(y, b)))
        }
        (ExprKind::Binary(BinOp::Max, x, y), _) => {
            Some(Expr::select(lt(x, y), apply(y, b), apply(x, b)))
        }
        (ExprKind::Select(c, t, f), _) => Some(Expr::select(c.clone(), apply(t, b), apply(f, b))),
        (_, ExprKind::Binary(BinOp::Min, x, y)) => {
            Some(Expr::select(lt(x, y), apply(a, x), apply(a, y)))
        }
        (_, ExprKind::Binary(BinOp::Max, x, y)) => {
            Some(Expr::select(lt(x, y), apply(a, y), apply(a, x)))
        }
        (_, ExprKind::Select(c, t, f)) => Some(Expr::select(c.clone(), apply(a, t), apply(a, f))),
        _ => None,
    }
}

/// Every distinct select condition
fn select_conditions(e: &Expr) -> BTreeSet<Expr> {
    let mut out = BTreeSet::new();
    visit(e, &mut |node| {
        if let ExprKind::Select(c, _, _) = node.kind() {
            out.insert(c.clone());
        }
    });
    out
}

/// Resolve every select on `cond` to the branch `value` picks
fn extract_case(e: &Expr, cond: &Expr, value: bool) -> Expr {
    match e.kind() {
        ExprKind::Select(c, t, f) if c == cond => {
            extract_case(if value { t } else { f }, cond, value)
        }
        _ => e.map_children(|child| extract_case(child, cond, value)),
    }
}

/// Simplify a clause conjunct by conjunct, each against the facts learned
/// from the previous ones. `None` if the clause is unsatisfiable.
fn simplify_clause(clause: &BTreeSet<Expr>) -> Option<Expr> {
    let mut knowledge = Simplifier::new();
    let mut kept = BTreeSet::new();
    for literal in clause {
        let literal = knowledge.simplify(literal);
        if literal.is_false() {
            return None;
        }
        knowledge.learn_true(&literal);
        if knowledge.is_contradictory() {
            return None;
        }
        if !literal.is_true() {
            kept.insert(literal);
        }
    }
    Some(Expr::and_all(kept))
}

/// Split a boolean goal into pieces whose disjunction is equivalent to it.
/// Pieces that simplify to false are dropped, so an empty result means the
/// goal is false.
pub fn decompose(goal: &Expr, max_cases: usize, max_clauses: usize) -> Vec<Expr> {
    let e = simplify(&inline_lets(goal));
    let e = MinMaxLifter::default().lift(&e);

    let conditions = select_conditions(&e);
    if conditions.len() > max_cases {
        warn!(
            goal = %goal,
            conditions = conditions.len(),
            max_cases,
            "too many select conditions, splitting on the first few only"
        );
    }

    let mut pieces = vec![e];
    for cond in conditions.iter().take(max_cases) {
        let mut next = Vec::with_capacity(pieces.len() * 2);
        for piece in pieces {
            let when_true = extract_case(&piece, cond, true);
            if when_true == piece {
                next.push(piece);
                continue;
            }
            let when_false = extract_case(&piece, cond, false);
            next.push(Expr::and(cond.clone(), when_true));
            next.push(Expr::and(Expr::not(cond.clone()), when_false));
        }
        pieces = next;
    }

    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for piece in pieces {
        let piece = push_negation(&remove_select(&piece));
        for clause in to_dnf(&piece, max_clauses) {
            let Some(simplified) = simplify_clause(&clause) else {
                continue;
            };
            if seen.insert(simplified.clone()) {
                out.push(simplified);
            }
        }
    }
    debug!(goal = %goal, pieces = out.len(), "decomposed into convex pieces");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Binding, Value};
    use crate::parser::parse_bool_expr;
    use crate::semantics::evaluate_bool;

    fn contains_op(e: &Expr, op: BinOp) -> bool {
        let mut found = false;
        visit(e, &mut |node| {
            if matches!(node.as_binary(), Some((o, _, _)) if o == op) {
                found = true;
            }
        });
        found
    }

    fn assert_equivalent(text: &str) -> Vec<Expr> {
        let goal = parse_bool_expr(text).unwrap();
        let pieces = decompose(&goal, 10, 256);
        let rebuilt = Expr::or_all(pieces.iter().cloned());
        for x in -3..=3 {
            for y in -3..=3 {
                for z in -3..=3 {
                    let env: Binding = [("x", x), ("y", y), ("z", z)]
                        .into_iter()
                        .map(|(n, v)| (n.to_string(), Value::Int(v)))
                        .collect();
                    assert_eq!(
                        evaluate_bool(&goal, &env),
                        evaluate_bool(&rebuilt, &env),
                        "{} at x={} y={} z={}\npieces: {:?}",
                        goal,
                        x,
                        y,
                        z,
                        pieces
                    );
                }
            }
        }
        pieces
    }

    #[test]
    fn test_decomposition_is_equivalent() {
        let goals = [
            "min(x, y) + z < max(x - 1, 3)",
            "select(x < y, x*z, y - z) == 4",
            "x*y != z",
            "max(x, y)*z <= x + y",
            "!(min(x, y) < z && z < max(x, y))",
            "x / y == z",
        ];
        for goal in goals {
            assert_equivalent(goal);
        }
    }

    #[test]
    fn test_pieces_are_convex() {
        let pieces = assert_equivalent("min(x, y) + z < max(x - 1, 3)");
        assert!(!pieces.is_empty());
        for piece in &pieces {
            assert!(!contains_op(piece, BinOp::Min), "{}", piece);
            assert!(!contains_op(piece, BinOp::Max), "{}", piece);
        }
    }

    #[test]
    fn test_false_pieces_are_dropped() {
        let pieces = decompose(&parse_bool_expr("!(min(x, 10) <= 10)").unwrap(), 10, 256);
        assert!(pieces.is_empty());
    }

    #[test]
    fn test_product_forks_on_sign() {
        let goal = parse_bool_expr("x*y < 0").unwrap();
        let lifted = MinMaxLifter::default().lift(&goal);
        let conditions = select_conditions(&lifted);
        assert!(conditions.contains(&Expr::lt(Expr::int(0), Expr::var("y"))));
        assert_equivalent("x*y < 0");
    }
}

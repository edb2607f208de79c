//! Expression simplifier with an append-only knowledge store
//!
//! The simplifier folds constants, canonicalizes affine arithmetic through
//! `LinearForm`, and decides comparisons from interval bounds. Facts learned
//! with `learn_true`/`learn_false` narrow variable bounds and are looked up
//! verbatim for boolean subterms. Facts are never retracted.

use super::concrete::{apply_binary, div_euclid, mod_euclid};
use super::interval::Interval;
use super::linear::LinearForm;
use crate::ir::analysis::{substitute_var, uses_var, value_expr};
use crate::ir::{BinOp, Expr, ExprKind, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Logical negation with comparison flipping, without further simplification
pub fn negate(e: &Expr) -> Expr {
    match e.kind() {
        ExprKind::Bool(b) => Expr::bool(!b),
        ExprKind::Not(a) => a.clone(),
        ExprKind::Binary(op, a, b) if a.ty().is_int() => match op {
            BinOp::Lt => Expr::le(b.clone(), a.clone()),
            BinOp::Le => Expr::lt(b.clone(), a.clone()),
            BinOp::Gt => Expr::le(a.clone(), b.clone()),
            BinOp::Ge => Expr::lt(a.clone(), b.clone()),
            BinOp::Eq => Expr::ne(a.clone(), b.clone()),
            BinOp::Ne => Expr::eq(a.clone(), b.clone()),
            _ => Expr::not(e.clone()),
        },
        ExprKind::Binary(BinOp::Eq, a, b) => Expr::ne(a.clone(), b.clone()),
        ExprKind::Binary(BinOp::Ne, a, b) => Expr::eq(a.clone(), b.clone()),
        _ => Expr::not(e.clone()),
    }
}

fn const_value(e: &Expr) -> Option<Value> {
    match e.kind() {
        ExprKind::Int(v) => Some(Value::Int(*v)),
        ExprKind::Bool(b) => Some(Value::Bool(*b)),
        _ => None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct Simplifier {
    bounds: BTreeMap<String, Interval>,
    truths: BTreeSet<Expr>,
    falsehoods: BTreeSet<Expr>,
    contradiction: bool,
}

impl Simplifier {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Knowledge ---

    pub fn var_bounds(&self, name: &str) -> Interval {
        self.bounds.get(name).copied().unwrap_or_default()
    }

    /// Variables with known bounds
    pub fn bounded_vars(&self) -> impl Iterator<Item = (&String, &Interval)> {
        self.bounds.iter()
    }

    pub fn truths(&self) -> impl Iterator<Item = &Expr> {
        self.truths.iter()
    }

    /// True once the learned facts are mutually inconsistent
    pub fn is_contradictory(&self) -> bool {
        self.contradiction
    }

    /// Narrow the bounds of a variable
    pub fn learn_bounds(&mut self, name: &str, interval: Interval) {
        let current = self.var_bounds(name);
        let narrowed = current.intersect(&interval);
        if narrowed != current {
            trace!(var = name, ?narrowed, "learned bounds");
        }
        if narrowed.is_empty() {
            self.contradiction = true;
        }
        self.bounds.insert(name.to_string(), narrowed);
    }

    pub fn learn_true(&mut self, e: &Expr) {
        let e = self.simplify(e);
        self.learn_true_simplified(e);
    }

    pub fn learn_false(&mut self, e: &Expr) {
        let e = self.simplify(e);
        match e.kind() {
            ExprKind::Bool(false) => {}
            ExprKind::Bool(true) => self.contradiction = true,
            ExprKind::Binary(BinOp::Or, a, b) => {
                let (a, b) = (a.clone(), b.clone());
                self.learn_false(&a);
                self.learn_false(&b);
            }
            _ => {
                let negated = negate(&e);
                if matches!(negated.kind(), ExprKind::Not(_)) {
                    self.falsehoods.insert(e);
                    self.truths.insert(negated);
                } else {
                    let negated = self.simplify(&negated);
                    self.learn_true_simplified(negated);
                }
            }
        }
    }

    fn learn_true_simplified(&mut self, e: Expr) {
        match e.kind() {
            ExprKind::Bool(true) => return,
            ExprKind::Bool(false) => {
                self.contradiction = true;
                return;
            }
            ExprKind::Binary(BinOp::And, a, b) => {
                let (a, b) = (a.clone(), b.clone());
                self.learn_true_simplified(a);
                self.learn_true_simplified(b);
                return;
            }
            ExprKind::Not(inner) => {
                if let Some((p, q)) = inner.as_op(BinOp::Or) {
                    let (p, q) = (p.clone(), q.clone());
                    self.learn_false(&p);
                    self.learn_false(&q);
                }
                self.falsehoods.insert(inner.clone());
            }
            _ => {}
        }

        let negated = self.simplify(&negate(&e));
        if let ExprKind::Binary(op @ (BinOp::Lt | BinOp::Le | BinOp::Eq), a, b) = e.kind() {
            if a.ty().is_int() {
                self.learn_linear(*op, a, b);
            }
        }
        if !negated.is_const() {
            self.falsehoods.insert(negated);
        }
        self.truths.insert(e);
    }

    /// Propagate `a op b` into bounds on the variables it mentions
    fn learn_linear(&mut self, op: BinOp, a: &Expr, b: &Expr) {
        let Some(diff) = LinearForm::from_expr(a).checked_sub(&LinearForm::from_expr(b)) else {
            return;
        };
        // Each constraint is `form <= 0`
        let mut constraints = Vec::new();
        match op {
            BinOp::Lt => {
                if let Some(f) = diff.checked_add(&LinearForm::constant(1)) {
                    constraints.push(f);
                }
            }
            BinOp::Le => constraints.push(diff),
            BinOp::Eq => {
                if let Some(neg) = diff.checked_scale(-1) {
                    constraints.push(neg);
                }
                constraints.push(diff);
            }
            _ => {}
        }
        for form in constraints {
            let vars: Vec<(String, i64)> = form
                .terms
                .iter()
                .filter_map(|(t, &c)| t.as_var().map(|n| (n.to_string(), c)))
                .collect();
            for (name, c) in vars {
                let mut rest = form.clone();
                rest.terms.remove(&Expr::var(name.as_str()));
                let Some(rest_min) = self.bounds_of_form(&rest).min else {
                    continue;
                };
                // c*v <= -rest <= -rest_min
                let Some(limit) = rest_min.checked_neg() else {
                    continue;
                };
                if c > 0 {
                    self.learn_bounds(&name, Interval::at_most(div_euclid(limit, c)));
                } else if let Some(k) = c.checked_neg() {
                    // k*v >= rest_min, so v >= ceil(rest_min / k)
                    if let Some(lo) = div_euclid(limit, k).checked_neg() {
                        self.learn_bounds(&name, Interval::at_least(lo));
                    }
                }
            }
        }
    }

    /// Simplify and check for `true`
    pub fn can_prove(&self, e: &Expr) -> bool {
        self.simplify(e).is_true()
    }

    // --- Bounds ---

    /// Interval containing every value of an integer expression
    pub fn bounds_of(&self, e: &Expr) -> Interval {
        match e.kind() {
            ExprKind::Int(v) => Interval::point(*v),
            ExprKind::Var { name, ty } if ty.is_int() => self.var_bounds(name),
            ExprKind::Binary(op, a, b) => {
                let (ba, bb) = (self.bounds_of(a), self.bounds_of(b));
                match op {
                    BinOp::Add => ba.add(&bb),
                    BinOp::Sub => ba.sub(&bb),
                    BinOp::Mul if a == b => ba.mul(&bb).intersect(&Interval::at_least(0)),
                    BinOp::Mul => ba.mul(&bb),
                    BinOp::Div => ba.div(&bb),
                    BinOp::Mod => ba.modulo(&bb),
                    BinOp::Min => ba.min_with(&bb),
                    BinOp::Max => ba.max_with(&bb),
                    _ => Interval::everything(),
                }
            }
            ExprKind::Select(_, t, f) => self.bounds_of(t).union(&self.bounds_of(f)),
            ExprKind::Let { name, body, .. } if !self.bounds.contains_key(name) => {
                self.bounds_of(body)
            }
            _ => Interval::everything(),
        }
    }

    pub fn bounds_of_form(&self, form: &LinearForm) -> Interval {
        form.terms
            .iter()
            .fold(Interval::point(form.constant), |acc, (term, &c)| {
                acc.add(&self.bounds_of(term).mul_const(c))
            })
    }

    // --- Simplification ---

    pub fn simplify(&self, e: &Expr) -> Expr {
        let out = match e.kind() {
            ExprKind::Int(_) | ExprKind::Bool(_) => return e.clone(),
            ExprKind::Var { name, ty } => {
                if ty.is_int() {
                    if let Some(v) = self.var_bounds(name).as_point() {
                        return Expr::int(v);
                    }
                }
                e.clone()
            }
            ExprKind::Not(a) => {
                let a = self.simplify(a);
                let n = negate(&a);
                if matches!(n.kind(), ExprKind::Not(_)) {
                    n
                } else {
                    self.simplify(&n)
                }
            }
            ExprKind::Binary(op, a, b) => self.binary(*op, self.simplify(a), self.simplify(b)),
            ExprKind::Select(c, t, f) => self.select(self.simplify(c), t, f),
            ExprKind::Let { name, value, body } => {
                let value = self.simplify(value);
                if value.is_leaf() {
                    return self.simplify(&substitute_var(body, name, &value));
                }
                let body = self.simplify(body);
                if !uses_var(&body, name) {
                    return body;
                }
                Expr::let_in(name.clone(), value, body)
            }
            ExprKind::Call { .. } => e.map_children(|c| self.simplify(c)),
        };
        self.lookup_fact(out)
    }

    fn lookup_fact(&self, e: Expr) -> Expr {
        if e.ty().is_bool() && !e.is_const() {
            if self.truths.contains(&e) {
                return Expr::bool(true);
            }
            if self.falsehoods.contains(&e) {
                return Expr::bool(false);
            }
        }
        e
    }

    fn select(&self, c: Expr, t: &Expr, f: &Expr) -> Expr {
        match c.as_bool() {
            Some(true) => return self.simplify(t),
            Some(false) => return self.simplify(f),
            None => {}
        }
        let t = self.simplify(t);
        let f = self.simplify(f);
        if t == f {
            return t;
        }
        if t.is_true() && f.is_false() {
            return c;
        }
        if t.is_false() && f.is_true() {
            return negate(&c);
        }
        if let ExprKind::Not(inner) = c.kind() {
            return Expr::select(inner.clone(), f, t);
        }
        Expr::select(c, t, f)
    }

    fn binary(&self, op: BinOp, a: Expr, b: Expr) -> Expr {
        if let (Some(va), Some(vb)) = (const_value(&a), const_value(&b)) {
            if let Some(v) = apply_binary(op, va, vb) {
                return value_expr(v);
            }
        }
        match op {
            BinOp::Gt => self.binary(BinOp::Lt, b, a),
            BinOp::Ge => self.binary(BinOp::Le, b, a),
            BinOp::Add | BinOp::Sub | BinOp::Mul => self.arithmetic(op, a, b),
            BinOp::Div => self.divide(a, b),
            BinOp::Mod => self.modulo(a, b),
            BinOp::Min | BinOp::Max => self.min_max(op, a, b),
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le => {
                if a.ty().is_int() {
                    self.compare(op, a, b)
                } else {
                    bool_compare(op, a, b)
                }
            }
            BinOp::And => logical_and(a, b),
            BinOp::Or => logical_or(a, b),
        }
    }

    fn fold_to_point(&self, e: Expr) -> Expr {
        match self.bounds_of(&e).as_point() {
            Some(v) => Expr::int(v),
            None => e,
        }
    }

    fn arithmetic(&self, op: BinOp, a: Expr, b: Expr) -> Expr {
        let form = LinearForm::from_expr(&Expr::binary(op, a, b));
        self.fold_to_point(form.to_expr())
    }

    fn divide(&self, a: Expr, b: Expr) -> Expr {
        if b.is_zero() || a.is_zero() {
            return Expr::int(0);
        }
        match b.as_int() {
            Some(1) => return a,
            Some(-1) => return self.arithmetic(BinOp::Sub, Expr::int(0), a),
            Some(k) if k > 0 => {
                let form = LinearForm::from_expr(&a);
                let mut quotient = LinearForm::constant(div_euclid(form.constant, k));
                let mut rest = LinearForm::constant(mod_euclid(form.constant, k));
                for (term, &c) in &form.terms {
                    if c % k == 0 {
                        quotient.add_term(term.clone(), c / k);
                    } else {
                        rest.add_term(term.clone(), c);
                    }
                }
                let rest_expr = rest.to_expr();
                let rest_bounds = self.bounds_of(&rest_expr);
                let fits = rest_bounds.min.is_some_and(|m| m >= 0)
                    && rest_bounds.max.is_some_and(|m| m < k);
                if fits {
                    return self.fold_to_point(quotient.to_expr());
                }
                if !quotient.terms.is_empty() {
                    // (q*k + r) / k == q + r / k for positive k
                    let mut out = quotient;
                    out.add_term(Expr::div(rest_expr, b), 1);
                    return self.fold_to_point(out.to_expr());
                }
            }
            _ => {}
        }
        self.fold_to_point(Expr::div(a, b))
    }

    fn modulo(&self, a: Expr, b: Expr) -> Expr {
        if b.is_zero() || a.is_zero() {
            return Expr::int(0);
        }
        if let Some(k) = b.as_int() {
            let m = k.unsigned_abs();
            if m == 1 {
                return Expr::int(0);
            }
            if let Ok(m) = i64::try_from(m) {
                let form = LinearForm::from_expr(&a);
                let mut rest = LinearForm::constant(mod_euclid(form.constant, m));
                for (term, &c) in &form.terms {
                    rest.add_term(term.clone(), mod_euclid(c, m));
                }
                let rest_expr = rest.to_expr();
                let bounds = self.bounds_of(&rest_expr);
                if bounds.min.is_some_and(|v| v >= 0) && bounds.max.is_some_and(|v| v < m) {
                    return rest_expr;
                }
                return self.fold_to_point(Expr::modulo(rest_expr, b));
            }
        }
        self.fold_to_point(Expr::modulo(a, b))
    }

    fn min_max(&self, op: BinOp, a: Expr, b: Expr) -> Expr {
        if a == b {
            return a;
        }
        let (a, b) = if a.is_const() && !b.is_const() { (b, a) } else { (a, b) };
        if let Some(diff) = LinearForm::from_expr(&a).checked_sub(&LinearForm::from_expr(&b)) {
            let d = self.bounds_of_form(&diff);
            let a_le_b = d.max.is_some_and(|v| v <= 0);
            let a_ge_b = d.min.is_some_and(|v| v >= 0);
            match op {
                BinOp::Min if a_le_b => return a,
                BinOp::Min if a_ge_b => return b,
                BinOp::Max if a_le_b => return b,
                BinOp::Max if a_ge_b => return a,
                _ => {}
            }
        }
        // min(min(x, y), y) -> min(x, y), and min(x, max(x, y)) -> x
        let other = if op == BinOp::Min { BinOp::Max } else { BinOp::Min };
        for (outer, inner) in [(&a, &b), (&b, &a)] {
            if let Some((p, q)) = inner.as_op(op) {
                if p == outer || q == outer {
                    return inner.clone();
                }
            }
            if let Some((p, q)) = inner.as_op(other) {
                if p == outer || q == outer {
                    return outer.clone();
                }
            }
        }
        // min(min(x, c1), c2) -> min(x, min(c1, c2))
        if let (Some(c2), Some((inner, inner_b))) = (b.as_int(), a.as_op(op)) {
            if let Some(c1) = inner_b.as_int() {
                let c = if op == BinOp::Min { c1.min(c2) } else { c1.max(c2) };
                return self.min_max(op, inner.clone(), Expr::int(c));
            }
        }
        Expr::binary(op, a, b)
    }

    fn compare(&self, op: BinOp, a: Expr, b: Expr) -> Expr {
        let Some(mut diff) = LinearForm::from_expr(&a).checked_sub(&LinearForm::from_expr(&b))
        else {
            return Expr::binary(op, a, b);
        };
        if let Some(c) = diff.as_constant() {
            let holds = match op {
                BinOp::Lt => c < 0,
                BinOp::Le => c <= 0,
                BinOp::Eq => c == 0,
                _ => c != 0,
            };
            return Expr::bool(holds);
        }
        let bounds = self.bounds_of_form(&diff);
        match op {
            BinOp::Lt if bounds.max.is_some_and(|v| v < 0) => return Expr::bool(true),
            BinOp::Lt if bounds.min.is_some_and(|v| v >= 0) => return Expr::bool(false),
            BinOp::Le if bounds.max.is_some_and(|v| v <= 0) => return Expr::bool(true),
            BinOp::Le if bounds.min.is_some_and(|v| v > 0) => return Expr::bool(false),
            BinOp::Eq | BinOp::Ne => {
                let g = diff.coefficient_gcd();
                let impossible =
                    !bounds.contains(0) || (g > 1 && diff.constant % g != 0);
                if impossible {
                    return Expr::bool(op == BinOp::Ne);
                }
                // Canonical orientation: divide out the gcd and make the
                // leading coefficient positive
                if g > 1 {
                    let mut reduced = LinearForm::constant(diff.constant / g);
                    for (t, &c) in &diff.terms {
                        reduced.add_term(t.clone(), c / g);
                    }
                    diff = reduced;
                }
                if diff.terms.values().next().is_some_and(|&c| c < 0) {
                    if let Some(neg) = diff.checked_scale(-1) {
                        diff = neg;
                    }
                }
            }
            _ => {}
        }
        build_comparison(op, &diff)
    }
}

/// Rebuild `diff op 0` as `lhs op rhs` with only positive coefficients
fn build_comparison(op: BinOp, diff: &LinearForm) -> Expr {
    let (mut lhs, mut rhs) = diff.split_sides();
    if diff.constant > 0 {
        lhs.constant = diff.constant;
    } else {
        rhs.constant = diff.constant.wrapping_neg();
    }
    Expr::binary(op, lhs.to_expr(), rhs.to_expr())
}

fn bool_compare(op: BinOp, a: Expr, b: Expr) -> Expr {
    if a == b {
        return Expr::bool(op == BinOp::Eq);
    }
    let (a, b) = if a.is_const() { (b, a) } else { (a, b) };
    match (op, b.as_bool()) {
        (BinOp::Eq, Some(true)) | (BinOp::Ne, Some(false)) => a,
        (BinOp::Eq, Some(false)) | (BinOp::Ne, Some(true)) => negate(&a),
        _ => Expr::binary(op, a, b),
    }
}

fn logical_and(a: Expr, b: Expr) -> Expr {
    if a.is_false() || b.is_false() {
        return Expr::bool(false);
    }
    if a.is_true() {
        return b;
    }
    if b.is_true() || a == b {
        return a;
    }
    if negate(&a) == b || negate(&b) == a {
        return Expr::bool(false);
    }
    Expr::and(a, b)
}

fn logical_or(a: Expr, b: Expr) -> Expr {
    if a.is_true() || b.is_true() {
        return Expr::bool(true);
    }
    if a.is_false() {
        return b;
    }
    if b.is_false() || a == b {
        return a;
    }
    if negate(&a) == b || negate(&b) == a {
        return Expr::bool(true);
    }
    Expr::or(a, b)
}

/// Simplify without any learned facts
pub fn simplify(e: &Expr) -> Expr {
    Simplifier::new().simplify(e)
}

/// True if the expression simplifies to `true` with no learned facts
pub fn can_prove(e: &Expr) -> bool {
    simplify(e).is_true()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Binding, Value};
    use crate::parser::{parse_bool_expr, parse_expr};
    use crate::semantics::concrete::evaluate;

    fn simp(text: &str) -> String {
        simplify(&parse_expr(text).unwrap()).to_string()
    }

    #[test]
    fn test_linear_canonicalization() {
        assert_eq!(simp("x*2 - x"), "x");
        assert_eq!(simp("(x + 3) - (3 + x)"), "0");
        assert_eq!(simp("(y + x) - y"), "x");
        assert_eq!(simp("x*0 + y"), "y");
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(simp("!(min(x, 10) <= 10)"), "false");
        assert_eq!(simp("x + 1 > x"), "true");
        assert_eq!(simp("x*2 == 1"), "false");
        assert_eq!(simp("x > 5"), "5 < x");
        assert_eq!(simp("x*2 == y*2"), "x == y");
    }

    #[test]
    fn test_div_mod() {
        assert_eq!(simp("(x*4 + 2) / 4"), "x");
        assert_eq!(simp("(x*4 + y) % 4"), "y % 4");
        assert_eq!(simp("x / 1"), "x");
        assert_eq!(simp("x % 1"), "0");
        assert_eq!(simp("x / 0"), "0");
    }

    #[test]
    fn test_min_max() {
        assert_eq!(simp("min(x, x + 1)"), "x");
        assert_eq!(simp("max(x - 1, x)"), "x");
        assert_eq!(simp("min(min(x, 4), 2)"), "min(x, 2)");
        assert_eq!(simp("max(3, x)"), "max(x, 3)");
        assert_eq!(simp("min(min(x, y), y)"), "min(x, y)");
        assert_eq!(simp("max(y, max(x*2, y))"), "max(x*2, y)");
        assert_eq!(simp("min(x, max(x, y))"), "x");
        assert_eq!(simp("max(min(y, x), x)"), "x");
    }

    #[test]
    fn test_boolean_identities() {
        assert_eq!(simp("b && true"), "b");
        assert_eq!(simp("b || !b"), "true");
        assert_eq!(simp("select(x < y, true, false)"), "x < y");
        assert_eq!(simp("!(x < y)"), "y <= x");
    }

    #[test]
    fn test_learned_bounds() {
        let mut s = Simplifier::new();
        s.learn_true(&parse_bool_expr("0 <= k && k < 3").unwrap());
        assert_eq!(s.var_bounds("k"), Interval::bounded(0, 2));
        assert!(s.can_prove(&parse_bool_expr("k / 4 == 0").unwrap()));
        assert!(s.can_prove(&parse_bool_expr("k % 3 == k").unwrap()));

        s.learn_true(&parse_bool_expr("k*2 + j <= 0").unwrap());
        assert_eq!(s.var_bounds("j").max, Some(0));
    }

    #[test]
    fn test_learned_facts_and_contradiction() {
        let mut s = Simplifier::new();
        let b = Expr::bool_var("b");
        s.learn_true(&b);
        assert!(s.simplify(&Expr::not(b.clone())).is_false());
        s.learn_false(&parse_bool_expr("x < 5").unwrap());
        assert_eq!(s.var_bounds("x").min, Some(5));
        assert!(!s.is_contradictory());
        s.learn_true(&parse_bool_expr("x < 2").unwrap());
        assert!(s.is_contradictory());
    }

    #[test]
    fn test_simplify_preserves_semantics() {
        let exprs = [
            "(x*3 + 7) / 3 - x",
            "(x*6 + y*4 + 3) % 2",
            "min(x + 2, y) - max(y, x)",
            "select(x < y, (x - y)*2, y*x - x*y)",
            "(x - y*3) / 3",
        ];
        for text in exprs {
            let e = parse_expr(text).unwrap();
            let s = simplify(&e);
            for x in -5..=5 {
                for y in -5..=5 {
                    let mut env = Binding::new();
                    env.insert("x".into(), Value::Int(x));
                    env.insert("y".into(), Value::Int(y));
                    assert_eq!(evaluate(&e, &env), evaluate(&s, &env), "{} vs {}", e, s);
                }
            }
        }
    }
}

//! Linear equalities over opaque terms

use crate::ir::analysis::uses_var;
use crate::ir::{BinOp, Expr, ExprKind};
use std::collections::BTreeMap;

/// `sum(coefficient * term) + constant == 0`
///
/// Terms are variables or non-linear subterms. Products of sums are
/// distributed so that equal monomials cancel. Zero coefficients are never
/// stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Equality {
    pub terms: BTreeMap<Expr, i64>,
    pub constant: i64,
}

/// `e * c`, leaving `e` alone when `c` is one
pub(crate) fn scaled(e: &Expr, c: i64) -> Expr {
    if c == 1 {
        e.clone()
    } else {
        Expr::mul(e.clone(), Expr::int(c))
    }
}

/// Sum of terms, `0` when empty
pub(crate) fn sum(items: Vec<Expr>) -> Expr {
    Expr::pack(BinOp::Add, items).unwrap_or_else(|| Expr::int(0))
}

impl Equality {
    /// The equality `a == b`, or `None` if a coefficient overflows
    pub fn from_sides(a: &Expr, b: &Expr) -> Option<Self> {
        let mut eq = Self::default();
        eq.find_terms(a, 1)?;
        eq.find_terms(b, -1)?;
        Some(eq)
    }

    fn find_terms(&mut self, e: &Expr, c: i64) -> Option<()> {
        if c == 0 {
            return Some(());
        }
        match e.kind() {
            ExprKind::Int(v) => {
                self.constant = self.constant.checked_add(v.checked_mul(c)?)?;
                Some(())
            }
            ExprKind::Binary(BinOp::Add, a, b) => {
                self.find_terms(a, c)?;
                self.find_terms(b, c)
            }
            ExprKind::Binary(BinOp::Sub, a, b) => {
                self.find_terms(a, c)?;
                self.find_terms(b, c.checked_neg()?)
            }
            ExprKind::Binary(BinOp::Mul, a, b) => match (a.as_int(), b.as_int()) {
                (_, Some(k)) => self.find_terms(a, c.checked_mul(k)?),
                (Some(k), _) => self.find_terms(b, c.checked_mul(k)?),
                _ => self.find_product_terms(e, a, b, c),
            },
            _ => self.add_term(e.clone(), c),
        }
    }

    /// Distribute a product of two non-constant factors over sums
    fn find_product_terms(&mut self, e: &Expr, a: &Expr, b: &Expr, c: i64) -> Option<()> {
        if let Some((p, q)) = a.as_op(BinOp::Add) {
            self.find_terms(&Expr::mul(p.clone(), b.clone()), c)?;
            return self.find_terms(&Expr::mul(q.clone(), b.clone()), c);
        }
        if let Some((p, q)) = a.as_op(BinOp::Sub) {
            self.find_terms(&Expr::mul(p.clone(), b.clone()), c)?;
            return self.find_terms(&Expr::mul(q.clone(), b.clone()), c.checked_neg()?);
        }
        if let Some((p, q)) = b.as_op(BinOp::Add) {
            self.find_terms(&Expr::mul(a.clone(), p.clone()), c)?;
            return self.find_terms(&Expr::mul(a.clone(), q.clone()), c);
        }
        if let Some((p, q)) = b.as_op(BinOp::Sub) {
            self.find_terms(&Expr::mul(a.clone(), p.clone()), c)?;
            return self.find_terms(&Expr::mul(a.clone(), q.clone()), c.checked_neg()?);
        }
        match (a.as_var(), b.as_var()) {
            (Some(x), Some(y)) if y < x => self.add_term(Expr::mul(b.clone(), a.clone()), c),
            _ => self.add_term(e.clone(), c),
        }
    }

    /// Accumulate `c * e`. Fails on coefficient overflow.
    pub fn add_term(&mut self, e: Expr, c: i64) -> Option<()> {
        if let Some(v) = e.as_int() {
            self.constant = self.constant.checked_add(v.checked_mul(c)?)?;
            return Some(());
        }
        let entry = self.terms.entry(e.clone()).or_insert(0);
        *entry = entry.checked_add(c)?;
        if *entry == 0 {
            self.terms.remove(&e);
        }
        Some(())
    }

    /// Number of terms that are bare variables
    pub fn num_vars(&self) -> usize {
        self.terms.keys().filter(|t| t.as_var().is_some()).count()
    }

    /// Term count, counting a non-zero constant as a term
    pub fn len(&self) -> usize {
        self.terms.len() + usize::from(self.constant != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn uses_var(&self, name: &str) -> bool {
        self.terms.keys().any(|t| uses_var(t, name))
    }

    /// Back to a boolean term, with positive coefficients on the left and
    /// negative ones on the right
    pub fn to_expr(&self) -> Expr {
        let mut lhs = Vec::new();
        let mut rhs = Vec::new();
        for (term, &c) in &self.terms {
            match c.checked_neg() {
                Some(n) if c < 0 => rhs.push(scaled(term, n)),
                _ => lhs.push(scaled(term, c)),
            }
        }
        match self.constant.checked_neg() {
            Some(n) if self.constant < 0 => rhs.push(Expr::int(n)),
            _ if self.constant != 0 => lhs.push(Expr::int(self.constant)),
            _ => {}
        }
        Expr::eq(sum(lhs), sum(rhs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Binding, Value};
    use crate::parser::parse_expr;
    use crate::semantics::evaluate_bool;

    fn equality(a: &str, b: &str) -> Equality {
        Equality::from_sides(&parse_expr(a).unwrap(), &parse_expr(b).unwrap()).unwrap()
    }

    #[test]
    fn test_terms_cancel() {
        let eq = equality("x + y", "y + x");
        assert!(eq.is_empty());

        let eq = equality("(x + 1)*y", "x*y + y");
        assert!(eq.is_empty());

        let eq = equality("x*y - y*x + 3", "0");
        assert!(eq.terms.is_empty());
        assert_eq!(eq.constant, 3);
    }

    #[test]
    fn test_products_are_canonical() {
        let eq = equality("y*x", "z");
        let product = Expr::mul(Expr::var("x"), Expr::var("y"));
        assert_eq!(eq.terms.get(&product), Some(&1));
        assert_eq!(eq.terms.get(&Expr::var("z")), Some(&-1));
        assert_eq!(eq.num_vars(), 1);
        assert_eq!(eq.len(), 2);
    }

    #[test]
    fn test_scaled_terms() {
        let eq = equality("x*3 - (y - x)*2", "4");
        assert_eq!(eq.terms.get(&Expr::var("x")), Some(&5));
        assert_eq!(eq.terms.get(&Expr::var("y")), Some(&-2));
        assert_eq!(eq.constant, -4);
    }

    #[test]
    fn test_overflow_is_reported() {
        let big = Expr::int(i64::MAX);
        let e = Expr::mul(Expr::mul(Expr::var("x"), big.clone()), Expr::int(2));
        assert!(Equality::from_sides(&e, &Expr::int(0)).is_none());
    }

    #[test]
    fn test_to_expr_preserves_meaning() {
        let a = parse_expr("x*2 - y + 3").unwrap();
        let b = parse_expr("y*4 - 1").unwrap();
        let eq = Equality::from_sides(&a, &b).unwrap();
        let back = eq.to_expr();
        for x in -5..=5 {
            for y in -5..=5 {
                let mut env = Binding::new();
                env.insert("x".into(), Value::Int(x));
                env.insert("y".into(), Value::Int(y));
                assert_eq!(
                    evaluate_bool(&Expr::eq(a.clone(), b.clone()), &env),
                    evaluate_bool(&back, &env),
                    "{}",
                    back
                );
            }
        }
    }
}

//! Linear combinations of opaque terms
//!
//! A `LinearForm` is `sum(coefficient * term) + constant`, where terms are any
//! expressions that are not themselves sums, differences or scalings.
//! Zero coefficients are never stored.

use crate::ir::{BinOp, Expr, ExprKind};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct LinearForm {
    pub terms: BTreeMap<Expr, i64>,
    pub constant: i64,
}

impl LinearForm {
    pub fn constant(value: i64) -> Self {
        Self {
            terms: BTreeMap::new(),
            constant: value,
        }
    }

    pub fn term(e: Expr, coefficient: i64) -> Self {
        let mut form = Self::default();
        form.add_term(e, coefficient);
        form
    }

    /// Decompose an integer expression. Products of two non-constant factors
    /// are kept as opaque terms with their operands in canonical order.
    pub fn from_expr(e: &Expr) -> Self {
        Self::try_from_expr(e).unwrap_or_else(|| Self::term(e.clone(), 1))
    }

    fn try_from_expr(e: &Expr) -> Option<Self> {
        match e.kind() {
            ExprKind::Int(v) => Some(Self::constant(*v)),
            ExprKind::Binary(BinOp::Add, a, b) => {
                Self::from_expr(a).checked_add(&Self::from_expr(b))
            }
            ExprKind::Binary(BinOp::Sub, a, b) => {
                Self::from_expr(a).checked_add(&Self::from_expr(b).checked_scale(-1)?)
            }
            ExprKind::Binary(BinOp::Mul, a, b) => match (a.as_int(), b.as_int()) {
                (_, Some(k)) => Self::from_expr(a).checked_scale(k),
                (Some(k), _) => Self::from_expr(b).checked_scale(k),
                _ => {
                    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                    Some(Self::term(Expr::mul(lo.clone(), hi.clone()), 1))
                }
            },
            _ => None,
        }
    }

    pub fn add_term(&mut self, e: Expr, coefficient: i64) {
        if let Some(v) = e.as_int() {
            self.constant = self.constant.wrapping_add(v.wrapping_mul(coefficient));
            return;
        }
        let entry = self.terms.entry(e).or_insert(0);
        *entry = entry.wrapping_add(coefficient);
        if *entry == 0 {
            self.terms.retain(|_, c| *c != 0);
        }
    }

    pub fn checked_add(&self, other: &LinearForm) -> Option<LinearForm> {
        let mut out = self.clone();
        out.constant = out.constant.checked_add(other.constant)?;
        for (term, &c) in &other.terms {
            let entry = out.terms.entry(term.clone()).or_insert(0);
            *entry = entry.checked_add(c)?;
        }
        out.terms.retain(|_, c| *c != 0);
        Some(out)
    }

    pub fn checked_scale(&self, k: i64) -> Option<LinearForm> {
        if k == 0 {
            return Some(LinearForm::default());
        }
        let mut terms = BTreeMap::new();
        for (term, &c) in &self.terms {
            terms.insert(term.clone(), c.checked_mul(k)?);
        }
        Some(LinearForm {
            terms,
            constant: self.constant.checked_mul(k)?,
        })
    }

    /// `self - other`, or `None` on overflow
    pub fn checked_sub(&self, other: &LinearForm) -> Option<LinearForm> {
        self.checked_add(&other.checked_scale(-1)?)
    }

    pub fn as_constant(&self) -> Option<i64> {
        if self.terms.is_empty() {
            Some(self.constant)
        } else {
            None
        }
    }

    pub fn coefficient(&self, term: &Expr) -> i64 {
        self.terms.get(term).copied().unwrap_or(0)
    }

    /// Greatest common divisor of the term coefficients (0 with no terms)
    pub fn coefficient_gcd(&self) -> i64 {
        self.terms.values().fold(0, |g, &c| gcd(g, c))
    }

    /// Split into the positive-coefficient side and the negated negative side,
    /// so that `self == pos - neg + constant`
    pub fn split_sides(&self) -> (LinearForm, LinearForm) {
        let mut pos = LinearForm::default();
        let mut neg = LinearForm::default();
        for (term, &c) in &self.terms {
            if c > 0 {
                pos.terms.insert(term.clone(), c);
            } else {
                neg.terms.insert(term.clone(), c.wrapping_neg());
            }
        }
        (pos, neg)
    }

    /// Rebuild as `positive terms - negative terms + constant`
    pub fn to_expr(&self) -> Expr {
        let (pos, neg) = self.split_sides();
        let positive = sum_of(&pos);
        let negative = sum_of(&neg);
        let body = match (positive, negative) {
            (Some(p), Some(n)) => Some(Expr::sub(p, n)),
            (Some(p), None) => Some(p),
            (None, Some(n)) => {
                if self.constant > 0 {
                    return Expr::sub(Expr::int(self.constant), n);
                }
                Some(Expr::sub(Expr::int(0), n))
            }
            (None, None) => None,
        };
        match body {
            None => Expr::int(self.constant),
            Some(b) if self.constant == 0 => b,
            Some(b) if self.constant > 0 => Expr::add(b, Expr::int(self.constant)),
            Some(b) => Expr::sub(b, Expr::int(self.constant.wrapping_neg())),
        }
    }
}

fn scaled(term: &Expr, c: i64) -> Expr {
    if c == 1 {
        term.clone()
    } else {
        Expr::mul(term.clone(), Expr::int(c))
    }
}

fn sum_of(form: &LinearForm) -> Option<Expr> {
    Expr::pack(
        BinOp::Add,
        form.terms.iter().map(|(term, &c)| scaled(term, c)),
    )
}

pub fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    i64::try_from(a).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expr;

    fn form(text: &str) -> LinearForm {
        LinearForm::from_expr(&parse_expr(text).unwrap())
    }

    #[test]
    fn test_cancellation() {
        let f = form("x*2 - x");
        assert_eq!(f.to_expr(), Expr::var("x"));
        assert!(form("(x + y) - (y + x)").terms.is_empty());
    }

    #[test]
    fn test_constants_fold() {
        let f = form("(x + 3) - 5");
        assert_eq!(f.constant, -2);
        assert_eq!(f.to_expr().to_string(), "x - 2");
        assert_eq!(form("0 - x + 4").to_expr().to_string(), "4 - x");
        assert_eq!(form("0 - x - 4").to_expr().to_string(), "0 - x - 4");
    }

    #[test]
    fn test_products() {
        let f = form("y*x - x*y");
        assert!(f.terms.is_empty());
        let f = form("(x + 1)*3");
        assert_eq!(f.coefficient(&Expr::var("x")), 3);
        assert_eq!(f.constant, 3);
    }

    #[test]
    fn test_gcd() {
        assert_eq!(gcd(12, -18), 6);
        assert_eq!(form("x*4 + y*6").coefficient_gcd(), 2);
    }
}

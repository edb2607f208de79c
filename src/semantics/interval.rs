//! Integer intervals with optional (unbounded) endpoints

use super::concrete::div_euclid;

/// A closed interval; `None` endpoints are unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interval {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl Interval {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn new(min: Option<i64>, max: Option<i64>) -> Self {
        Self { min, max }
    }

    pub fn point(v: i64) -> Self {
        Self::new(Some(v), Some(v))
    }

    pub fn bounded(min: i64, max: i64) -> Self {
        Self::new(Some(min), Some(max))
    }

    pub fn at_least(min: i64) -> Self {
        Self::new(Some(min), None)
    }

    pub fn at_most(max: i64) -> Self {
        Self::new(None, Some(max))
    }

    pub fn as_point(&self) -> Option<i64> {
        match (self.min, self.max) {
            (Some(a), Some(b)) if a == b => Some(a),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!((self.min, self.max), (Some(a), Some(b)) if a > b)
    }

    pub fn is_everything(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    pub fn contains(&self, v: i64) -> bool {
        self.min.is_none_or(|m| m <= v) && self.max.is_none_or(|m| v <= m)
    }

    /// True if every member is strictly below every member of `other`
    pub fn entirely_below(&self, other: &Interval) -> bool {
        matches!((self.max, other.min), (Some(a), Some(b)) if a < b)
    }

    pub fn intersect(&self, other: &Interval) -> Interval {
        let min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Interval::new(min, max)
    }

    pub fn union(&self, other: &Interval) -> Interval {
        let min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            _ => None,
        };
        let max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
        Interval::new(min, max)
    }

    pub fn add(&self, other: &Interval) -> Interval {
        Interval::new(
            checked(self.min, other.min, i64::checked_add),
            checked(self.max, other.max, i64::checked_add),
        )
    }

    pub fn negate(&self) -> Interval {
        Interval::new(
            self.max.and_then(i64::checked_neg),
            self.min.and_then(i64::checked_neg),
        )
    }

    pub fn sub(&self, other: &Interval) -> Interval {
        self.add(&other.negate())
    }

    pub fn mul_const(&self, k: i64) -> Interval {
        let scale = |v: Option<i64>| v.and_then(|v| v.checked_mul(k));
        match k.cmp(&0) {
            std::cmp::Ordering::Equal => Interval::point(0),
            std::cmp::Ordering::Greater => Interval::new(scale(self.min), scale(self.max)),
            std::cmp::Ordering::Less => Interval::new(scale(self.max), scale(self.min)),
        }
    }

    pub fn mul(&self, other: &Interval) -> Interval {
        if let Some(k) = other.as_point() {
            return self.mul_const(k);
        }
        if let Some(k) = self.as_point() {
            return other.mul_const(k);
        }
        match (self.min, self.max, other.min, other.max) {
            (Some(a), Some(b), Some(c), Some(d)) => {
                let products = [a.checked_mul(c), a.checked_mul(d), b.checked_mul(c), b.checked_mul(d)];
                if products.iter().any(Option::is_none) {
                    return Interval::everything();
                }
                let products: Vec<i64> = products.into_iter().flatten().collect();
                Interval::bounded(
                    products.iter().copied().min().unwrap_or(0),
                    products.iter().copied().max().unwrap_or(0),
                )
            }
            _ => {
                // Sign information survives unbounded operands
                let nonneg = |i: &Interval| i.min.is_some_and(|m| m >= 0);
                if nonneg(self) && nonneg(other) {
                    Interval::at_least(0)
                } else {
                    Interval::everything()
                }
            }
        }
    }

    /// Euclidean division by a non-zero constant
    pub fn div_const(&self, k: i64) -> Interval {
        if k == 0 {
            return Interval::point(0);
        }
        let d = |v: Option<i64>| v.map(|v| div_euclid(v, k));
        if k > 0 {
            Interval::new(d(self.min), d(self.max))
        } else {
            Interval::new(d(self.max), d(self.min))
        }
    }

    pub fn div(&self, other: &Interval) -> Interval {
        match other.as_point() {
            Some(k) => self.div_const(k),
            None => {
                // |a / b| <= |a| whenever b != 0, and a / 0 == 0
                match (self.min, self.max) {
                    (Some(a), Some(b)) => {
                        let m = a.checked_abs().zip(b.checked_abs()).map(|(x, y)| x.max(y));
                        match m {
                            Some(m) => Interval::bounded(-m, m),
                            None => Interval::everything(),
                        }
                    }
                    _ => Interval::everything(),
                }
            }
        }
    }

    /// Euclidean modulo, always in `[0, |b| - 1]`
    pub fn modulo(&self, other: &Interval) -> Interval {
        let magnitude = match (other.min, other.max) {
            (Some(a), Some(b)) => a.checked_abs().zip(b.checked_abs()).map(|(x, y)| x.max(y)),
            _ => None,
        };
        match magnitude {
            Some(0) => Interval::point(0),
            Some(m) => {
                let result = Interval::bounded(0, m - 1);
                // A non-negative numerator below every divisor is unchanged
                if self.min.is_some_and(|v| v >= 0)
                    && other.min.is_some_and(|v| v > 0)
                    && self.entirely_below(other)
                {
                    *self
                } else {
                    result
                }
            }
            None => Interval::at_least(0),
        }
    }

    pub fn min_with(&self, other: &Interval) -> Interval {
        let min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            _ => None,
        };
        let max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Interval::new(min, max)
    }

    pub fn max_with(&self, other: &Interval) -> Interval {
        let min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
        Interval::new(min, max)
    }
}

fn checked(
    a: Option<i64>,
    b: Option<i64>,
    f: impl Fn(i64, i64) -> Option<i64>,
) -> Option<i64> {
    f(a?, b?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic() {
        let a = Interval::bounded(1, 3);
        let b = Interval::bounded(-2, 5);
        assert_eq!(a.add(&b), Interval::bounded(-1, 8));
        assert_eq!(a.sub(&b), Interval::bounded(-4, 5));
        assert_eq!(a.mul(&b), Interval::bounded(-6, 15));
        assert_eq!(b.mul_const(-2), Interval::bounded(-10, 4));
    }

    #[test]
    fn test_unbounded_endpoints() {
        let a = Interval::at_least(0);
        assert_eq!(a.add(&Interval::point(3)), Interval::at_least(3));
        assert_eq!(a.negate(), Interval::at_most(0));
        assert_eq!(a.mul(&a), Interval::at_least(0));
        assert!(Interval::everything().add(&a).is_everything());
    }

    #[test]
    fn test_div_and_mod() {
        let a = Interval::bounded(-7, 7);
        assert_eq!(a.div_const(2), Interval::bounded(-4, 3));
        assert_eq!(a.modulo(&Interval::point(4)), Interval::bounded(0, 3));
        assert_eq!(
            Interval::bounded(0, 2).modulo(&Interval::point(4)),
            Interval::bounded(0, 2)
        );
        assert_eq!(Interval::everything().modulo(&Interval::everything()), Interval::at_least(0));
    }

    #[test]
    fn test_min_max() {
        let a = Interval::at_most(10);
        let b = Interval::bounded(0, 20);
        assert_eq!(a.min_with(&b), Interval::at_most(10));
        assert_eq!(a.max_with(&b), Interval::bounded(0, 20));
        assert_eq!(b.max_with(&Interval::at_least(5)), Interval::at_least(5));
    }

    #[test]
    fn test_set_operations() {
        let a = Interval::bounded(0, 5);
        let b = Interval::bounded(3, 9);
        assert_eq!(a.intersect(&b), Interval::bounded(3, 5));
        assert_eq!(a.union(&b), Interval::bounded(0, 9));
        assert!(Interval::bounded(6, 5).is_empty());
        assert!(a.contains(5) && !a.contains(6));
    }
}

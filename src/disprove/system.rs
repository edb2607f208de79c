//! Constraint systems explored by the disprover
//!
//! A system is a conjunction of linear equalities plus a residual boolean
//! term holding whatever could not be linearized. All systems of one search
//! share a `Session`, whose knowledge store only ever learns facts implied
//! by the original goal. Every child system is either equivalent to its
//! parent (given the definitions of fresh variables) or weaker, so
//! infeasibility of any system refutes the goal.

use super::equality::{Equality, scaled, sum};
use super::is_wildcard_constant;
use crate::ir::analysis::{substitute_expr, substitute_var, uses_var, var_names};
use crate::ir::{BinOp, Expr, ExprKind};
use crate::semantics::Simplifier;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::hash::{Hash, Hasher};
use tracing::trace;

/// Weights of the system-ranking features, in feature order
const FEATURE_WEIGHTS: [f64; 8] = [0.1330, -0.1699, -0.0186, 0.0545, -0.0937, 0.4846, 0.7632, 1.0];

/// State shared by every system of one search
#[derive(Debug, Default)]
pub struct Session {
    pub knowledge: Simplifier,
    nonlinear_names: BTreeMap<Expr, String>,
    next_id: u64,
    next_aux: usize,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// A fresh auxiliary variable
    fn aux(&mut self) -> Expr {
        let name = format!("_k{}", self.next_aux);
        self.next_aux += 1;
        Expr::var(name)
    }

    /// The variable standing for a non-linear term, the same one every
    /// time the term is seen
    fn nonlinear_var(&mut self, term: &Expr) -> Expr {
        if let Some(name) = self.nonlinear_names.get(term) {
            return Expr::var(name.as_str());
        }
        let name = format!("_n{}", self.nonlinear_names.len());
        self.nonlinear_names.insert(term.clone(), name.clone());
        Expr::var(name)
    }
}

#[derive(Debug, Clone)]
pub struct ConstraintSystem {
    pub equalities: Vec<Equality>,
    pub residual: Option<Expr>,
    /// Lower is more promising
    pub score: f64,
    pub id: u64,
    pub parent_id: u64,
    pub substitution: Option<Expr>,
}

impl ConstraintSystem {
    pub fn root(session: &mut Session) -> Self {
        Self {
            equalities: Vec::new(),
            residual: None,
            score: 0.0,
            id: session.fresh_id(),
            parent_id: 0,
            substitution: None,
        }
    }

    fn child(&self, session: &mut Session, substitution: Option<Expr>) -> Self {
        Self {
            equalities: Vec::new(),
            residual: None,
            score: 0.0,
            id: session.fresh_id(),
            parent_id: self.id,
            substitution,
        }
    }

    /// Add a boolean constraint, normalizing it into equalities and
    /// knowledge where possible
    pub fn add_term(&mut self, session: &mut Session, e: &Expr) {
        match e.kind() {
            ExprKind::Binary(BinOp::Eq, a, b) if a.ty().is_int() => self.add_equality(a, b),
            ExprKind::Binary(BinOp::And, a, b) => {
                self.add_term(session, a);
                self.add_term(session, b);
            }
            ExprKind::Binary(BinOp::Gt, a, b) => {
                self.add_term(session, &Expr::lt(b.clone(), a.clone()))
            }
            ExprKind::Binary(BinOp::Ge, a, b) => {
                self.add_term(session, &Expr::le(b.clone(), a.clone()))
            }
            ExprKind::Binary(op @ (BinOp::Le | BinOp::Lt), a, b) if a.ty().is_int() => {
                self.add_inequality(session, *op, a, b, e)
            }
            ExprKind::Let { name, value, body } => {
                if value.ty().is_bool() {
                    self.add_term(session, &substitute_var(body, name, value));
                } else {
                    let eq = Expr::eq(Expr::typed_var(name.clone(), value.ty()), value.clone());
                    session.knowledge.learn_true(&eq);
                    self.add_term(session, &eq);
                    self.add_term(session, body);
                }
            }
            ExprKind::Bool(true) => {}
            _ => self.add_residual(e.clone()),
        }
    }

    fn add_equality(&mut self, a: &Expr, b: &Expr) {
        match Equality::from_sides(a, b) {
            Some(eq) if eq.is_empty() => {}
            Some(eq) => self.equalities.push(eq),
            None => self.add_residual(Expr::eq(a.clone(), b.clone())),
        }
    }

    fn add_inequality(&mut self, session: &mut Session, op: BinOp, a: &Expr, b: &Expr, e: &Expr) {
        // x <= min(y, z) and max(x, y) <= z both split in two
        if let Some((p, q)) = b.as_op(BinOp::Min) {
            self.add_term(session, &Expr::binary(op, a.clone(), p.clone()));
            self.add_term(session, &Expr::binary(op, a.clone(), q.clone()));
            return;
        }
        if let Some((p, q)) = a.as_op(BinOp::Max) {
            self.add_term(session, &Expr::binary(op, p.clone(), b.clone()));
            self.add_term(session, &Expr::binary(op, q.clone(), b.clone()));
            return;
        }
        let var_vs_const = (a.is_const() && b.as_var().is_some())
            || (b.is_const() && a.as_var().is_some());
        if var_vs_const {
            session.knowledge.learn_true(e);
            return;
        }
        // a <= b becomes a + k == b with k >= 0
        let slack = session.aux();
        session
            .knowledge
            .learn_true(&Expr::le(Expr::int(0), slack.clone()));
        let mut lhs = Expr::add(a.clone(), slack);
        if op == BinOp::Lt {
            lhs = Expr::add(lhs, Expr::int(1));
        }
        self.add_term(session, &Expr::eq(lhs, b.clone()));
        session.knowledge.learn_true(e);
    }

    fn add_residual(&mut self, e: Expr) {
        self.residual = Some(match self.residual.take() {
            Some(_) if e.is_false() => e,
            Some(r) => Expr::and(r, e),
            None => e,
        });
    }

    /// All constraints as boolean terms
    pub fn constraints(&self) -> impl Iterator<Item = Expr> + '_ {
        self.equalities
            .iter()
            .map(Equality::to_expr)
            .chain(self.residual.iter().cloned())
    }

    pub fn to_expr(&self) -> Expr {
        Expr::and_all(self.constraints())
    }

    /// True if the accumulated knowledge refutes some constraint
    pub fn infeasible(&self, session: &Session) -> bool {
        session.knowledge.is_contradictory()
            || self
                .constraints()
                .any(|c| session.knowledge.simplify(&c).is_false())
    }

    /// Structural identity used to skip revisited systems
    pub fn structural_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.equalities.hash(&mut hasher);
        self.residual.hash(&mut hasher);
        hasher.finish()
    }

    /// Order the equalities, shortest first, and compute the score.
    /// Substitutions are mined from the front.
    pub fn finalize(&mut self, session: &Session) {
        self.equalities
            .sort_by_key(|eq| (eq.len(), eq.num_vars()));
        let features = self.features(&session.knowledge);
        self.score = -features
            .iter()
            .zip(FEATURE_WEIGHTS)
            .map(|(&f, w)| f as f64 * w)
            .sum::<f64>();
    }

    fn features(&self, knowledge: &Simplifier) -> [usize; 8] {
        let mut var_sides: BTreeMap<String, usize> = BTreeMap::new();
        let mut wildcards = BTreeSet::new();
        let mut nonlinear = 0;
        let mut num_terms = 0;
        let mut useful_implications = 0;

        for eq in &self.equalities {
            let mut lhs_lower = true;
            let mut lhs_upper = true;
            let mut rhs_lower = true;
            let mut rhs_upper = true;
            for (term, &c) in &eq.terms {
                let symbolic = var_names(term).iter().any(|n| !is_wildcard_constant(n));
                let bounds = knowledge.bounds_of(term);
                let has_lower = !symbolic || bounds.min.is_some();
                let has_upper = !symbolic || bounds.max.is_some();
                if c > 0 {
                    rhs_lower &= has_lower;
                    rhs_upper &= has_upper;
                } else {
                    lhs_lower &= has_lower;
                    lhs_upper &= has_upper;
                }
                if let Some(name) = term.as_var() {
                    let sides = usize::from(bounds.min.is_some()) + usize::from(bounds.max.is_some());
                    var_sides.insert(name.to_string(), sides);
                    if is_wildcard_constant(name) {
                        wildcards.insert(name.to_string());
                    }
                } else {
                    nonlinear += 1;
                }
                num_terms += 1;
            }
            num_terms += usize::from(eq.constant != 0);
            if lhs_lower && rhs_upper {
                useful_implications += 1;
            }
            if rhs_lower && lhs_upper {
                useful_implications += 1;
            }
        }

        let count_sides = |n: usize| var_sides.values().filter(|&&s| s == n).count();
        [
            nonlinear,
            count_sides(0),
            count_sides(1),
            count_sides(2),
            num_terms,
            self.equalities.len() + usize::from(self.residual.is_some()),
            useful_implications,
            wildcards.len(),
        ]
    }

    // --- Search moves ---

    /// Push every successor of this system onto the beam
    pub fn make_children(&self, session: &mut Session, beam: &mut VecDeque<ConstraintSystem>) {
        let first_child = beam.len();
        self.eliminate_div_mod(session, beam);
        if self.separate_common_factors(session, beam) {
            return;
        }
        self.name_repeated_nonlinear(session, beam);
        self.eliminate_variables(session, beam, first_child);
    }

    /// Replace a division or remainder with fresh quotient and remainder
    /// variables
    fn eliminate_div_mod(&self, session: &mut Session, beam: &mut VecDeque<ConstraintSystem>) {
        for (i, eq) in self.equalities.iter().enumerate() {
            let Some(candidate) = eq
                .terms
                .keys()
                .find_map(|t| DivisionCandidate::find(t, &session.knowledge))
            else {
                continue;
            };
            let DivisionCandidate {
                num,
                den,
                abs_den,
                is_div,
            } = candidate;
            let quotient = Expr::div(num.clone(), den.clone());
            let remainder = Expr::modulo(num.clone(), den.clone());

            {
                let k1 = session.aux();
                let k2 = session.aux();
                let replaced: Vec<Expr> = self
                    .constraints()
                    .map(|c| {
                        let c = substitute_expr(&c, &remainder, &k1);
                        session.knowledge.simplify(&substitute_expr(&c, &quotient, &k2))
                    })
                    .collect();
                let recombined = session
                    .knowledge
                    .simplify(&Expr::add(k1.clone(), Expr::mul(k2.clone(), den.clone())));
                let mut child = self.child(session, Some(Expr::eq(k2, quotient.clone())));
                for c in &replaced {
                    child.add_term(session, c);
                }
                child.add_term(session, &Expr::eq(num.clone(), recombined));
                session
                    .knowledge
                    .learn_true(&Expr::le(Expr::int(0), k1.clone()));
                child.add_term(session, &Expr::lt(k1, abs_den.clone()));
                child.finalize(session);
                beam.push_back(child);
            }

            if is_div {
                // (num / den) * den == num - num % den
                let k1 = session.aux();
                let mut multiplied = Vec::new();
                for (term, &c) in &eq.terms {
                    let mut factors = Vec::new();
                    let mut spine = term;
                    while let Some((a, b)) = spine.as_op(BinOp::Mul) {
                        factors.push(b.clone());
                        spine = a;
                    }
                    if *spine == quotient {
                        let t = Expr::sub(num.clone(), k1.clone());
                        let t = factors.into_iter().fold(t, Expr::mul);
                        multiplied.push(scaled(&t, c));
                    } else {
                        multiplied.push(scaled(&Expr::mul(term.clone(), den.clone()), c));
                    }
                }
                if eq.constant != 0 {
                    multiplied.push(scaled(&den, eq.constant));
                }
                let mut child = self.child(session, Some(quotient.clone()));
                if let Some(r) = &self.residual {
                    child.add_term(session, r);
                }
                for (j, other) in self.equalities.iter().enumerate() {
                    if i == j {
                        child.add_term(session, &Expr::eq(sum(multiplied.clone()), Expr::int(0)));
                    } else {
                        child.add_term(session, &other.to_expr());
                    }
                }
                session
                    .knowledge
                    .learn_true(&Expr::le(Expr::int(0), k1.clone()));
                child.add_term(session, &Expr::lt(k1, abs_den));
                child.finalize(session);
                beam.push_back(child);
            }
        }
    }

    /// Split `without + f * with == 0` on the sign `with` must have. Returns
    /// true if a contradiction replaced the whole beam.
    fn separate_common_factors(
        &self,
        session: &mut Session,
        beam: &mut VecDeque<ConstraintSystem>,
    ) -> bool {
        for (i, eq) in self.equalities.iter().enumerate() {
            let factors: BTreeSet<String> = eq
                .terms
                .keys()
                .flat_map(|t| t.unpack(BinOp::Mul))
                .filter_map(|f| f.as_var().map(str::to_string))
                .collect();
            for factor in factors {
                let mut with = Vec::new();
                let mut without = Vec::new();
                for (term, &c) in &eq.terms {
                    match exact_divide(term, &factor) {
                        Some(q) => with.push(scaled(&q, c)),
                        None => without.push(scaled(term, c)),
                    }
                }
                if eq.constant != 0 {
                    without.push(Expr::int(eq.constant));
                }
                let knowledge = &session.knowledge;
                let with = knowledge.simplify(&sum(with));
                let without = knowledge.simplify(&sum(without));
                let wb = knowledge.bounds_of(&with);
                let ob = knowledge.bounds_of(&without);
                let fb = knowledge.var_bounds(&factor);

                let without_positive = ob.min.is_some_and(|v| v > 0);
                let without_non_negative = ob.min.is_some_and(|v| v >= 0);
                let without_negative = ob.max.is_some_and(|v| v < 0);
                let without_non_positive = ob.max.is_some_and(|v| v <= 0);
                let factor_positive = fb.min.is_some_and(|v| v > 0);
                let factor_negative = fb.max.is_some_and(|v| v < 0);
                let with_positive = wb.min.is_some_and(|v| v > 0);
                let with_non_negative = wb.min.is_some_and(|v| v >= 0);
                let with_negative = wb.max.is_some_and(|v| v < 0);
                let with_non_positive = wb.max.is_some_and(|v| v <= 0);

                let negative_inferred = (factor_positive && without_positive)
                    || (factor_negative && without_negative);
                let positive_inferred = (factor_positive && without_negative)
                    || (factor_negative && without_positive);
                let non_positive_inferred = (factor_positive && without_non_negative)
                    || (factor_negative && without_non_positive);
                let non_negative_inferred = (factor_positive && without_non_positive)
                    || (factor_negative && without_non_negative);

                let contradiction = (with_negative && non_negative_inferred)
                    || (with_non_positive && positive_inferred)
                    || (with_non_negative && negative_inferred)
                    || (with_positive && non_positive_inferred);
                if contradiction {
                    trace!(system = self.id, factor = %factor, "sign contradiction");
                    let mut child = self.child(session, None);
                    child.add_residual(Expr::bool(false));
                    child.finalize(session);
                    beam.clear();
                    beam.push_back(child);
                    return true;
                }

                if with.is_const() {
                    continue;
                }
                let zero = Expr::int(0);
                let sign = if negative_inferred {
                    Expr::lt(with, zero)
                } else if positive_inferred {
                    Expr::lt(zero, with)
                } else if non_negative_inferred {
                    Expr::le(zero, with)
                } else if non_positive_inferred {
                    Expr::le(with, zero)
                } else {
                    continue;
                };
                let mut child = self.child(session, None);
                if let Some(r) = &self.residual {
                    child.add_term(session, r);
                }
                for (j, other) in self.equalities.iter().enumerate() {
                    if i != j {
                        child.add_term(session, &other.to_expr());
                    }
                }
                child.add_term(session, &sign);
                child.finalize(session);
                beam.push_back(child);
            }
        }
        false
    }

    /// Give a name to each non-linear term occurring more than once, so the
    /// occurrences can cancel
    fn name_repeated_nonlinear(&self, session: &mut Session, beam: &mut VecDeque<ConstraintSystem>) {
        let mut counts: BTreeMap<&Expr, usize> = BTreeMap::new();
        for eq in &self.equalities {
            for term in eq.terms.keys() {
                if term.as_var().is_none() {
                    *counts.entry(term).or_insert(0) += 1;
                }
            }
        }
        for (term, count) in counts {
            if count < 2 {
                continue;
            }
            let var = session.nonlinear_var(term);
            let bounds = session.knowledge.bounds_of(term);
            if let Some(name) = var.as_var() {
                session.knowledge.learn_bounds(name, bounds);
            }
            let replaced: Vec<Expr> = self
                .constraints()
                .map(|c| substitute_expr(&c, term, &var))
                .collect();
            let mut child = self.child(session, Some(Expr::eq(var.clone(), term.clone())));
            for c in &replaced {
                child.add_term(session, c);
            }
            child.finalize(session);
            beam.push_back(child);
        }
    }

    /// Solve an equality for one of its bare variables and substitute it
    /// everywhere else. A substitution by a bare variable or a constant
    /// never needs backtracking, so it replaces every other child.
    fn eliminate_variables(
        &self,
        session: &mut Session,
        beam: &mut VecDeque<ConstraintSystem>,
        first_child: usize,
    ) {
        for (i, eq) in self.equalities.iter().enumerate() {
            if eq.num_vars() == 0 {
                continue;
            }
            for (term, &c) in &eq.terms {
                let Some(name) = term.as_var() else {
                    continue;
                };
                // c*v == c*rhs + remainder, where every rhs term divides evenly
                let Some((rhs, remainder)) = split_for(eq, term, c) else {
                    continue;
                };
                let rhs = session.knowledge.simplify(&rhs);
                let remainder = session.knowledge.simplify(&remainder);
                let rb = session.knowledge.bounds_of(&remainder);
                let limit = i128::from(c).abs();
                let bounded = rb.max.is_some_and(|m| i128::from(m) < limit)
                    && rb.min.is_some_and(|m| i128::from(m) > -limit);
                if !bounded || uses_var(&rhs, name) {
                    continue;
                }

                // Every potential substitution is a fact
                if rhs != *term {
                    session
                        .knowledge
                        .learn_true(&Expr::eq(term.clone(), rhs.clone()));
                }

                let greedy =
                    (rhs.as_var().is_some() && !is_wildcard_constant(name)) || rhs.is_const();

                let mut replaced = Vec::new();
                if let Some(r) = &self.residual {
                    replaced.push(session.knowledge.simplify(&substitute_var(r, name, &rhs)));
                }
                for (j, other) in self.equalities.iter().enumerate() {
                    let constraint = if i == j {
                        Expr::eq(remainder.clone(), Expr::int(0))
                    } else {
                        substitute_var(&other.to_expr(), name, &rhs)
                    };
                    replaced.push(session.knowledge.simplify(&constraint));
                }
                let mut child = self.child(session, Some(Expr::eq(term.clone(), rhs.clone())));
                for c in &replaced {
                    child.add_term(session, c);
                }
                child.finalize(session);

                if greedy {
                    beam.truncate(first_child);
                    beam.push_back(child);
                    return;
                }
                beam.push_back(child);
            }
        }
    }
}

/// Split `eq` as `c*v == c*rhs + remainder`
fn split_for(eq: &Equality, var: &Expr, c: i64) -> Option<(Expr, Expr)> {
    let mut rhs = Vec::new();
    let mut remainder = Vec::new();
    for (term, &c2) in &eq.terms {
        if term == var {
            continue;
        }
        if c2 % c == 0 {
            rhs.push(scaled(term, c2.checked_div(c)?.checked_neg()?));
        } else {
            remainder.push(scaled(term, c2.checked_neg()?));
        }
    }
    if eq.constant % c == 0 {
        rhs.push(Expr::int(eq.constant.checked_div(c)?.checked_neg()?));
    } else {
        remainder.push(Expr::int(eq.constant.checked_neg()?));
    }
    Some((sum(rhs), sum(remainder)))
}

/// `e / v` when `v` is a factor of the product `e`
fn exact_divide(e: &Expr, v: &str) -> Option<Expr> {
    if e.as_var() == Some(v) {
        return Some(Expr::int(1));
    }
    let (a, b) = e.as_op(BinOp::Mul)?;
    if let Some(q) = exact_divide(a, v) {
        return Some(Expr::mul(q, b.clone()));
    }
    exact_divide(b, v).map(|q| Expr::mul(a.clone(), q))
}

/// A division or remainder whose divisor has a known non-zero sign
struct DivisionCandidate {
    num: Expr,
    den: Expr,
    abs_den: Expr,
    is_div: bool,
}

impl DivisionCandidate {
    fn find(term: &Expr, knowledge: &Simplifier) -> Option<Self> {
        let (num, den, is_div) = match term.kind() {
            ExprKind::Binary(BinOp::Mod, a, b) => (a, b, false),
            ExprKind::Binary(BinOp::Div, a, b) => (a, b, true),
            ExprKind::Binary(BinOp::Mul, ..) => {
                let mut spine = term;
                while let Some((a, _)) = spine.as_op(BinOp::Mul) {
                    spine = a;
                }
                let (a, b) = spine.as_op(BinOp::Div)?;
                (a, b, true)
            }
            _ => return None,
        };
        let abs_den = match den.kind() {
            ExprKind::Int(k) if *k != 0 => Expr::int(k.checked_abs()?),
            ExprKind::Var { name, .. } if is_wildcard_constant(name) => {
                let bounds = knowledge.var_bounds(name);
                if bounds.min.is_some_and(|v| v > 0) {
                    den.clone()
                } else if bounds.max.is_some_and(|v| v < 0) {
                    Expr::sub(Expr::int(0), den.clone())
                } else {
                    return None;
                }
            }
            _ => return None,
        };
        Some(Self {
            num: num.clone(),
            den: den.clone(),
            abs_den,
            is_div,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_bool_expr;
    use crate::semantics::Interval;

    fn system_for(text: &str) -> (Session, ConstraintSystem) {
        let mut session = Session::new();
        let mut system = ConstraintSystem::root(&mut session);
        system.add_term(&mut session, &parse_bool_expr(text).unwrap());
        system.finalize(&session);
        (session, system)
    }

    #[test]
    fn test_var_const_comparisons_become_knowledge() {
        let (session, system) = system_for("3 <= x && x < 10");
        assert!(system.equalities.is_empty());
        assert!(system.residual.is_none());
        assert_eq!(session.knowledge.var_bounds("x"), Interval::bounded(3, 9));
    }

    #[test]
    fn test_inequalities_get_slack() {
        let (session, system) = system_for("x + y < z");
        assert_eq!(system.equalities.len(), 1);
        assert_eq!(session.knowledge.var_bounds("_k0").min, Some(0));
        assert_eq!(system.equalities[0].constant, 1);
    }

    #[test]
    fn test_min_under_comparison_splits() {
        let (_, system) = system_for("x <= min(y, z + 1)");
        assert_eq!(system.equalities.len(), 2);
    }

    #[test]
    fn test_unhandled_terms_go_to_residual() {
        let (_, system) = system_for("x != y && b");
        assert!(system.equalities.is_empty());
        assert!(system.residual.is_some());
    }

    #[test]
    fn test_infeasible_from_bounds() {
        let (session, system) = system_for("x < 0 && 0 < x");
        assert!(system.infeasible(&session));
        let (session, system) = system_for("x < y");
        assert!(!system.infeasible(&session));
    }

    #[test]
    fn test_greedy_elimination_keeps_one_child() {
        let (mut session, system) = system_for("x == y && x + y == 3");
        let mut beam = VecDeque::new();
        system.make_children(&mut session, &mut beam);
        assert_eq!(beam.len(), 1);
        // 2*y == 3 has no integer solution
        assert!(beam[0].infeasible(&session));
    }

    #[test]
    fn test_structural_hash_ignores_ids() {
        let (_, a) = system_for("x + 1 == y");
        let (_, b) = system_for("x + 1 == y");
        assert_eq!(a.structural_hash(), b.structural_hash());
    }

    #[test]
    fn test_exact_divide() {
        let e = Expr::mul(Expr::var("x"), Expr::var("y"));
        assert_eq!(exact_divide(&e, "y"), Some(Expr::mul(Expr::var("x"), Expr::int(1))));
        assert_eq!(exact_divide(&e, "z"), None);
    }
}

//! Structural queries and substitutions over expressions

use super::expr::{BinOp, Expr, ExprKind};
use super::types::{Binding, Type, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Free variables with their type and number of occurrences.
/// Names bound by an enclosing `let` are not free.
pub fn free_vars(e: &Expr) -> BTreeMap<String, (Type, usize)> {
    let mut out = BTreeMap::new();
    collect_free_vars(e, &mut Vec::new(), &mut out);
    out
}

fn collect_free_vars(
    e: &Expr,
    bound: &mut Vec<String>,
    out: &mut BTreeMap<String, (Type, usize)>,
) {
    match e.kind() {
        ExprKind::Var { name, ty } => {
            if !bound.iter().any(|b| b == name) {
                out.entry(name.clone()).or_insert((*ty, 0)).1 += 1;
            }
        }
        ExprKind::Let { name, value, body } => {
            collect_free_vars(value, bound, out);
            bound.push(name.clone());
            collect_free_vars(body, bound, out);
            bound.pop();
        }
        _ => {
            for child in e.children() {
                collect_free_vars(child, bound, out);
            }
        }
    }
}

/// Names of the free variables only
pub fn var_names(e: &Expr) -> BTreeSet<String> {
    free_vars(e).into_keys().collect()
}

pub fn uses_var(e: &Expr, name: &str) -> bool {
    free_vars(e).contains_key(name)
}

/// Number of variable and literal leaves
pub fn count_leaves(e: &Expr) -> usize {
    if e.is_leaf() {
        return 1;
    }
    e.children().into_iter().map(count_leaves).sum()
}

/// Integer literals appearing in the expression, deduplicated, in order of first use
pub fn constants(e: &Expr) -> Vec<i64> {
    let mut out = Vec::new();
    visit(e, &mut |node| {
        if let Some(v) = node.as_int() {
            if !out.contains(&v) {
                out.push(v);
            }
        }
    });
    out
}

/// Pre-order traversal
pub fn visit(e: &Expr, f: &mut impl FnMut(&Expr)) {
    f(e);
    for child in e.children() {
        visit(child, f);
    }
}

/// Replace free variables by expressions. Let-bound names shadow the map.
pub fn substitute(e: &Expr, replacements: &BTreeMap<String, Expr>) -> Expr {
    if replacements.is_empty() {
        return e.clone();
    }
    match e.kind() {
        ExprKind::Var { name, .. } => replacements.get(name).cloned().unwrap_or_else(|| e.clone()),
        ExprKind::Let { name, value, body } => {
            let value = substitute(value, replacements);
            let body = if replacements.contains_key(name) {
                let mut inner = replacements.clone();
                inner.remove(name);
                substitute(body, &inner)
            } else {
                substitute(body, replacements)
            };
            Expr::let_in(name.clone(), value, body)
        }
        _ => e.map_children(|c| substitute(c, replacements)),
    }
}

/// Replace a single variable
pub fn substitute_var(e: &Expr, name: &str, replacement: &Expr) -> Expr {
    let mut map = BTreeMap::new();
    map.insert(name.to_string(), replacement.clone());
    substitute(e, &map)
}

/// Replace variables with the literal values of a binding
pub fn substitute_binding(e: &Expr, binding: &Binding) -> Expr {
    let map = binding
        .iter()
        .map(|(name, value)| (name.clone(), value_expr(*value)))
        .collect();
    substitute(e, &map)
}

pub fn value_expr(value: Value) -> Expr {
    match value {
        Value::Int(v) => Expr::int(v),
        Value::Bool(b) => Expr::bool(b),
    }
}

/// Replace every occurrence of the subterm `from` by `to`
pub fn substitute_expr(e: &Expr, from: &Expr, to: &Expr) -> Expr {
    if e == from {
        return to.clone();
    }
    e.map_children(|c| substitute_expr(c, from, to))
}

/// Inline every `let`, leaving a let-free expression
pub fn inline_lets(e: &Expr) -> Expr {
    match e.kind() {
        ExprKind::Let { name, value, body } => {
            let value = inline_lets(value);
            let body = inline_lets(body);
            substitute_var(&body, name, &value)
        }
        _ => e.map_children(inline_lets),
    }
}

/// Pull every `let` out into a flat list of definitions in dependency order,
/// renamed `<prefix><n>` so that hoisting cannot capture. Returns the
/// definitions and the let-free remainder. Unlike `inline_lets` this never
/// duplicates a bound value.
pub fn hoist_lets(e: &Expr, prefix: &str) -> (Vec<(String, Expr)>, Expr) {
    let mut hoister = LetHoister {
        prefix,
        scopes: HashMap::new(),
        defs: Vec::new(),
    };
    let body = hoister.hoist(e);
    (hoister.defs, body)
}

struct LetHoister<'a> {
    prefix: &'a str,
    scopes: HashMap<String, Vec<String>>,
    defs: Vec<(String, Expr)>,
}

impl LetHoister<'_> {
    fn hoist(&mut self, e: &Expr) -> Expr {
        match e.kind() {
            ExprKind::Var { name, ty } => match self.scopes.get(name).and_then(|s| s.last()) {
                Some(fresh) => Expr::typed_var(fresh.clone(), *ty),
                None => e.clone(),
            },
            ExprKind::Let { name, value, body } => {
                let value = self.hoist(value);
                let fresh = format!("{}{}", self.prefix, self.defs.len());
                self.defs.push((fresh.clone(), value));
                self.scopes.entry(name.clone()).or_default().push(fresh);
                let body = self.hoist(body);
                if let Some(scope) = self.scopes.get_mut(name) {
                    scope.pop();
                }
                body
            }
            _ => e.map_children(|c| self.hoist(c)),
        }
    }
}

/// Every Div and Mod divisor, in pre-order
pub fn divisors(e: &Expr) -> Vec<Expr> {
    let mut out = Vec::new();
    visit(e, &mut |node| {
        if let Some((BinOp::Div | BinOp::Mod, _, b)) = node.as_binary() {
            out.push(b.clone());
        }
    });
    out
}

/// Conjunction asserting every divisor is non-zero
pub fn divisors_nonzero(e: &Expr) -> Expr {
    Expr::and_all(
        divisors(e)
            .into_iter()
            .filter(|d| d.as_int().is_none_or(|v| v == 0))
            .map(|d| Expr::ne(d, Expr::int(0))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_vars_counts_occurrences() {
        let x = Expr::var("x");
        let e = Expr::add(Expr::mul(x.clone(), x.clone()), Expr::var("y"));
        let vars = free_vars(&e);
        assert_eq!(vars.get("x"), Some(&(Type::Int, 2)));
        assert_eq!(vars.get("y"), Some(&(Type::Int, 1)));
    }

    #[test]
    fn test_let_shadows() {
        let e = Expr::let_in("t", Expr::var("x"), Expr::add(Expr::var("t"), Expr::int(1)));
        assert_eq!(var_names(&e).into_iter().collect::<Vec<_>>(), vec!["x"]);
        assert_eq!(
            inline_lets(&e),
            Expr::add(Expr::var("x"), Expr::int(1))
        );
    }

    #[test]
    fn test_counts() {
        let e = Expr::sub(Expr::mul(Expr::var("x"), Expr::int(2)), Expr::var("x"));
        assert_eq!(count_leaves(&e), 3);
        assert_eq!(constants(&e), vec![2]);
    }

    #[test]
    fn test_divisors_nonzero() {
        let e = Expr::div(Expr::var("x"), Expr::var("y"));
        assert_eq!(
            divisors_nonzero(&e),
            Expr::ne(Expr::var("y"), Expr::int(0))
        );
        let e = Expr::div(Expr::var("x"), Expr::int(4));
        assert!(divisors_nonzero(&e).is_true());
    }

    #[test]
    fn test_hoist_lets_renames_shadowed_names() {
        // let t = x + 1 in (let t = t*2 in t) + t
        let x = Expr::var("x");
        let t = Expr::var("t");
        let inner = Expr::let_in("t", Expr::mul(t.clone(), Expr::int(2)), t.clone());
        let e = Expr::let_in("t", Expr::add(x.clone(), Expr::int(1)), Expr::add(inner, t));
        let (defs, body) = hoist_lets(&e, "_h");
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0], ("_h0".to_string(), Expr::add(x, Expr::int(1))));
        assert_eq!(defs[1].1, Expr::mul(Expr::var("_h0"), Expr::int(2)));
        assert_eq!(body, Expr::add(Expr::var("_h1"), Expr::var("_h0")));
    }
}

//! Validation utilities for fast concrete checking

pub mod random;

pub use random::{grid_inputs, random_binding};

use crate::ir::analysis::free_vars;
use crate::ir::{Binding, Expr, Type};
use crate::semantics::evaluate;

/// Free variables of several expressions, merged in name order
pub fn input_vars(exprs: &[&Expr]) -> Vec<(String, Type)> {
    let mut vars = std::collections::BTreeMap::new();
    for e in exprs {
        for (name, (ty, _)) in free_vars(e) {
            vars.insert(name, ty);
        }
    }
    vars.into_iter().collect()
}

/// First input on which `a` and `b` evaluate to different values. Inputs on
/// which either side cannot be evaluated are skipped.
pub fn find_mismatch<'a>(a: &Expr, b: &Expr, inputs: &'a [Binding]) -> Option<&'a Binding> {
    inputs.iter().find(|input| match (evaluate(a, input), evaluate(b, input)) {
        (Some(x), Some(y)) => x != y,
        _ => false,
    })
}

/// True if `a` and `b` agree on every point of the `[min, max]` grid
pub fn agree_on_grid(a: &Expr, b: &Expr, min: i64, max: i64) -> bool {
    let vars = input_vars(&[a, b]);
    find_mismatch(a, b, &grid_inputs(&vars, min, max)).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expr;

    #[test]
    fn test_agree_on_grid() {
        let a = parse_expr("x*2 - x").unwrap();
        let b = parse_expr("x").unwrap();
        assert!(agree_on_grid(&a, &b, -5, 5));
        let c = parse_expr("x + 1").unwrap();
        assert!(!agree_on_grid(&a, &c, -5, 5));
    }

    #[test]
    fn test_find_mismatch_reports_input() {
        let a = parse_expr("max(x, 0)").unwrap();
        let b = parse_expr("x").unwrap();
        let inputs = grid_inputs(&input_vars(&[&a]), -2, 2);
        let bad = find_mismatch(&a, &b, &inputs).unwrap();
        assert!(bad["x"].as_int().unwrap() < 0);
    }
}

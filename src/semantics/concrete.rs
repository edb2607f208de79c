//! Concrete evaluation of expressions
//!
//! Integers are `i64` with wrapping overflow. Division and modulo are
//! Euclidean, and both yield 0 for a zero divisor, matching the solver
//! encoding. `evaluate_exact` instead refuses to answer when an intermediate
//! result leaves the `i64` range, so its answers agree with the solver's
//! unbounded integers.

use crate::ir::{BinOp, Binding, Expr, ExprKind, Value};

/// Euclidean division, 0 when dividing by zero
pub fn div_euclid(a: i64, b: i64) -> i64 {
    if b == 0 { 0 } else { a.wrapping_div_euclid(b) }
}

/// Euclidean remainder, always non-negative, 0 when dividing by zero
pub fn mod_euclid(a: i64, b: i64) -> i64 {
    if b == 0 { 0 } else { a.wrapping_rem_euclid(b) }
}

/// Apply a binary operator to concrete values. `None` on a type mismatch.
pub fn apply_binary(op: BinOp, a: Value, b: Value) -> Option<Value> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Some(match op {
            BinOp::Add => Value::Int(a.wrapping_add(b)),
            BinOp::Sub => Value::Int(a.wrapping_sub(b)),
            BinOp::Mul => Value::Int(a.wrapping_mul(b)),
            BinOp::Div => Value::Int(div_euclid(a, b)),
            BinOp::Mod => Value::Int(mod_euclid(a, b)),
            BinOp::Min => Value::Int(a.min(b)),
            BinOp::Max => Value::Int(a.max(b)),
            BinOp::Eq => Value::Bool(a == b),
            BinOp::Ne => Value::Bool(a != b),
            BinOp::Lt => Value::Bool(a < b),
            BinOp::Le => Value::Bool(a <= b),
            BinOp::Gt => Value::Bool(a > b),
            BinOp::Ge => Value::Bool(a >= b),
            BinOp::And | BinOp::Or => return None,
        }),
        (Value::Bool(a), Value::Bool(b)) => Some(Value::Bool(match op {
            BinOp::And => a && b,
            BinOp::Or => a || b,
            BinOp::Eq => a == b,
            BinOp::Ne => a != b,
            BinOp::Min => a && b,
            BinOp::Max => a || b,
            _ => return None,
        })),
        _ => None,
    }
}

/// Like `apply_binary`, but `None` when the integer result overflows
pub fn apply_binary_checked(op: BinOp, a: Value, b: Value) -> Option<Value> {
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        let exact = match op {
            BinOp::Add => x.checked_add(y),
            BinOp::Sub => x.checked_sub(y),
            BinOp::Mul => x.checked_mul(y),
            BinOp::Div if y != 0 => x.checked_div_euclid(y),
            BinOp::Mod if y != 0 => x.checked_rem_euclid(y),
            _ => return apply_binary(op, a, b),
        };
        return exact.map(Value::Int);
    }
    apply_binary(op, a, b)
}

/// Evaluate under a binding. `None` if a free variable is unbound, an
/// opaque call is reached, or the expression is ill-typed.
pub fn evaluate(e: &Expr, env: &Binding) -> Option<Value> {
    eval(e, env, false)
}

/// Evaluate with overflow detection; `None` also when any step overflows
pub fn evaluate_exact(e: &Expr, env: &Binding) -> Option<Value> {
    eval(e, env, true)
}

fn eval(e: &Expr, env: &Binding, exact: bool) -> Option<Value> {
    let evaluate = |e: &Expr, env: &Binding| eval(e, env, exact);
    match e.kind() {
        ExprKind::Int(v) => Some(Value::Int(*v)),
        ExprKind::Bool(b) => Some(Value::Bool(*b)),
        ExprKind::Var { name, .. } => env.get(name).copied(),
        ExprKind::Not(a) => Some(Value::Bool(!evaluate(a, env)?.as_bool()?)),
        ExprKind::Binary(op, a, b) => {
            // Short circuit keeps evaluation total on partially bound inputs
            let va = evaluate(a, env)?;
            match (op, va) {
                (BinOp::And, Value::Bool(false)) => return Some(Value::Bool(false)),
                (BinOp::Or, Value::Bool(true)) => return Some(Value::Bool(true)),
                _ => {}
            }
            let vb = evaluate(b, env)?;
            if exact {
                apply_binary_checked(*op, va, vb)
            } else {
                apply_binary(*op, va, vb)
            }
        }
        ExprKind::Select(c, t, f) => {
            if evaluate(c, env)?.as_bool()? {
                evaluate(t, env)
            } else {
                evaluate(f, env)
            }
        }
        ExprKind::Let { name, value, body } => {
            let v = evaluate(value, env)?;
            let mut inner = env.clone();
            inner.insert(name.clone(), v);
            evaluate(body, &inner)
        }
        ExprKind::Call { .. } => None,
    }
}

pub fn evaluate_int(e: &Expr, env: &Binding) -> Option<i64> {
    evaluate(e, env)?.as_int()
}

pub fn evaluate_bool(e: &Expr, env: &Binding) -> Option<bool> {
    evaluate(e, env)?.as_bool()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expr;

    fn env(pairs: &[(&str, i64)]) -> Binding {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), Value::Int(*v)))
            .collect()
    }

    #[test]
    fn test_euclidean_semantics() {
        assert_eq!(div_euclid(-7, 2), -4);
        assert_eq!(mod_euclid(-7, 2), 1);
        assert_eq!(div_euclid(7, -2), -3);
        assert_eq!(mod_euclid(7, -2), 1);
        assert_eq!(div_euclid(5, 0), 0);
        assert_eq!(mod_euclid(5, 0), 0);
        assert_eq!(div_euclid(i64::MIN, -1), i64::MIN);
    }

    #[test]
    fn test_evaluate_arithmetic() {
        let e = parse_expr("min(x*2 - y, 10) % 4").unwrap();
        assert_eq!(evaluate_int(&e, &env(&[("x", 7), ("y", 1)])), Some(2));
        assert_eq!(evaluate_int(&e, &env(&[("x", 7)])), None);
    }

    #[test]
    fn test_evaluate_boolean() {
        let e = parse_expr("x < y && y < 10").unwrap();
        assert_eq!(evaluate_bool(&e, &env(&[("x", 1), ("y", 5)])), Some(true));
        assert_eq!(evaluate_bool(&e, &env(&[("x", 6), ("y", 5)])), Some(false));
        let e = parse_expr("select(x < 0, 0 - x, x)").unwrap();
        assert_eq!(evaluate_int(&e, &env(&[("x", -3)])), Some(3));
    }

    #[test]
    fn test_exact_evaluation_detects_overflow() {
        let e = parse_expr("x*x < 0").unwrap();
        // Just past sqrt(i64::MAX), so the square wraps to a negative value
        let big = env(&[("x", 3_037_000_500)]);
        assert_eq!(evaluate_bool(&e, &big), Some(true));
        // An exact power of two wraps to zero instead
        assert_eq!(evaluate_bool(&e, &env(&[("x", 1 << 40)])), Some(false));
        assert_eq!(evaluate_exact(&e, &big), None);
        assert_eq!(evaluate_exact(&e, &env(&[("x", 3)])), Some(Value::Bool(false)));
    }

    #[test]
    fn test_evaluate_let() {
        let e = parse_expr("(let t = x + 1 in t*t)").unwrap();
        assert_eq!(evaluate_int(&e, &env(&[("x", 2)])), Some(9));
    }
}

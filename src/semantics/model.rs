//! Parsing of solver model output
//!
//! Models arrive as S-expressions, either wrapped in `(model ...)` or as a
//! bare list, with one `(define-fun name () Sort value)` per constant.
//! Values may span lines and negative integers are written `(- N)`.

use crate::ir::{Binding, Value};

/// Constant-name prefixes that never belong in a returned binding
pub const RESERVED_PREFIXES: [&str; 2] = ["z3name!", "_t"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum SExpr {
    Atom(String),
    List(Vec<SExpr>),
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in text.chars() {
        if in_quotes {
            if c == '|' {
                in_quotes = false;
            } else {
                current.push(c);
            }
            continue;
        }
        match c {
            '|' => in_quotes = true,
            '(' | ')' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                tokens.push(c.to_string());
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Read every top-level S-expression. Unbalanced trailing input is dropped.
fn parse_sexprs(text: &str) -> Vec<SExpr> {
    let mut stack: Vec<Vec<SExpr>> = vec![Vec::new()];
    for token in tokenize(text) {
        match token.as_str() {
            "(" => stack.push(Vec::new()),
            ")" => {
                if stack.len() > 1 {
                    if let Some(list) = stack.pop() {
                        if let Some(parent) = stack.last_mut() {
                            parent.push(SExpr::List(list));
                        }
                    }
                }
            }
            _ => {
                if let Some(top) = stack.last_mut() {
                    top.push(SExpr::Atom(token));
                }
            }
        }
    }
    stack.into_iter().next().unwrap_or_default()
}

fn parse_value(value: &SExpr) -> Option<Value> {
    match value {
        SExpr::Atom(a) => match a.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => a.parse::<i64>().ok().map(Value::Int),
        },
        SExpr::List(items) => match items.as_slice() {
            [SExpr::Atom(minus), inner] if minus == "-" => match parse_value(inner)? {
                Value::Int(v) => Some(Value::Int(v.wrapping_neg())),
                Value::Bool(_) => None,
            },
            _ => None,
        },
    }
}

fn collect_definitions(sexpr: &SExpr, out: &mut Binding) {
    let SExpr::List(items) = sexpr else {
        return;
    };
    if let [SExpr::Atom(head), SExpr::Atom(name), SExpr::List(params), _sort, value] =
        items.as_slice()
    {
        if head == "define-fun" && params.is_empty() {
            if !RESERVED_PREFIXES.iter().any(|p| name.starts_with(p)) {
                if let Some(v) = parse_value(value) {
                    out.insert(name.clone(), v);
                }
            }
            return;
        }
    }
    for item in items {
        collect_definitions(item, out);
    }
}

/// Extract a binding from solver output, skipping reserved names
pub fn parse_model(output: &str) -> Binding {
    let mut binding = Binding::new();
    for sexpr in parse_sexprs(output) {
        collect_definitions(&sexpr, &mut binding);
    }
    binding
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multiline_model() {
        let output = "sat\n(\n  (define-fun y () Int\n    3)\n  (define-fun x () Int\n    (- 1))\n)\n";
        let binding = parse_model(output);
        assert_eq!(binding.len(), 2);
        assert_eq!(binding.get("x"), Some(&Value::Int(-1)));
        assert_eq!(binding.get("y"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_parse_wrapped_model_with_reserved_names() {
        let output = "sat\n(model\n  (define-fun b () Bool true)\n  (define-fun _t0 () Int 4)\n  (define-fun z3name!12 () Int 0)\n  (define-fun |x.min| () Int 7)\n)";
        let binding = parse_model(output);
        assert_eq!(binding.get("b"), Some(&Value::Bool(true)));
        assert_eq!(binding.get("x.min"), Some(&Value::Int(7)));
        assert!(!binding.contains_key("_t0"));
        assert_eq!(binding.len(), 2);
    }

    #[test]
    fn test_functions_with_parameters_are_ignored() {
        let output = "((define-fun f ((x!0 Int)) Int (ite (= x!0 1) 2 3)) (define-fun k () Int 5))";
        let binding = parse_model(output);
        assert_eq!(binding.len(), 1);
        assert_eq!(binding.get("k"), Some(&Value::Int(5)));
    }
}

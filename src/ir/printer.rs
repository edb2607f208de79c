//! Text rendering of expressions
//!
//! Output uses minimal parentheses and is accepted back by the corpus parser,
//! so `parse(print(e)) == e` for every expression the parser can produce.

use super::expr::{BinOp, Expr, ExprKind};
use std::fmt;

/// Suffix marking an opaque call as an array load `name[idx]`
pub const LOAD_SUFFIX: &str = "[]";

const ATOM: u8 = 10;

fn precedence(e: &Expr) -> u8 {
    match e.kind() {
        ExprKind::Binary(op, _, _) => binary_precedence(*op),
        _ => ATOM,
    }
}

fn binary_precedence(op: BinOp) -> u8 {
    match op {
        BinOp::Or => 5,
        BinOp::And => 6,
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 7,
        BinOp::Add | BinOp::Sub => 8,
        BinOp::Mul | BinOp::Div | BinOp::Mod => 9,
        BinOp::Min | BinOp::Max => ATOM,
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, e: &Expr, min_precedence: u8) -> fmt::Result {
    if precedence(e) < min_precedence {
        write!(f, "({})", e)
    } else {
        write!(f, "{}", e)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ExprKind::Int(v) => write!(f, "{}", v),
            ExprKind::Bool(b) => write!(f, "{}", b),
            ExprKind::Var { name, .. } => write!(f, "{}", name),
            ExprKind::Not(a) => {
                write!(f, "!")?;
                write_operand(f, a, ATOM)
            }
            ExprKind::Binary(op @ (BinOp::Min | BinOp::Max), a, b) => {
                write!(f, "{}({}, {})", op.symbol(), a, b)
            }
            ExprKind::Binary(op, a, b) => {
                let p = binary_precedence(*op);
                // Arithmetic is left associative, the logical operators
                // associate to the right and comparisons do not chain.
                let (left, right) = match op {
                    BinOp::And | BinOp::Or => (p + 1, p),
                    _ if op.is_comparison() => (p + 1, p + 1),
                    _ => (p, p + 1),
                };
                write_operand(f, a, left)?;
                match op {
                    BinOp::Mul | BinOp::Div => write!(f, "{}", op.symbol())?,
                    _ => write!(f, " {} ", op.symbol())?,
                }
                write_operand(f, b, right)
            }
            ExprKind::Select(c, t, e) => write!(f, "select({}, {}, {})", c, t, e),
            ExprKind::Let { name, value, body } => {
                write!(f, "(let {} = {} in {})", name, value, body)
            }
            ExprKind::Call { name, args, .. } => {
                if let (Some(buffer), [index]) = (name.strip_suffix(LOAD_SUFFIX), args.as_slice()) {
                    return write!(f, "{}[{}]", buffer, index);
                }
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

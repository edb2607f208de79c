//! Term model for the integer/boolean expression language

pub mod analysis;
pub mod arena;
pub mod expr;
pub mod printer;
pub mod types;

// Re-export commonly used types
pub use expr::{BinOp, Expr, ExprKind};
pub use types::{Binding, Type, Value, format_binding};

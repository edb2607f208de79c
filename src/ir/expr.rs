//! Immutable expression trees
//!
//! `Expr` is a cheaply clonable handle to an immutable node. Equality, ordering
//! and hashing are structural, so two independently built trees with the same
//! shape compare equal and can be used as map keys.

use super::types::Type;
use std::fmt;
use std::sync::Arc;

/// Binary operators of the term language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Min,
    Max,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub const ALL: [BinOp; 15] = [
        BinOp::Add,
        BinOp::Sub,
        BinOp::Mul,
        BinOp::Div,
        BinOp::Mod,
        BinOp::Min,
        BinOp::Max,
        BinOp::Eq,
        BinOp::Ne,
        BinOp::Lt,
        BinOp::Le,
        BinOp::Gt,
        BinOp::Ge,
        BinOp::And,
        BinOp::Or,
    ];

    /// Comparison operators produce a boolean from two integers
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }

    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            BinOp::Add
                | BinOp::Mul
                | BinOp::Min
                | BinOp::Max
                | BinOp::Eq
                | BinOp::Ne
                | BinOp::And
                | BinOp::Or
        )
    }

    /// Type produced when applied to operands of type `operand`
    pub fn result_type(&self, operand: Type) -> Type {
        if self.is_comparison() || self.is_logical() {
            Type::Bool
        } else {
            operand
        }
    }

    /// Infix symbol, or function name for min/max
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Min => "min",
            BinOp::Max => "max",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    /// Node-type name used for grouping rule output
    pub fn name(&self) -> &'static str {
        match self {
            BinOp::Add => "Add",
            BinOp::Sub => "Sub",
            BinOp::Mul => "Mul",
            BinOp::Div => "Div",
            BinOp::Mod => "Mod",
            BinOp::Min => "Min",
            BinOp::Max => "Max",
            BinOp::Eq => "EQ",
            BinOp::Ne => "NE",
            BinOp::Lt => "LT",
            BinOp::Le => "LE",
            BinOp::Gt => "GT",
            BinOp::Ge => "GE",
            BinOp::And => "And",
            BinOp::Or => "Or",
        }
    }
}

/// The node payload of an expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExprKind {
    Int(i64),
    Bool(bool),
    Var { name: String, ty: Type },
    Not(Expr),
    Binary(BinOp, Expr, Expr),
    Select(Expr, Expr, Expr),
    Let { name: String, value: Expr, body: Expr },
    Call { name: String, args: Vec<Expr>, ty: Type },
}

/// Shared handle to an immutable expression node
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Expr(Arc<ExprKind>);

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Expr(Arc::new(kind))
    }

    pub fn kind(&self) -> &ExprKind {
        &self.0
    }

    /// Pointer identity, cheaper than structural equality
    pub fn same_as(&self, other: &Expr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    // --- Construction ---

    pub fn int(value: i64) -> Self {
        Expr::new(ExprKind::Int(value))
    }

    pub fn bool(value: bool) -> Self {
        Expr::new(ExprKind::Bool(value))
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::typed_var(name, Type::Int)
    }

    pub fn bool_var(name: impl Into<String>) -> Self {
        Expr::typed_var(name, Type::Bool)
    }

    pub fn typed_var(name: impl Into<String>, ty: Type) -> Self {
        Expr::new(ExprKind::Var {
            name: name.into(),
            ty,
        })
    }

    pub fn not(a: Expr) -> Self {
        Expr::new(ExprKind::Not(a))
    }

    pub fn binary(op: BinOp, a: Expr, b: Expr) -> Self {
        Expr::new(ExprKind::Binary(op, a, b))
    }

    pub fn add(a: Expr, b: Expr) -> Self {
        Expr::binary(BinOp::Add, a, b)
    }

    pub fn sub(a: Expr, b: Expr) -> Self {
        Expr::binary(BinOp::Sub, a, b)
    }

    pub fn mul(a: Expr, b: Expr) -> Self {
        Expr::binary(BinOp::Mul, a, b)
    }

    pub fn div(a: Expr, b: Expr) -> Self {
        Expr::binary(BinOp::Div, a, b)
    }

    pub fn modulo(a: Expr, b: Expr) -> Self {
        Expr::binary(BinOp::Mod, a, b)
    }

    pub fn min(a: Expr, b: Expr) -> Self {
        Expr::binary(BinOp::Min, a, b)
    }

    pub fn max(a: Expr, b: Expr) -> Self {
        Expr::binary(BinOp::Max, a, b)
    }

    pub fn eq(a: Expr, b: Expr) -> Self {
        Expr::binary(BinOp::Eq, a, b)
    }

    pub fn ne(a: Expr, b: Expr) -> Self {
        Expr::binary(BinOp::Ne, a, b)
    }

    pub fn lt(a: Expr, b: Expr) -> Self {
        Expr::binary(BinOp::Lt, a, b)
    }

    pub fn le(a: Expr, b: Expr) -> Self {
        Expr::binary(BinOp::Le, a, b)
    }

    pub fn gt(a: Expr, b: Expr) -> Self {
        Expr::binary(BinOp::Gt, a, b)
    }

    pub fn ge(a: Expr, b: Expr) -> Self {
        Expr::binary(BinOp::Ge, a, b)
    }

    pub fn and(a: Expr, b: Expr) -> Self {
        Expr::binary(BinOp::And, a, b)
    }

    pub fn or(a: Expr, b: Expr) -> Self {
        Expr::binary(BinOp::Or, a, b)
    }

    pub fn select(cond: Expr, t: Expr, f: Expr) -> Self {
        Expr::new(ExprKind::Select(cond, t, f))
    }

    pub fn let_in(name: impl Into<String>, value: Expr, body: Expr) -> Self {
        Expr::new(ExprKind::Let {
            name: name.into(),
            value,
            body,
        })
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>, ty: Type) -> Self {
        Expr::new(ExprKind::Call {
            name: name.into(),
            args,
            ty,
        })
    }

    /// Conjunction of all items, `true` when empty
    pub fn and_all(items: impl IntoIterator<Item = Expr>) -> Self {
        Expr::pack(BinOp::And, items).unwrap_or_else(|| Expr::bool(true))
    }

    /// Disjunction of all items, `false` when empty
    pub fn or_all(items: impl IntoIterator<Item = Expr>) -> Self {
        Expr::pack(BinOp::Or, items).unwrap_or_else(|| Expr::bool(false))
    }

    /// Fold items into a left-leaning chain of `op`
    pub fn pack(op: BinOp, items: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        items
            .into_iter()
            .reduce(|acc, item| Expr::binary(op, acc, item))
    }

    /// Flatten a tree of nested `op` nodes into its operands
    pub fn unpack(&self, op: BinOp) -> Vec<Expr> {
        let mut out = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(e) = stack.pop() {
            match e.kind() {
                ExprKind::Binary(o, a, b) if *o == op => {
                    stack.push(b.clone());
                    stack.push(a.clone());
                }
                _ => out.push(e),
            }
        }
        out
    }

    // --- Inspection ---

    pub fn ty(&self) -> Type {
        match self.kind() {
            ExprKind::Int(_) => Type::Int,
            ExprKind::Bool(_) => Type::Bool,
            ExprKind::Var { ty, .. } => *ty,
            ExprKind::Not(_) => Type::Bool,
            ExprKind::Binary(op, a, _) => op.result_type(a.ty()),
            ExprKind::Select(_, t, _) => t.ty(),
            ExprKind::Let { body, .. } => body.ty(),
            ExprKind::Call { ty, .. } => *ty,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.kind() {
            ExprKind::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.kind() {
            ExprKind::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_var(&self) -> Option<&str> {
        match self.kind() {
            ExprKind::Var { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<(BinOp, &Expr, &Expr)> {
        match self.kind() {
            ExprKind::Binary(op, a, b) => Some((*op, a, b)),
            _ => None,
        }
    }

    /// Operands if this node is exactly `op`
    pub fn as_op(&self, op: BinOp) -> Option<(&Expr, &Expr)> {
        match self.kind() {
            ExprKind::Binary(o, a, b) if *o == op => Some((a, b)),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self.kind(), ExprKind::Int(_) | ExprKind::Bool(_))
    }

    pub fn is_true(&self) -> bool {
        self.as_bool() == Some(true)
    }

    pub fn is_false(&self) -> bool {
        self.as_bool() == Some(false)
    }

    pub fn is_zero(&self) -> bool {
        self.as_int() == Some(0) || self.is_false()
    }

    pub fn is_leaf(&self) -> bool {
        matches!(
            self.kind(),
            ExprKind::Int(_) | ExprKind::Bool(_) | ExprKind::Var { .. }
        )
    }

    /// Direct children in evaluation order
    pub fn children(&self) -> Vec<&Expr> {
        match self.kind() {
            ExprKind::Int(_) | ExprKind::Bool(_) | ExprKind::Var { .. } => Vec::new(),
            ExprKind::Not(a) => vec![a],
            ExprKind::Binary(_, a, b) => vec![a, b],
            ExprKind::Select(c, t, f) => vec![c, t, f],
            ExprKind::Let { value, body, .. } => vec![value, body],
            ExprKind::Call { args, .. } => args.iter().collect(),
        }
    }

    /// Rebuild this node with each child replaced by `f(child)`.
    /// Returns a clone of `self` when no child changed.
    pub fn map_children(&self, mut f: impl FnMut(&Expr) -> Expr) -> Expr {
        match self.kind() {
            ExprKind::Int(_) | ExprKind::Bool(_) | ExprKind::Var { .. } => self.clone(),
            ExprKind::Not(a) => {
                let na = f(a);
                if na.same_as(a) {
                    self.clone()
                } else {
                    Expr::not(na)
                }
            }
            ExprKind::Binary(op, a, b) => {
                let na = f(a);
                let nb = f(b);
                if na.same_as(a) && nb.same_as(b) {
                    self.clone()
                } else {
                    Expr::binary(*op, na, nb)
                }
            }
            ExprKind::Select(c, t, e) => {
                let nc = f(c);
                let nt = f(t);
                let ne = f(e);
                if nc.same_as(c) && nt.same_as(t) && ne.same_as(e) {
                    self.clone()
                } else {
                    Expr::select(nc, nt, ne)
                }
            }
            ExprKind::Let { name, value, body } => {
                let nv = f(value);
                let nb = f(body);
                if nv.same_as(value) && nb.same_as(body) {
                    self.clone()
                } else {
                    Expr::let_in(name.clone(), nv, nb)
                }
            }
            ExprKind::Call { name, args, ty } => {
                let new_args: Vec<Expr> = args.iter().map(&mut f).collect();
                if new_args.iter().zip(args).all(|(n, o)| n.same_as(o)) {
                    self.clone()
                } else {
                    Expr::call(name.clone(), new_args, *ty)
                }
            }
        }
    }

    /// Rebuild this node with an explicit list of children
    pub fn with_children(&self, children: Vec<Expr>) -> Expr {
        let mut iter = children.into_iter();
        self.map_children(|old| iter.next().unwrap_or_else(|| old.clone()))
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::int(value)
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Expr::bool(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        let a = Expr::add(Expr::var("x"), Expr::int(1));
        let b = Expr::add(Expr::var("x"), Expr::int(1));
        assert_eq!(a, b);
        assert!(!a.same_as(&b));
    }

    #[test]
    fn test_types() {
        let x = Expr::var("x");
        assert_eq!(Expr::lt(x.clone(), Expr::int(3)).ty(), Type::Bool);
        assert_eq!(Expr::min(x.clone(), Expr::int(3)).ty(), Type::Int);
        assert_eq!(
            Expr::select(Expr::bool_var("b"), x.clone(), Expr::int(0)).ty(),
            Type::Int
        );
    }

    #[test]
    fn test_unpack_and_pack() {
        let a = Expr::bool_var("a");
        let b = Expr::bool_var("b");
        let c = Expr::bool_var("c");
        let e = Expr::and(a.clone(), Expr::and(b.clone(), c.clone()));
        assert_eq!(e.unpack(BinOp::And), vec![a.clone(), b.clone(), c.clone()]);
        assert_eq!(Expr::and_all(Vec::new()), Expr::bool(true));
        assert_eq!(Expr::or_all(vec![a.clone()]), a);
    }

    #[test]
    fn test_map_children_preserves_identity() {
        let e = Expr::add(Expr::var("x"), Expr::int(1));
        let same = e.map_children(|c| c.clone());
        assert!(same.same_as(&e));
    }
}

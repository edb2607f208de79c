//! Hash-consing arena for expression DAGs
//!
//! Interning an expression assigns every structurally distinct subterm a
//! single `TermId`. Ids are handed out bottom-up, so a node's children always
//! have smaller ids than the node itself.

use super::analysis::inline_lets;
use super::expr::{BinOp, Expr, ExprKind};
use super::types::Type;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermId(u32);

impl TermId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// A node whose children are arena ids
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    Int(i64),
    Bool(bool),
    Var(String, Type),
    Not(TermId),
    Binary(BinOp, TermId, TermId),
    Select(TermId, TermId, TermId),
    Let(String, TermId, TermId),
    Call(String, Vec<TermId>, Type),
}

impl Node {
    pub fn children(&self) -> Vec<TermId> {
        match self {
            Node::Int(_) | Node::Bool(_) | Node::Var(..) => Vec::new(),
            Node::Not(a) => vec![*a],
            Node::Binary(_, a, b) => vec![*a, *b],
            Node::Select(c, t, f) => vec![*c, *t, *f],
            Node::Let(_, v, b) => vec![*v, *b],
            Node::Call(_, args, _) => args.clone(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Int(_) | Node::Bool(_) | Node::Var(..))
    }
}

#[derive(Debug, Default)]
pub struct TermArena {
    nodes: Vec<Node>,
    exprs: Vec<Expr>,
    index: HashMap<Node, TermId>,
}

impl TermArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: TermId) -> &Node {
        &self.nodes[id.index()]
    }

    /// The expression tree rooted at `id`
    pub fn expr(&self, id: TermId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn ids(&self) -> impl Iterator<Item = TermId> {
        (0..self.nodes.len() as u32).map(TermId)
    }

    /// Intern an expression, returning the id of its root
    pub fn intern(&mut self, e: &Expr) -> TermId {
        let node = match e.kind() {
            ExprKind::Int(v) => Node::Int(*v),
            ExprKind::Bool(b) => Node::Bool(*b),
            ExprKind::Var { name, ty } => Node::Var(name.clone(), *ty),
            ExprKind::Not(a) => Node::Not(self.intern(a)),
            ExprKind::Binary(op, a, b) => {
                let a = self.intern(a);
                let b = self.intern(b);
                Node::Binary(*op, a, b)
            }
            ExprKind::Select(c, t, f) => {
                let c = self.intern(c);
                let t = self.intern(t);
                let f = self.intern(f);
                Node::Select(c, t, f)
            }
            ExprKind::Let { name, value, body } => {
                let v = self.intern(value);
                let b = self.intern(body);
                Node::Let(name.clone(), v, b)
            }
            ExprKind::Call { name, args, ty } => {
                let args = args.iter().map(|a| self.intern(a)).collect();
                Node::Call(name.clone(), args, *ty)
            }
        };
        if let Some(&id) = self.index.get(&node) {
            return id;
        }
        let id = TermId(self.nodes.len() as u32);
        self.index.insert(node.clone(), id);
        self.nodes.push(node);
        self.exprs.push(e.clone());
        id
    }

    /// Number of DAG edges pointing at each node
    pub fn use_counts(&self) -> Vec<usize> {
        let mut uses = vec![0; self.nodes.len()];
        for node in &self.nodes {
            for child in node.children() {
                uses[child.index()] += 1;
            }
        }
        uses
    }
}

/// Lift every non-leaf subterm used more than once into a `let` binding named
/// `<prefix><n>`. The result is a chain of lets around the rewritten body, with
/// bindings in dependency order.
pub fn common_subexpression_elimination(e: &Expr, prefix: &str) -> Expr {
    let e = inline_lets(e);
    let mut arena = TermArena::new();
    let root = arena.intern(&e);
    let uses = arena.use_counts();

    let mut rebuilt: Vec<Expr> = Vec::with_capacity(arena.len());
    let mut lets: Vec<(String, Expr)> = Vec::new();
    for id in arena.ids() {
        let node = arena.node(id);
        let original = arena.expr(id);
        let expr = if node.is_leaf() {
            original.clone()
        } else {
            let children: Vec<Expr> = node
                .children()
                .into_iter()
                .map(|c| rebuilt[c.index()].clone())
                .collect();
            original.with_children(children)
        };
        if !node.is_leaf() && uses[id.index()] > 1 && id != root {
            let name = format!("{}{}", prefix, lets.len());
            let var = Expr::typed_var(name.clone(), expr.ty());
            lets.push((name, expr));
            rebuilt.push(var);
        } else {
            rebuilt.push(expr);
        }
    }

    let body = rebuilt[root.index()].clone();
    lets.into_iter()
        .rev()
        .fold(body, |body, (name, value)| Expr::let_in(name, value, body))
}

//! Rewrite rules and their text output

use super::is_wildcard_constant;
use crate::error::{Result, SuperoptError};
use crate::ir::{BinOp, Expr, ExprKind};
use crate::parser::{ParseError, as_rewrite, parse_file};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Name of the call marking a subterm the matcher should constant-fold
pub const FOLD: &str = "fold";

/// Root operators that always get an output file, even an empty one
pub const OUTPUT_ROOTS: [&str; 13] = [
    "Add", "And", "Div", "EQ", "LE", "LT", "Max", "Min", "Mod", "Mul", "Or", "Select", "Sub",
];

/// `lhs` may be replaced by `rhs` wherever `predicate` holds
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rule {
    pub lhs: Expr,
    pub rhs: Expr,
    pub predicate: Expr,
}

impl Rule {
    pub fn new(lhs: Expr, rhs: Expr) -> Self {
        Self {
            lhs,
            rhs,
            predicate: Expr::bool(true),
        }
    }

    pub fn with_predicate(mut self, predicate: Expr) -> Self {
        self.predicate = predicate;
        self
    }

    /// Grouping key for output files
    pub fn root_name(&self) -> &'static str {
        node_name(&self.lhs)
    }

    /// The conditions under which the left-hand side would already have been
    /// folded by the simplifier: multiplying or dividing by a zero constant
    pub fn implicit_predicate(&self) -> Expr {
        implicit_predicate(&self.lhs)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rewrite({}, {}", self.lhs, inject_folds(&self.rhs))?;
        if !self.predicate.is_true() {
            write!(f, ", {}", self.predicate)?;
        }
        write!(f, ")")
    }
}

/// Node-type name of an expression's root
pub fn node_name(e: &Expr) -> &'static str {
    match e.kind() {
        ExprKind::Int(_) => "IntImm",
        ExprKind::Bool(_) => "UIntImm",
        ExprKind::Var { .. } => "Variable",
        ExprKind::Not(_) => "Not",
        ExprKind::Binary(op, _, _) => op.name(),
        ExprKind::Select(..) => "Select",
        ExprKind::Let { .. } => "Let",
        ExprKind::Call { .. } => "Call",
    }
}

/// `c != 0` for every wildcard constant used as a multiplier or divisor
pub fn implicit_predicate(lhs: &Expr) -> Expr {
    let mut terms = Vec::new();
    crate::ir::analysis::visit(lhs, &mut |node| {
        if let Some((BinOp::Mul | BinOp::Div, _, b)) = node.as_binary() {
            if b.as_var().is_some_and(is_wildcard_constant) {
                let term = Expr::ne(b.clone(), Expr::int(0));
                if !terms.contains(&term) {
                    terms.push(term);
                }
            }
        }
    });
    Expr::and_all(terms)
}

fn is_constant_leaf(e: &Expr) -> bool {
    match e.kind() {
        ExprKind::Int(_) | ExprKind::Bool(_) => true,
        ExprKind::Var { name, .. } => is_wildcard_constant(name),
        _ => false,
    }
}

/// True if every leaf is a literal or a wildcard constant
pub fn is_constant_only(e: &Expr) -> bool {
    if e.is_leaf() {
        return is_constant_leaf(e);
    }
    match e.kind() {
        ExprKind::Call { .. } | ExprKind::Let { .. } => false,
        _ => e.children().into_iter().all(is_constant_only),
    }
}

/// Wrap every maximal constant-only non-leaf subterm in `fold(...)`
pub fn inject_folds(e: &Expr) -> Expr {
    if e.is_leaf() {
        return e.clone();
    }
    if is_constant_only(e) {
        return Expr::call(FOLD, vec![e.clone()], e.ty());
    }
    e.map_children(inject_folds)
}

/// Strip `fold(...)` wrappers
pub fn remove_folds(e: &Expr) -> Expr {
    match e.kind() {
        ExprKind::Call { name, args, .. } if name == FOLD && args.len() == 1 => {
            remove_folds(&args[0])
        }
        _ => e.map_children(remove_folds),
    }
}

/// Read a file of `rewrite(...)` lines
pub fn read_rules(path: &Path) -> Result<Vec<Rule>> {
    let exprs = parse_file(path)?;
    let mut rules = Vec::with_capacity(exprs.len());
    for (i, e) in exprs.iter().enumerate() {
        let Some(line) = as_rewrite(e) else {
            return Err(SuperoptError::Parse(ParseError::new(
                i + 1,
                "expression is not a rewrite rule",
                e.to_string(),
            )));
        };
        rules.push(Rule {
            lhs: line.lhs,
            rhs: line.rhs,
            predicate: line.predicate,
        });
    }
    Ok(rules)
}

/// Rules grouped by root operator, in the order given
pub fn group_by_root(rules: &[Rule]) -> BTreeMap<&'static str, Vec<&Rule>> {
    let mut groups: BTreeMap<&'static str, Vec<&Rule>> = BTreeMap::new();
    for rule in rules {
        groups.entry(rule.root_name()).or_default().push(rule);
    }
    groups
}

/// Write one `Simplify_<Op>.inc` file per root operator. Every operator in
/// `OUTPUT_ROOTS` without rules gets a file containing `false`, so stale
/// files from an earlier run are never mixed in.
pub fn write_rule_files(dir: &Path, rules: &[Rule]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let groups = group_by_root(rules);
    let mut written = Vec::new();
    for (root, group) in &groups {
        let lines: Vec<String> = group.iter().map(|r| r.to_string()).collect();
        let path = dir.join(format!("Simplify_{}.inc", root));
        fs::write(&path, format!("{}\n", lines.join(" ||\n")))?;
        info!(path = %path.display(), rules = group.len(), "wrote rules");
        written.push(path);
    }
    for root in OUTPUT_ROOTS {
        if !groups.contains_key(root) {
            let path = dir.join(format!("Simplify_{}.inc", root));
            fs::write(&path, "false")?;
            written.push(path);
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_bool_expr, parse_expr};

    fn rule(lhs: &str, rhs: &str) -> Rule {
        Rule::new(parse_expr(lhs).unwrap(), parse_expr(rhs).unwrap())
    }

    #[test]
    fn test_display_wraps_constant_subterms() {
        let r = rule("(x + c0) + c1", "x + (c0 + c1)");
        assert_eq!(r.to_string(), "rewrite(x + c0 + c1, x + fold(c0 + c1))");

        let r = rule("x*2 - x", "x")
            .with_predicate(parse_bool_expr("0 < c0").unwrap());
        assert_eq!(r.to_string(), "rewrite(x*2 - x, x, 0 < c0)");
    }

    #[test]
    fn test_fold_round_trip() {
        let e = parse_expr("min(x, c0*2 + 1)").unwrap();
        let folded = inject_folds(&e);
        assert_eq!(folded.to_string(), "min(x, fold(c0*2 + 1))");
        assert_eq!(remove_folds(&folded), e);
        // The parser treats fold as transparent
        assert_eq!(parse_expr(&folded.to_string()).unwrap(), e);
    }

    #[test]
    fn test_implicit_predicate() {
        let lhs = parse_expr("(x*c0)/c0 + y/c1").unwrap();
        assert_eq!(implicit_predicate(&lhs).to_string(), "c0 != 0 && c1 != 0");
        assert!(implicit_predicate(&parse_expr("x*2").unwrap()).is_true());
    }

    #[test]
    fn test_root_names() {
        assert_eq!(rule("x - x", "0").root_name(), "Sub");
        assert_eq!(rule("select(x < y, x, x)", "x").root_name(), "Select");
        let lt = Rule::new(parse_bool_expr("x < x").unwrap(), Expr::bool(false));
        assert_eq!(lt.root_name(), "LT");
    }

    #[test]
    fn test_write_rule_files() {
        let dir = tempfile::tempdir().unwrap();
        let rules = vec![rule("x - x", "0"), rule("(x + y) - y", "x"), rule("x*0", "0")];
        let written = write_rule_files(dir.path(), &rules).unwrap();
        assert_eq!(written.len(), OUTPUT_ROOTS.len());

        let sub = fs::read_to_string(dir.path().join("Simplify_Sub.inc")).unwrap();
        assert_eq!(sub, "rewrite(x - x, 0) ||\nrewrite(x + y - y, x)\n");
        let add = fs::read_to_string(dir.path().join("Simplify_Add.inc")).unwrap();
        assert_eq!(add, "false");
    }

    #[test]
    fn test_read_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.txt");
        fs::write(&path, "rewrite(x - x, 0)\nrewrite(x*c0/c0, x, c0 != 0)\n").unwrap();
        let rules = read_rules(&path).unwrap();
        assert_eq!(rules.len(), 2);
        assert!(rules[0].predicate.is_true());
        assert_eq!(rules[1].predicate.to_string(), "c0 != 0");

        fs::write(&path, "x + 1\n").unwrap();
        assert!(read_rules(&path).is_err());
    }
}

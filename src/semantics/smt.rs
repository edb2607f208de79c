//! SMT-LIB2 serialization and the external solver process
//!
//! Every query is a fresh solver subprocess fed from a temporary file. The
//! goal is simplified first; goals that simplify to a constant are answered
//! without starting the solver.

use super::model::parse_model;
use super::simplify::simplify;
use crate::ir::analysis::{free_vars, hoist_lets};
use crate::ir::arena::common_subexpression_elimination;
use crate::ir::{BinOp, Binding, Expr, ExprKind, Type, Value};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write as _;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Prefix of the constants introduced by common-subexpression elimination
pub const TEMP_PREFIX: &str = "_t";

/// Prefix of the constants standing for hoisted `let` bindings
pub const LET_PREFIX: &str = "_th";

/// Configuration for the SMT solver
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Solver executable, looked up on `PATH`
    pub binary: String,
    /// Timeout for SMT solving (None means no timeout)
    pub timeout: Option<Duration>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            binary: "z3".to_string(),
            timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl SolverConfig {
    /// Create a config with a specific timeout in seconds
    pub fn with_timeout_secs(secs: u64) -> Self {
        Self::with_timeout(Duration::from_secs(secs))
    }

    /// Create a config with a specific timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

/// Outcome of a satisfiability query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SatResult {
    /// Satisfiable, with the model restricted to non-reserved names.
    /// Variables the solver did not mention are absent.
    Sat(Binding),
    Unsat,
    /// Timeout, solver error or an inconclusive answer
    Unknown,
}

impl SatResult {
    pub fn is_sat(&self) -> bool {
        matches!(self, SatResult::Sat(_))
    }

    pub fn is_unsat(&self) -> bool {
        matches!(self, SatResult::Unsat)
    }
}

/// A satisfiability oracle over boolean expressions
pub trait SmtSolver: Send + Sync {
    /// Find a binding making `goal` true. `comment` is recorded in the query.
    fn satisfy(&self, goal: &Expr, comment: &str) -> SatResult;

    fn name(&self) -> &str;
}

/// Fill variables missing from a model with the zero of their type
pub fn complete_binding(binding: &mut Binding, e: &Expr) {
    for (name, (ty, _)) in free_vars(e) {
        binding.entry(name).or_insert(Value::zero(ty));
    }
}

// --- Serialization ---

fn sort_name(ty: Type) -> &'static str {
    match ty {
        Type::Int => "Int",
        Type::Bool => "Bool",
    }
}

fn symbol(name: &str) -> String {
    let simple = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "~!@$%^&*_-+=<>.?/".contains(c));
    if simple {
        name.to_string()
    } else {
        format!("|{}|", name)
    }
}

/// Render an expression as an SMT-LIB2 term
pub fn to_smtlib2(e: &Expr) -> String {
    let mut out = String::new();
    write_term(&mut out, e);
    out
}

fn write_term(out: &mut String, e: &Expr) {
    match e.kind() {
        ExprKind::Int(v) if *v < 0 => {
            let _ = write!(out, "(- {})", v.unsigned_abs());
        }
        ExprKind::Int(v) => {
            let _ = write!(out, "{}", v);
        }
        ExprKind::Bool(b) => {
            let _ = write!(out, "{}", b);
        }
        ExprKind::Var { name, .. } => out.push_str(&symbol(name)),
        ExprKind::Not(a) => {
            out.push_str("(not ");
            write_term(out, a);
            out.push(')');
        }
        ExprKind::Binary(BinOp::Ne, a, b) => {
            out.push_str("(not (= ");
            write_term(out, a);
            out.push(' ');
            write_term(out, b);
            out.push_str("))");
        }
        ExprKind::Binary(op, a, b) => {
            let head = match op {
                BinOp::Add => "+",
                BinOp::Sub => "-",
                BinOp::Mul => "*",
                BinOp::Div => "my_div",
                BinOp::Mod => "my_mod",
                BinOp::Min => "my_min",
                BinOp::Max => "my_max",
                BinOp::Eq => "=",
                BinOp::Lt => "<",
                BinOp::Le => "<=",
                BinOp::Gt => ">",
                BinOp::Ge => ">=",
                BinOp::And => "and",
                BinOp::Or => "or",
                BinOp::Ne => unreachable!("handled above"),
            };
            let _ = write!(out, "({} ", head);
            write_term(out, a);
            out.push(' ');
            write_term(out, b);
            out.push(')');
        }
        ExprKind::Select(c, t, f) => {
            out.push_str("(ite ");
            write_term(out, c);
            out.push(' ');
            write_term(out, t);
            out.push(' ');
            write_term(out, f);
            out.push(')');
        }
        ExprKind::Let { name, value, body } => {
            let _ = write!(out, "(let (({} ", symbol(name));
            write_term(out, value);
            out.push_str(")) ");
            write_term(out, body);
            out.push(')');
        }
        ExprKind::Call { name, args, .. } => {
            let _ = write!(out, "({}", symbol(name));
            for arg in args {
                out.push(' ');
                write_term(out, arg);
            }
            out.push(')');
        }
    }
}

const PREAMBLE: &str = "\
(define-fun my_min ((x Int) (y Int)) Int (ite (< x y) x y))
(define-fun my_max ((x Int) (y Int)) Int (ite (< x y) y x))
(define-fun my_div ((x Int) (y Int)) Int (ite (= y 0) 0 (div x y)))
(define-fun my_mod ((x Int) (y Int)) Int (ite (= y 0) 0 (mod x y)))
";

fn define_constant(query: &mut String, name: &str, value: &Expr) {
    let _ = writeln!(
        query,
        "(declare-const {} {})",
        symbol(name),
        sort_name(value.ty())
    );
    let _ = writeln!(query, "(assert (= {} {}))", symbol(name), to_smtlib2(value));
}

/// Build the complete query text for `goal`
pub fn build_query(goal: &Expr, comment: &str) -> String {
    let mut query = String::new();
    for line in comment.lines() {
        let _ = writeln!(query, "; {}", line);
    }
    if comment.is_empty() {
        query.push_str(";\n");
    }

    let vars: BTreeMap<String, (Type, usize)> = free_vars(goal);
    for (name, (ty, _)) in &vars {
        let _ = writeln!(query, "(declare-const {} {})", symbol(name), sort_name(*ty));
    }
    query.push_str(PREAMBLE);

    // Explicit lets and shared subterms both become named constants
    let (defs, body) = hoist_lets(goal, LET_PREFIX);
    for (name, value) in &defs {
        define_constant(&mut query, name, value);
    }
    let mut body = common_subexpression_elimination(&body, TEMP_PREFIX);
    while let ExprKind::Let { name, value, body: rest } = body.kind() {
        define_constant(&mut query, name, value);
        let rest = rest.clone();
        body = rest;
    }
    let _ = writeln!(query, "(assert {})", to_smtlib2(&body));
    query.push_str("(check-sat)\n(get-model)\n");
    query
}

/// Interpret solver output
pub fn parse_response(output: &str, exit_success: bool) -> SatResult {
    let first = output.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    match first {
        "unsat" => SatResult::Unsat,
        "sat" if exit_success => SatResult::Sat(parse_model(output)),
        _ => SatResult::Unknown,
    }
}

fn contains_call(e: &Expr) -> bool {
    matches!(e.kind(), ExprKind::Call { .. }) || e.children().into_iter().any(contains_call)
}

// --- Process solver ---

/// Solver that runs `z3 -T:<secs> <file>` once per query
#[derive(Debug, Clone, Default)]
pub struct Z3Solver {
    config: SolverConfig,
}

impl Z3Solver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Check if the configured solver binary can be started
    pub fn is_available(&self) -> bool {
        Command::new(&self.config.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    fn run(&self, query: &str) -> std::io::Result<(String, bool)> {
        let mut file = tempfile::Builder::new()
            .prefix("superopt-")
            .suffix(".smt2")
            .tempfile()?;
        file.write_all(query.as_bytes())?;
        file.flush()?;

        let mut command = Command::new(&self.config.binary);
        if let Some(timeout) = self.config.timeout {
            let secs = timeout.as_secs_f64().ceil().max(1.0) as u64;
            command.arg(format!("-T:{}", secs));
        }
        let output = command.arg(file.path()).stdin(Stdio::null()).output()?;
        Ok((
            String::from_utf8_lossy(&output.stdout).into_owned(),
            output.status.success(),
        ))
    }
}

impl SmtSolver for Z3Solver {
    fn satisfy(&self, goal: &Expr, comment: &str) -> SatResult {
        let goal = simplify(goal);
        if goal.is_true() {
            return SatResult::Sat(Binding::new());
        }
        if goal.is_false() {
            return SatResult::Unsat;
        }
        if contains_call(&goal) {
            warn!(goal = %goal, "opaque calls cannot be sent to the solver");
            return SatResult::Unknown;
        }

        let query = build_query(&goal, comment);
        trace!(query = %query, "solver query");
        let start = Instant::now();
        let result = match self.run(&query) {
            Ok((output, success)) => parse_response(&output, success),
            Err(e) => {
                warn!(binary = %self.config.binary, error = %e, "failed to run solver");
                SatResult::Unknown
            }
        };
        debug!(
            comment,
            elapsed_ms = start.elapsed().as_millis() as u64,
            sat = result.is_sat(),
            unsat = result.is_unsat(),
            "solver query finished"
        );
        result
    }

    fn name(&self) -> &str {
        &self.config.binary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_bool_expr, parse_expr};

    #[test]
    fn test_to_smtlib2() {
        let e = parse_expr("min(x, -3) / y != x % 2").unwrap();
        assert_eq!(
            to_smtlib2(&e),
            "(not (= (my_div (my_min x (- 3)) y) (my_mod x 2)))"
        );
        let e = parse_bool_expr("select(b, x, 0) <= 1 || !b").unwrap();
        assert_eq!(to_smtlib2(&e), "(or (<= (ite b x 0) 1) (not b))");
    }

    #[test]
    fn test_build_query_declares_and_flattens() {
        let e = parse_bool_expr("(x + y)*(x + y) < 10 && b").unwrap();
        let query = build_query(&e, "test query");
        assert!(query.starts_with("; test query\n"));
        assert!(query.contains("(declare-const b Bool)"));
        assert!(query.contains("(declare-const x Int)"));
        assert!(query.contains("(declare-const _t0 Int)"));
        assert!(query.contains("(assert (= _t0 (+ x y)))"));
        assert!(query.contains("(assert (and (< (* _t0 _t0) 10) b))"));
        assert!(query.trim_end().ends_with("(check-sat)\n(get-model)"));
    }

    #[test]
    fn test_build_query_hoists_lets() {
        let x = Expr::var("x");
        let t = Expr::var("t");
        let e = Expr::let_in(
            "t",
            Expr::add(x.clone(), Expr::int(1)),
            Expr::lt(Expr::mul(t.clone(), t), Expr::int(5)),
        );
        let query = build_query(&e, "");
        assert!(query.contains("(declare-const _th0 Int)"));
        assert!(query.contains("(assert (= _th0 (+ x 1)))"));
        assert!(query.contains("(assert (< (* _th0 _th0) 5))"));
        assert!(!query.contains("(declare-const t "));
    }

    #[test]
    fn test_parse_response() {
        assert_eq!(parse_response("unsat\n(error \"no model\")", false), SatResult::Unsat);
        assert_eq!(parse_response("unknown\n", true), SatResult::Unknown);
        assert_eq!(parse_response("timeout\n", true), SatResult::Unknown);
        assert_eq!(parse_response("sat\n", false), SatResult::Unknown);
        let result = parse_response("sat\n((define-fun x () Int (- 2)))", true);
        let mut expected = Binding::new();
        expected.insert("x".into(), Value::Int(-2));
        assert_eq!(result, SatResult::Sat(expected));
    }

    #[test]
    fn test_trivial_goals_skip_the_solver() {
        let solver = Z3Solver::new(SolverConfig::default().with_binary("definitely-not-a-solver"));
        let e = parse_bool_expr("x + 1 > x").unwrap();
        assert_eq!(solver.satisfy(&e, ""), SatResult::Sat(Binding::new()));
        let e = parse_bool_expr("!(min(x, 10) <= 10)").unwrap();
        assert_eq!(solver.satisfy(&e, ""), SatResult::Unsat);
        // A real query against a missing binary is inconclusive
        let e = parse_bool_expr("x*x == 49").unwrap();
        assert_eq!(solver.satisfy(&e, ""), SatResult::Unknown);
    }

    #[test]
    fn test_satisfy_with_z3() {
        let solver = Z3Solver::default();
        if !solver.is_available() {
            return;
        }
        // x < y && y < 10 yields a model for exactly x and y
        let e = parse_bool_expr("x < y && y < 10").unwrap();
        match solver.satisfy(&e, "two variable model") {
            SatResult::Sat(binding) => {
                assert_eq!(binding.keys().cloned().collect::<Vec<_>>(), vec!["x", "y"]);
                let x = binding["x"].as_int().unwrap();
                let y = binding["y"].as_int().unwrap();
                assert!(x < y && y < 10);
            }
            other => panic!("expected sat, got {:?}", other),
        }
        let e = parse_bool_expr("x*x == 2").unwrap();
        assert_eq!(solver.satisfy(&e, ""), SatResult::Unsat);
    }
}

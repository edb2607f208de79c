//! Corpus text parser for the term language
//!
//! Recursive descent over the grammar emitted by the printer, plus the extra
//! forms found in captured corpora: typed casts `int32(e)`, typed constants
//! `(int32)5`, transparent `fold(e)`, `rewrite(lhs, rhs[, pred])`, array loads
//! and opaque calls. Variables are integers unless they appear in a boolean
//! position, in which case every occurrence is retyped to bool.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;

use crate::error::SuperoptError;
use crate::ir::printer::LOAD_SUFFIX;
use crate::ir::{Expr, ExprKind, Type};

/// Parse error with location information
#[derive(Debug, Clone)]
pub struct ParseError {
    pub line_number: usize,
    pub column: Option<usize>,
    pub message: String,
    pub line_content: String,
}

impl ParseError {
    pub fn new(
        line_number: usize,
        message: impl Into<String>,
        line_content: impl Into<String>,
    ) -> Self {
        Self {
            line_number,
            column: None,
            message: message.into(),
            line_content: line_content.into(),
        }
    }

    pub fn with_column(mut self, column: usize) -> Self {
        self.column = Some(column);
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = self.column {
            write!(
                f,
                "line {}, column {}: {}\n  | {}\n  | {}^",
                self.line_number,
                col,
                self.message,
                self.line_content,
                " ".repeat(col.saturating_sub(1))
            )
        } else {
            write!(
                f,
                "line {}: {}\n  | {}",
                self.line_number, self.message, self.line_content
            )
        }
    }
}

impl std::error::Error for ParseError {}

/// Integer cast names. Casts to these are transparent.
const INT_TYPES: [&str; 8] = [
    "int8", "uint8", "int16", "uint16", "int32", "uint32", "int64", "uint64",
];

const BOOL_TYPES: [&str; 2] = ["uint1", "bool"];

const FLOAT_TYPES: [&str; 3] = ["float16", "float32", "float64"];

fn is_token_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'!' | b'.' | b'$' | b'_')
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    line_number: usize,
    var_types: HashMap<String, Type>,
    bool_vars: BTreeSet<String>,
}

type ParseResult<T> = Result<T, ParseError>;

impl<'a> Parser<'a> {
    fn new(src: &'a str, line_number: usize) -> Self {
        Self {
            src,
            pos: 0,
            line_number,
            var_types: HashMap::new(),
            bool_vars: BTreeSet::new(),
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.line_number, message, self.src).with_column(self.pos + 1)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn consume(&mut self, expected: &str) -> bool {
        self.skip_whitespace();
        if self.rest().starts_with(expected) {
            self.pos += expected.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &str) -> ParseResult<()> {
        if self.consume(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", expected)))
        }
    }

    fn consume_token(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(is_token_char) {
            self.pos += 1;
        }
        &self.src[start..self.pos]
    }

    fn consume_int(&mut self) -> ParseResult<i64> {
        let negative = self.consume("-");
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected digits"));
        }
        if self.peek() == Some(b'.') {
            return Err(self.error("floating-point literals are not supported"));
        }
        let digits = &self.src[start..self.pos];
        let text = if negative {
            format!("-{}", digits)
        } else {
            digits.to_string()
        };
        text.parse::<i64>()
            .map_err(|_| self.error(format!("integer literal out of range: {}", text)))
    }

    /// Retype an expression that appeared in a boolean position
    fn reparse_as_bool(&mut self, e: Expr) -> ParseResult<Expr> {
        if e.ty().is_bool() {
            return Ok(e);
        }
        match e.kind() {
            ExprKind::Var { name, .. } => {
                self.bool_vars.insert(name.clone());
                Ok(Expr::bool_var(name.clone()))
            }
            ExprKind::Call { name, args, .. }
                if (name == "likely" || name == "likely_if_innermost") && args.len() == 1 =>
            {
                let arg = self.reparse_as_bool(args[0].clone())?;
                Ok(Expr::call(name.clone(), vec![arg], Type::Bool))
            }
            ExprKind::Int(0) => Ok(Expr::bool(false)),
            ExprKind::Int(1) => Ok(Expr::bool(true)),
            _ => Err(self.error(format!("expected boolean expression, got {}", e))),
        }
    }

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let a = self.parse_and()?;
        if self.consume("||") {
            let b = self.parse_or()?;
            let a = self.reparse_as_bool(a)?;
            let b = self.reparse_as_bool(b)?;
            return Ok(Expr::or(a, b));
        }
        Ok(a)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let a = self.parse_comparison()?;
        if self.consume("&&") {
            let b = self.parse_and()?;
            let a = self.reparse_as_bool(a)?;
            let b = self.reparse_as_bool(b)?;
            return Ok(Expr::and(a, b));
        }
        Ok(a)
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let a = self.parse_additive()?;
        // Two-character operators first so `<=` is not read as `<`
        let ops: [(&str, fn(Expr, Expr) -> Expr); 6] = [
            ("<=", Expr::le),
            (">=", Expr::ge),
            ("==", Expr::eq),
            ("!=", Expr::ne),
            ("<", Expr::lt),
            (">", Expr::gt),
        ];
        for (symbol, make) in ops {
            if self.consume(symbol) {
                let mut a = a;
                let mut b = self.parse_comparison()?;
                if a.ty().is_bool() && !b.ty().is_bool() {
                    b = self.reparse_as_bool(b)?;
                } else if b.ty().is_bool() && !a.ty().is_bool() {
                    a = self.reparse_as_bool(a)?;
                }
                return Ok(make(a, b));
            }
        }
        Ok(a)
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        let mut a = self.parse_multiplicative()?;
        loop {
            if self.consume("+") {
                a = Expr::add(a, self.parse_multiplicative()?);
            } else if self.consume("-") {
                a = Expr::sub(a, self.parse_multiplicative()?);
            } else {
                return Ok(a);
            }
        }
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        let mut a = self.parse_primary()?;
        loop {
            if self.consume("*") {
                a = Expr::mul(a, self.parse_primary()?);
            } else if self.consume("/") {
                a = Expr::div(a, self.parse_primary()?);
            } else if self.consume("%") {
                a = Expr::modulo(a, self.parse_primary()?);
            } else {
                return Ok(a);
            }
        }
    }

    fn parse_args(&mut self) -> ParseResult<Vec<Expr>> {
        let mut args = Vec::new();
        loop {
            if self.consume(")") {
                return Ok(args);
            }
            if self.peek().is_none() {
                return Err(self.error("unterminated argument list"));
            }
            args.push(self.parse_expr()?);
            self.consume(",");
        }
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        self.skip_whitespace();

        // Typed casts
        for name in INT_TYPES {
            if self.consume(&format!("{}(", name)) {
                let a = self.parse_expr()?;
                self.expect(")")?;
                if name == "int32" || a.ty().is_bool() {
                    return Ok(a);
                }
                return Ok(Expr::call(name, vec![a], Type::Int));
            }
        }
        for name in BOOL_TYPES {
            if self.consume(&format!("{}(", name)) {
                let a = self.parse_expr()?;
                self.expect(")")?;
                return Ok(Expr::call(name, vec![a], Type::Bool));
            }
        }
        for name in FLOAT_TYPES {
            if self.rest().starts_with(&format!("{}(", name)) {
                return Err(self.error("floating-point casts are not supported"));
            }
        }

        if self.consume("(let ") {
            self.skip_whitespace();
            let name = self.consume_token().to_string();
            self.expect("=")?;
            let value = self.parse_expr()?;
            self.expect("in")?;
            self.var_types.insert(name.clone(), value.ty());
            let body = self.parse_expr()?;
            self.expect(")")?;
            return Ok(Expr::let_in(name, value, body));
        }
        if self.consume("min(") {
            let a = self.parse_expr()?;
            self.expect(",")?;
            let b = self.parse_expr()?;
            self.expect(")")?;
            return Ok(Expr::min(a, b));
        }
        if self.consume("max(") {
            let a = self.parse_expr()?;
            self.expect(",")?;
            let b = self.parse_expr()?;
            self.expect(")")?;
            return Ok(Expr::max(a, b));
        }
        if self.consume("select(") {
            let c = self.parse_expr()?;
            let c = self.reparse_as_bool(c)?;
            self.expect(",")?;
            let mut t = self.parse_expr()?;
            self.expect(",")?;
            let mut f = self.parse_expr()?;
            self.expect(")")?;
            if t.ty().is_bool() && !f.ty().is_bool() {
                f = self.reparse_as_bool(f)?;
            } else if !t.ty().is_bool() && f.ty().is_bool() {
                t = self.reparse_as_bool(t)?;
            }
            return Ok(Expr::select(c, t, f));
        }
        if self.consume("fold(") {
            let e = self.parse_expr()?;
            self.expect(")")?;
            return Ok(e);
        }
        if self.consume("rewrite(") {
            let mut lhs = self.parse_expr()?;
            self.expect(",")?;
            let mut rhs = self.parse_expr()?;
            if lhs.ty().is_bool() {
                rhs = self.reparse_as_bool(rhs)?;
            }
            if rhs.ty().is_bool() {
                lhs = self.reparse_as_bool(lhs)?;
            }
            let mut predicate = Expr::bool(true);
            if self.consume(",") {
                let p = self.parse_expr()?;
                predicate = self.reparse_as_bool(p)?;
            }
            self.expect(")")?;
            return Ok(Expr::call(REWRITE, vec![lhs, rhs, predicate], Type::Bool));
        }
        if self.consume("!") {
            let e = self.parse_primary()?;
            let e = self.reparse_as_bool(e)?;
            return Ok(Expr::not(e));
        }

        // A type annotation for the token that follows
        let mut expected_type = None;
        for name in INT_TYPES {
            if self.consume(&format!("({})", name)) {
                expected_type = Some(Type::Int);
            }
        }
        for name in BOOL_TYPES {
            if self.consume(&format!("({})", name)) {
                expected_type = Some(Type::Bool);
            }
        }

        if self.consume("(") {
            let e = self.parse_expr()?;
            self.expect(")")?;
            return Ok(e);
        }

        self.skip_whitespace();
        match self.peek() {
            Some(c) if c.is_ascii_digit() || c == b'-' => {
                let v = self.consume_int()?;
                if expected_type == Some(Type::Bool) {
                    return self.reparse_as_bool(Expr::int(v));
                }
                return Ok(Expr::int(v));
            }
            _ => {}
        }
        if self.consume_keyword("true") {
            return Ok(Expr::bool(true));
        }
        if self.consume_keyword("false") {
            return Ok(Expr::bool(false));
        }

        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || matches!(c, b'$' | b'_' | b'.') => {
                let name = self.consume_token().to_string();
                if self.consume("[") {
                    let index = self.parse_expr()?;
                    self.expect("]")?;
                    let ty = expected_type.unwrap_or(Type::Int);
                    return Ok(Expr::call(format!("{}{}", name, LOAD_SUFFIX), vec![index], ty));
                }
                if self.rest().starts_with('(') {
                    self.pos += 1;
                    let args = self.parse_args()?;
                    let ty = match (name.as_str(), args.first()) {
                        ("likely" | "likely_if_innermost", Some(a)) => a.ty(),
                        _ => expected_type.unwrap_or(Type::Int),
                    };
                    return Ok(Expr::call(name, args, ty));
                }
                let ty = self
                    .var_types
                    .get(&name)
                    .copied()
                    .or(expected_type)
                    .unwrap_or(Type::Int);
                Ok(Expr::typed_var(name, ty))
            }
            _ => Err(self.error("unexpected input")),
        }
    }

    /// Consume a keyword only when it is not the prefix of a longer token
    fn consume_keyword(&mut self, keyword: &str) -> bool {
        let rest = self.rest();
        if rest.starts_with(keyword)
            && !rest.as_bytes().get(keyword.len()).is_some_and(|c| is_token_char(*c))
        {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    /// Give every occurrence of a variable seen in a boolean position the bool type
    fn retype_bool_vars(&self, e: &Expr) -> Expr {
        if self.bool_vars.is_empty() {
            return e.clone();
        }
        match e.kind() {
            ExprKind::Var { name, ty: Type::Int } if self.bool_vars.contains(name) => {
                Expr::bool_var(name.clone())
            }
            _ => e.map_children(|c| self.retype_bool_vars(c)),
        }
    }

    fn finish(&mut self, e: Expr) -> ParseResult<Expr> {
        self.skip_whitespace();
        if self.pos != self.src.len() {
            return Err(self.error("trailing input"));
        }
        Ok(self.retype_bool_vars(&e))
    }
}

/// Name of the opaque call that wraps a parsed `rewrite(...)`
pub const REWRITE: &str = "rewrite";

/// Parse a single expression
pub fn parse_expr(text: &str) -> Result<Expr, ParseError> {
    parse_line(text, 1)
}

/// Parse a single expression that must be boolean
pub fn parse_bool_expr(text: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(text, 1);
    let e = parser.parse_expr()?;
    let e = parser.reparse_as_bool(e)?;
    parser.finish(e)
}

fn parse_line(text: &str, line_number: usize) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(text, line_number);
    let e = parser.parse_expr()?;
    parser.finish(e)
}

/// Parse corpus text: one expression per line, skipping blank and comment
/// lines, joining lines until parentheses balance.
pub fn parse_exprs(content: &str) -> Result<Vec<Expr>, ParseError> {
    let mut exprs = Vec::new();
    let mut lines = content.lines().enumerate();
    while let Some((index, line)) = lines.next() {
        let line_number = index + 1;
        if line.trim().is_empty() || line.starts_with(['#', '/', '*']) {
            continue;
        }
        let mut text = line.to_string();
        while text.matches('(').count() > text.matches(')').count() {
            match lines.next() {
                Some((_, next)) => text.push_str(next),
                None => {
                    return Err(ParseError::new(
                        line_number,
                        "unbalanced parentheses at end of input",
                        text,
                    ));
                }
            }
        }
        exprs.push(parse_line(&text, line_number)?);
    }
    Ok(exprs)
}

/// Parse a corpus file
pub fn parse_file(path: &Path) -> Result<Vec<Expr>, SuperoptError> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_exprs(&content)?)
}

/// A parsed `rewrite(lhs, rhs, predicate)` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteLine {
    pub lhs: Expr,
    pub rhs: Expr,
    pub predicate: Expr,
}

/// Unpack a `rewrite(...)` call produced by the parser
pub fn as_rewrite(e: &Expr) -> Option<RewriteLine> {
    match e.kind() {
        ExprKind::Call { name, args, .. } if name == REWRITE && args.len() == 3 => {
            Some(RewriteLine {
                lhs: args[0].clone(),
                rhs: args[1].clone(),
                predicate: args[2].clone(),
            })
        }
        _ => None,
    }
}

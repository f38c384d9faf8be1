//! Complex-valued expression grammar.
//!
//! Supports `+ - * /`, powers written `^` or `**` (right associative and
//! tighter than unary minus, so `-x^2` is `-(x^2)`), parentheses, the
//! constants `I`, `pi`, `E`, and an allow-list of one-argument functions.
//! Identifiers other than those resolve against a caller-supplied list of
//! variable names; anything else is a syntax error. Parsing yields an
//! [`Expr`] tree that evaluates over `Complex64` slots.
//!
//! Runs of `+ -` or `* /` parse into one flat [`Expr::Chain`], and nesting
//! (parentheses, calls, signs, powers) is capped at [`MAX_EXPRESSION_DEPTH`],
//! so the tree stays shallow whatever the input length.

use num_complex::Complex64;
use num_traits::Zero;
use rayon::prelude::*;
use std::f64::consts::{E, PI};

use crate::error::{Error, Result};

/// Names with a fixed meaning in every expression.
pub const RESERVED_NAMES: &[&str] = &[
    "I", "pi", "E", "sin", "cos", "tan", "sinh", "cosh", "tanh", "exp", "log", "sqrt", "abs",
    "conj", "re", "im",
];

/// Deepest nesting of parentheses, calls, signs and powers the parser accepts.
pub const MAX_EXPRESSION_DEPTH: usize = 64;

// ── AST ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Complex64),
    /// Index into the variable list the expression was parsed against.
    Var(usize),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// Left-to-right run of same-precedence operators, e.g. `a - b + c`.
    Chain(Box<Expr>, Vec<(BinOp, Expr)>),
    /// Integer power with a literal exponent, evaluated by repeated squaring.
    PowInt(Box<Expr>, i32),
    Call(Func, Box<Expr>),
    /// Expanded polynomial in one variable, ascending coefficients.
    Polynomial { var: usize, coeffs: Vec<Complex64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinOp {
    fn apply(self, lhs: Complex64, rhs: Complex64) -> Complex64 {
        match self {
            BinOp::Add => lhs + rhs,
            BinOp::Sub => lhs - rhs,
            BinOp::Mul => lhs * rhs,
            BinOp::Div => lhs / rhs,
            BinOp::Pow => lhs.powc(rhs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Sin,
    Cos,
    Tan,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Log,
    Sqrt,
    Abs,
    Conj,
    Re,
    Im,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        let func = match name {
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "sinh" => Func::Sinh,
            "cosh" => Func::Cosh,
            "tanh" => Func::Tanh,
            "exp" => Func::Exp,
            "log" => Func::Log,
            "sqrt" => Func::Sqrt,
            "abs" => Func::Abs,
            "conj" => Func::Conj,
            "re" => Func::Re,
            "im" => Func::Im,
            _ => return None,
        };
        Some(func)
    }

    fn apply(self, z: Complex64) -> Complex64 {
        match self {
            Func::Sin => z.sin(),
            Func::Cos => z.cos(),
            Func::Tan => z.tan(),
            Func::Sinh => z.sinh(),
            Func::Cosh => z.cosh(),
            Func::Tanh => z.tanh(),
            Func::Exp => z.exp(),
            Func::Log => z.ln(),
            Func::Sqrt => z.sqrt(),
            Func::Abs => Complex64::new(z.norm(), 0.0),
            Func::Conj => z.conj(),
            Func::Re => Complex64::new(z.re, 0.0),
            Func::Im => Complex64::new(z.im, 0.0),
        }
    }
}

// ── Evaluation ─────────────────────────────────────────────────

impl Expr {
    /// Evaluate at one point. `vars[i]` is the value of variable slot `i`.
    pub fn eval(&self, vars: &[Complex64]) -> Complex64 {
        match self {
            Expr::Const(c) => *c,
            Expr::Var(i) => vars[*i],
            Expr::Neg(a) => -a.eval(vars),
            Expr::Binary(op, a, b) => op.apply(a.eval(vars), b.eval(vars)),
            Expr::Chain(first, rest) => {
                rest.iter().fold(first.eval(vars), |acc, (op, operand)| op.apply(acc, operand.eval(vars)))
            }
            Expr::PowInt(a, n) => a.eval(vars).powi(*n),
            Expr::Call(func, a) => func.apply(a.eval(vars)),
            Expr::Polynomial { var, coeffs } => {
                let x = vars[*var];
                coeffs.iter().rev().fold(Complex64::zero(), |acc, c| acc * x + c)
            }
        }
    }

    /// Evaluate over aligned columns, one column per variable slot.
    ///
    /// A constant expression is evaluated once and broadcast to `len`.
    pub fn eval_columns(&self, columns: &[&[Complex64]], len: usize) -> Vec<Complex64> {
        if let Some(c) = self.constant_value() {
            return vec![c; len];
        }
        (0..len)
            .into_par_iter()
            .map_init(
                || vec![Complex64::zero(); columns.len()],
                |row, j| {
                    for (slot, column) in row.iter_mut().zip(columns) {
                        *slot = column[j];
                    }
                    self.eval(row.as_slice())
                },
            )
            .collect()
    }

    pub fn references(&self, slot: usize) -> bool {
        match self {
            Expr::Const(_) => false,
            Expr::Var(i) => *i == slot,
            Expr::Neg(a) | Expr::PowInt(a, _) | Expr::Call(_, a) => a.references(slot),
            Expr::Binary(_, a, b) => a.references(slot) || b.references(slot),
            Expr::Chain(first, rest) => first.references(slot) || rest.iter().any(|(_, e)| e.references(slot)),
            Expr::Polynomial { var, .. } => *var == slot,
        }
    }

    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Const(_) => true,
            Expr::Var(_) | Expr::Polynomial { .. } => false,
            Expr::Neg(a) | Expr::PowInt(a, _) | Expr::Call(_, a) => a.is_constant(),
            Expr::Binary(_, a, b) => a.is_constant() && b.is_constant(),
            Expr::Chain(first, rest) => first.is_constant() && rest.iter().all(|(_, e)| e.is_constant()),
        }
    }

    pub fn constant_value(&self) -> Option<Complex64> {
        match self {
            Expr::Const(c) => Some(*c),
            _ => self.is_constant().then(|| self.eval(&[])),
        }
    }
}

// ── Tokenizer ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let start = i;
        let kind = match b {
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' if bytes.get(i + 1) == Some(&b'*') => {
                i += 1;
                TokenKind::Caret
            }
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'^' => TokenKind::Caret,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            _ if b.is_ascii_digit() || b == b'.' => {
                while i + 1 < bytes.len() {
                    let c = bytes[i + 1];
                    let exponent_sign = (c == b'+' || c == b'-') && matches!(bytes[i], b'e' | b'E');
                    if c.is_ascii_digit() || c == b'.' || c == b'e' || c == b'E' || exponent_sign {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text = &input[start..=i];
                let value = text.parse::<f64>().map_err(|_| {
                    Error::syntax(input, format!("invalid number '{}' at column {}", text, start + 1))
                })?;
                TokenKind::Num(value)
            }
            _ if b.is_ascii_alphabetic() || b == b'_' => {
                while i + 1 < bytes.len() && (bytes[i + 1].is_ascii_alphanumeric() || bytes[i + 1] == b'_') {
                    i += 1;
                }
                TokenKind::Ident(input[start..=i].to_string())
            }
            _ => {
                let ch = input[start..].chars().next().unwrap_or('?');
                return Err(Error::syntax(
                    input,
                    format!("unexpected character '{}' at column {}", ch, start + 1),
                ));
            }
        };
        tokens.push(Token { kind, offset: start });
        i += 1;
    }

    Ok(tokens)
}

// ── Parser ─────────────────────────────────────────────────────

/// Parse `input`, resolving identifiers against `variables` (slot order).
pub fn parse(input: &str, variables: &[&str]) -> Result<Expr> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(Error::syntax(input, "empty expression"));
    }
    let mut parser = Parser { input, tokens, pos: 0, depth: 0, variables };
    let expr = parser.parse_sum()?;
    if let Some(token) = parser.tokens.get(parser.pos) {
        return Err(parser.error_at(token.offset, format!("unexpected {:?} after expression", token.kind)));
    }
    Ok(expr)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    variables: &'a [&'a str],
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn error_at(&self, offset: usize, reason: String) -> Error {
        Error::syntax(self.input, format!("{} (column {})", reason, offset + 1))
    }

    fn parse_sum(&mut self) -> Result<Expr> {
        let first = self.parse_product()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => return Ok(chain(first, rest)),
            };
            self.advance();
            rest.push((op, self.parse_product()?));
        }
    }

    fn parse_product(&mut self) -> Result<Expr> {
        let first = self.parse_unary()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Some(TokenKind::Star) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                _ => return Ok(chain(first, rest)),
            };
            self.advance();
            rest.push((op, self.parse_unary()?));
        }
    }

    // every nesting path (parentheses, calls, signs, exponents) passes through here
    fn parse_unary(&mut self) -> Result<Expr> {
        if self.depth >= MAX_EXPRESSION_DEPTH {
            let offset = self.tokens.get(self.pos).map_or(self.input.len(), |t| t.offset);
            return Err(self.error_at(offset, format!("nesting deeper than {} levels", MAX_EXPRESSION_DEPTH)));
        }
        self.depth += 1;
        let result = self.parse_signed();
        self.depth -= 1;
        result
    }

    fn parse_signed(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(TokenKind::Minus) => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(match operand {
                    Expr::Const(c) => Expr::Const(-c),
                    other => Expr::Neg(Box::new(other)),
                })
            }
            Some(TokenKind::Plus) => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if matches!(self.peek(), Some(TokenKind::Caret)) {
            self.advance();
            // right operand may carry its own sign: x^-2
            let exponent = self.parse_unary()?;
            return Ok(power(base, exponent));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let end = self.input.len();
        match self.advance() {
            Some(Token { kind: TokenKind::Num(value), .. }) => Ok(Expr::Const(Complex64::new(value, 0.0))),
            Some(Token { kind: TokenKind::LParen, .. }) => {
                let inner = self.parse_sum()?;
                self.expect_rparen()?;
                Ok(inner)
            }
            Some(Token { kind: TokenKind::Ident(name), offset }) => self.parse_identifier(&name, offset),
            Some(Token { kind, offset }) => {
                Err(self.error_at(offset, format!("expected number, name or '(', got {:?}", kind)))
            }
            None => Err(self.error_at(end, "unexpected end of expression".to_string())),
        }
    }

    fn parse_identifier(&mut self, name: &str, offset: usize) -> Result<Expr> {
        if let Some(slot) = self.variables.iter().position(|v| *v == name) {
            return Ok(Expr::Var(slot));
        }
        match name {
            "I" => return Ok(Expr::Const(Complex64::i())),
            "pi" => return Ok(Expr::Const(Complex64::new(PI, 0.0))),
            "E" => return Ok(Expr::Const(Complex64::new(E, 0.0))),
            _ => {}
        }
        if let Some(func) = Func::from_name(name) {
            if !matches!(self.peek(), Some(TokenKind::LParen)) {
                return Err(self.error_at(offset, format!("function '{}' must be called", name)));
            }
            self.advance();
            let argument = self.parse_sum()?;
            self.expect_rparen()?;
            return Ok(match argument {
                Expr::Const(c) => Expr::Const(func.apply(c)),
                other => Expr::Call(func, Box::new(other)),
            });
        }
        Err(self.error_at(offset, format!("unknown name '{}'", name)))
    }

    fn expect_rparen(&mut self) -> Result<()> {
        let end = self.input.len();
        match self.advance() {
            Some(Token { kind: TokenKind::RParen, .. }) => Ok(()),
            Some(Token { kind, offset }) => Err(self.error_at(offset, format!("expected ')', got {:?}", kind))),
            None => Err(self.error_at(end, "missing ')'".to_string())),
        }
    }
}

fn as_const(expr: &Expr) -> Option<Complex64> {
    match expr {
        Expr::Const(c) => Some(*c),
        _ => None,
    }
}

/// Constant prefixes fold; once a non-constant operand appears the rest is
/// kept in order so evaluation matches a left-to-right reading.
fn chain(first: Expr, rest: Vec<(BinOp, Expr)>) -> Expr {
    let mut head = first;
    let mut tail = Vec::with_capacity(rest.len());
    for (op, operand) in rest {
        if tail.is_empty() {
            if let (Some(a), Some(b)) = (as_const(&head), as_const(&operand)) {
                head = Expr::Const(op.apply(a, b));
                continue;
            }
        }
        tail.push((op, operand));
    }
    if tail.is_empty() {
        head
    } else {
        Expr::Chain(Box::new(head), tail)
    }
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    match (as_const(&lhs), as_const(&rhs)) {
        (Some(a), Some(b)) => Expr::Const(op.apply(a, b)),
        _ => Expr::Binary(op, Box::new(lhs), Box::new(rhs)),
    }
}

fn power(base: Expr, exponent: Expr) -> Expr {
    if let Expr::Const(e) = exponent {
        let integral = e.im == 0.0 && e.re.fract() == 0.0 && e.re.abs() <= i32::MAX as f64;
        if integral {
            return match base {
                Expr::Const(b) => Expr::Const(b.powi(e.re as i32)),
                other => Expr::PowInt(Box::new(other), e.re as i32),
            };
        }
    }
    binary(BinOp::Pow, base, exponent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn eval(input: &str, names: &[&str], vals: &[Complex64]) -> Complex64 {
        parse(input, names).unwrap().eval(vals)
    }

    #[test]
    fn simple_arithmetic() {
        assert_eq!(eval("2 + 3 * 4", &[], &[]), c(14.0, 0.0));
        assert_eq!(eval("(2 + 3) * 4", &[], &[]), c(20.0, 0.0));
        assert_eq!(eval("8 / 4 / 2", &[], &[]), c(1.0, 0.0));
        assert_eq!(eval("1.5e1 - 5", &[], &[]), c(10.0, 0.0));
    }

    #[test]
    fn powers_are_right_associative_and_tighter_than_negation() {
        assert_eq!(eval("2^3^2", &[], &[]), c(512.0, 0.0));
        assert_eq!(eval("-2**2", &[], &[]), c(-4.0, 0.0));
        assert_eq!(eval("x^-1", &["x"], &[c(4.0, 0.0)]), c(0.25, 0.0));
    }

    #[test]
    fn imaginary_unit_and_constants() {
        assert_eq!(eval("I*I", &[], &[]), c(-1.0, 0.0));
        let z = eval("exp(I*pi)", &[], &[]);
        assert_abs_diff_eq!(z.re, -1.0, epsilon = 1e-15);
        assert_abs_diff_eq!(z.im, 0.0, epsilon = 1e-15);
        assert_abs_diff_eq!(eval("log(E)", &[], &[]).re, 1.0, epsilon = 1e-15);
    }

    #[test]
    fn variables_resolve_to_slots() {
        let expr = parse("t1*t2 + conj(t2)", &["t1", "t2"]).unwrap();
        assert!(expr.references(0) && expr.references(1));
        assert_eq!(expr.eval(&[c(0.0, 1.0), c(2.0, 3.0)]), c(-3.0, 2.0) + c(2.0, -3.0));

        let only_second = parse("t2^3", &["t1", "t2"]).unwrap();
        assert!(!only_second.references(0));
        assert!(matches!(only_second, Expr::PowInt(_, 3)));
    }

    #[test]
    fn constant_subtrees_fold() {
        let expr = parse("3*(1 + 2*I) - sqrt(4)", &[]).unwrap();
        assert_eq!(expr, Expr::Const(c(1.0, 6.0)));
    }

    #[test]
    fn complex_exponent_uses_principal_branch() {
        let z = eval("t^I", &["t"], &[c(E, 0.0)]);
        assert_abs_diff_eq!(z.re, 1.0f64.cos(), epsilon = 1e-12);
        assert_abs_diff_eq!(z.im, 1.0f64.sin(), epsilon = 1e-12);
    }

    #[test]
    fn columns_broadcast_constants() {
        let expr = parse("2*I", &["a"]).unwrap();
        let column = [c(1.0, 0.0); 3];
        assert_eq!(expr.eval_columns(&[&column], 3), vec![c(0.0, 2.0); 3]);

        let expr = parse("a + 1", &["a"]).unwrap();
        let column = [c(1.0, 0.0), c(2.0, 0.0)];
        assert_eq!(expr.eval_columns(&[&column], 2), vec![c(2.0, 0.0), c(3.0, 0.0)]);
    }

    #[test]
    fn long_sums_stay_flat() {
        let input = format!("t1{}", "+t1".repeat(20_000));
        let expr = parse(&input, &["t1"]).unwrap();
        match &expr {
            Expr::Chain(_, rest) => assert_eq!(rest.len(), 20_000),
            other => panic!("expected a chain, got {:?}", other),
        }
        assert_eq!(expr.eval(&[c(1.0, 1.0)]), c(20_001.0, 20_001.0));

        let input = format!("2{}", "*t1/t1".repeat(10_000));
        assert_eq!(eval(&input, &["t1"], &[c(3.0, 0.0)]), c(2.0, 0.0));
    }

    #[test]
    fn mixed_chain_keeps_left_to_right_order() {
        assert_eq!(eval("x - 2 + 5", &["x"], &[c(1.0, 0.0)]), c(4.0, 0.0));
        assert_eq!(eval("x / 2 * 4", &["x"], &[c(3.0, 0.0)]), c(6.0, 0.0));
        assert_eq!(eval("1 + 2 - x - 1", &["x"], &[c(1.0, 0.0)]), c(1.0, 0.0));
    }

    #[test]
    fn deep_nesting_is_a_syntax_error() {
        let too_deep = [
            format!("{}t1{}", "(".repeat(20_000), ")".repeat(20_000)),
            format!("{}t1", "-".repeat(20_000)),
            format!("t1{}", "^t1".repeat(20_000)),
            format!("{}t1{}", "sin(".repeat(20_000), ")".repeat(20_000)),
        ];
        for input in &too_deep {
            match parse(input, &["t1"]) {
                Err(Error::ExpressionSyntax { reason, .. }) => assert!(reason.contains("nesting"), "{}", reason),
                other => panic!("deep input parsed to {:?}", other.map(|_| ())),
            }
        }

        let nested = MAX_EXPRESSION_DEPTH / 2;
        let fine = format!("{}t1{}", "(".repeat(nested), ")".repeat(nested));
        assert_eq!(eval(&fine, &["t1"], &[c(2.0, 0.0)]), c(2.0, 0.0));
    }

    #[test]
    fn syntax_errors_name_the_input() {
        for bad in ["", "1 +", "(1 + 2", "2 $ 3", "foo + 1", "sin", "1 2", "__import__(os)"] {
            match parse(bad, &["t1"]) {
                Err(Error::ExpressionSyntax { expr, .. }) => assert_eq!(expr, bad),
                other => panic!("{:?} parsed to {:?}", bad, other),
            }
        }
    }
}

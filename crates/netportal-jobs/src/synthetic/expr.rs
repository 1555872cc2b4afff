//! The compute expression language for synthetic columns.
//!
//! Expressions are made of number and string literals, arithmetic
//! (`+ - * / % **`, unary minus, parentheses), calls to a fixed set of
//! functions, and `{column}` references. Only declared columns may be
//! referenced; any other bare identifier is a parse error.
//!
//! ```text
//! expr  := term (('+' | '-') term)*
//! term  := unary (('*' | '/' | '%') unary)*
//! unary := '-' unary | power
//! power := atom ('**' unary)?
//! atom  := INT | FLOAT | STRING | '{' name '}' | IDENT '(' args ')' | '(' expr ')'
//! ```
//!
//! Evaluation is per row. `Null` operands produce `Null`, as do division
//! by zero and results that are not finite.

use std::fmt;

use chrono::Duration;
use logos::{Logos, Span};

use crate::frame::Frame;
use crate::value::Value;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum Token {
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r#""[^"]*""#, unquote)]
    #[regex(r"'[^']*'", unquote)]
    Str(String),

    #[regex(r"\{[^{}]*\}", |lex| { let s = lex.slice(); s[1..s.len() - 1].trim().to_string() })]
    Column(String),

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("**")]
    Pow,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
}

fn unquote(lex: &mut logos::Lexer<'_, Token>) -> String {
    let s = lex.slice();
    s[1..s.len() - 1].to_string()
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Ident(name) => write!(f, "{name}"),
            Self::Str(s) => write!(f, "'{s}'"),
            Self::Column(name) => write!(f, "{{{name}}}"),
            Self::LParen => f.write_str("("),
            Self::RParen => f.write_str(")"),
            Self::Comma => f.write_str(","),
            Self::Plus => f.write_str("+"),
            Self::Minus => f.write_str("-"),
            Self::Pow => f.write_str("**"),
            Self::Star => f.write_str("*"),
            Self::Slash => f.write_str("/"),
            Self::Percent => f.write_str("%"),
        }
    }
}

/// A binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `+`; also concatenates strings.
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`; always produces a float.
    Div,
    /// `%`
    Rem,
    /// `**`
    Pow,
}

/// A built-in function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    /// `abs(x)`
    Abs,
    /// `min(x, ...)`
    Min,
    /// `max(x, ...)`
    Max,
    /// `round(x)` or `round(x, digits)`
    Round,
    /// `floor(x)`
    Floor,
    /// `ceil(x)`
    Ceil,
    /// `sqrt(x)`
    Sqrt,
    /// `log(x)` or `log(x, base)`
    Log,
    /// `log10(x)`
    Log10,
    /// `exp(x)`
    Exp,
    /// `pow(x, y)`
    Pow,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "abs" => Self::Abs,
            "min" => Self::Min,
            "max" => Self::Max,
            "round" => Self::Round,
            "floor" => Self::Floor,
            "ceil" => Self::Ceil,
            "sqrt" => Self::Sqrt,
            "log" => Self::Log,
            "log10" => Self::Log10,
            "exp" => Self::Exp,
            "pow" => Self::Pow,
            _ => return None,
        })
    }

    fn arity(self) -> (usize, usize) {
        match self {
            Self::Abs | Self::Floor | Self::Ceil | Self::Sqrt | Self::Log10 | Self::Exp => (1, 1),
            Self::Round | Self::Log => (1, 2),
            Self::Pow => (2, 2),
            Self::Min | Self::Max => (1, usize::MAX),
        }
    }
}

/// A parsed compute expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal.
    Literal(Value),
    /// A `{column}` reference.
    Column(String),
    /// Unary minus.
    Neg(Box<Expr>),
    /// A binary operation.
    Binary {
        /// Operator.
        op: BinOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// A function call.
    Call {
        /// Function.
        func: Func,
        /// Arguments.
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Parses `source`, allowing references to `columns` only.
    ///
    /// # Errors
    ///
    /// Returns a message describing the first syntax error or invalid
    /// column reference.
    pub fn parse<S: AsRef<str>>(source: &str, columns: &[S]) -> Result<Self, String> {
        let mut tokens = Vec::new();
        for (token, span) in Token::lexer(source).spanned() {
            match token {
                Ok(token) => tokens.push((token, span)),
                Err(()) => {
                    return Err(format!(
                        "unexpected '{}' at offset {}",
                        source.get(span.clone()).unwrap_or("?"),
                        span.start
                    ))
                }
            }
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            columns: columns.iter().map(AsRef::as_ref).collect(),
        };
        let expr = parser.expr()?;
        match parser.next() {
            None => Ok(expr),
            Some((token, span)) => Err(format!(
                "unexpected '{token}' at offset {}",
                span.start
            )),
        }
    }

    /// Returns the referenced column names in order of first appearance.
    #[must_use]
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Literal(_) => {}
            Self::Column(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Self::Neg(inner) => inner.collect_columns(out),
            Self::Binary { lhs, rhs, .. } => {
                lhs.collect_columns(out);
                rhs.collect_columns(out);
            }
            Self::Call { args, .. } => {
                for arg in args {
                    arg.collect_columns(out);
                }
            }
        }
    }

    /// Evaluates the expression for every row of `frame`.
    #[must_use]
    pub fn evaluate(&self, frame: &Frame) -> Vec<Value> {
        (0..frame.len()).map(|row| self.eval_row(frame, row)).collect()
    }

    /// Evaluates the expression for one row; missing columns read as `Null`.
    #[must_use]
    pub fn eval_row(&self, frame: &Frame, row: usize) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Column(name) => frame.get(row, name).cloned().unwrap_or_default(),
            Self::Neg(inner) => negate(&inner.eval_row(frame, row)),
            Self::Binary { op, lhs, rhs } => {
                binary(*op, &lhs.eval_row(frame, row), &rhs.eval_row(frame, row))
            }
            Self::Call { func, args } => {
                let args: Vec<Value> = args.iter().map(|a| a.eval_row(frame, row)).collect();
                call(*func, &args)
            }
        }
    }
}

struct Parser<'a> {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    columns: Vec<&'a str>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<(Token, Span)> {
        let item = self.tokens.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn expect(&mut self, expected: &Token) -> Result<(), String> {
        match self.next() {
            Some((token, _)) if token == *expected => Ok(()),
            Some((token, span)) => Err(format!(
                "expected '{expected}' at offset {}, found '{token}'",
                span.start
            )),
            None => Err(format!("expected '{expected}' before end of expression")),
        }
    }

    fn expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = binary_expr(op, lhs, rhs);
        }
    }

    fn term(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = binary_expr(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, String> {
        let base = self.atom()?;
        if self.peek() == Some(&Token::Pow) {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(binary_expr(BinOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expr, String> {
        let Some((token, span)) = self.next() else {
            return Err("unexpected end of expression".into());
        };
        match token {
            Token::Int(n) => Ok(Expr::Literal(Value::Int(n))),
            Token::Float(x) => Ok(Expr::Literal(Value::Float(x))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::Column(name) => {
                if self.columns.contains(&name.as_str()) {
                    Ok(Expr::Column(name))
                } else {
                    Err(format!("Invalid column name '{name}'"))
                }
            }
            Token::Ident(name) => {
                if self.peek() != Some(&Token::LParen) {
                    return Err(format!(
                        "unexpected identifier '{name}' at offset {}, expected {{{name}}}",
                        span.start
                    ));
                }
                let func =
                    Func::lookup(&name).ok_or_else(|| format!("unknown function '{name}'"))?;
                self.pos += 1;
                let args = self.args()?;
                let (min, max) = func.arity();
                if args.len() < min || args.len() > max {
                    return Err(format!(
                        "function '{name}' does not take {} argument(s)",
                        args.len()
                    ));
                }
                Ok(Expr::Call { func, args })
            }
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            other => Err(format!("unexpected '{other}' at offset {}", span.start)),
        }
    }

    fn args(&mut self) -> Result<Vec<Expr>, String> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            match self.next() {
                Some((Token::Comma, _)) => {}
                Some((Token::RParen, _)) => return Ok(args),
                Some((token, span)) => {
                    return Err(format!(
                        "expected ',' or ')' at offset {}, found '{token}'",
                        span.start
                    ))
                }
                None => return Err("unclosed function call".into()),
            }
        }
    }
}

fn binary_expr(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn float(x: f64) -> Value {
    if x.is_finite() {
        Value::Float(x)
    } else {
        Value::Null
    }
}

fn negate(value: &Value) -> Value {
    match value {
        Value::Int(n) => n.checked_neg().map_or_else(|| float(-value_f64(value)), Value::Int),
        Value::Duration(d) => Value::Duration(-*d),
        other => other.as_f64().map_or(Value::Null, |x| float(-x)),
    }
}

fn value_f64(value: &Value) -> f64 {
    value.as_f64().unwrap_or(f64::NAN)
}

fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> Value {
    if lhs.is_null() || rhs.is_null() {
        return Value::Null;
    }
    match (op, lhs, rhs) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => return Value::Str(format!("{a}{b}")),
        (BinOp::Add, Value::Time(t), Value::Duration(d))
        | (BinOp::Add, Value::Duration(d), Value::Time(t)) => {
            return t.checked_add_signed(*d).map_or(Value::Null, Value::Time)
        }
        (BinOp::Sub, Value::Time(t), Value::Duration(d)) => {
            return t.checked_sub_signed(*d).map_or(Value::Null, Value::Time)
        }
        (BinOp::Sub, Value::Time(a), Value::Time(b)) => {
            return Value::Duration(a.signed_duration_since(*b))
        }
        (BinOp::Add, Value::Duration(a), Value::Duration(b)) => {
            return a.checked_add(b).map_or(Value::Null, Value::Duration)
        }
        (BinOp::Sub, Value::Duration(a), Value::Duration(b)) => {
            return a.checked_sub(b).map_or(Value::Null, Value::Duration)
        }
        (BinOp::Div, Value::Duration(a), Value::Duration(b)) => {
            return duration_ratio(*a, *b)
        }
        _ => {}
    }

    if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
        let exact = match op {
            BinOp::Add => a.checked_add(*b),
            BinOp::Sub => a.checked_sub(*b),
            BinOp::Mul => a.checked_mul(*b),
            BinOp::Rem if *b == 0 => return Value::Null,
            BinOp::Rem => a.checked_rem(*b),
            BinOp::Pow => u32::try_from(*b).ok().and_then(|e| a.checked_pow(e)),
            BinOp::Div => None,
        };
        if let Some(n) = exact {
            return Value::Int(n);
        }
    }

    let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
        return Value::Null;
    };
    match op {
        BinOp::Add => float(a + b),
        BinOp::Sub => float(a - b),
        BinOp::Mul => float(a * b),
        BinOp::Div | BinOp::Rem if b == 0.0 => Value::Null,
        BinOp::Div => float(a / b),
        BinOp::Rem => float(a % b),
        BinOp::Pow => float(a.powf(b)),
    }
}

#[allow(clippy::cast_precision_loss)]
fn duration_ratio(a: Duration, b: Duration) -> Value {
    let (Some(a), Some(b)) = (a.num_microseconds(), b.num_microseconds()) else {
        return float(a.num_milliseconds() as f64 / b.num_milliseconds() as f64);
    };
    if b == 0 {
        Value::Null
    } else {
        float(a as f64 / b as f64)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn call(func: Func, args: &[Value]) -> Value {
    if args.iter().any(Value::is_null) {
        return Value::Null;
    }
    match func {
        Func::Min | Func::Max => {
            let want = if func == Func::Min {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Greater
            };
            let mut best = &args[0];
            for arg in &args[1..] {
                match arg.compare(best) {
                    Some(ord) if ord == want => best = arg,
                    Some(_) => {}
                    None => return Value::Null,
                }
            }
            best.clone()
        }
        Func::Abs => match &args[0] {
            Value::Int(n) => n.checked_abs().map_or(Value::Null, Value::Int),
            other => other.as_f64().map_or(Value::Null, |x| float(x.abs())),
        },
        Func::Round => {
            let Some(x) = args[0].as_f64() else {
                return Value::Null;
            };
            let digits = args.get(1).and_then(Value::as_f64).unwrap_or(0.0) as i32;
            if digits <= 0 && matches!(args[0], Value::Int(_)) {
                return args[0].clone();
            }
            let scale = 10f64.powi(digits);
            float((x * scale).round() / scale)
        }
        Func::Floor => unary_f64(&args[0], f64::floor),
        Func::Ceil => unary_f64(&args[0], f64::ceil),
        Func::Sqrt => unary_f64(&args[0], f64::sqrt),
        Func::Log10 => unary_f64(&args[0], f64::log10),
        Func::Exp => unary_f64(&args[0], f64::exp),
        Func::Log => match args.get(1).map(Value::as_f64) {
            None => unary_f64(&args[0], f64::ln),
            Some(Some(base)) => unary_f64(&args[0], |x| x.log(base)),
            Some(None) => Value::Null,
        },
        Func::Pow => binary(BinOp::Pow, &args[0], &args[1]),
    }
}

#[allow(clippy::float_cmp)]
fn unary_f64(value: &Value, f: impl Fn(f64) -> f64) -> Value {
    let Some(x) = value.as_f64() else {
        return Value::Null;
    };
    let y = f(x);
    if matches!(value, Value::Int(_)) && y == x {
        value.clone()
    } else {
        float(y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::from_rows(
            &["bytes", "secs", "name"],
            vec![
                vec![Value::Int(120), Value::Int(60), Value::from("a")],
                vec![Value::Int(30), Value::Int(0), Value::from("b")],
                vec![Value::Null, Value::Int(10), Value::from("c")],
            ],
        )
        .unwrap()
    }

    const COLUMNS: &[&str] = &["bytes", "secs", "name"];

    fn eval(source: &str) -> Vec<Value> {
        Expr::parse(source, COLUMNS).unwrap().evaluate(&frame())
    }

    #[test]
    fn arithmetic_with_precedence() {
        assert_eq!(
            eval("{bytes} + 2 * 3"),
            vec![Value::Int(126), Value::Int(36), Value::Null]
        );
        assert_eq!(
            eval("({bytes} + 2) * 3"),
            vec![Value::Int(366), Value::Int(96), Value::Null]
        );
        assert_eq!(eval("2 ** 3 ** 2")[0], Value::Int(512));
        assert_eq!(eval("-2 ** 2")[0], Value::Int(-4));
    }

    #[test]
    fn division_is_float_and_zero_is_null() {
        assert_eq!(
            eval("{bytes} / {secs}"),
            vec![Value::Float(2.0), Value::Null, Value::Null]
        );
        assert_eq!(eval("{bytes} % 7")[0], Value::Int(1));
    }

    #[test]
    fn functions() {
        assert_eq!(eval("max({bytes}, 100)")[1], Value::Int(100));
        assert_eq!(eval("min({bytes}, 100, 50)")[0], Value::Int(50));
        assert_eq!(eval("round({bytes} / 7, 2)")[0], Value::Float(17.14));
        assert_eq!(eval("sqrt(16)")[0], Value::Float(4.0));
        assert_eq!(eval("floor(7)")[0], Value::Int(7));
        assert_eq!(eval("abs(-3.5)")[0], Value::Float(3.5));
        assert_eq!(eval("log(1)")[0], Value::Float(0.0));
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(eval("{name} + '-x'")[1], Value::from("b-x"));
    }

    #[test]
    fn undeclared_column_is_rejected() {
        let err = Expr::parse("{bytes} + {nope}", COLUMNS).unwrap_err();
        assert_eq!(err, "Invalid column name 'nope'");
    }

    #[test]
    fn bare_identifiers_are_rejected() {
        let err = Expr::parse("bytes * 2", COLUMNS).unwrap_err();
        assert!(err.contains("unexpected identifier 'bytes'"), "{err}");
        let err = Expr::parse("__import__('os')", COLUMNS).unwrap_err();
        assert!(err.contains("unknown function"), "{err}");
    }

    #[test]
    fn syntax_errors() {
        assert!(Expr::parse("", COLUMNS).is_err());
        assert!(Expr::parse("1 +", COLUMNS).is_err());
        assert!(Expr::parse("(1 + 2", COLUMNS).is_err());
        assert!(Expr::parse("1 2", COLUMNS).is_err());
        assert!(Expr::parse("1 ; 2", COLUMNS).is_err());
        assert!(Expr::parse("pow(1)", COLUMNS).is_err());
    }

    #[test]
    fn referenced_columns() {
        let expr = Expr::parse("{bytes} / {secs} + {bytes}", COLUMNS).unwrap();
        assert_eq!(expr.columns(), vec!["bytes", "secs"]);
    }
}

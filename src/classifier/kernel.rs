//! Kernel expression language
//!
//! A kernel is a binary tree: leaves are atomic kernels with their parameters,
//! inner nodes are `+` or `*`. Two textual surfaces parse into the same tree:
//!
//! - prefix JSON, as found in cycle configs:
//!   `["*", {"type": "C", "constant_value": 1.0}, {"type": "RBF", "length_scale": 1.0}]`
//! - infix text: `"1.0 * RBF(1.0) + White(0.01)"`
//!
//! Hyper-parameters are exposed in log space (`theta`) in a fixed depth-first
//! order, which is what the optimiser in the GP classifier works on.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{Error, Result};

/// Composable covariance function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum KernelExpr {
    /// `k(a, b) = c`
    Constant(f64),
    /// Squared exponential. One length scale (isotropic) or one per feature.
    Rbf(Vec<f64>),
    /// `k(a, a) = noise`, zero between distinct samples.
    White(f64),
    /// Sum of two kernels.
    Sum(Box<KernelExpr>, Box<KernelExpr>),
    /// Product of two kernels.
    Product(Box<KernelExpr>, Box<KernelExpr>),
}

impl Default for KernelExpr {
    /// `1.0 * RBF(1.0)`
    fn default() -> Self {
        Self::Constant(1.0) * Self::Rbf(vec![1.0])
    }
}

impl std::ops::Add for KernelExpr {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::Sum(Box::new(self), Box::new(rhs))
    }
}

impl std::ops::Mul for KernelExpr {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self::Product(Box::new(self), Box::new(rhs))
    }
}

impl KernelExpr {
    /// Covariance matrix of `x` with itself (white noise on the diagonal).
    #[must_use]
    pub fn gram(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        self.eval(x, x, true)
    }

    /// Cross-covariance between the rows of `a` and `b`.
    #[must_use]
    pub fn cross(&self, a: ArrayView2<'_, f64>, b: ArrayView2<'_, f64>) -> Array2<f64> {
        self.eval(a, b, false)
    }

    /// `k(x_i, x_i)` for every row.
    #[must_use]
    pub fn diag(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        let n = x.nrows();
        match self {
            Self::Constant(c) => Array1::from_elem(n, *c),
            Self::Rbf(_) => Array1::ones(n),
            Self::White(noise) => Array1::from_elem(n, *noise),
            Self::Sum(l, r) => l.diag(x) + r.diag(x),
            Self::Product(l, r) => l.diag(x) * r.diag(x),
        }
    }

    fn eval(&self, a: ArrayView2<'_, f64>, b: ArrayView2<'_, f64>, same: bool) -> Array2<f64> {
        let shape = (a.nrows(), b.nrows());
        match self {
            Self::Constant(c) => Array2::from_elem(shape, *c),
            Self::Rbf(scales) => Array2::from_shape_fn(shape, |(i, j)| {
                let d2: f64 = a
                    .row(i)
                    .iter()
                    .zip(b.row(j).iter())
                    .enumerate()
                    .map(|(k, (p, q))| {
                        let l = scales.get(k).or(scales.first()).copied().unwrap_or(1.0);
                        ((p - q) / l).powi(2)
                    })
                    .sum();
                (-0.5 * d2).exp()
            }),
            Self::White(noise) => {
                if same {
                    Array2::from_shape_fn(shape, |(i, j)| if i == j { *noise } else { 0.0 })
                } else {
                    Array2::zeros(shape)
                }
            }
            Self::Sum(l, r) => l.eval(a, b, same) + r.eval(a, b, same),
            Self::Product(l, r) => l.eval(a, b, same) * r.eval(a, b, same),
        }
    }

    /// Log-transformed hyper-parameters, depth-first.
    #[must_use]
    pub fn theta(&self) -> Vec<f64> {
        let mut out = Vec::new();
        self.collect_theta(&mut out);
        out
    }

    fn collect_theta(&self, out: &mut Vec<f64>) {
        match self {
            Self::Constant(c) => out.push(c.ln()),
            Self::Rbf(scales) => out.extend(scales.iter().map(|l| l.ln())),
            Self::White(noise) => out.push(noise.ln()),
            Self::Sum(l, r) | Self::Product(l, r) => {
                l.collect_theta(out);
                r.collect_theta(out);
            }
        }
    }

    /// Number of hyper-parameters.
    #[must_use]
    pub fn n_params(&self) -> usize {
        match self {
            Self::Constant(_) | Self::White(_) => 1,
            Self::Rbf(scales) => scales.len(),
            Self::Sum(l, r) | Self::Product(l, r) => l.n_params() + r.n_params(),
        }
    }

    /// Copy of this kernel with hyper-parameters taken from log-space `theta`.
    ///
    /// # Errors
    /// Returns `KernelSpec` if `theta` has the wrong length
    pub fn with_theta(&self, theta: &[f64]) -> Result<Self> {
        if theta.len() != self.n_params() {
            return Err(Error::KernelSpec(format!(
                "Expected {} hyper-parameters, got {}",
                self.n_params(),
                theta.len()
            )));
        }
        let mut cursor = theta.iter().map(|t| t.exp());
        Ok(self.rebuild(&mut cursor))
    }

    fn rebuild(&self, values: &mut impl Iterator<Item = f64>) -> Self {
        match self {
            Self::Constant(c) => Self::Constant(values.next().unwrap_or(*c)),
            Self::Rbf(scales) => Self::Rbf(
                scales
                    .iter()
                    .map(|l| values.next().unwrap_or(*l))
                    .collect(),
            ),
            Self::White(noise) => Self::White(values.next().unwrap_or(*noise)),
            Self::Sum(l, r) => {
                let left = l.rebuild(values);
                left + r.rebuild(values)
            }
            Self::Product(l, r) => {
                let left = l.rebuild(values);
                left * r.rebuild(values)
            }
        }
    }

    /// Check parameters against the feature dimension.
    ///
    /// # Errors
    /// Returns `KernelSpec` for non-positive parameters or a length-scale
    /// vector that matches neither 1 nor `dims`
    pub fn validate(&self, dims: usize) -> Result<()> {
        self.check(Some(dims))
    }

    /// Check that every parameter is positive and finite.
    ///
    /// # Errors
    /// Returns `KernelSpec` for non-positive parameters or an empty length-scale list
    pub fn validate_parameters(&self) -> Result<()> {
        self.check(None)
    }

    fn check(&self, dims: Option<usize>) -> Result<()> {
        match self {
            Self::Constant(v) | Self::White(v) => positive(*v, self.name()),
            Self::Rbf(scales) => {
                let mismatch = dims.is_some_and(|d| scales.len() != 1 && scales.len() != d);
                if scales.is_empty() || mismatch {
                    return Err(Error::KernelSpec(format!(
                        "RBF has {} length scales for {} features",
                        scales.len(),
                        dims.map_or_else(|| "any".to_string(), |d| d.to_string())
                    )));
                }
                scales.iter().try_for_each(|&l| positive(l, "RBF"))
            }
            Self::Sum(l, r) | Self::Product(l, r) => {
                l.check(dims)?;
                r.check(dims)
            }
        }
    }

    const fn name(&self) -> &'static str {
        match self {
            Self::Constant(_) => "C",
            Self::Rbf(_) => "RBF",
            Self::White(_) => "White",
            Self::Sum(..) => "+",
            Self::Product(..) => "*",
        }
    }

    /// Parse the prefix JSON surface. A JSON string is parsed as infix text.
    ///
    /// # Errors
    /// Returns `KernelSpec` for malformed trees or unknown kernel types
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::String(text) => text.parse(),
            Value::Array(items) => {
                let [op, lhs, rhs] = items.as_slice() else {
                    return Err(Error::KernelSpec(format!(
                        "Operator node needs [op, lhs, rhs], got {} items",
                        items.len()
                    )));
                };
                let left = Self::from_json(lhs)?;
                let right = Self::from_json(rhs)?;
                match op.as_str() {
                    Some("*") => Ok(left * right),
                    Some("+") => Ok(left + right),
                    _ => Err(Error::KernelSpec(format!("Unknown kernel operator {op}"))),
                }
            }
            Value::Object(fields) => {
                let kind = fields
                    .get("type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::KernelSpec("Kernel leaf lacks a \"type\"".to_string()))?;
                let param = |key: &str| fields.get(key).or_else(|| fields.get("value"));
                match canonical(kind)? {
                    Leaf::Constant => Ok(Self::Constant(number(param("constant_value"), 1.0)?)),
                    Leaf::White => Ok(Self::White(number(param("noise_level"), 1.0)?)),
                    Leaf::Rbf => match param("length_scale") {
                        Some(Value::Array(scales)) => scales
                            .iter()
                            .map(|s| number(Some(s), 1.0))
                            .collect::<Result<Vec<_>>>()
                            .map(Self::Rbf),
                        other => Ok(Self::Rbf(vec![number(other, 1.0)?])),
                    },
                }
            }
            Value::Number(_) => Ok(Self::Constant(number(Some(value), 1.0)?)),
            other => Err(Error::KernelSpec(format!("Unexpected kernel node {other}"))),
        }
    }

    /// Prefix JSON surface.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Constant(c) => json!({"type": "C", "constant_value": c}),
            Self::Rbf(scales) if scales.len() == 1 => json!({"type": "RBF", "length_scale": scales[0]}),
            Self::Rbf(scales) => json!({"type": "RBF", "length_scale": scales}),
            Self::White(noise) => json!({"type": "White", "noise_level": noise}),
            Self::Sum(l, r) => json!(["+", l.to_json(), r.to_json()]),
            Self::Product(l, r) => json!(["*", l.to_json(), r.to_json()]),
        }
    }
}

fn positive(value: f64, kind: &str) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::KernelSpec(format!(
            "{kind} parameter must be positive and finite, got {value}"
        )))
    }
}

fn number(value: Option<&Value>, default: f64) -> Result<f64> {
    match value {
        None => Ok(default),
        Some(v) => v
            .as_f64()
            .ok_or_else(|| Error::KernelSpec(format!("Expected a number, got {v}"))),
    }
}

#[derive(Debug, Clone, Copy)]
enum Leaf {
    Constant,
    Rbf,
    White,
}

fn canonical(name: &str) -> Result<Leaf> {
    match name {
        "C" | "Constant" | "ConstantKernel" => Ok(Leaf::Constant),
        "RBF" | "rbf" => Ok(Leaf::Rbf),
        "White" | "WhiteKernel" => Ok(Leaf::White),
        other => Err(Error::KernelSpec(format!("Unknown kernel type '{other}'"))),
    }
}

impl TryFrom<Value> for KernelExpr {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_json(&value)
    }
}

impl From<KernelExpr> for Value {
    fn from(kernel: KernelExpr) -> Self {
        kernel.to_json()
    }
}

impl fmt::Display for KernelExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(c) => write!(f, "C({c})"),
            Self::Rbf(scales) if scales.len() == 1 => write!(f, "RBF({})", scales[0]),
            Self::Rbf(scales) => {
                let parts: Vec<String> = scales.iter().map(ToString::to_string).collect();
                write!(f, "RBF([{}])", parts.join(", "))
            }
            Self::White(noise) => write!(f, "White({noise})"),
            Self::Sum(l, r) => write!(f, "{l} + {r}"),
            Self::Product(l, r) => {
                let side = |k: &Self| match k {
                    Self::Sum(..) => format!("({k})"),
                    _ => k.to_string(),
                };
                write!(f, "{} * {}", side(l), side(r))
            }
        }
    }
}

impl FromStr for KernelExpr {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let tokens = tokenize(text)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.sum()?;
        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(Error::KernelSpec(format!(
                "Unexpected '{token}' in kernel expression '{text}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Star,
    Open,
    Close,
    OpenList,
    CloseList,
    Comma,
    Equals,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Ident(s) => write!(f, "{s}"),
            Self::Plus => write!(f, "+"),
            Self::Star => write!(f, "*"),
            Self::Open => write!(f, "("),
            Self::Close => write!(f, ")"),
            Self::OpenList => write!(f, "["),
            Self::CloseList => write!(f, "]"),
            Self::Comma => write!(f, ","),
            Self::Equals => write!(f, "="),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '+' | '*' | '(' | ')' | '[' | ']' | ',' | '=' => {
                chars.next();
                tokens.push(match c {
                    '+' => Token::Plus,
                    '*' => Token::Star,
                    '(' => Token::Open,
                    ')' => Token::Close,
                    '[' => Token::OpenList,
                    ']' => Token::CloseList,
                    ',' => Token::Comma,
                    _ => Token::Equals,
                });
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut end = start;
                while let Some(&(i, d)) = chars.peek() {
                    let exponent_sign = (d == '-' || d == '+')
                        && text[start..i].ends_with(['e', 'E']);
                    if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                        end = i + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let literal = &text[start..end];
                let value = literal.parse::<f64>().map_err(|_| {
                    Error::KernelSpec(format!("Invalid number '{literal}' in kernel expression"))
                })?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = start;
                while let Some(&(i, d)) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        end = i + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(text[start..end].to_string()));
            }
            other => {
                return Err(Error::KernelSpec(format!(
                    "Unexpected character '{other}' in kernel expression"
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.advance() {
            Some(ref token) if token == expected => Ok(()),
            Some(token) => Err(Error::KernelSpec(format!("Expected '{expected}', found '{token}'"))),
            None => Err(Error::KernelSpec(format!(
                "Expected '{expected}', found end of expression"
            ))),
        }
    }

    fn sum(&mut self) -> Result<KernelExpr> {
        let mut expr = self.product()?;
        while self.peek() == Some(&Token::Plus) {
            self.pos += 1;
            expr = expr + self.product()?;
        }
        Ok(expr)
    }

    fn product(&mut self) -> Result<KernelExpr> {
        let mut expr = self.factor()?;
        while self.peek() == Some(&Token::Star) {
            self.pos += 1;
            expr = expr * self.factor()?;
        }
        Ok(expr)
    }

    fn factor(&mut self) -> Result<KernelExpr> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(KernelExpr::Constant(value)),
            Some(Token::Open) => {
                let expr = self.sum()?;
                self.expect(&Token::Close)?;
                Ok(expr)
            }
            Some(Token::Ident(name)) => {
                let leaf = canonical(&name)?;
                self.expect(&Token::Open)?;
                let args = self.arguments()?;
                self.expect(&Token::Close)?;
                match (leaf, args.as_slice()) {
                    (Leaf::Constant, []) => Ok(KernelExpr::Constant(1.0)),
                    (Leaf::Constant, [v]) => Ok(KernelExpr::Constant(*v)),
                    (Leaf::White, []) => Ok(KernelExpr::White(1.0)),
                    (Leaf::White, [v]) => Ok(KernelExpr::White(*v)),
                    (Leaf::Rbf, []) => Ok(KernelExpr::Rbf(vec![1.0])),
                    (Leaf::Rbf, scales) => Ok(KernelExpr::Rbf(scales.to_vec())),
                    (_, many) => Err(Error::KernelSpec(format!(
                        "{name} takes one parameter, got {}",
                        many.len()
                    ))),
                }
            }
            Some(token) => Err(Error::KernelSpec(format!("Unexpected '{token}' in kernel expression"))),
            None => Err(Error::KernelSpec("Kernel expression ended early".to_string())),
        }
    }

    /// `[name =] number | [name =] [n, n, ...]`, or nothing.
    fn arguments(&mut self) -> Result<Vec<f64>> {
        if self.peek() == Some(&Token::Close) {
            return Ok(Vec::new());
        }
        if matches!(self.peek(), Some(Token::Ident(_)))
            && self.tokens.get(self.pos + 1) == Some(&Token::Equals)
        {
            self.pos += 2;
        }
        match self.advance() {
            Some(Token::Number(v)) => Ok(vec![v]),
            Some(Token::OpenList) => {
                let mut values = Vec::new();
                loop {
                    match self.advance() {
                        Some(Token::Number(v)) => values.push(v),
                        Some(Token::CloseList) if values.is_empty() => break,
                        other => {
                            return Err(Error::KernelSpec(format!(
                                "Expected a number in length-scale list, found {other:?}"
                            )))
                        }
                    }
                    match self.advance() {
                        Some(Token::Comma) => {}
                        Some(Token::CloseList) => break,
                        other => {
                            return Err(Error::KernelSpec(format!(
                                "Expected ',' or ']' in length-scale list, found {other:?}"
                            )))
                        }
                    }
                }
                Ok(values)
            }
            other => Err(Error::KernelSpec(format!(
                "Expected a kernel parameter, found {other:?}"
            ))),
        }
    }
}

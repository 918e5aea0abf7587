//! Arithmetic over a fixed operator and function allowlist. Expressions are
//! parsed by hand; nothing is ever looked up by name outside the tables below.

use std::f64::consts;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use crate::planner::CALCULATOR;
use crate::tools::{Capability, CapabilityResult, ToolArguments};

const PREFIXES: &[&str] = &["calculate", "calc", "="];

const CONSTANTS: &[(&str, f64)] = &[("pi", consts::PI), ("e", consts::E)];

/// Nesting allowed for parentheses, calls, signs and exponents combined.
pub const MAX_NESTING: usize = 64;

const FUNCTIONS: &[&str] =
    &["abs", "round", "sqrt", "sin", "cos", "tan", "log", "log10", "ceil", "floor"];

#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("no expression provided")]
    Empty,
    #[error("unexpected character `{0}`")]
    UnexpectedChar(char),
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token `{0}`")]
    UnexpectedToken(String),
    #[error("unsupported name `{0}`")]
    UnknownName(String),
    #[error("`{0}` is a function, not a constant")]
    FunctionAsValue(String),
    #[error("`{0}` is a constant, not a function")]
    ConstantAsFunction(String),
    #[error("`{name}` expects {expected}, got {got}")]
    Arity { name: String, expected: &'static str, got: usize },
    #[error("division by zero")]
    DivisionByZero,
    #[error("math domain error")]
    Domain,
    #[error("result is not a finite number")]
    NotFinite,
    #[error("expression is nested too deeply (limit {0})")]
    TooDeep(usize),
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Caret,
    LParen,
    RParen,
    Comma,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Number(value) => value.to_string(),
            Self::Ident(name) => name.clone(),
            Self::Plus => "+".into(),
            Self::Minus => "-".into(),
            Self::Star => "*".into(),
            Self::DoubleStar => "**".into(),
            Self::Slash => "/".into(),
            Self::DoubleSlash => "//".into(),
            Self::Percent => "%".into(),
            Self::Caret => "^".into(),
            Self::LParen => "(".into(),
            Self::RParen => ")".into(),
            Self::Comma => ",".into(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, EvalError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let ch = chars[index];
        match ch {
            c if c.is_whitespace() => index += 1,
            '0'..='9' | '.' => {
                let start = index;
                while index < chars.len() && (chars[index].is_ascii_digit() || chars[index] == '.')
                {
                    index += 1;
                }
                // Scientific notation only when digits actually follow the exponent.
                if index < chars.len() && matches!(chars[index], 'e' | 'E') {
                    let mut probe = index + 1;
                    if probe < chars.len() && matches!(chars[probe], '+' | '-') {
                        probe += 1;
                    }
                    if probe < chars.len() && chars[probe].is_ascii_digit() {
                        index = probe;
                        while index < chars.len() && chars[index].is_ascii_digit() {
                            index += 1;
                        }
                    }
                }
                let literal: String = chars[start..index].iter().collect();
                let value =
                    literal.parse::<f64>().map_err(|_| EvalError::InvalidNumber(literal.clone()))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = index;
                while index < chars.len()
                    && (chars[index].is_ascii_alphanumeric() || chars[index] == '_')
                {
                    index += 1;
                }
                tokens.push(Token::Ident(chars[start..index].iter().collect()));
            }
            '*' if chars.get(index + 1) == Some(&'*') => {
                tokens.push(Token::DoubleStar);
                index += 2;
            }
            '/' if chars.get(index + 1) == Some(&'/') => {
                tokens.push(Token::DoubleSlash);
                index += 2;
            }
            _ => {
                let token = match ch {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '%' => Token::Percent,
                    '^' => Token::Caret,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    other => return Err(EvalError::UnexpectedChar(other)),
                };
                tokens.push(token);
                index += 1;
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn expect(&mut self, wanted: Token) -> Result<(), EvalError> {
        match self.next() {
            Some(token) if token == wanted => Ok(()),
            Some(token) => Err(EvalError::UnexpectedToken(token.describe())),
            None => Err(EvalError::UnexpectedEnd),
        }
    }

    // expression := term (("+" | "-") term)*
    fn expression(&mut self) -> Result<f64, EvalError> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.next();
                    value += self.term()?;
                }
                Some(Token::Minus) => {
                    self.next();
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    // term := unary (("*" | "/" | "//" | "%") unary)*
    fn term(&mut self) -> Result<f64, EvalError> {
        let mut value = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.next();
                    value *= self.unary()?;
                }
                Some(Token::Slash) => {
                    self.next();
                    let divisor = non_zero(self.unary()?)?;
                    value /= divisor;
                }
                Some(Token::DoubleSlash) => {
                    self.next();
                    let divisor = non_zero(self.unary()?)?;
                    value = (value / divisor).floor();
                }
                Some(Token::Percent) => {
                    self.next();
                    let divisor = non_zero(self.unary()?)?;
                    // Result takes the divisor's sign.
                    value -= divisor * (value / divisor).floor();
                }
                _ => return Ok(value),
            }
        }
    }

    // Every recursive path of the grammar passes through here.
    fn unary(&mut self) -> Result<f64, EvalError> {
        if self.depth >= MAX_NESTING {
            return Err(EvalError::TooDeep(MAX_NESTING));
        }
        self.depth += 1;
        let value = self.signed();
        self.depth -= 1;
        value
    }

    // unary := ("-" | "+") unary | power
    fn signed(&mut self) -> Result<f64, EvalError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.next();
                Ok(-self.unary()?)
            }
            Some(Token::Plus) => {
                self.next();
                self.unary()
            }
            _ => self.power(),
        }
    }

    // power := atom (("**" | "^") unary)?
    fn power(&mut self) -> Result<f64, EvalError> {
        let base = self.atom()?;
        match self.peek() {
            Some(Token::DoubleStar | Token::Caret) => {
                self.next();
                let exponent = self.unary()?;
                Ok(base.powf(exponent))
            }
            _ => Ok(base),
        }
    }

    fn atom(&mut self) -> Result<f64, EvalError> {
        match self.next() {
            Some(Token::Number(value)) => Ok(value),
            Some(Token::LParen) => {
                let value = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.next();
                    let arguments = self.arguments()?;
                    call(&name, &arguments)
                } else {
                    constant(&name)
                }
            }
            Some(token) => Err(EvalError::UnexpectedToken(token.describe())),
            None => Err(EvalError::UnexpectedEnd),
        }
    }

    fn arguments(&mut self) -> Result<Vec<f64>, EvalError> {
        let mut arguments = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.next();
            return Ok(arguments);
        }
        loop {
            arguments.push(self.expression()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(arguments),
                Some(token) => return Err(EvalError::UnexpectedToken(token.describe())),
                None => return Err(EvalError::UnexpectedEnd),
            }
        }
    }
}

fn non_zero(value: f64) -> Result<f64, EvalError> {
    if value == 0.0 {
        Err(EvalError::DivisionByZero)
    } else {
        Ok(value)
    }
}

fn constant(name: &str) -> Result<f64, EvalError> {
    if let Some((_, value)) = CONSTANTS.iter().find(|(constant, _)| *constant == name) {
        return Ok(*value);
    }
    if FUNCTIONS.contains(&name) {
        return Err(EvalError::FunctionAsValue(name.to_string()));
    }
    Err(EvalError::UnknownName(name.to_string()))
}

fn call(name: &str, arguments: &[f64]) -> Result<f64, EvalError> {
    let arity = |expected: &'static str| EvalError::Arity {
        name: name.to_string(),
        expected,
        got: arguments.len(),
    };

    match (name, arguments) {
        ("abs", [x]) => Ok(x.abs()),
        ("sqrt", [x]) if *x < 0.0 => Err(EvalError::Domain),
        ("sqrt", [x]) => Ok(x.sqrt()),
        ("sin", [x]) => Ok(x.sin()),
        ("cos", [x]) => Ok(x.cos()),
        ("tan", [x]) => Ok(x.tan()),
        ("ceil", [x]) => Ok(x.ceil()),
        ("floor", [x]) => Ok(x.floor()),
        ("log10", [x]) if *x <= 0.0 => Err(EvalError::Domain),
        ("log10", [x]) => Ok(x.log10()),
        ("log", [x]) if *x <= 0.0 => Err(EvalError::Domain),
        ("log", [x]) => Ok(x.ln()),
        ("log", [x, base]) if *x <= 0.0 || *base <= 0.0 || *base == 1.0 => Err(EvalError::Domain),
        ("log", [x, base]) => Ok(x.ln() / base.ln()),
        ("round", [x]) => Ok(round_half_even(*x)),
        ("round", [x, digits]) => {
            let scale = 10f64.powi(*digits as i32);
            Ok(round_half_even(x * scale) / scale)
        }
        ("abs" | "sqrt" | "sin" | "cos" | "tan" | "ceil" | "floor" | "log10", _) => {
            Err(arity("1 argument"))
        }
        ("log" | "round", _) => Err(arity("1 or 2 arguments")),
        _ if CONSTANTS.iter().any(|(constant, _)| *constant == name) => {
            Err(EvalError::ConstantAsFunction(name.to_string()))
        }
        _ => Err(EvalError::UnknownName(name.to_string())),
    }
}

fn round_half_even(value: f64) -> f64 {
    let rounded = value.round();
    if (value - value.trunc()).abs() == 0.5 {
        2.0 * (value / 2.0).round()
    } else {
        rounded
    }
}

/// Strips a leading `calculate`/`calc`/`=` and evaluates the remainder.
/// Returns the cleaned expression alongside its value.
pub fn evaluate(raw: &str) -> Result<(String, f64), EvalError> {
    let mut expression = raw.trim();
    let lowered = expression.to_ascii_lowercase();
    if let Some(prefix) = PREFIXES.iter().find(|prefix| lowered.starts_with(*prefix)) {
        expression = expression[prefix.len()..].trim();
    }
    if expression.is_empty() {
        return Err(EvalError::Empty);
    }

    let mut parser = Parser { tokens: tokenize(expression)?, position: 0, depth: 0 };
    let value = parser.expression()?;
    if let Some(token) = parser.peek() {
        return Err(EvalError::UnexpectedToken(token.describe()));
    }
    if !value.is_finite() {
        return Err(EvalError::NotFinite);
    }

    Ok((expression.to_string(), value))
}

/// Whole numbers render without a fractional part.
pub fn format_number(value: f64) -> String {
    let value = if value == 0.0 { 0.0 } else { value };
    if value.fract() == 0.0 && value.abs() < 1e21 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

pub struct Calculator {
    enabled: bool,
}

impl Calculator {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

#[async_trait]
impl Capability for Calculator {
    fn name(&self) -> &str {
        CALCULATOR
    }

    fn description(&self) -> &str {
        "Evaluate a mathematical expression (e.g. '2 + 2', 'sqrt(9)')."
    }

    fn is_available(&self) -> bool {
        self.enabled
    }

    async fn execute(&self, arguments: &ToolArguments) -> Result<CapabilityResult> {
        let raw = arguments.get("expression").and_then(|value| value.as_str()).unwrap_or_default();

        Ok(match evaluate(raw) {
            Ok((expression, value)) => {
                CapabilityResult::success(format!("{expression} = {}", format_number(value)))
                    .with_extra("value", json!(value))
            }
            Err(error) => CapabilityResult::failure(error.to_string()),
        })
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Safe boolean-condition evaluator used to gate routing and delivery.
//!
//! The grammar is deliberately restricted: no loops, no assignment, no I/O,
//! and no reflective method dispatch. Dotted identifiers resolve against the
//! event payload first and the correlation context second; unresolved paths
//! yield `none` rather than erroring. The only callable functions are a fixed
//! allowlist of pure predicates (`startswith`, `endswith`, `contains`,
//! `length`).
//!
//! Grammar, descending precedence:
//!
//! ```text
//! or-expr    := and-expr ('or' and-expr)*
//! and-expr   := not-expr ('and' not-expr)*
//! not-expr   := 'not'? comparison
//! comparison := primary (cmp-op primary)?
//! cmp-op     := '==' | '!=' | '<' | '<=' | '>' | '>=' | 'in' | 'not' 'in'
//! primary    := literal | path | path '(' literal (',' literal)* ')'
//!             | '(' or-expr ')' | '[' primary (',' primary)* ']'
//! literal    := number | string | 'true' | 'false' | 'none'
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::domain::event::EventData;

/// Verdict applied when a condition cannot be parsed or evaluated.
///
/// The observed production behavior is fail-open (a malformed condition never
/// silently blocks routing); fail-closed is available for deployments that
/// prefer to quarantine bad rules instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionPolicy {
    #[default]
    FailOpen,
    FailClosed,
}

impl ConditionPolicy {
    pub fn verdict(self) -> bool {
        matches!(self, ConditionPolicy::FailOpen)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConditionError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),

    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unexpected token {0} in expression")]
    UnexpectedToken(String),

    #[error("trailing tokens after expression: {0}")]
    TrailingTokens(String),

    #[error("unknown function '{0}' (allowed: startswith, endswith, contains, length)")]
    UnknownFunction(String),

    #[error("empty condition expression")]
    Empty,
}

// ── Tokenizer ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    None,
    And,
    Or,
    Not,
    In,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("identifier '{s}'"),
            Token::Number(n) => format!("number {n}"),
            Token::Str(s) => format!("string '{s}'"),
            Token::True => "'true'".into(),
            Token::False => "'false'".into(),
            Token::None => "'none'".into(),
            Token::And => "'and'".into(),
            Token::Or => "'or'".into(),
            Token::Not => "'not'".into(),
            Token::In => "'in'".into(),
            Token::Eq => "'=='".into(),
            Token::Ne => "'!='".into(),
            Token::Lt => "'<'".into(),
            Token::Le => "'<='".into(),
            Token::Gt => "'>'".into(),
            Token::Ge => "'>='".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::LBracket => "'['".into(),
            Token::RBracket => "']'".into(),
            Token::Comma => "','".into(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ConditionError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            // Multi-character operators are matched before anything shorter.
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = ch;
                let start = i;
                i += 1;
                let mut s = String::new();
                loop {
                    match chars.get(i) {
                        Some(&c) if c == quote => {
                            i += 1;
                            break;
                        }
                        Some(&c) => {
                            s.push(c);
                            i += 1;
                        }
                        None => return Err(ConditionError::UnterminatedString(start)),
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || (c == '-' && matches!(chars.get(i + 1), Some(d) if d.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while matches!(chars.get(i), Some(d) if d.is_ascii_digit() || *d == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| ConditionError::InvalidNumber(text.clone()))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while matches!(chars.get(i), Some(d) if d.is_ascii_alphanumeric() || *d == '_' || *d == '.') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                // Keywords and word operators are recognized after the scan so
                // 'in'/'not'/'and'/'or' are never swallowed as identifiers.
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "true" => Token::True,
                    "false" => Token::False,
                    "none" | "null" => Token::None,
                    _ => Token::Ident(word),
                });
            }
            _ => return Err(ConditionError::UnexpectedChar { ch, offset: i }),
        }
    }

    Ok(tokens)
}

// ── AST & parser ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Call {
        path: Vec<String>,
        func: Predicate,
        args: Vec<Value>,
    },
    List(Vec<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        lhs: Box<Expr>,
        op: CmpOp,
        rhs: Box<Expr>,
    },
}

/// The fixed allowlist of safe predicate functions. Anything else is a
/// syntax error; there is no dispatch by name reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Predicate {
    StartsWith,
    EndsWith,
    Contains,
    Length,
}

impl Predicate {
    fn resolve(name: &str) -> Option<Self> {
        match name {
            "startswith" => Some(Predicate::StartsWith),
            "endswith" => Some(Predicate::EndsWith),
            "contains" => Some(Predicate::Contains),
            "length" => Some(Predicate::Length),
            _ => None,
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ConditionError> {
        match self.next() {
            Some(token) if &token == expected => Ok(()),
            Some(token) => Err(ConditionError::UnexpectedToken(token.describe())),
            None => Err(ConditionError::UnexpectedEnd),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut expr = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let rhs = self.parse_and()?;
            expr = Expr::Or(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut expr = self.parse_not()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let rhs = self.parse_not()?;
            expr = Expr::And(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_not(&mut self) -> Result<Expr, ConditionError> {
        // 'not in' belongs to the comparison below, so only consume 'not'
        // here when it prefixes a whole comparison.
        if self.peek() == Some(&Token::Not) {
            self.next();
            let inner = self.parse_comparison()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ConditionError> {
        let lhs = self.parse_primary()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(CmpOp::Eq),
            Some(Token::Ne) => Some(CmpOp::Ne),
            Some(Token::Lt) => Some(CmpOp::Lt),
            Some(Token::Le) => Some(CmpOp::Le),
            Some(Token::Gt) => Some(CmpOp::Gt),
            Some(Token::Ge) => Some(CmpOp::Ge),
            Some(Token::In) => Some(CmpOp::In),
            Some(Token::Not) if self.tokens.get(self.pos + 1) == Some(&Token::In) => {
                self.next();
                Some(CmpOp::NotIn)
            }
            _ => None,
        };
        match op {
            Some(op) => {
                self.next();
                let rhs = self.parse_primary()?;
                Ok(Expr::Compare {
                    lhs: Box::new(lhs),
                    op,
                    rhs: Box::new(rhs),
                })
            }
            None => Ok(lhs),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Literal(number_value(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::None) => Ok(Expr::Literal(Value::Null)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() == Some(&Token::RBracket) {
                    self.next();
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.parse_primary()?);
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::RBracket) => break,
                        Some(token) => {
                            return Err(ConditionError::UnexpectedToken(token.describe()))
                        }
                        None => return Err(ConditionError::UnexpectedEnd),
                    }
                }
                Ok(Expr::List(items))
            }
            Some(Token::Ident(word)) => {
                let path: Vec<String> = word.split('.').map(str::to_string).collect();
                if self.peek() == Some(&Token::LParen) {
                    self.next();
                    self.parse_call(path)
                } else {
                    Ok(Expr::Path(path))
                }
            }
            Some(token) => Err(ConditionError::UnexpectedToken(token.describe())),
            None => Err(ConditionError::UnexpectedEnd),
        }
    }

    fn parse_call(&mut self, mut path: Vec<String>) -> Result<Expr, ConditionError> {
        let func_name = path.pop().unwrap_or_default();
        let func = Predicate::resolve(&func_name)
            .ok_or_else(|| ConditionError::UnknownFunction(func_name.clone()))?;
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.next();
        } else {
            loop {
                match self.next() {
                    Some(Token::Number(n)) => args.push(number_value(n)),
                    Some(Token::Str(s)) => args.push(Value::String(s)),
                    Some(Token::True) => args.push(Value::Bool(true)),
                    Some(Token::False) => args.push(Value::Bool(false)),
                    Some(Token::None) => args.push(Value::Null),
                    Some(token) => return Err(ConditionError::UnexpectedToken(token.describe())),
                    None => return Err(ConditionError::UnexpectedEnd),
                }
                match self.next() {
                    Some(Token::Comma) => continue,
                    Some(Token::RParen) => break,
                    Some(token) => return Err(ConditionError::UnexpectedToken(token.describe())),
                    None => return Err(ConditionError::UnexpectedEnd),
                }
            }
        }
        Ok(Expr::Call { path, func, args })
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

fn parse(input: &str) -> Result<Expr, ConditionError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ConditionError::Empty);
    }
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_or()?;
    if let Some(extra) = parser.peek() {
        return Err(ConditionError::TrailingTokens(extra.describe()));
    }
    Ok(expr)
}

// ── Evaluation ────────────────────────────────────────────────────────────

fn resolve_path(path: &[String], data: &EventData, context: &EventData) -> Value {
    resolve_in(path, data).or_else(|| resolve_in(path, context)).unwrap_or(Value::Null)
}

fn resolve_in(path: &[String], root: &EventData) -> Option<Value> {
    let mut current = root.get(path.first()?)?;
    for segment in &path[1..] {
        current = current.as_object()?.get(segment)?;
    }
    Some(current.clone())
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    // Numbers compare numerically so `1 == 1.0` holds across int/float reprs.
    if let (Some(a), Some(b)) = (as_f64(lhs), as_f64(rhs)) {
        return a == b;
    }
    lhs == rhs
}

fn compare_order(lhs: &Value, op: CmpOp, rhs: &Value) -> bool {
    if let (Some(a), Some(b)) = (as_f64(lhs), as_f64(rhs)) {
        return match op {
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
            _ => false,
        };
    }
    if let (Value::String(a), Value::String(b)) = (lhs, rhs) {
        return match op {
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
            _ => false,
        };
    }
    // Incomparable types behave like absent values, not errors.
    false
}

fn value_in(needle: &Value, haystack: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| values_equal(needle, item)),
        Value::String(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
        Value::Object(map) => needle.as_str().map(|n| map.contains_key(n)).unwrap_or(false),
        _ => false,
    }
}

fn apply_predicate(func: Predicate, value: &Value, args: &[Value]) -> Value {
    match func {
        Predicate::StartsWith => {
            let result = match (value.as_str(), args.first().and_then(Value::as_str)) {
                (Some(s), Some(prefix)) => s.starts_with(prefix),
                _ => false,
            };
            Value::Bool(result)
        }
        Predicate::EndsWith => {
            let result = match (value.as_str(), args.first().and_then(Value::as_str)) {
                (Some(s), Some(suffix)) => s.ends_with(suffix),
                _ => false,
            };
            Value::Bool(result)
        }
        Predicate::Contains => {
            let result = args
                .first()
                .map(|needle| value_in(needle, value))
                .unwrap_or(false);
            Value::Bool(result)
        }
        Predicate::Length => match value {
            Value::String(s) => Value::from(s.chars().count()),
            Value::Array(items) => Value::from(items.len()),
            Value::Object(map) => Value::from(map.len()),
            _ => Value::Null,
        },
    }
}

fn eval(expr: &Expr, data: &EventData, context: &EventData) -> Value {
    match expr {
        Expr::Literal(value) => value.clone(),
        Expr::Path(path) => resolve_path(path, data, context),
        Expr::Call { path, func, args } => {
            let value = if path.is_empty() {
                Value::Null
            } else {
                resolve_path(path, data, context)
            };
            apply_predicate(*func, &value, args)
        }
        Expr::List(items) => {
            Value::Array(items.iter().map(|item| eval(item, data, context)).collect())
        }
        Expr::Not(inner) => Value::Bool(!truthy(&eval(inner, data, context))),
        Expr::And(lhs, rhs) => {
            let left = eval(lhs, data, context);
            if !truthy(&left) {
                return Value::Bool(false);
            }
            Value::Bool(truthy(&eval(rhs, data, context)))
        }
        Expr::Or(lhs, rhs) => {
            let left = eval(lhs, data, context);
            if truthy(&left) {
                return Value::Bool(true);
            }
            Value::Bool(truthy(&eval(rhs, data, context)))
        }
        Expr::Compare { lhs, op, rhs } => {
            let left = eval(lhs, data, context);
            let right = eval(rhs, data, context);
            let result = match op {
                CmpOp::Eq => values_equal(&left, &right),
                CmpOp::Ne => !values_equal(&left, &right),
                CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
                    compare_order(&left, *op, &right)
                }
                CmpOp::In => value_in(&left, &right),
                CmpOp::NotIn => !value_in(&left, &right),
            };
            Value::Bool(result)
        }
    }
}

/// Evaluates a condition expression against an event's data and context.
///
/// Evaluation itself is total: unresolved identifiers read as `none`,
/// type-mismatched comparisons are false. Only a malformed expression
/// produces an error.
pub fn evaluate(
    expr: &str,
    data: &EventData,
    context: &EventData,
) -> Result<bool, ConditionError> {
    let parsed = parse(expr)?;
    Ok(truthy(&eval(&parsed, data, context)))
}

/// Evaluates a condition under the configured malformed-condition policy.
/// Never errors: a parse failure logs a warning and returns the policy
/// verdict.
pub fn evaluate_with_policy(
    expr: &str,
    data: &EventData,
    context: &EventData,
    policy: ConditionPolicy,
) -> bool {
    match evaluate(expr, data, context) {
        Ok(result) => result,
        Err(err) => {
            warn!(condition = expr, error = %err, verdict = policy.verdict(), "malformed condition");
            policy.verdict()
        }
    }
}

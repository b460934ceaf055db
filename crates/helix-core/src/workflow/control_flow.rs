//! Control flow support for workflows.
//!
//! Evaluates `condition` / `skipIf` expressions against the execution
//! context. Supported syntax:
//!
//! - literals: `true`, `false`, `null`, numbers, `'single'` or `"double"` quoted strings
//! - variables: `retries`, `variables.user.tier`
//! - step results: `steps.fetch.status`, `steps.fetch.success`, `steps.fetch.output.items`
//! - operators: `!`, `==`, `!=`, `<`, `<=`, `>`, `>=`, `&&`, `||`, parentheses
//!
//! A bare value is interpreted with JSON truthiness (`null`, `false`, `0`,
//! `""`, `[]` and `{}` are false).

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::context::ExecutionContext;
use super::definition::WorkflowStep;

/// Errors that can occur during control flow evaluation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlFlowError {
    /// The expression could not be parsed.
    #[error("Invalid expression '{expression}': {reason}")]
    InvalidExpression {
        /// Source text.
        expression: String,
        /// What went wrong.
        reason: String,
    },
}

/// Outcome of evaluating a step's guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepGate {
    /// Run the step.
    Run,
    /// Skip the step; the reason is logged and reported.
    Skip(String),
}

/// Evaluates `skipIf` then `condition` for a step.
///
/// Expressions that fail to parse never block a step: a broken `skipIf`
/// does not skip and a broken `condition` runs the step.
pub fn should_execute_step(step: &WorkflowStep, context: &ExecutionContext) -> StepGate {
    if let Some(skip_if) = &step.skip_if {
        match evaluate_expression(skip_if, context) {
            Ok(true) => {
                debug!(step_id = %step.id, condition = %skip_if, "skipIf evaluated to true");
                return StepGate::Skip(format!("skipIf: {skip_if}"));
            }
            Ok(false) => {}
            Err(e) => {
                warn!(step_id = %step.id, error = %e, "Could not evaluate skipIf, not skipping");
            }
        }
    }

    if let Some(condition) = &step.condition {
        match evaluate_expression(condition, context) {
            Ok(true) => {}
            Ok(false) => {
                debug!(step_id = %step.id, condition = %condition, "condition evaluated to false");
                return StepGate::Skip(format!("condition: {condition}"));
            }
            Err(e) => {
                warn!(step_id = %step.id, error = %e, "Could not evaluate condition, running step");
            }
        }
    }

    StepGate::Run
}

/// Evaluates an expression to a boolean.
pub fn evaluate_expression(
    expression: &str,
    context: &ExecutionContext,
) -> Result<bool, ControlFlowError> {
    let tokens = tokenize(expression).map_err(|reason| invalid(expression, reason))?;
    let mut parser = Parser { tokens: &tokens, pos: 0, context };
    let value = parser.parse_or().map_err(|reason| invalid(expression, reason))?;
    if parser.pos != tokens.len() {
        return Err(invalid(expression, format!("unexpected token {:?}", tokens[parser.pos])));
    }
    Ok(truthy(&value))
}

fn invalid(expression: &str, reason: String) -> ControlFlowError {
    ControlFlowError::InvalidExpression { expression: expression.to_string(), reason }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(String),
    Number(f64),
    Str(String),
    True,
    False,
    Null,
    Not,
    And,
    Or,
    Cmp(CmpOp),
    LParen,
    RParen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Eq));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' | '>' => {
                let inclusive = next == Some('=');
                let op = match (c, inclusive) {
                    ('<', false) => CmpOp::Lt,
                    ('<', true) => CmpOp::Le,
                    ('>', false) => CmpOp::Gt,
                    _ => CmpOp::Ge,
                };
                tokens.push(Token::Cmp(op));
                i += if inclusive { 2 } else { 1 };
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err("unterminated string literal".to_string());
                }
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text.parse::<f64>().map_err(|_| format!("bad number {text}"))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.' | '-' | '$'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Path(word),
                });
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }

    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    context: &'a ExecutionContext,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<Value, String> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Value::Bool(truthy(&left) || truthy(&right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Value, String> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Value::Bool(truthy(&left) && truthy(&right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Value, String> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let value = self.parse_unary()?;
            return Ok(Value::Bool(!truthy(&value)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Value, String> {
        let left = self.parse_primary()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.parse_primary()?;
            return Ok(Value::Bool(compare(&left, op, &right)));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Value, String> {
        match self.advance() {
            Some(Token::True) => Ok(Value::Bool(true)),
            Some(Token::False) => Ok(Value::Bool(false)),
            Some(Token::Null) => Ok(Value::Null),
            Some(Token::Number(n)) => Ok(serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)),
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::Path(path)) => Ok(resolve_path(&path, self.context)),
            Some(Token::LParen) => {
                let value = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            Some(token) => Err(format!("unexpected token {token:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return match op {
            CmpOp::Eq => (l - r).abs() < f64::EPSILON,
            CmpOp::Ne => (l - r).abs() >= f64::EPSILON,
            CmpOp::Lt => l < r,
            CmpOp::Le => l <= r,
            CmpOp::Gt => l > r,
            CmpOp::Ge => l >= r,
        };
    }
    match op {
        CmpOp::Eq => left == right,
        CmpOp::Ne => left != right,
        _ => match (left.as_str(), right.as_str()) {
            (Some(l), Some(r)) => match op {
                CmpOp::Lt => l < r,
                CmpOp::Le => l <= r,
                CmpOp::Gt => l > r,
                _ => l >= r,
            },
            _ => false,
        },
    }
}

/// JSON truthiness.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

pub(crate) fn resolve_path(path: &str, context: &ExecutionContext) -> Value {
    let mut segments = path.split('.');
    let Some(head) = segments.next() else {
        return Value::Null;
    };
    let rest: Vec<&str> = segments.collect();

    match head {
        "steps" => match rest.split_first() {
            Some((step_id, fields)) => resolve_step(step_id, fields, context),
            None => Value::Null,
        },
        "variables" => match rest.split_first() {
            Some((name, fields)) => {
                context.get_variable(name).map_or(Value::Null, |v| descend(v, fields))
            }
            None => Value::Null,
        },
        name => {
            if let Some(value) = context.get_variable(name) {
                descend(value, &rest)
            } else if context.get_step_result(name).is_some() {
                // `fetch.output.total` as shorthand for `steps.fetch.output.total`
                resolve_step(name, &rest, context)
            } else {
                Value::Null
            }
        }
    }
}

fn resolve_step(step_id: &str, fields: &[&str], context: &ExecutionContext) -> Value {
    let result = context.get_step_result(step_id);
    let Some((field, rest)) = fields.split_first() else {
        return result.map_or(Value::Null, |r| Value::String(r.status.as_str().to_string()));
    };
    match *field {
        "status" => Value::String(context.step_status(step_id).as_str().to_string()),
        "success" => Value::Bool(result.is_some_and(super::context::StepResult::is_success)),
        "error" => result.and_then(|r| r.error.clone()).map_or(Value::Null, Value::String),
        "attempts" => result.map_or(Value::Null, |r| Value::from(r.attempts)),
        "durationMs" => result.map_or(Value::Null, |r| Value::from(r.duration_ms)),
        "output" | "result" => {
            result.and_then(|r| r.output.as_ref()).map_or(Value::Null, |v| descend(v, rest))
        }
        _ => Value::Null,
    }
}

fn descend(value: &Value, fields: &[&str]) -> Value {
    let mut current = value;
    for field in fields {
        let next = match current {
            Value::Object(map) => map.get(*field),
            Value::Array(items) => field.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return Value::Null,
        }
    }
    current.clone()
}

//! Condition Expressions
//!
//! Boolean guards on steps and parallel branches, e.g.
//! `${amount} > 1000 && ${review.decision} == "approve"`.
//!
//! Precedence, lowest first: `||`, `&&`, unary `!`, then a single
//! comparison (`==`, `!=`, `>=`, `<=`, `>`, `<`). An expression without a
//! comparator is coerced to a boolean.
//!
//! Operands:
//! - `"text"` string literal, `true`/`false`, `null`, numbers
//! - `${name}` top-level key of the instance input
//! - `${stepId.field}` field of the output of the task opened by `stepId`
//! - anything else is a bare string
//!
//! `&&` and `||` are split textually, so they cannot appear inside string
//! literals of a compound expression.

use log::warn;
use serde_json::Value;
use thiserror::Error;

use crate::entity::Task;

/// Why an expression could not be evaluated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    #[error("empty expression")]
    Empty,

    #[error("operand '{0}' is not numeric")]
    NotNumeric(String),
}

/// Data an expression can reference.
#[derive(Debug, Clone, Copy)]
pub struct ConditionContext<'a> {
    input: &'a Value,
    tasks: &'a [Task],
}

impl<'a> ConditionContext<'a> {
    pub fn new(input: &'a Value, tasks: &'a [Task]) -> Self {
        Self { input, tasks }
    }

    /// Output of the task opened by `step_id`. With several (rollback,
    /// loops) the most recently completed one wins.
    fn step_output(&self, step_id: &str) -> Option<Value> {
        let task = self
            .tasks
            .iter()
            .filter(|t| t.task_key == step_id)
            .max_by_key(|t| (t.completed_at, t.created_at))?;

        match &task.output {
            Value::String(text) => serde_json::from_str(text).ok(),
            other => Some(other.clone()),
        }
    }

    fn lookup(&self, name: &str) -> Value {
        if let Some((step_id, field)) = name.split_once('.') {
            if let Some(output) = self.step_output(step_id) {
                return output.get(field).cloned().unwrap_or(Value::Null);
            }
        }
        self.input.get(name).cloned().unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Json(Value),
}

impl Operand {
    fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => n.as_f64().map(Self::Number).unwrap_or(Self::Null),
            Value::String(s) => Self::Str(s),
            other => Self::Json(other),
        }
    }

    fn resolve(token: &str, ctx: &ConditionContext<'_>) -> Self {
        let token = token.trim();

        if token.len() >= 2 && token.starts_with('"') && token.ends_with('"') {
            return Self::Str(token[1..token.len() - 1].to_string());
        }

        match token {
            "true" => return Self::Bool(true),
            "false" => return Self::Bool(false),
            "null" => return Self::Null,
            _ => {}
        }

        if let Some(n) = parse_number(token) {
            return Self::Number(n);
        }

        if let Some(name) = token.strip_prefix("${").and_then(|t| t.strip_suffix('}')) {
            return Self::from_value(ctx.lookup(name.trim()));
        }

        Self::Str(token.to_string())
    }

    /// String form used for equality.
    fn repr(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => n.to_string(),
            Self::Str(s) => s.clone(),
            Self::Json(v) => v.to_string(),
        }
    }

    fn as_number(&self) -> Result<f64, ConditionError> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Str(s) => parse_number(s.trim()).ok_or_else(|| ConditionError::NotNumeric(s.clone())),
            other => Err(ConditionError::NotNumeric(other.repr())),
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Str(s) => !(s.is_empty() || s == "false" || s == "0"),
            Self::Number(n) => *n != 0.0,
            Self::Json(_) => true,
        }
    }
}

/// Parses plain decimal numbers; rejects `inf`/`nan` spellings.
fn parse_number(token: &str) -> Option<f64> {
    let first = token.chars().next()?;
    if !(first.is_ascii_digit() || matches!(first, '-' | '+' | '.')) {
        return None;
    }
    token.parse::<f64>().ok().filter(|n| n.is_finite())
}

#[derive(Debug, Clone, Copy)]
enum Comparator {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

impl Comparator {
    /// Search order: two-character operators before their prefixes.
    const SEARCH_ORDER: [Comparator; 6] =
        [Self::Eq, Self::Ne, Self::Ge, Self::Le, Self::Gt, Self::Lt];

    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Lt => "<",
        }
    }

    fn apply(self, left: &Operand, right: &Operand) -> Result<bool, ConditionError> {
        match self {
            Self::Eq => Ok(left.repr() == right.repr()),
            Self::Ne => Ok(left.repr() != right.repr()),
            _ => {
                let (l, r) = (left.as_number()?, right.as_number()?);
                Ok(match self {
                    Self::Ge => l >= r,
                    Self::Le => l <= r,
                    Self::Gt => l > r,
                    _ => l < r,
                })
            }
        }
    }
}

/// Evaluates an expression.
pub fn evaluate(expression: &str, ctx: &ConditionContext<'_>) -> Result<bool, ConditionError> {
    let expr = expression.trim();
    if expr.is_empty() {
        return Err(ConditionError::Empty);
    }

    if expr.contains("||") {
        for part in expr.split("||") {
            if evaluate(part, ctx)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }

    if expr.contains("&&") {
        for part in expr.split("&&") {
            if !evaluate(part, ctx)? {
                return Ok(false);
            }
        }
        return Ok(true);
    }

    if let Some(rest) = expr.strip_prefix('!') {
        if !rest.starts_with('=') {
            return evaluate(rest, ctx).map(|b| !b);
        }
    }

    for comparator in Comparator::SEARCH_ORDER {
        let symbol = comparator.symbol();
        if let Some(idx) = expr.find(symbol) {
            let left = Operand::resolve(&expr[..idx], ctx);
            let right = Operand::resolve(&expr[idx + symbol.len()..], ctx);
            return comparator.apply(&left, &right);
        }
    }

    Ok(Operand::resolve(expr, ctx).truthy())
}

/// Evaluates an expression, treating any failure as `false`.
pub fn evaluate_or_false(expression: &str, ctx: &ConditionContext<'_>) -> bool {
    evaluate(expression, ctx).unwrap_or_else(|err| {
        warn!("Condition '{}' could not be evaluated ({}); treating as false", expression, err);
        false
    })
}

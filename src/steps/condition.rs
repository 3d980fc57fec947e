//! Condition Expressions
//!
//! `conditional` steps evaluate a JEXL expression against the step's scope:
//!
//! ```text
//! input.size > 5 && variables.region == 'eu'
//! outputs.compute.total >= 10 || env.FORCE == 'yes'
//! workflow.version == '1.0.0'
//! ```
//!
//! The scope is handed to the evaluator as a context object with the
//! namespaces `env`, `input`, `variables`, `workflow`, `step` and
//! `outputs`. Values are never pasted into the expression text, so a
//! condition must not contain `${...}` references.

use jexl_eval::error::EvaluationError;
use jexl_eval::Evaluator;
use serde_json::{json, Map, Number, Value};
use thiserror::Error;

use crate::workflow::substitution::{contains_expression, SubstitutionContext};

/// Longest accepted condition, in characters.
pub const MAX_CONDITION_LENGTH: usize = 1024;

/// Deepest accepted bracket nesting.
pub const MAX_CONDITION_DEPTH: usize = 32;

/// Why a condition could not be evaluated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConditionError {
    #[error("empty condition")]
    Empty,

    #[error("condition must reference values directly (e.g. input.name), not through '${{...}}'")]
    Interpolated,

    #[error("condition is {0} characters long, the limit is {max}", max = MAX_CONDITION_LENGTH)]
    TooLong(usize),

    #[error("condition nests brackets {0} levels deep, the limit is {max}", max = MAX_CONDITION_DEPTH)]
    TooDeep(usize),

    #[error("unterminated string in condition")]
    UnterminatedString,

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("evaluation failed: {0}")]
    Evaluation(String),

    #[error("condition must be a string or boolean, got {0}")]
    NotACondition(String),
}

fn evaluator() -> Evaluator<'static> {
    Evaluator::new()
        .with_transform("lower", |args: &[Value]| {
            let s = args.first().and_then(Value::as_str).unwrap_or("");
            Ok(json!(s.to_lowercase()))
        })
        .with_transform("upper", |args: &[Value]| {
            let s = args.first().and_then(Value::as_str).unwrap_or("");
            Ok(json!(s.to_uppercase()))
        })
        .with_transform("contains", |args: &[Value]| {
            let subject = args.first().and_then(Value::as_str).unwrap_or("");
            let search = args.get(1).and_then(Value::as_str).unwrap_or("");
            Ok(json!(subject.contains(search)))
        })
        .with_transform("startsWith", |args: &[Value]| {
            let subject = args.first().and_then(Value::as_str).unwrap_or("");
            let prefix = args.get(1).and_then(Value::as_str).unwrap_or("");
            Ok(json!(subject.starts_with(prefix)))
        })
        .with_transform("length", |args: &[Value]| {
            let len = match args.first() {
                Some(Value::String(s)) => s.chars().count(),
                Some(Value::Array(a)) => a.len(),
                Some(Value::Object(o)) => o.len(),
                _ => 0,
            };
            Ok(json!(len as f64))
        })
}

/// JavaScript-like truthiness.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().map_or(false, |n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Structural limits checked before the expression reaches the parser.
fn check_shape(condition: &str) -> Result<(), ConditionError> {
    if condition.trim().is_empty() {
        return Err(ConditionError::Empty);
    }
    if contains_expression(condition) {
        return Err(ConditionError::Interpolated);
    }
    let mut depth = 0usize;
    let mut deepest = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in condition.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => {
                depth += 1;
                deepest = deepest.max(depth);
            }
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    if quote.is_some() {
        return Err(ConditionError::UnterminatedString);
    }
    if deepest > MAX_CONDITION_DEPTH {
        return Err(ConditionError::TooDeep(deepest));
    }
    let length = condition.chars().count();
    if length > MAX_CONDITION_LENGTH {
        return Err(ConditionError::TooLong(length));
    }
    Ok(())
}

/// Numbers are compared as floats, matching JEXL number literals.
fn normalize(value: &Value) -> Value {
    match value {
        Value::Number(n) => n
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| value.clone()),
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), normalize(v))).collect()),
        other => other.clone(),
    }
}

/// Builds the evaluation context from a substitution scope.
pub fn condition_scope(scope: &SubstitutionContext) -> Value {
    let namespaces = [
        ("env", &scope.env),
        ("input", &scope.input),
        ("variables", &scope.variables),
        ("workflow", &scope.workflow),
        ("step", &scope.step),
        ("outputs", &scope.outputs),
    ];
    let mut context = Map::new();
    for (name, values) in namespaces {
        context.insert(name.to_string(), normalize(&Value::Object(values.clone())));
    }
    Value::Object(context)
}

fn empty_scope() -> Value {
    condition_scope(&SubstitutionContext::new())
}

/// Checks that a condition is well-formed without needing its values.
///
/// Only syntax problems are reported; comparisons that fail because a
/// referenced value is not known yet are accepted.
pub fn parse_condition(condition: &str) -> Result<(), ConditionError> {
    check_shape(condition)?;
    match evaluator().eval_in_context(condition, &empty_scope()) {
        Err(e @ EvaluationError::ParseError(_)) => Err(ConditionError::Syntax(e.to_string())),
        _ => Ok(()),
    }
}

/// Evaluates a `condition` value against `scope`.
///
/// Booleans are used directly and strings are evaluated as expressions,
/// the result being coerced with JavaScript-like truthiness.
pub fn evaluate_condition(condition: &Value, scope: &Value) -> Result<bool, ConditionError> {
    let expression = match condition {
        Value::Bool(b) => return Ok(*b),
        Value::String(s) => s,
        other => return Err(ConditionError::NotACondition(other.to_string())),
    };
    check_shape(expression)?;

    match evaluator().eval_in_context(expression, scope) {
        Ok(value) => Ok(truthy(&value)),
        Err(e @ EvaluationError::ParseError(_)) => Err(ConditionError::Syntax(e.to_string())),
        Err(e) => Err(ConditionError::Evaluation(e.to_string())),
    }
}

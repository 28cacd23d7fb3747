//! Predicate evaluation for Choice states.
//!
//! Rules are evaluated in declared order; the first match wins. A rule is
//! either a connective (`And`/`Or`/`Not`, short-circuit) or a leaf
//! (`Variable` plus one comparator). Comparators never raise: a value
//! that cannot be coerced for the comparison simply fails it.
//!
//! Missing and null are conflated throughout: the path evaluator yields
//! `Null` for a missing key, so `IsPresent` is true iff the resolved
//! value is non-null and `IsNull` is true for null or missing.

use std::cmp::Ordering;

use serde_json::Value;
use stateflow_types::definition::{ChoiceDef, ChoiceRule, CompareOp};
use stateflow_types::error::ExecutionError;

use crate::path;

/// Select the transition target for a Choice state: first matching rule,
/// then `Default`, else `NoChoiceMatched`.
pub fn select_next(
    state_name: &str,
    def: &ChoiceDef,
    input: &Value,
) -> Result<String, ExecutionError> {
    for rule in &def.choices {
        if eval_rule(rule, input) {
            if let Some(next) = &rule.next {
                return Ok(next.clone());
            }
        }
    }
    if let Some(default) = &def.default {
        return Ok(default.clone());
    }
    Err(ExecutionError::NoChoiceMatched(state_name.to_string()))
}

/// Evaluate one predicate node against the input value.
pub fn eval_rule(rule: &ChoiceRule, input: &Value) -> bool {
    if let Some(and) = &rule.and {
        return and.iter().all(|r| eval_rule(r, input));
    }
    if let Some(or) = &rule.or {
        return or.iter().any(|r| eval_rule(r, input));
    }
    if let Some(not) = &rule.not {
        return !eval_rule(not, input);
    }

    let Some(variable) = &rule.variable else {
        return false;
    };
    let Some((op, literal)) = rule.comparator() else {
        return false;
    };
    let actual = path::get_at(input, variable);
    apply_comparator(op, &actual, &literal)
}

fn apply_comparator(op: CompareOp, actual: &Value, literal: &Value) -> bool {
    use CompareOp::*;
    match op {
        NumericEquals => numeric_ordering(actual, literal) == Some(Ordering::Equal),
        NumericLessThan => numeric_ordering(actual, literal) == Some(Ordering::Less),
        NumericGreaterThan => numeric_ordering(actual, literal) == Some(Ordering::Greater),
        NumericLessThanEquals => matches!(
            numeric_ordering(actual, literal),
            Some(Ordering::Less | Ordering::Equal)
        ),
        NumericGreaterThanEquals => matches!(
            numeric_ordering(actual, literal),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        StringEquals | TimestampEquals => string_ordering(actual, literal) == Some(Ordering::Equal),
        TimestampLessThan => string_ordering(actual, literal) == Some(Ordering::Less),
        TimestampGreaterThan => string_ordering(actual, literal) == Some(Ordering::Greater),
        BooleanEquals => match (coerce_bool(actual), coerce_bool(literal)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        IsNull => actual.is_null() == literal_bool(literal),
        IsPresent => !actual.is_null() == literal_bool(literal),
        IsString => actual.is_string() == literal_bool(literal),
        IsNumeric => is_numeric(actual) == literal_bool(literal),
        IsBoolean => is_booleanish(actual) == literal_bool(literal),
    }
}

// ---------------------------------------------------------------------------
// Coercions
// ---------------------------------------------------------------------------

/// Parse both sides as floating-point. Non-parseable sides make the
/// comparison unanswerable (and the comparator false).
fn numeric_ordering(actual: &Value, literal: &Value) -> Option<Ordering> {
    let a = as_number(actual)?;
    let b = as_number(literal)?;
    a.partial_cmp(&b)
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// String comparison; lexicographic ordering, which is chronological for
/// ISO-8601 timestamp text.
fn string_ordering(actual: &Value, literal: &Value) -> Option<Ordering> {
    Some(actual.as_str()?.cmp(literal.as_str()?))
}

/// Booleans, plus the strings "true"/"false" (case-insensitive).
fn coerce_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn is_numeric(v: &Value) -> bool {
    as_number(v).is_some()
}

fn is_booleanish(v: &Value) -> bool {
    coerce_bool(v).is_some()
}

fn literal_bool(literal: &Value) -> bool {
    literal.as_bool().unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

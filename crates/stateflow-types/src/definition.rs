//! Definition-document types for stateflow.
//!
//! Models the Amazon-States-Language-style document tree: a
//! `StateMachineDef` holds `StartAt` plus a `States` mapping, and each
//! `StateDef` is internally tagged by `Type` with one of seven variants.
//! Field names follow the capitalized wire convention (`StartAt`,
//! `ErrorEquals`, `ResultPath`, ...), mapped via serde renames.
//!
//! These types are a faithful mirror of the document; structural
//! validation (dangling `Next` targets, Next/End exclusivity, ...) lives
//! in the engine crate.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

/// Deserialize a field so that *absent*, *explicit null*, and *present*
/// are distinguishable: absent stays `None` (via `#[serde(default)]`),
/// `null` becomes `Some(None)`, and a value becomes `Some(Some(v))`.
///
/// `ResultPath` needs this: absent means "replace at `$`", while an
/// explicit `null` means "discard the result, keep the input".
fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

/// A `ResultPath` field: `None` = absent (default `$`), `Some(None)` =
/// explicit null (discard), `Some(Some(path))` = place at path.
pub type ResultPathField = Option<Option<String>>;

// ---------------------------------------------------------------------------
// State machine definition
// ---------------------------------------------------------------------------

/// The root of a definition document.
///
/// Unknown top-level keys are ignored on deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StateMachineDef {
    /// Name of the state the execution enters first.
    pub start_at: String,
    /// All states, keyed by name. Key comparison is exact.
    pub states: HashMap<String, StateDef>,
    /// Optional free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Advisory machine-level timeout; enforced only via a host
    /// cancellation signal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

// ---------------------------------------------------------------------------
// State definitions
// ---------------------------------------------------------------------------

/// A single state, tagged by `Type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum StateDef {
    Task(TaskDef),
    Choice(ChoiceDef),
    Wait(WaitDef),
    Parallel(ParallelDef),
    Pass(PassDef),
    Succeed(SucceedDef),
    Fail(FailDef),
}

impl StateDef {
    /// The declared transition target, if any.
    pub fn next(&self) -> Option<&str> {
        match self {
            StateDef::Task(s) => s.next.as_deref(),
            StateDef::Wait(s) => s.next.as_deref(),
            StateDef::Parallel(s) => s.next.as_deref(),
            StateDef::Pass(s) => s.next.as_deref(),
            StateDef::Choice(_) | StateDef::Succeed(_) | StateDef::Fail(_) => None,
        }
    }

    /// Whether this state ends the execution (Succeed, Fail, or `End: true`).
    pub fn is_terminal(&self) -> bool {
        match self {
            StateDef::Succeed(_) | StateDef::Fail(_) => true,
            StateDef::Task(s) => s.end.unwrap_or(false),
            StateDef::Wait(s) => s.end.unwrap_or(false),
            StateDef::Parallel(s) => s.end.unwrap_or(false),
            StateDef::Pass(s) => s.end.unwrap_or(false),
            StateDef::Choice(_) => false,
        }
    }

    /// The state kind as it appears in the `Type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            StateDef::Task(_) => "Task",
            StateDef::Choice(_) => "Choice",
            StateDef::Wait(_) => "Wait",
            StateDef::Parallel(_) => "Parallel",
            StateDef::Pass(_) => "Pass",
            StateDef::Succeed(_) => "Succeed",
            StateDef::Fail(_) => "Fail",
        }
    }
}

/// Invoke an opaque resource, threading its result through the data-flow
/// pipeline, with retry/catch/timeout/heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskDef {
    /// Opaque resource identifier handed to the executor.
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,
    /// Deadline for a single invocation attempt, in whole seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Heartbeat period; must be strictly less than `TimeoutSeconds`
    /// when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub result_path: ResultPathField,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_selector: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<Vec<RetryPolicy>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catch: Option<Vec<CatchPolicy>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Select the next state from an ordered predicate list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChoiceDef {
    pub choices: Vec<ChoiceRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Suspend for a duration, then pass input through unchanged.
///
/// Exactly one of `Seconds`, `Timestamp`, `SecondsPath`, `TimestampPath`
/// must be present (validated at build time).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WaitDef {
    /// Non-negative integer, or a string that parses to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<Value>,
    /// ISO-8601 instant to wait until.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Fan out to nested state machines and collect their outputs in
/// declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParallelDef {
    /// Nested machine definitions, one per branch.
    pub branches: Vec<StateMachineDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub result_path: ResultPathField,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_selector: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<Vec<RetryPolicy>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catch: Option<Vec<CatchPolicy>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Emit a literal `Result` (or the effective input) through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PassDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub result_path: ResultPathField,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Terminal success.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SucceedDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Terminal failure with explicit codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FailDef {
    pub error: String,
    pub cause: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

// ---------------------------------------------------------------------------
// Retry / Catch policies
// ---------------------------------------------------------------------------

/// One retry entry. Entries are evaluated in declared order; the first
/// whose `ErrorEquals` matches (and whose attempts are not exhausted)
/// wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RetryPolicy {
    /// Error names this entry matches (`States.ALL`, `States.Timeout`,
    /// a host-defined class, ...). Must be non-empty.
    pub error_equals: Vec<String>,
    /// Base delay before the first retry, in seconds.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Maximum number of retries for this entry.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Multiplier applied to the delay on each successive attempt.
    #[serde(default = "default_backoff_rate")]
    pub backoff_rate: f64,
    /// Upper cap on the computed delay, in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay: u64,
}

fn default_interval_seconds() -> u64 {
    1
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_rate() -> f64 {
    2.0
}

fn default_max_delay() -> u64 {
    3600
}

/// One catch entry: where to route a matching error, and where to place
/// the `{Error, Cause}` object in the input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CatchPolicy {
    pub error_equals: Vec<String>,
    /// Target state of the redirect.
    pub next: String,
    /// Falls back to the owning state's `ResultPath` when absent.
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub result_path: ResultPathField,
}

// ---------------------------------------------------------------------------
// Choice rules
// ---------------------------------------------------------------------------

/// A node in a Choice predicate tree: either a connective (`And`/`Or`/
/// `Not`) or a leaf (`Variable` plus exactly one comparator). Top-level
/// rules carry `Next`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChoiceRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub and: Option<Vec<ChoiceRule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub or: Option<Vec<ChoiceRule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<ChoiceRule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_equals: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_less_than: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_greater_than: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_less_than_equals: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_greater_than_equals: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_equals: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boolean_equals: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_null: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_present: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_string: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_numeric: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_boolean: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_equals: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_less_than: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_greater_than: Option<Value>,
}

/// The comparator carried by a leaf rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    NumericEquals,
    NumericLessThan,
    NumericGreaterThan,
    NumericLessThanEquals,
    NumericGreaterThanEquals,
    StringEquals,
    BooleanEquals,
    IsNull,
    IsPresent,
    IsString,
    IsNumeric,
    IsBoolean,
    TimestampEquals,
    TimestampLessThan,
    TimestampGreaterThan,
}

impl ChoiceRule {
    /// Whether this rule is a connective node.
    pub fn is_connective(&self) -> bool {
        self.and.is_some() || self.or.is_some() || self.not.is_some()
    }

    /// Extract the leaf comparator and its literal operand.
    ///
    /// The `Is*` tests carry a boolean literal; everything else carries
    /// an arbitrary JSON literal. Returns the first comparator present
    /// (validation rejects rules carrying more than one).
    pub fn comparator(&self) -> Option<(CompareOp, Value)> {
        use CompareOp::*;
        let literals = [
            (&self.numeric_equals, NumericEquals),
            (&self.numeric_less_than, NumericLessThan),
            (&self.numeric_greater_than, NumericGreaterThan),
            (&self.numeric_less_than_equals, NumericLessThanEquals),
            (&self.numeric_greater_than_equals, NumericGreaterThanEquals),
            (&self.string_equals, StringEquals),
            (&self.boolean_equals, BooleanEquals),
            (&self.timestamp_equals, TimestampEquals),
            (&self.timestamp_less_than, TimestampLessThan),
            (&self.timestamp_greater_than, TimestampGreaterThan),
        ];
        for (slot, op) in literals {
            if let Some(v) = slot {
                return Some((op, v.clone()));
            }
        }
        let tests = [
            (&self.is_null, IsNull),
            (&self.is_present, IsPresent),
            (&self.is_string, IsString),
            (&self.is_numeric, IsNumeric),
            (&self.is_boolean, IsBoolean),
        ];
        for (slot, op) in tests {
            if let Some(b) = slot {
                return Some((op, Value::Bool(*b)));
            }
        }
        None
    }

    /// Number of comparator fields set on this rule.
    pub fn comparator_count(&self) -> usize {
        let literals = [
            self.numeric_equals.is_some(),
            self.numeric_less_than.is_some(),
            self.numeric_greater_than.is_some(),
            self.numeric_less_than_equals.is_some(),
            self.numeric_greater_than_equals.is_some(),
            self.string_equals.is_some(),
            self.boolean_equals.is_some(),
            self.timestamp_equals.is_some(),
            self.timestamp_less_than.is_some(),
            self.timestamp_greater_than.is_some(),
            self.is_null.is_some(),
            self.is_present.is_some(),
            self.is_string.is_some(),
            self.is_numeric.is_some(),
            self.is_boolean.is_some(),
        ];
        literals.iter().filter(|b| **b).count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! State machine construction and structural validation.
//!
//! A `StateMachine` wraps a validated `StateMachineDef`. Construction
//! accepts an already-parsed definition tree, a `serde_json::Value`, or
//! JSON/YAML text (YAML in safe mode; unknown top-level keys are
//! ignored by the model). Every violation is rejected up front with a
//! `Definition` error -- nothing structural can fail later during
//! execution.

use serde_json::Value;
use stateflow_types::definition::{
    CatchPolicy, ChoiceRule, RetryPolicy, StateDef, StateMachineDef, TaskDef, WaitDef,
};
use stateflow_types::error::ExecutionError;

/// A validated, executable state machine definition.
#[derive(Debug, Clone)]
pub struct StateMachine {
    def: StateMachineDef,
}

impl StateMachine {
    /// Validate and wrap a parsed definition.
    pub fn new(def: StateMachineDef) -> Result<Self, ExecutionError> {
        validate(&def)?;
        Ok(Self { def })
    }

    /// Build from an already-parsed JSON tree.
    pub fn from_value(value: Value) -> Result<Self, ExecutionError> {
        let def: StateMachineDef = serde_json::from_value(value)
            .map_err(|e| definition_error(format!("failed to parse definition: {e}")))?;
        Self::new(def)
    }

    /// Build from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, ExecutionError> {
        let def: StateMachineDef = serde_json::from_str(text)
            .map_err(|e| definition_error(format!("failed to parse definition: {e}")))?;
        Self::new(def)
    }

    /// Build from YAML text (safe mode; no arbitrary typed objects).
    pub fn from_yaml_str(text: &str) -> Result<Self, ExecutionError> {
        let def: StateMachineDef = serde_yaml_ng::from_str(text)
            .map_err(|e| definition_error(format!("failed to parse definition: {e}")))?;
        Self::new(def)
    }

    /// Load a definition document from disk, picking the parser by file
    /// extension (`.yaml`/`.yml` vs. JSON).
    pub fn from_file(path: &std::path::Path) -> Result<Self, ExecutionError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| definition_error(format!("failed to read {}: {e}", path.display())))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text),
            _ => Self::from_json_str(&text),
        }
    }

    pub fn def(&self) -> &StateMachineDef {
        &self.def
    }

    pub fn start_at(&self) -> &str {
        &self.def.start_at
    }

    /// Look up a state by name. Key comparison is exact.
    pub fn state(&self, name: &str) -> Option<&StateDef> {
        self.def.states.get(name)
    }
}

fn definition_error(msg: impl Into<String>) -> ExecutionError {
    ExecutionError::Definition(msg.into())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(def: &StateMachineDef) -> Result<(), ExecutionError> {
    if def.states.is_empty() {
        return Err(definition_error("States must not be empty"));
    }
    if !def.states.contains_key(&def.start_at) {
        return Err(definition_error(format!(
            "StartAt '{}' does not name a state",
            def.start_at
        )));
    }
    if def.timeout_seconds == Some(0) {
        return Err(definition_error("TimeoutSeconds must be positive"));
    }

    for (name, state) in &def.states {
        validate_state(def, name, state)?;
    }
    Ok(())
}

fn validate_state(def: &StateMachineDef, name: &str, state: &StateDef) -> Result<(), ExecutionError> {
    match state {
        StateDef::Task(task) => {
            validate_transition(def, name, task.next.as_deref(), task.end)?;
            validate_task(def, name, task)?;
        }
        StateDef::Wait(wait) => {
            validate_transition(def, name, wait.next.as_deref(), wait.end)?;
            validate_wait(name, wait)?;
        }
        StateDef::Pass(pass) => {
            validate_transition(def, name, pass.next.as_deref(), pass.end)?;
        }
        StateDef::Parallel(parallel) => {
            validate_transition(def, name, parallel.next.as_deref(), parallel.end)?;
            if parallel.branches.is_empty() {
                return Err(definition_error(format!(
                    "Parallel state '{name}' must declare at least one branch"
                )));
            }
            for (idx, branch) in parallel.branches.iter().enumerate() {
                validate(branch).map_err(|e| {
                    definition_error(format!(
                        "branch {idx} of Parallel state '{name}': {}",
                        e.cause_text()
                    ))
                })?;
            }
            validate_policies(def, name, parallel.retry.as_deref(), parallel.catch.as_deref())?;
        }
        StateDef::Choice(choice) => {
            if choice.choices.is_empty() {
                return Err(definition_error(format!(
                    "Choice state '{name}' must declare at least one choice"
                )));
            }
            for rule in &choice.choices {
                let Some(next) = &rule.next else {
                    return Err(definition_error(format!(
                        "top-level choice rule in '{name}' is missing Next"
                    )));
                };
                require_state(def, name, next)?;
                validate_rule(name, rule)?;
            }
            if let Some(default) = &choice.default {
                require_state(def, name, default)?;
            }
        }
        StateDef::Succeed(_) => {}
        StateDef::Fail(fail) => {
            if fail.error.is_empty() {
                return Err(definition_error(format!(
                    "Fail state '{name}' requires a non-empty Error"
                )));
            }
            if fail.cause.is_empty() {
                return Err(definition_error(format!(
                    "Fail state '{name}' requires a non-empty Cause"
                )));
            }
        }
    }
    Ok(())
}

/// Exactly one of `Next` / `End: true` must be present.
fn validate_transition(
    def: &StateMachineDef,
    name: &str,
    next: Option<&str>,
    end: Option<bool>,
) -> Result<(), ExecutionError> {
    match (next, end) {
        (Some(target), None) => require_state(def, name, target),
        (None, Some(true)) => Ok(()),
        (None, Some(false)) => Err(definition_error(format!(
            "state '{name}' declares End: false; use Next instead"
        ))),
        (Some(_), Some(_)) => Err(definition_error(format!(
            "state '{name}' declares both Next and End"
        ))),
        (None, None) => Err(definition_error(format!(
            "state '{name}' declares neither Next nor End"
        ))),
    }
}

fn require_state(def: &StateMachineDef, from: &str, target: &str) -> Result<(), ExecutionError> {
    if def.states.contains_key(target) {
        Ok(())
    } else {
        Err(definition_error(format!(
            "state '{from}' references unknown state '{target}'"
        )))
    }
}

fn validate_task(def: &StateMachineDef, name: &str, task: &TaskDef) -> Result<(), ExecutionError> {
    if task.resource.is_empty() {
        return Err(definition_error(format!(
            "Task state '{name}' requires a non-empty Resource"
        )));
    }
    if task.timeout_seconds == Some(0) {
        return Err(definition_error(format!(
            "Task state '{name}': TimeoutSeconds must be positive"
        )));
    }
    if task.heartbeat_seconds == Some(0) {
        return Err(definition_error(format!(
            "Task state '{name}': HeartbeatSeconds must be positive"
        )));
    }
    if let (Some(timeout), Some(heartbeat)) = (task.timeout_seconds, task.heartbeat_seconds) {
        if heartbeat >= timeout {
            return Err(definition_error(format!(
                "Task state '{name}': HeartbeatSeconds must be strictly less than TimeoutSeconds"
            )));
        }
    }
    validate_policies(def, name, task.retry.as_deref(), task.catch.as_deref())
}

fn validate_policies(
    def: &StateMachineDef,
    name: &str,
    retry: Option<&[RetryPolicy]>,
    catch: Option<&[CatchPolicy]>,
) -> Result<(), ExecutionError> {
    for policy in retry.unwrap_or_default() {
        if policy.error_equals.is_empty() {
            return Err(definition_error(format!(
                "retry entry on '{name}' requires a non-empty ErrorEquals"
            )));
        }
        if policy.backoff_rate < 1.0 {
            return Err(definition_error(format!(
                "retry entry on '{name}': BackoffRate must be >= 1.0"
            )));
        }
    }
    for policy in catch.unwrap_or_default() {
        if policy.error_equals.is_empty() {
            return Err(definition_error(format!(
                "catch entry on '{name}' requires a non-empty ErrorEquals"
            )));
        }
        require_state(def, name, &policy.next)?;
    }
    Ok(())
}

fn validate_wait(name: &str, wait: &WaitDef) -> Result<(), ExecutionError> {
    let sources = [
        wait.seconds.is_some(),
        wait.timestamp.is_some(),
        wait.seconds_path.is_some(),
        wait.timestamp_path.is_some(),
    ];
    let count = sources.iter().filter(|b| **b).count();
    if count != 1 {
        return Err(definition_error(format!(
            "Wait state '{name}' must set exactly one of Seconds, Timestamp, SecondsPath, TimestampPath"
        )));
    }
    // Literal Seconds must be a non-negative integer (or a string that
    // parses to one); path variants are checked at run time.
    if let Some(seconds) = &wait.seconds {
        let ok = match seconds {
            Value::Number(n) => n.as_u64().is_some(),
            Value::String(s) => s.trim().parse::<u64>().is_ok(),
            _ => false,
        };
        if !ok {
            return Err(definition_error(format!(
                "Wait state '{name}': Seconds must be a non-negative integer"
            )));
        }
    }
    Ok(())
}

/// Validate one predicate node: a connective carries exactly one of
/// And/Or/Not (with non-empty children), a leaf carries Variable plus
/// exactly one comparator.
fn validate_rule(state_name: &str, rule: &ChoiceRule) -> Result<(), ExecutionError> {
    let connectives = [rule.and.is_some(), rule.or.is_some(), rule.not.is_some()];
    let connective_count = connectives.iter().filter(|b| **b).count();

    if connective_count > 1 {
        return Err(definition_error(format!(
            "choice rule in '{state_name}' mixes And/Or/Not"
        )));
    }

    if connective_count == 1 {
        if rule.variable.is_some() || rule.comparator_count() > 0 {
            return Err(definition_error(format!(
                "choice rule in '{state_name}' mixes a connective with a comparator"
            )));
        }
        if let Some(children) = rule.and.as_deref().or(rule.or.as_deref()) {
            if children.is_empty() {
                return Err(definition_error(format!(
                    "And/Or in '{state_name}' requires at least one sub-rule"
                )));
            }
            for child in children {
                validate_rule(state_name, child)?;
            }
        }
        if let Some(inner) = &rule.not {
            validate_rule(state_name, inner)?;
        }
        return Ok(());
    }

    if rule.variable.is_none() {
        return Err(definition_error(format!(
            "choice rule in '{state_name}' is missing Variable"
        )));
    }
    match rule.comparator_count() {
        1 => Ok(()),
        0 => Err(definition_error(format!(
            "choice rule in '{state_name}' has no comparator"
        ))),
        n => Err(definition_error(format!(
            "choice rule in '{state_name}' has {n} comparators; exactly one is allowed"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

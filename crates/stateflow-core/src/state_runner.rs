//! Per-variant state execution.
//!
//! Each variant's behavior is a function over the shared data-flow
//! helpers: it receives the current data value (via the execution
//! record), produces the next data value, and may announce a catch
//! redirect through the execution context's override slot. Transition
//! selection lives in [`next_state_name`]; the driver owns status and
//! history.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::task::{JoinHandle, JoinSet};

use stateflow_types::definition::{
    CatchPolicy, ParallelDef, PassDef, ResultPathField, RetryPolicy, StateDef, SucceedDef, TaskDef,
    WaitDef,
};
use stateflow_types::error::ExecutionError;
use stateflow_types::execution::ExecutionStatus;

use crate::execution::{Execution, ExecutionContext};
use crate::machine::StateMachine;
use crate::{choice, dataflow, retry};

/// Execute one state against the execution's current data value.
pub(crate) async fn run_state(
    name: &str,
    state: &StateDef,
    exec: &mut Execution,
) -> Result<Value, ExecutionError> {
    match state {
        StateDef::Task(def) => run_task(name, def, exec).await,
        StateDef::Parallel(def) => run_parallel(name, def, exec).await,
        StateDef::Wait(def) => run_wait(name, def, exec).await,
        StateDef::Pass(def) => run_pass(def, exec),
        StateDef::Succeed(def) => Ok(run_succeed(def, exec)),
        // Choice is pure: data passes through, the predicate tree only
        // drives transition selection. Fail passes input through for
        // history; the driver applies its codes.
        StateDef::Choice(_) | StateDef::Fail(_) => Ok(exec.output.clone()),
    }
}

/// Select the transition target a state declares for the given value.
pub(crate) fn next_state_name(
    name: &str,
    state: &StateDef,
    value: &Value,
) -> Result<Option<String>, ExecutionError> {
    match state {
        StateDef::Choice(def) => choice::select_next(name, def, value).map(Some),
        _ => Ok(state.next().map(str::to_string)),
    }
}

// ---------------------------------------------------------------------------
// Error disposition (shared by Task and Parallel)
// ---------------------------------------------------------------------------

enum ErrorDisposition {
    /// Sleep, then re-run the attempt.
    Retry { delay: Duration },
    /// Emit the error object as output and redirect to `next`.
    Catch { output: Value, next: String },
    Propagate(ExecutionError),
}

/// Consult Retry then Catch, in that order, for a failed attempt.
fn dispose_error(
    name: &str,
    err: ExecutionError,
    retry_policies: Option<&[RetryPolicy]>,
    catch_policies: Option<&[CatchPolicy]>,
    state_result_path: &ResultPathField,
    input: &Value,
    ctx: &mut ExecutionContext,
) -> ErrorDisposition {
    if let Some(policies) = retry_policies {
        let taken = |i: usize| ctx.retry_count(name, i);
        if let Some((entry, policy)) = retry::find_retry(policies, &err, taken) {
            let attempt = ctx.bump_retry(name, entry);
            let delay = retry::backoff_delay(policy, attempt);
            tracing::debug!(
                state = name,
                entry,
                attempt,
                delay_secs = delay.as_secs_f64(),
                error = err.error_name(),
                "retrying after error"
            );
            return ErrorDisposition::Retry { delay };
        }
    }

    if let Some(policies) = catch_policies {
        if let Some(policy) = retry::find_catch(policies, &err) {
            let error_object = json!({
                "Error": err.error_name(),
                "Cause": err.cause_text(),
            });
            let result_path = if policy.result_path.is_some() {
                policy.result_path.clone()
            } else {
                state_result_path.clone()
            };
            let output = dataflow::apply_result_path(input, &error_object, &result_path);
            tracing::info!(
                state = name,
                error = err.error_name(),
                target = policy.next.as_str(),
                "catch redirect"
            );
            return ErrorDisposition::Catch {
                output,
                next: policy.next.clone(),
            };
        }
    }

    ErrorDisposition::Propagate(err)
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

async fn run_task(name: &str, def: &TaskDef, exec: &mut Execution) -> Result<Value, ExecutionError> {
    let input = exec.output.clone();
    let effective = dataflow::apply_input_path(&input, def.input_path.as_deref());
    let parameters = dataflow::apply_parameters(def.parameters.as_ref(), &effective);

    loop {
        let attempt = exec.context.bump_attempt(name);
        tracing::debug!(state = name, resource = def.resource.as_str(), attempt, "invoking task");

        match invoke_with_deadline(name, def, &parameters, &exec.context).await {
            Ok(raw) => {
                let selected = dataflow::apply_result_selector(def.result_selector.as_ref(), &raw);
                let placed = dataflow::apply_result_path(&input, &selected, &def.result_path);
                return Ok(dataflow::apply_output_path(placed, def.output_path.as_deref()));
            }
            Err(err) => match dispose_error(
                name,
                err,
                def.retry.as_deref(),
                def.catch.as_deref(),
                &def.result_path,
                &input,
                &mut exec.context,
            ) {
                ErrorDisposition::Retry { delay } => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                ErrorDisposition::Catch { output, next } => {
                    exec.context.next_override = Some(next);
                    return Ok(output);
                }
                ErrorDisposition::Propagate(err) => return Err(err),
            },
        }
    }
}

/// One invocation attempt, under the configured deadline, with the
/// heartbeat monitor running alongside. The monitor is stopped on every
/// exit path; a breached deadline abandons the invocation and yields the
/// `TaskTimeout` sentinel.
async fn invoke_with_deadline(
    name: &str,
    def: &TaskDef,
    parameters: &Value,
    ctx: &ExecutionContext,
) -> Result<Value, ExecutionError> {
    let monitor = def.heartbeat_seconds.map(|period| spawn_heartbeat(name, period));

    let invocation = ctx.invoke(&def.resource, parameters, def.credentials.as_deref());
    let result = match def.timeout_seconds {
        Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), invocation).await {
            Ok(inner) => inner,
            Err(_) => Err(ExecutionError::TaskTimeout(format!(
                "state '{name}' exceeded its {secs}s deadline"
            ))),
        },
        None => invocation.await,
    };

    if let Some(handle) = monitor {
        handle.abort();
    }
    result
}

fn spawn_heartbeat(name: &str, period_secs: u64) -> JoinHandle<()> {
    let state = name.to_string();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(period_secs));
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            tracing::debug!(state = state.as_str(), "task heartbeat");
        }
    })
}

// ---------------------------------------------------------------------------
// Parallel
// ---------------------------------------------------------------------------

async fn run_parallel(
    name: &str,
    def: &ParallelDef,
    exec: &mut Execution,
) -> Result<Value, ExecutionError> {
    let input = exec.output.clone();
    let effective = dataflow::apply_input_path(&input, def.input_path.as_deref());
    let parameters = dataflow::apply_parameters(def.parameters.as_ref(), &effective);

    // Branches were validated as part of the parent machine.
    let mut machines = Vec::with_capacity(def.branches.len());
    for branch in &def.branches {
        machines.push(Arc::new(StateMachine::new(branch.clone())?));
    }

    loop {
        exec.context.bump_attempt(name);

        match run_branches(name, &machines, &parameters, &exec.context).await {
            Ok(raw) => {
                let selected = dataflow::apply_result_selector(def.result_selector.as_ref(), &raw);
                let placed = dataflow::apply_result_path(&input, &selected, &def.result_path);
                return Ok(dataflow::apply_output_path(placed, def.output_path.as_deref()));
            }
            Err(err) => match dispose_error(
                name,
                err,
                def.retry.as_deref(),
                def.catch.as_deref(),
                &def.result_path,
                &input,
                &mut exec.context,
            ) {
                ErrorDisposition::Retry { delay } => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                ErrorDisposition::Catch { output, next } => {
                    exec.context.next_override = Some(next);
                    return Ok(output);
                }
                ErrorDisposition::Propagate(err) => return Err(err),
            },
        }
    }
}

/// Spawn every branch as a child execution and collect outputs in
/// declaration order. The first failing branch aborts its siblings.
async fn run_branches(
    name: &str,
    machines: &[Arc<StateMachine>],
    input: &Value,
    ctx: &ExecutionContext,
) -> Result<Value, ExecutionError> {
    let mut join_set = JoinSet::new();
    for (idx, machine) in machines.iter().enumerate() {
        let machine = Arc::clone(machine);
        let child_ctx = ctx.child();
        let child_input = input.clone();
        let child_name = format!("{name}-branch-{idx}");
        join_set.spawn(async move {
            let mut child = Execution::new(child_name, child_input, child_ctx);
            child.current_state = Some(machine.start_at().to_string());
            crate::executor::drive_to_completion(&machine, &mut child).await;
            (idx, child)
        });
    }

    let mut outputs: Vec<Option<Value>> = vec![None; machines.len()];
    while let Some(joined) = join_set.join_next().await {
        let (idx, child) = joined.map_err(|e| ExecutionError::BranchFailed {
            index: 0,
            cause: format!("branch task join error: {e}"),
        })?;
        match child.status {
            ExecutionStatus::Succeeded => outputs[idx] = Some(child.output),
            _ => {
                join_set.abort_all();
                let cause = match (child.error, child.cause) {
                    (Some(error), Some(cause)) => format!("{error}: {cause}"),
                    (Some(error), None) => error,
                    (None, Some(cause)) => cause,
                    (None, None) => "branch did not complete".to_string(),
                };
                tracing::warn!(state = name, branch = idx, cause = cause.as_str(), "branch failed");
                return Err(ExecutionError::BranchFailed { index: idx, cause });
            }
        }
    }

    Ok(Value::Array(
        outputs.into_iter().map(|o| o.unwrap_or(Value::Null)).collect(),
    ))
}

// ---------------------------------------------------------------------------
// Wait
// ---------------------------------------------------------------------------

async fn run_wait(name: &str, def: &WaitDef, exec: &Execution) -> Result<Value, ExecutionError> {
    let duration = wait_duration(name, def, &exec.output)?;
    if !duration.is_zero() {
        tracing::debug!(state = name, seconds = duration.as_secs_f64(), "waiting");
        tokio::time::sleep(duration).await;
    }
    Ok(exec.output.clone())
}

fn wait_duration(name: &str, def: &WaitDef, input: &Value) -> Result<Duration, ExecutionError> {
    if let Some(seconds) = &def.seconds {
        return seconds_duration(name, seconds);
    }
    if let Some(path) = &def.seconds_path {
        let resolved = crate::path::get_at(input, path);
        return seconds_duration(name, &resolved);
    }
    if let Some(timestamp) = &def.timestamp {
        return timestamp_duration(name, timestamp);
    }
    if let Some(path) = &def.timestamp_path {
        let resolved = crate::path::get_at(input, path);
        let Some(text) = resolved.as_str() else {
            return Err(ExecutionError::InvalidWaitConfig(format!(
                "state '{name}': TimestampPath '{path}' did not resolve to a string"
            )));
        };
        return timestamp_duration(name, text);
    }
    Err(ExecutionError::InvalidWaitConfig(format!(
        "state '{name}' has no wait duration source"
    )))
}

fn seconds_duration(name: &str, value: &Value) -> Result<Duration, ExecutionError> {
    let seconds = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    seconds.map(Duration::from_secs).ok_or_else(|| {
        ExecutionError::InvalidWaitConfig(format!(
            "state '{name}': Seconds value {value} is not a non-negative integer"
        ))
    })
}

/// `max(0, target - now)` for an ISO-8601 instant.
fn timestamp_duration(name: &str, text: &str) -> Result<Duration, ExecutionError> {
    let target = chrono::DateTime::parse_from_rfc3339(text).map_err(|e| {
        ExecutionError::InvalidWaitConfig(format!(
            "state '{name}': Timestamp '{text}' is not ISO-8601: {e}"
        ))
    })?;
    let delta = target.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Ok(delta.to_std().unwrap_or(Duration::ZERO))
}

// ---------------------------------------------------------------------------
// Pass / Succeed
// ---------------------------------------------------------------------------

fn run_pass(def: &PassDef, exec: &Execution) -> Result<Value, ExecutionError> {
    let input = exec.output.clone();
    let effective = dataflow::apply_input_path(&input, def.input_path.as_deref());
    let parameters = dataflow::apply_parameters(def.parameters.as_ref(), &effective);
    let raw = def.result.clone().unwrap_or(parameters);
    let placed = dataflow::apply_result_path(&input, &raw, &def.result_path);
    Ok(dataflow::apply_output_path(placed, def.output_path.as_deref()))
}

fn run_succeed(def: &SucceedDef, exec: &Execution) -> Value {
    let effective = dataflow::apply_input_path(&exec.output, def.input_path.as_deref());
    dataflow::apply_output_path(effective, def.output_path.as_deref())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

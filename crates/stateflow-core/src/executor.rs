//! The execution driver.
//!
//! Owns the per-step algorithm: resolve the current state, execute it,
//! update output and history, then transition -- honoring a catch
//! override before the state's own declaration, and finishing the
//! execution on terminal states or uncaught errors. Host cancellation
//! tokens are tracked per execution name and observed at step
//! boundaries (best-effort).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use stateflow_types::definition::StateDef;
use stateflow_types::error::ExecutionError;
use stateflow_types::execution::ExecutionStatus;

use crate::execution::{Execution, ExecutionContext};
use crate::machine::StateMachine;
use crate::resource::ResourceExecutor;
use crate::state_runner;

/// Drives executions of one state machine.
pub struct ExecutionDriver {
    machine: Arc<StateMachine>,
    resource_executor: Option<Arc<dyn ResourceExecutor>>,
    /// Cancellation tokens keyed by execution name.
    cancellations: DashMap<String, CancellationToken>,
}

impl ExecutionDriver {
    pub fn new(machine: StateMachine) -> Self {
        Self {
            machine: Arc::new(machine),
            resource_executor: None,
            cancellations: DashMap::new(),
        }
    }

    /// Register the host's task executor. Without one, Task states
    /// produce simulated results.
    pub fn with_resource_executor(mut self, executor: Arc<dyn ResourceExecutor>) -> Self {
        self.resource_executor = Some(executor);
        self
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    /// Create an execution: capture the input snapshot, assign a name
    /// (caller-supplied or generated), and point it at `StartAt`.
    pub fn start_execution(&self, input: Value, name: Option<String>) -> Execution {
        let name = name.unwrap_or_else(generate_execution_name);
        let context = ExecutionContext::new(self.resource_executor.clone());
        self.cancellations.insert(name.clone(), context.cancel.clone());

        let mut exec = Execution::new(name, input, context);
        exec.current_state = Some(self.machine.start_at().to_string());
        tracing::info!(
            execution = exec.name.as_str(),
            start_at = self.machine.start_at(),
            "starting execution"
        );
        exec
    }

    /// Advance the execution by one state.
    pub async fn run_next(&self, exec: &mut Execution) {
        step(&self.machine, exec).await;
        if exec.status.is_terminal() {
            self.cancellations.remove(&exec.name);
        }
    }

    /// Run until the execution leaves the Running status.
    pub async fn run_all(&self, exec: &mut Execution) {
        drive_to_completion(&self.machine, exec).await;
        self.cancellations.remove(&exec.name);
    }

    /// Trip the cancellation token for a named execution. The driver
    /// observes it at the next step boundary. Returns whether the name
    /// was known.
    pub fn cancel(&self, name: &str) -> bool {
        match self.cancellations.get(name) {
            Some(token) => {
                token.cancel();
                tracing::info!(execution = name, "cancellation requested");
                true
            }
            None => false,
        }
    }
}

/// Loop `step` until terminal. Boxed so Parallel branches can recurse
/// through child executions.
pub(crate) fn drive_to_completion<'a>(
    machine: &'a StateMachine,
    exec: &'a mut Execution,
) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        while exec.status == ExecutionStatus::Running {
            step(machine, exec).await;
        }
    })
}

/// The per-step algorithm.
async fn step(machine: &StateMachine, exec: &mut Execution) {
    if exec.status.is_terminal() {
        return;
    }

    if exec.context.cancel.is_cancelled() {
        let err = ExecutionError::Cancelled(format!("execution '{}' cancelled by host", exec.name));
        fail(exec, &err);
        return;
    }

    let Some(state_name) = exec.current_state.clone() else {
        let err = ExecutionError::NoNextState("<no current state>".to_string());
        fail(exec, &err);
        return;
    };
    let Some(state) = machine.state(&state_name) else {
        let err = ExecutionError::StateNotFound(state_name);
        fail(exec, &err);
        return;
    };

    tracing::debug!(
        execution = exec.name.as_str(),
        state = state_name.as_str(),
        kind = state.kind(),
        "entering state"
    );
    let entry_input = exec.output.clone();

    match state_runner::run_state(&state_name, state, exec).await {
        Ok(value) => {
            exec.output = value;
            exec.record_step(&state_name, entry_input, exec.output.clone());

            if let StateDef::Fail(fail_def) = state {
                tracing::warn!(
                    execution = exec.name.as_str(),
                    state = state_name.as_str(),
                    error = fail_def.error.as_str(),
                    "execution terminated by Fail state"
                );
                exec.finish_failure(fail_def.error.clone(), fail_def.cause.clone());
                return;
            }

            // A catch redirect wins over the state's own declaration,
            // including End.
            if let Some(target) = exec.context.next_override.take() {
                exec.current_state = Some(target);
                return;
            }

            if state.is_terminal() {
                tracing::info!(execution = exec.name.as_str(), "execution succeeded");
                exec.finish_success();
                return;
            }

            match state_runner::next_state_name(&state_name, state, &exec.output) {
                Ok(Some(next)) => exec.current_state = Some(next),
                Ok(None) => fail(exec, &ExecutionError::NoNextState(state_name)),
                Err(err) => fail(exec, &err),
            }
        }
        Err(err) => {
            exec.record_step(&state_name, entry_input, exec.output.clone());
            fail(exec, &err);
        }
    }
}

fn fail(exec: &mut Execution, err: &ExecutionError) {
    tracing::error!(
        execution = exec.name.as_str(),
        error = err.error_name(),
        cause = %err,
        "execution failed"
    );
    exec.finish_failure(err.error_name().to_string(), err.cause_text());
}

/// Time-plus-random-hex identifier for unnamed executions.
fn generate_execution_name() -> String {
    let suffix: u32 = rand::random();
    format!("exec-{}-{suffix:08x}", Utc::now().format("%Y%m%d%H%M%S"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::FnExecutor;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn driver(doc: Value) -> ExecutionDriver {
        ExecutionDriver::new(StateMachine::from_value(doc).unwrap())
    }

    fn history_names(exec: &Execution) -> Vec<&str> {
        exec.history.iter().map(|h| h.state_name.as_str()).collect()
    }

    // -------------------------------------------------------------------
    // Linear task chain with the simulated executor
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_linear_task_chain_simulated() {
        let driver = driver(json!({
            "StartAt": "A",
            "States": {
                "A": {"Type": "Task", "Resource": "r1", "Next": "B"},
                "B": {"Type": "Task", "Resource": "r2", "End": true}
            }
        }));
        let mut exec = driver.start_execution(json!({}), None);
        driver.run_all(&mut exec).await;

        assert_eq!(exec.status, ExecutionStatus::Succeeded);
        assert_eq!(history_names(&exec), vec!["A", "B"]);
        assert_eq!(exec.output["resource"], json!("r2"));
        assert_eq!(exec.output["simulated"], json!(true));
        assert!(exec.ended_at.unwrap() >= exec.started_at);
    }

    // -------------------------------------------------------------------
    // Choice routing over order values
    // -------------------------------------------------------------------

    fn order_machine() -> Value {
        json!({
            "StartAt": "CheckOrderValue",
            "States": {
                "CheckOrderValue": {
                    "Type": "Choice",
                    "Choices": [
                        {"Variable": "$.order.total", "NumericGreaterThanEquals": 1000, "Next": "High"},
                        {"Variable": "$.order.total", "NumericGreaterThanEquals": 100, "Next": "Medium"},
                        {"Variable": "$.order.total", "NumericLessThan": 0, "Next": "Invalid"}
                    ],
                    "Default": "Normal"
                },
                "High": {"Type": "Pass", "End": true},
                "Medium": {"Type": "Pass", "End": true},
                "Normal": {"Type": "Pass", "End": true},
                "Invalid": {
                    "Type": "Fail",
                    "Error": "InvalidOrderError",
                    "Cause": "Order total cannot be negative"
                }
            }
        })
    }

    #[tokio::test]
    async fn test_choice_negative_order_fails() {
        let driver = driver(order_machine());
        let mut exec = driver.start_execution(json!({"order": {"total": -50}}), None);
        driver.run_all(&mut exec).await;

        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert_eq!(exec.error.as_deref(), Some("InvalidOrderError"));
        assert_eq!(exec.cause.as_deref(), Some("Order total cannot be negative"));
        assert_eq!(history_names(&exec), vec!["CheckOrderValue", "Invalid"]);
        // Choice never modifies data.
        assert_eq!(exec.output, json!({"order": {"total": -50}}));
    }

    #[tokio::test]
    async fn test_choice_routes_by_magnitude() {
        for (total, target) in [(5000, "High"), (500, "Medium"), (50, "Normal")] {
            let driver = driver(order_machine());
            let mut exec = driver.start_execution(json!({"order": {"total": total}}), None);
            driver.run_all(&mut exec).await;
            assert_eq!(exec.status, ExecutionStatus::Succeeded, "total={total}");
            assert_eq!(
                history_names(&exec),
                vec!["CheckOrderValue", target],
                "total={total}"
            );
        }
    }

    #[tokio::test]
    async fn test_choice_no_match_no_default_fails() {
        let driver = driver(json!({
            "StartAt": "Pick",
            "States": {
                "Pick": {
                    "Type": "Choice",
                    "Choices": [{"Variable": "$.x", "NumericEquals": 1, "Next": "One"}]
                },
                "One": {"Type": "Succeed"}
            }
        }));
        let mut exec = driver.start_execution(json!({"x": 2}), None);
        driver.run_all(&mut exec).await;
        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert_eq!(exec.error.as_deref(), Some("NoChoiceMatched"));
    }

    // -------------------------------------------------------------------
    // Retry then success
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_retry_then_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let executor = Arc::new(FnExecutor::new(move |_, _, _| {
            if calls_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ExecutionError::TaskTimeout("first attempt".into()))
            } else {
                Ok(json!({"ok": true}))
            }
        }));
        let driver = driver(json!({
            "StartAt": "A",
            "States": {
                "A": {
                    "Type": "Task",
                    "Resource": "flaky",
                    "Retry": [{
                        "ErrorEquals": ["States.Timeout"],
                        "IntervalSeconds": 0,
                        "MaxAttempts": 2,
                        "BackoffRate": 1.0
                    }],
                    "End": true
                }
            }
        }))
        .with_resource_executor(executor);

        let mut exec = driver.start_execution(json!({}), None);
        driver.run_all(&mut exec).await;

        assert_eq!(exec.status, ExecutionStatus::Succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(exec.context.attempt_count("A"), 2);
        assert_eq!(exec.output, json!({"ok": true}));
    }

    // -------------------------------------------------------------------
    // Catch redirect
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_catch_redirects_to_handler() {
        let executor = Arc::new(FnExecutor::new(|_, _, _| {
            Err(ExecutionError::TaskFailed {
                class: "RuntimeError".into(),
                cause: "boom".into(),
            })
        }));
        let driver = driver(json!({
            "StartAt": "A",
            "States": {
                "A": {
                    "Type": "Task",
                    "Resource": "r",
                    "Catch": [{
                        "ErrorEquals": ["States.ALL"],
                        "Next": "ErrorHandler",
                        "ResultPath": "$.error"
                    }],
                    "Next": "Unreached"
                },
                "Unreached": {"Type": "Succeed"},
                "ErrorHandler": {"Type": "Pass", "End": true}
            }
        }))
        .with_resource_executor(executor);

        let mut exec = driver.start_execution(json!({"data": "v"}), None);
        driver.run_all(&mut exec).await;

        assert_eq!(exec.status, ExecutionStatus::Succeeded);
        assert_eq!(history_names(&exec), vec!["A", "ErrorHandler"]);
        assert_eq!(
            exec.output,
            json!({"data": "v", "error": {"Error": "RuntimeError", "Cause": "boom"}})
        );
    }

    #[tokio::test]
    async fn test_uncaught_error_fails_execution() {
        let executor = Arc::new(FnExecutor::new(|_, _, _| {
            Err(ExecutionError::TaskFailed {
                class: "RuntimeError".into(),
                cause: "boom".into(),
            })
        }));
        let driver = driver(json!({
            "StartAt": "A",
            "States": {"A": {"Type": "Task", "Resource": "r", "End": true}}
        }))
        .with_resource_executor(executor);

        let mut exec = driver.start_execution(json!({}), None);
        driver.run_all(&mut exec).await;

        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert_eq!(exec.error.as_deref(), Some("RuntimeError"));
        assert_eq!(exec.cause.as_deref(), Some("boom"));
        assert_eq!(history_names(&exec), vec!["A"]);
    }

    // -------------------------------------------------------------------
    // Parallel fan-out
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_parallel_fan_out_ordered() {
        let driver = driver(json!({
            "StartAt": "P",
            "States": {
                "P": {
                    "Type": "Parallel",
                    "Branches": [
                        {"StartAt": "B1", "States": {"B1": {
                            "Type": "Pass", "Result": {"b": 1}, "End": true
                        }}},
                        {"StartAt": "B2", "States": {"B2": {
                            "Type": "Pass", "Result": {"b": 2}, "End": true
                        }}}
                    ],
                    "End": true
                }
            }
        }));
        let mut exec = driver.start_execution(json!({}), None);
        driver.run_all(&mut exec).await;

        assert_eq!(exec.status, ExecutionStatus::Succeeded);
        assert_eq!(exec.output, json!([{"b": 1}, {"b": 2}]));
        assert_eq!(exec.output.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_parallel_branch_failure_fails_execution() {
        let driver = driver(json!({
            "StartAt": "P",
            "States": {
                "P": {
                    "Type": "Parallel",
                    "Branches": [
                        {"StartAt": "Ok", "States": {"Ok": {"Type": "Pass", "End": true}}},
                        {"StartAt": "Bad", "States": {"Bad": {
                            "Type": "Fail", "Error": "ChildError", "Cause": "nope"
                        }}}
                    ],
                    "End": true
                }
            }
        }));
        let mut exec = driver.start_execution(json!({}), None);
        driver.run_all(&mut exec).await;

        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert_eq!(exec.error.as_deref(), Some("BranchFailed"));
    }

    // -------------------------------------------------------------------
    // Wait by SecondsPath
    // -------------------------------------------------------------------

    fn wait_machine() -> Value {
        json!({
            "StartAt": "W",
            "States": {
                "W": {"Type": "Wait", "SecondsPath": "$.delay", "Next": "S"},
                "S": {"Type": "Succeed"}
            }
        })
    }

    #[tokio::test]
    async fn test_wait_zero_delay_immediate() {
        let driver = driver(wait_machine());
        let mut exec = driver.start_execution(json!({"delay": 0}), None);
        let before = std::time::Instant::now();
        driver.run_all(&mut exec).await;
        assert_eq!(exec.status, ExecutionStatus::Succeeded);
        assert!(before.elapsed() < std::time::Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_wait_one_second_delay() {
        let driver = driver(wait_machine());
        let mut exec = driver.start_execution(json!({"delay": 1}), None);
        let before = std::time::Instant::now();
        driver.run_all(&mut exec).await;
        let elapsed = before.elapsed();
        assert_eq!(exec.status, ExecutionStatus::Succeeded);
        assert!(elapsed >= std::time::Duration::from_secs(1), "elapsed {elapsed:?}");
        assert!(elapsed <= std::time::Duration::from_secs(2), "elapsed {elapsed:?}");
    }

    // -------------------------------------------------------------------
    // Stepping and naming
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_run_next_advances_one_state() {
        let driver = driver(json!({
            "StartAt": "A",
            "States": {
                "A": {"Type": "Pass", "Next": "B"},
                "B": {"Type": "Succeed"}
            }
        }));
        let mut exec = driver.start_execution(json!({}), None);
        driver.run_next(&mut exec).await;
        assert_eq!(exec.status, ExecutionStatus::Running);
        assert_eq!(exec.current_state.as_deref(), Some("B"));
        assert_eq!(exec.history.len(), 1);

        driver.run_next(&mut exec).await;
        assert_eq!(exec.status, ExecutionStatus::Succeeded);
        assert_eq!(exec.history.len(), 2);
    }

    #[tokio::test]
    async fn test_generated_name_is_unique_enough() {
        let driver = driver(json!({
            "StartAt": "S",
            "States": {"S": {"Type": "Succeed"}}
        }));
        let a = driver.start_execution(json!({}), None);
        let b = driver.start_execution(json!({}), None);
        assert!(a.name.starts_with("exec-"));
        assert_ne!(a.name, b.name);
    }

    #[tokio::test]
    async fn test_caller_supplied_name_kept() {
        let driver = driver(json!({
            "StartAt": "S",
            "States": {"S": {"Type": "Succeed"}}
        }));
        let exec = driver.start_execution(json!({}), Some("my-run".into()));
        assert_eq!(exec.name, "my-run");
    }

    // -------------------------------------------------------------------
    // Cancellation
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_cancel_fails_at_step_boundary() {
        let driver = driver(json!({
            "StartAt": "A",
            "States": {
                "A": {"Type": "Pass", "Next": "B"},
                "B": {"Type": "Succeed"}
            }
        }));
        let mut exec = driver.start_execution(json!({}), Some("doomed".into()));
        assert!(driver.cancel("doomed"));
        driver.run_all(&mut exec).await;
        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert_eq!(exec.error.as_deref(), Some("ExecutionCancelled"));
    }

    #[tokio::test]
    async fn test_cancel_unknown_name() {
        let driver = driver(json!({
            "StartAt": "S",
            "States": {"S": {"Type": "Succeed"}}
        }));
        assert!(!driver.cancel("never-started"));
    }

    // -------------------------------------------------------------------
    // Snapshot of a finished run
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_snapshot_of_finished_run() {
        let driver = driver(json!({
            "StartAt": "A",
            "States": {"A": {"Type": "Pass", "Result": {"done": true}, "End": true}}
        }));
        let mut exec = driver.start_execution(json!({"seed": 1}), Some("snap".into()));
        driver.run_all(&mut exec).await;

        let snap = exec.snapshot();
        let text = serde_json::to_string(&snap).unwrap();
        assert!(text.contains("\"status\":\"Succeeded\""));
        assert!(text.contains("\"name\":\"snap\""));
        assert_eq!(snap.input, json!({"seed": 1}));
        assert_eq!(snap.output, json!({"done": true}));
        assert!(snap.execution_time >= 0.0);
        assert!(snap.end_time.unwrap() >= snap.start_time);
    }
}

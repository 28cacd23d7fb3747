//! The mutable execution record and its capability context.
//!
//! An `Execution` advances through states under the driver: its output,
//! history, and status mutate as states run. The `ExecutionContext` is
//! the capability bag states read and write during a step: the resource
//! executor handle, per-entry retry counters, per-state attempt
//! counters, the catch next-state override slot, and the cancellation
//! token. Mutation is confined to the driver and the state currently
//! executing; branch children each own a shallow copy.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use stateflow_types::error::ExecutionError;
use stateflow_types::execution::{ExecutionSnapshot, ExecutionStatus, HistoryEntry};

use crate::resource::{ResourceExecutor, SimulatedExecutor};

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Capabilities and scratch state threaded through a single execution.
pub struct ExecutionContext {
    /// Host-supplied task executor; `None` falls back to the simulated
    /// executor.
    pub resource_executor: Option<Arc<dyn ResourceExecutor>>,
    /// Retries consumed per retry entry, keyed `"<state>#<entry index>"`.
    retry_counts: HashMap<String, u32>,
    /// Executor invocations per state (the 1-indexed attempt count).
    attempt_counts: HashMap<String, u32>,
    /// Set by a matching catch policy; the driver reads and clears it
    /// after each state.
    pub next_override: Option<String>,
    /// Host cancellation signal, observed at step boundaries.
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(resource_executor: Option<Arc<dyn ResourceExecutor>>) -> Self {
        Self {
            resource_executor,
            retry_counts: HashMap::new(),
            attempt_counts: HashMap::new(),
            next_override: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Shallow copy for a Parallel branch child: shared executor, fresh
    /// counters and override slot, a child cancellation token.
    pub fn child(&self) -> Self {
        Self {
            resource_executor: self.resource_executor.clone(),
            retry_counts: HashMap::new(),
            attempt_counts: HashMap::new(),
            next_override: None,
            cancel: self.cancel.child_token(),
        }
    }

    /// Invoke the registered executor, or simulate when none is set.
    pub async fn invoke(
        &self,
        resource: &str,
        input: &Value,
        credentials: Option<&str>,
    ) -> Result<Value, ExecutionError> {
        match &self.resource_executor {
            Some(executor) => executor.invoke(resource, input, credentials).await,
            None => SimulatedExecutor.invoke(resource, input, credentials).await,
        }
    }

    pub fn retry_count(&self, state: &str, entry: usize) -> u32 {
        self.retry_counts
            .get(&format!("{state}#{entry}"))
            .copied()
            .unwrap_or(0)
    }

    pub fn bump_retry(&mut self, state: &str, entry: usize) -> u32 {
        let count = self.retry_counts.entry(format!("{state}#{entry}")).or_insert(0);
        *count += 1;
        *count
    }

    pub fn attempt_count(&self, state: &str) -> u32 {
        self.attempt_counts.get(state).copied().unwrap_or(0)
    }

    pub fn bump_attempt(&mut self, state: &str) -> u32 {
        let count = self.attempt_counts.entry(state.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// One run of a state machine.
pub struct Execution {
    /// Unique within the host.
    pub name: String,
    /// Immutable input snapshot, captured once at start.
    pub input: Value,
    /// The current data value; becomes the final output on completion.
    pub output: Value,
    pub status: ExecutionStatus,
    pub current_state: Option<String>,
    pub error: Option<String>,
    pub cause: Option<String>,
    /// One entry per state visited, in visitation order.
    pub history: Vec<HistoryEntry>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub context: ExecutionContext,
}

impl Execution {
    pub fn new(name: String, input: Value, context: ExecutionContext) -> Self {
        Self {
            name,
            output: input.clone(),
            input,
            status: ExecutionStatus::Running,
            current_state: None,
            error: None,
            cause: None,
            history: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            context,
        }
    }

    /// Append a history entry for a completed state.
    pub fn record_step(&mut self, state_name: &str, input: Value, output: Value) {
        self.history.push(HistoryEntry {
            state_name: state_name.to_string(),
            input,
            output,
            timestamp: Utc::now(),
        });
    }

    /// Mark the execution Succeeded and stamp the end time.
    pub fn finish_success(&mut self) {
        self.status = ExecutionStatus::Succeeded;
        self.ended_at = Some(Utc::now());
    }

    /// Mark the execution Failed with the given codes and stamp the end
    /// time.
    pub fn finish_failure(&mut self, error: String, cause: String) {
        self.status = ExecutionStatus::Failed;
        self.error = Some(error);
        self.cause = Some(cause);
        self.ended_at = Some(Utc::now());
    }

    /// Wall-clock duration in seconds, to `ended_at` for terminal
    /// executions and to now otherwise.
    pub fn execution_time(&self) -> f64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// The serializable view of this execution.
    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            name: self.name.clone(),
            status: self.status,
            current_state: self.current_state.clone(),
            input: self.input.clone(),
            output: self.output.clone(),
            error: self.error.clone(),
            cause: self.cause.clone(),
            start_time: self.started_at,
            end_time: self.ended_at,
            execution_time: self.execution_time(),
            history: self.history.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! The task-resource callout boundary.
//!
//! Hosts supply a `ResourceExecutor` to give Task states real behavior;
//! without one, the engine synthesizes a canonical simulated result. The
//! trait is object-safe via boxed futures so a single `Arc<dyn
//! ResourceExecutor>` can travel on the execution context.

use std::future::Future;
use std::pin::Pin;

use chrono::Utc;
use serde_json::{Value, json};
use stateflow_types::error::ExecutionError;
use uuid::Uuid;

/// Future type returned by executor invocations.
pub type InvokeFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, ExecutionError>> + Send + 'a>>;

/// A host-supplied callback invoked for each Task attempt.
///
/// `resource` is an opaque identifier passed through from the
/// definition; `input` is the evaluated parameters value. Failures
/// should be reported as `ExecutionError::TaskFailed` with a
/// host-defined class so retry/catch policies can match on it.
pub trait ResourceExecutor: Send + Sync {
    fn invoke<'a>(
        &'a self,
        resource: &'a str,
        input: &'a Value,
        credentials: Option<&'a str>,
    ) -> InvokeFuture<'a>;
}

// ---------------------------------------------------------------------------
// Closure adapter
// ---------------------------------------------------------------------------

/// Wraps a plain closure as a `ResourceExecutor`.
pub struct FnExecutor<F>(F);

impl<F> FnExecutor<F>
where
    F: Fn(&str, &Value, Option<&str>) -> Result<Value, ExecutionError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ResourceExecutor for FnExecutor<F>
where
    F: Fn(&str, &Value, Option<&str>) -> Result<Value, ExecutionError> + Send + Sync,
{
    fn invoke<'a>(
        &'a self,
        resource: &'a str,
        input: &'a Value,
        credentials: Option<&'a str>,
    ) -> InvokeFuture<'a> {
        Box::pin(async move { (self.0)(resource, input, credentials) })
    }
}

// ---------------------------------------------------------------------------
// Simulated executor
// ---------------------------------------------------------------------------

/// The fallback executor used when the host registers none: returns the
/// canonical stub result describing the request.
pub struct SimulatedExecutor;

impl ResourceExecutor for SimulatedExecutor {
    fn invoke<'a>(
        &'a self,
        resource: &'a str,
        input: &'a Value,
        _credentials: Option<&'a str>,
    ) -> InvokeFuture<'a> {
        Box::pin(async move {
            tracing::debug!(resource, "no executor registered, simulating task result");
            Ok(json!({
                "task_result": "completed",
                "resource": resource,
                "input_received": input,
                "timestamp": Utc::now().timestamp(),
                "execution_id": Uuid::new_v4().to_string(),
                "simulated": true,
            }))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

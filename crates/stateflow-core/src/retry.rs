//! Retry and catch policy matching.
//!
//! Entries are consulted in declared order; the first match wins. Retry
//! additionally requires the per-entry attempt count (tracked on the
//! execution context) to be below `MaxAttempts`. Backoff for the n-th
//! attempt (1-indexed) is `min(IntervalSeconds * BackoffRate^(n-1),
//! MaxDelay)`.

use std::time::Duration;

use stateflow_types::definition::{CatchPolicy, RetryPolicy};
use stateflow_types::error::ExecutionError;

/// Match one `ErrorEquals` entry against an error.
///
/// `States.ALL` matches anything; `States.Timeout` matches the deadline
/// sentinel only; `States.TaskFailed` matches any non-timeout error;
/// `States.Permissions` matches permission-flavored errors. Any other
/// literal matches on exact class equality or on substring containment
/// in the message.
pub fn error_matches(pattern: &str, err: &ExecutionError) -> bool {
    match pattern {
        "States.ALL" => true,
        "States.Timeout" => matches!(err, ExecutionError::TaskTimeout(_)),
        "States.TaskFailed" => !matches!(err, ExecutionError::TaskTimeout(_)),
        "States.Permissions" => {
            err.cause_text().to_lowercase().contains("permission")
                || err.error_name().to_lowercase().contains("permission")
        }
        literal => err.error_name() == literal || err.cause_text().contains(literal),
    }
}

/// Find the first retry entry that matches `err` and still has attempts
/// left. `taken` reports how many retries entry `i` has already consumed.
pub fn find_retry<'a>(
    policies: &'a [RetryPolicy],
    err: &ExecutionError,
    taken: impl Fn(usize) -> u32,
) -> Option<(usize, &'a RetryPolicy)> {
    if !err.retry_eligible() {
        return None;
    }
    policies.iter().enumerate().find(|(idx, policy)| {
        policy.error_equals.iter().any(|p| error_matches(p, err)) && taken(*idx) < policy.max_attempts
    })
}

/// Find the first catch entry that matches `err`.
pub fn find_catch<'a>(policies: &'a [CatchPolicy], err: &ExecutionError) -> Option<&'a CatchPolicy> {
    if !err.retry_eligible() {
        return None;
    }
    policies
        .iter()
        .find(|policy| policy.error_equals.iter().any(|p| error_matches(p, err)))
}

/// Delay before the n-th retry attempt (1-indexed), capped at `MaxDelay`.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let raw = policy.interval_seconds as f64 * policy.backoff_rate.powi(exponent as i32);
    let capped = raw.min(policy.max_delay as f64).max(0.0);
    Duration::from_secs_f64(capped)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

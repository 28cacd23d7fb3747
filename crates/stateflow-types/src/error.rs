//! Error taxonomy for stateflow executions.
//!
//! Every failure surfaced on an execution record maps to one
//! `ExecutionError` variant. `error_name()` yields the short class string
//! recorded as `error` (and matched by retry/catch policies);
//! `cause_text()` yields the human-readable `cause`.

use thiserror::Error;

/// Errors raised while building or running a state machine.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// Malformed definition at build time. Never raised during execution.
    #[error("definition error: {0}")]
    Definition(String),

    /// A transition targeted a state that does not exist.
    #[error("state '{0}' not found")]
    StateNotFound(String),

    /// A non-terminal state produced no transition target.
    #[error("no next state after '{0}'")]
    NoNextState(String),

    /// A Choice state had no matching rule and no Default.
    #[error("no choice rule matched in '{0}'")]
    NoChoiceMatched(String),

    /// A Task breached its deadline.
    #[error("task timed out: {0}")]
    TaskTimeout(String),

    /// The resource executor raised a host-defined error class.
    #[error("{class}: {cause}")]
    TaskFailed { class: String, cause: String },

    /// A Parallel branch failed.
    #[error("branch {index} failed: {cause}")]
    BranchFailed { index: usize, cause: String },

    /// A Wait state's duration could not be computed.
    #[error("invalid wait configuration: {0}")]
    InvalidWaitConfig(String),

    /// The host cancelled the execution.
    #[error("execution cancelled: {0}")]
    Cancelled(String),
}

impl ExecutionError {
    /// The short error-class name recorded on the execution record and
    /// matched against `ErrorEquals` entries. For executor failures this
    /// is the host-defined class.
    pub fn error_name(&self) -> &str {
        match self {
            ExecutionError::Definition(_) => "DefinitionError",
            ExecutionError::StateNotFound(_) => "StateNotFound",
            ExecutionError::NoNextState(_) => "NoNextState",
            ExecutionError::NoChoiceMatched(_) => "NoChoiceMatched",
            ExecutionError::TaskTimeout(_) => "TaskTimeout",
            ExecutionError::TaskFailed { class, .. } => class,
            ExecutionError::BranchFailed { .. } => "BranchFailed",
            ExecutionError::InvalidWaitConfig(_) => "InvalidWaitConfig",
            ExecutionError::Cancelled(_) => "ExecutionCancelled",
        }
    }

    /// The human-readable cause recorded on the execution record. For
    /// executor failures this is the raw message without the class prefix.
    pub fn cause_text(&self) -> String {
        match self {
            ExecutionError::TaskFailed { cause, .. } => cause.clone(),
            ExecutionError::BranchFailed { cause, .. } => cause.clone(),
            ExecutionError::TaskTimeout(msg) => msg.clone(),
            ExecutionError::Definition(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Whether retry/catch policies may consume this error. Definition,
    /// transition, and wait-configuration errors are always fatal.
    pub fn retry_eligible(&self) -> bool {
        matches!(
            self,
            ExecutionError::TaskTimeout(_)
                | ExecutionError::TaskFailed { .. }
                | ExecutionError::BranchFailed { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names() {
        assert_eq!(
            ExecutionError::Definition("bad".into()).error_name(),
            "DefinitionError"
        );
        assert_eq!(
            ExecutionError::TaskTimeout("deadline".into()).error_name(),
            "TaskTimeout"
        );
        let host = ExecutionError::TaskFailed {
            class: "RuntimeError".into(),
            cause: "boom".into(),
        };
        assert_eq!(host.error_name(), "RuntimeError");
        assert_eq!(host.cause_text(), "boom");
    }

    #[test]
    fn test_display_includes_detail() {
        let err = ExecutionError::StateNotFound("Missing".into());
        assert!(err.to_string().contains("Missing"));

        let err = ExecutionError::BranchFailed {
            index: 1,
            cause: "child exploded".into(),
        };
        assert!(err.to_string().contains("branch 1"));
        assert_eq!(err.cause_text(), "child exploded");
    }

    #[test]
    fn test_retry_eligibility() {
        assert!(ExecutionError::TaskTimeout("t".into()).retry_eligible());
        assert!(
            ExecutionError::TaskFailed {
                class: "E".into(),
                cause: "c".into()
            }
            .retry_eligible()
        );
        assert!(
            ExecutionError::BranchFailed {
                index: 0,
                cause: "c".into()
            }
            .retry_eligible()
        );
        assert!(!ExecutionError::NoNextState("s".into()).retry_eligible());
        assert!(!ExecutionError::Definition("d".into()).retry_eligible());
    }
}

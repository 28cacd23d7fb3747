//! Execution tracking types: status, history entries, and the serialized
//! execution snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Overall status of an execution. Exactly one terminal reason applies:
/// Succeeded (entered a Succeed or End-true non-Fail state) or Failed
/// (Fail state, uncaught error, or dead-end).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// One entry per state visited, appended strictly in visitation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Name of the state that ran.
    pub state_name: String,
    /// The data value the state received.
    pub input: Value,
    /// The data value the state produced.
    pub output: Value,
    /// When the state was entered.
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// The serialized form of an execution, for hosts that persist or display
/// run state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub name: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<String>,
    pub input: Value,
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Wall-clock duration in seconds; measured to `end_time` for
    /// terminal executions, to now otherwise.
    pub execution_time: f64,
    pub history: Vec<HistoryEntry>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

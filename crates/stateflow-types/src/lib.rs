//! Shared domain types for stateflow.
//!
//! This crate contains the definition-document model (state machines, the
//! seven state variants, retry/catch policies, choice rules), the execution
//! tracking types (status, history, snapshot), and the error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, chrono,
//! thiserror.

pub mod definition;
pub mod error;
pub mod execution;

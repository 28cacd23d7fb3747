//! Observability setup for stateflow hosts.
//!
//! The engine itself only emits `tracing` events (state entry, retries,
//! heartbeats, terminal transitions); this crate installs a subscriber
//! for binaries that embed it.

pub mod tracing_setup;

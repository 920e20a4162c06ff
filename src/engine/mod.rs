// src/engine/mod.rs

//! Orchestration engine for cmdtrigger.
//!
//! This module ties together:
//! - the concurrency policy deciding whether a new run may start
//! - the lifecycle events emitted as runs start and finish
//! - the orchestrator that drives runs through the execution backend and
//!   routes events through the trigger router
//!
//! The pure decision logic lives in [`policy`]; the async state machine is
//! implemented in [`orchestrator`].

pub mod lifecycle;
pub mod orchestrator;
pub mod policy;

pub use lifecycle::{LifecyclePhase, SHUTDOWN_EVENT};
pub use orchestrator::{
    FireOutcome, Orchestrator, OrchestratorBuilder, OrchestratorSettings, ShutdownOptions,
    ShutdownSummary,
};
pub use policy::{ConcurrencyPolicy, NewRunDecision};

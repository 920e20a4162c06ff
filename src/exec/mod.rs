// src/exec/mod.rs

//! Execution layer.
//!
//! - [`backend`] provides the `ExecutionBackend` trait the orchestrator drives
//!   runs through, which tests replace with a fake implementation.
//! - [`process`] provides `LocalProcessBackend`, which runs commands with
//!   `tokio::process::Command`.

pub mod backend;
pub mod process;

pub use backend::{BackendCapability, BackendFuture, ExecutionBackend};
pub use process::{LocalProcessBackend, DEFAULT_GRACE_PERIOD};

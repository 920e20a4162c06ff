// src/errors.rs

//! Crate-wide error type and result alias.

use std::time::Duration;

use thiserror::Error;

use crate::types::RetriggerPolicy;

#[derive(Error, Debug)]
pub enum CmdTriggerError {
    #[error("Command not found: {0}")]
    DefinitionNotFound(String),

    #[error(
        "Command '{name}' is in its debounce window (elapsed: {:.1}ms, required: {}ms)",
        .elapsed.as_secs_f64() * 1000.0,
        .window.as_millis()
    )]
    DebounceRejected {
        name: String,
        window: Duration,
        elapsed: Duration,
    },

    #[error("Command '{name}' is at its concurrency limit ({active}/{limit}, policy {policy})")]
    ConcurrencyRejected {
        name: String,
        active: usize,
        limit: usize,
        policy: RetriggerPolicy,
    },

    #[error("Trigger cycle detected: {} -> {event}", .path.join(" -> "))]
    CycleDetected { event: String, path: Vec<String> },

    #[error("Backend failed to start command '{name}': {reason}")]
    BackendStartFailure { name: String, reason: String },

    #[error("Orchestrator is shutting down; operation rejected")]
    ShutdownRejected,

    #[error("Invalid command definition: {0}")]
    InvalidDefinition(String),

    #[error("Command already registered: {0}")]
    DuplicateDefinition(String),

    #[error("Unresolved variable '{variable}' in command '{name}'")]
    UnresolvedVariable { name: String, variable: String },

    #[error("Callback for '{event}' failed: {reason}")]
    Callback { event: String, reason: String },

    #[error("Timed out after {0:?} waiting for run to finish")]
    WaitTimedOut(Duration),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CmdTriggerError {
    /// True for rejections that leave the orchestrator untouched
    /// (debounce, concurrency limit, shutdown).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            CmdTriggerError::DebounceRejected { .. }
                | CmdTriggerError::ConcurrencyRejected { .. }
                | CmdTriggerError::ShutdownRejected
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CmdTriggerError>;

// src/command/definition.rs

//! Immutable command definitions and a builder for constructing them in code.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{CmdTriggerError, Result};
use crate::trigger::EventPattern;
use crate::types::{DebounceMode, RetriggerPolicy};

/// Canonical command name type used throughout the engine.
pub type CommandName = String;

/// Static description of one named command and the policy it runs under.
///
/// Definitions are registered with the orchestrator and are never mutated in
/// place; registering a definition with the same name replaces it.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandDefinition {
    pub name: CommandName,
    /// Command template. Placeholders are resolved by an
    /// [`InvocationResolver`](crate::command::InvocationResolver).
    pub command: String,
    /// Event patterns that start this command.
    pub triggers: Vec<String>,
    /// Event patterns that cancel active runs of this command.
    pub cancel_on_triggers: Vec<String>,
    /// Maximum number of concurrent runs; `0` means unlimited.
    pub max_concurrent: usize,
    pub on_retrigger: RetriggerPolicy,
    pub timeout: Option<Duration>,
    /// Minimum gap between runs. `Duration::ZERO` disables debouncing.
    pub debounce: Duration,
    pub debounce_mode: DebounceMode,
    /// When `false`, lifecycle events of this command skip cycle detection.
    pub loop_detection: bool,
    /// Number of completed runs kept in history. The latest result is
    /// tracked regardless.
    pub keep_history: usize,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl CommandDefinition {
    /// Start building a definition with default policy settings.
    pub fn builder(name: impl Into<String>, command: impl Into<String>) -> CommandDefinitionBuilder {
        CommandDefinitionBuilder::new(name, command)
    }

    /// Check the structural invariants of a definition.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CmdTriggerError::InvalidDefinition(
                "command name cannot be empty".to_string(),
            ));
        }
        if self.command.trim().is_empty() {
            return Err(CmdTriggerError::InvalidDefinition(format!(
                "command for '{}' cannot be empty",
                self.name
            )));
        }
        if let Some(timeout) = self.timeout {
            if timeout.is_zero() {
                return Err(CmdTriggerError::InvalidDefinition(format!(
                    "timeout for '{}' must be positive",
                    self.name
                )));
            }
        }
        for pattern in self.triggers.iter().chain(self.cancel_on_triggers.iter()) {
            EventPattern::new(pattern).map_err(|e| {
                CmdTriggerError::InvalidDefinition(format!(
                    "command '{}' has invalid trigger pattern '{}': {e}",
                    self.name, pattern
                ))
            })?;
        }
        if let Some(both) = self
            .triggers
            .iter()
            .find(|t| self.cancel_on_triggers.contains(t))
        {
            return Err(CmdTriggerError::InvalidDefinition(format!(
                "command '{}' lists '{}' in both triggers and cancel_on_triggers",
                self.name, both
            )));
        }
        Ok(())
    }

    /// Whether the command has a debounce window configured.
    pub fn is_debounced(&self) -> bool {
        !self.debounce.is_zero()
    }
}

/// Fluent builder for [`CommandDefinition`].
#[derive(Debug, Clone)]
pub struct CommandDefinitionBuilder {
    def: CommandDefinition,
}

impl CommandDefinitionBuilder {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            def: CommandDefinition {
                name: name.into(),
                command: command.into(),
                triggers: Vec::new(),
                cancel_on_triggers: Vec::new(),
                max_concurrent: 1,
                on_retrigger: RetriggerPolicy::default(),
                timeout: None,
                debounce: Duration::ZERO,
                debounce_mode: DebounceMode::default(),
                loop_detection: true,
                keep_history: 1,
                cwd: None,
                env: BTreeMap::new(),
            },
        }
    }

    pub fn trigger(mut self, pattern: impl Into<String>) -> Self {
        self.def.triggers.push(pattern.into());
        self
    }

    pub fn triggers<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.def.triggers.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn cancel_on(mut self, pattern: impl Into<String>) -> Self {
        self.def.cancel_on_triggers.push(pattern.into());
        self
    }

    pub fn max_concurrent(mut self, limit: usize) -> Self {
        self.def.max_concurrent = limit;
        self
    }

    pub fn on_retrigger(mut self, policy: RetriggerPolicy) -> Self {
        self.def.on_retrigger = policy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.def.timeout = Some(timeout);
        self
    }

    pub fn debounce(mut self, window: Duration, mode: DebounceMode) -> Self {
        self.def.debounce = window;
        self.def.debounce_mode = mode;
        self
    }

    pub fn loop_detection(mut self, enabled: bool) -> Self {
        self.def.loop_detection = enabled;
        self
    }

    pub fn keep_history(mut self, count: usize) -> Self {
        self.def.keep_history = count;
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.def.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.def.env.insert(key.into(), value.into());
        self
    }

    /// Validate and return the definition.
    pub fn build(self) -> Result<CommandDefinition> {
        self.def.validate()?;
        Ok(self.def)
    }
}

// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::command::{CommandDefinition, TemplateResolver};
use crate::engine::OrchestratorSettings;
use crate::types::{DebounceMode, RetriggerPolicy};

/// Configuration document as read from a TOML file.
///
/// ```toml
/// [settings]
/// cancel_grace_period_ms = 3000
///
/// [variables]
/// target = "debug"
///
/// [[command]]
/// name = "Build"
/// command = "cargo build --profile {{ target }}"
/// triggers = ["save"]
/// ```
///
/// All sections except `[[command]]` are optional.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub settings: SettingsSection,

    /// Global template variables.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    /// All `[[command]]` entries, in file order.
    #[serde(default, rename = "command")]
    pub commands: Vec<CommandConfig>,
}

/// `[settings]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SettingsSection {
    /// Time between SIGTERM and SIGKILL when cancelling a process.
    #[serde(default = "default_grace_period_ms")]
    pub cancel_grace_period_ms: u64,

    /// Prefix of lifecycle event names (`""` or `"command_"`).
    #[serde(default)]
    pub lifecycle_prefix: String,

    #[serde(default)]
    pub emit_finished_on_cancel: bool,

    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    #[serde(default = "default_true")]
    pub cancel_on_shutdown: bool,
}

fn default_grace_period_ms() -> u64 {
    3000
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    1
}

fn default_keep_history() -> usize {
    1
}

impl Default for SettingsSection {
    fn default() -> Self {
        Self {
            cancel_grace_period_ms: default_grace_period_ms(),
            lifecycle_prefix: String::new(),
            emit_finished_on_cancel: false,
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            cancel_on_shutdown: true,
        }
    }
}

impl SettingsSection {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_period_ms)
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            lifecycle_prefix: self.lifecycle_prefix.clone(),
            emit_finished_on_cancel: self.emit_finished_on_cancel,
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            cancel_on_shutdown: self.cancel_on_shutdown,
        }
    }
}

/// One `[[command]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    pub name: String,

    /// Command template; `{{ var }}` placeholders are resolved at run time.
    pub command: String,

    #[serde(default)]
    pub triggers: Vec<String>,

    #[serde(default)]
    pub cancel_on_triggers: Vec<String>,

    /// `0` means unlimited.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default)]
    pub on_retrigger: RetriggerPolicy,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub debounce_ms: u64,

    #[serde(default)]
    pub debounce_mode: DebounceMode,

    #[serde(default = "default_true")]
    pub loop_detection: bool,

    #[serde(default = "default_keep_history")]
    pub keep_history: usize,

    #[serde(default)]
    pub cwd: Option<PathBuf>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandConfig {
    /// Convert into an (unvalidated) definition.
    pub fn to_definition(&self) -> CommandDefinition {
        CommandDefinition {
            name: self.name.clone(),
            command: self.command.clone(),
            triggers: self.triggers.clone(),
            cancel_on_triggers: self.cancel_on_triggers.clone(),
            max_concurrent: self.max_concurrent,
            on_retrigger: self.on_retrigger,
            timeout: self.timeout_ms.map(Duration::from_millis),
            debounce: Duration::from_millis(self.debounce_ms),
            debounce_mode: self.debounce_mode,
            loop_detection: self.loop_detection,
            keep_history: self.keep_history,
            cwd: self.cwd.clone(),
            env: self.env.clone(),
        }
    }
}

/// Validated configuration.
///
/// Constructed only through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub settings: SettingsSection,
    pub variables: BTreeMap<String, String>,
    definitions: Vec<CommandDefinition>,
    trigger_cycles: Vec<Vec<String>>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        settings: SettingsSection,
        variables: BTreeMap<String, String>,
        definitions: Vec<CommandDefinition>,
        trigger_cycles: Vec<Vec<String>>,
    ) -> Self {
        Self {
            settings,
            variables,
            definitions,
            trigger_cycles,
        }
    }

    /// Command definitions in file order.
    pub fn definitions(&self) -> &[CommandDefinition] {
        &self.definitions
    }

    pub fn definition(&self, name: &str) -> Option<&CommandDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    /// Groups of commands that can re-trigger each other through their
    /// lifecycle events. Reported, not rejected.
    pub fn trigger_cycles(&self) -> &[Vec<String>] {
        &self.trigger_cycles
    }

    /// Template resolver over `[variables]`.
    pub fn resolver(&self) -> TemplateResolver {
        TemplateResolver::new(self.variables.clone())
    }
}

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use cmdtrigger::config::{CommandConfig, ConfigFile, RawConfigFile, SettingsSection};
use cmdtrigger::engine::{Orchestrator, OrchestratorSettings};
use cmdtrigger::exec::ExecutionBackend;
use cmdtrigger::types::{DebounceMode, RetriggerPolicy};
use cmdtrigger::CommandDefinition;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                settings: SettingsSection::default(),
                variables: BTreeMap::new(),
                commands: Vec::new(),
            },
        }
    }

    pub fn with_command(mut self, command: CommandConfig) -> Self {
        self.config.commands.push(command);
        self
    }

    pub fn with_variable(mut self, key: &str, value: &str) -> Self {
        self.config
            .variables
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_lifecycle_prefix(mut self, prefix: &str) -> Self {
        self.config.settings.lifecycle_prefix = prefix.to_string();
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `CommandConfig`.
pub struct CommandConfigBuilder {
    command: CommandConfig,
}

impl CommandConfigBuilder {
    pub fn new(name: &str, cmd: &str) -> Self {
        Self {
            command: CommandConfig {
                name: name.to_string(),
                command: cmd.to_string(),
                triggers: Vec::new(),
                cancel_on_triggers: Vec::new(),
                max_concurrent: 1,
                on_retrigger: RetriggerPolicy::default(),
                timeout_ms: None,
                debounce_ms: 0,
                debounce_mode: DebounceMode::default(),
                loop_detection: true,
                keep_history: 1,
                cwd: None,
                env: BTreeMap::new(),
            },
        }
    }

    pub fn trigger(mut self, pattern: &str) -> Self {
        self.command.triggers.push(pattern.to_string());
        self
    }

    pub fn cancel_on(mut self, pattern: &str) -> Self {
        self.command.cancel_on_triggers.push(pattern.to_string());
        self
    }

    pub fn max_concurrent(mut self, limit: usize) -> Self {
        self.command.max_concurrent = limit;
        self
    }

    pub fn loop_detection(mut self, enabled: bool) -> Self {
        self.command.loop_detection = enabled;
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.command.timeout_ms = Some(ms);
        self
    }

    pub fn build(self) -> CommandConfig {
        self.command
    }
}

/// Orchestrator over `backend` with default settings and `defs` registered.
pub fn orchestrator(
    backend: Arc<dyn ExecutionBackend>,
    defs: Vec<CommandDefinition>,
) -> Orchestrator {
    orchestrator_with(backend, OrchestratorSettings::default(), defs)
}

pub fn orchestrator_with(
    backend: Arc<dyn ExecutionBackend>,
    settings: OrchestratorSettings,
    defs: Vec<CommandDefinition>,
) -> Orchestrator {
    Orchestrator::builder(backend)
        .settings(settings)
        .commands(defs)
        .build()
        .expect("Failed to build orchestrator from definitions")
}

/// Definition named `name` triggered by each of `triggers`.
pub fn def(name: &str, triggers: &[&str]) -> CommandDefinition {
    CommandDefinition::builder(name, format!("echo {name}"))
        .triggers(triggers.iter().copied())
        .build()
        .expect("Failed to build definition")
}

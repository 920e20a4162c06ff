// src/store/state.rs

//! Registry of definitions, active runs, history and debounce timestamps.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, Span};

use crate::command::{CommandDefinition, CommandName};
use crate::errors::{CmdTriggerError, Result};
use crate::run::{RunId, RunRecord};
use crate::store::ring::HistoryRing;
use crate::store::status::CommandStatus;
use crate::types::DebounceMode;

#[derive(Debug, Default)]
struct Timestamps {
    last_start: Option<Instant>,
    last_completion: Option<Instant>,
}

/// The single mutable source of truth for run bookkeeping.
///
/// The store performs no locking of its own. The orchestrator owns it behind
/// one mutex so every mutation happens inside a single critical section.
#[derive(Debug)]
pub struct RunStateStore {
    definitions: HashMap<CommandName, CommandDefinition>,
    /// Registration order of definition names.
    order: Vec<CommandName>,
    active: HashMap<CommandName, Vec<RunRecord>>,
    latest: HashMap<CommandName, RunRecord>,
    history: HashMap<CommandName, HistoryRing<RunRecord>>,
    timestamps: HashMap<CommandName, Timestamps>,
    span: Span,
}

impl Default for RunStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateStore {
    /// A store logging under the current span.
    pub fn new() -> Self {
        Self::with_span(Span::current())
    }

    pub fn with_span(span: Span) -> Self {
        Self {
            definitions: HashMap::new(),
            order: Vec::new(),
            active: HashMap::new(),
            latest: HashMap::new(),
            history: HashMap::new(),
            timestamps: HashMap::new(),
            span,
        }
    }

    // ---------------------------------------------------------------------
    // Definitions
    // ---------------------------------------------------------------------

    /// Add a new definition. Fails if the name is taken.
    pub fn register(&mut self, def: CommandDefinition) -> Result<()> {
        def.validate()?;
        if self.definitions.contains_key(&def.name) {
            return Err(CmdTriggerError::DuplicateDefinition(def.name));
        }
        self.insert_definition(def);
        Ok(())
    }

    /// Insert or replace a definition, returning the previous one.
    ///
    /// A replaced definition moves to the end of the registration order.
    /// Its history is kept and resized to the new retention count.
    pub fn replace(&mut self, def: CommandDefinition) -> Result<Option<CommandDefinition>> {
        def.validate()?;
        let previous = self.definitions.remove(&def.name);
        self.order.retain(|n| n != &def.name);
        self.insert_definition(def);
        Ok(previous)
    }

    fn insert_definition(&mut self, def: CommandDefinition) {
        let name = def.name.clone();
        self.history
            .entry(name.clone())
            .and_modify(|ring| ring.resize(def.keep_history))
            .or_insert_with(|| HistoryRing::new(def.keep_history));
        self.order.push(name.clone());
        self.definitions.insert(name.clone(), def);
        debug!(parent: &self.span, command = %name, "definition stored");
    }

    /// Remove a definition together with its history and debounce state.
    ///
    /// Active runs stay tracked until they complete.
    pub fn remove(&mut self, name: &str) -> Option<CommandDefinition> {
        let def = self.definitions.remove(name)?;
        self.order.retain(|n| n != name);
        self.history.remove(name);
        self.latest.remove(name);
        self.timestamps.remove(name);
        Some(def)
    }

    pub fn definition(&self, name: &str) -> Option<&CommandDefinition> {
        self.definitions.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&CommandDefinition> {
        self.definitions
            .get(name)
            .ok_or_else(|| CmdTriggerError::DefinitionNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Command names in registration order.
    pub fn names(&self) -> Vec<CommandName> {
        self.order.clone()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &CommandDefinition> {
        self.order.iter().filter_map(|n| self.definitions.get(n))
    }

    // ---------------------------------------------------------------------
    // Runs
    // ---------------------------------------------------------------------

    pub fn add_active(&mut self, record: RunRecord) {
        self.active
            .entry(record.command_name().to_string())
            .or_default()
            .push(record);
    }

    /// Move a run from the active set into latest/history.
    ///
    /// Returns `false` when the run was not active, so completion bookkeeping
    /// happens at most once per run.
    pub fn complete_run(&mut self, record: &RunRecord) -> bool {
        let name = record.command_name();
        let Some(runs) = self.active.get_mut(name) else {
            return false;
        };
        let Some(pos) = runs.iter().position(|r| r.ptr_eq(record)) else {
            return false;
        };
        runs.remove(pos);
        if runs.is_empty() {
            self.active.remove(name);
        }

        self.timestamps.entry(name.to_string()).or_default().last_completion =
            Some(Instant::now());
        self.push_history(record.clone());

        debug!(
            parent: &self.span,
            command = %name,
            run_id = %record.run_id().short(),
            state = %record.state(),
            "run moved to history"
        );
        true
    }

    /// Record an already finalized run (e.g. reloaded from disk).
    pub fn add_to_history(&mut self, record: RunRecord) -> Result<()> {
        if !record.is_finalized() {
            return Err(CmdTriggerError::InvalidDefinition(format!(
                "run {} of '{}' is not finalized",
                record.run_id(),
                record.command_name()
            )));
        }
        self.push_history(record);
        Ok(())
    }

    fn push_history(&mut self, record: RunRecord) {
        let name = record.command_name().to_string();
        // Runs of removed commands leave no trace.
        let Some(ring) = self.history.get_mut(&name) else {
            return;
        };
        ring.push(record.clone());
        self.latest.insert(name, record);
    }

    pub fn active_runs(&self, name: &str) -> Vec<RunRecord> {
        self.active.get(name).cloned().unwrap_or_default()
    }

    pub fn active_count(&self, name: &str) -> usize {
        self.active.get(name).map_or(0, Vec::len)
    }

    /// Every active run, grouped by command in registration order.
    pub fn all_active(&self) -> Vec<RunRecord> {
        let mut runs: Vec<RunRecord> = self
            .order
            .iter()
            .filter_map(|n| self.active.get(n))
            .flatten()
            .cloned()
            .collect();
        // Runs of removed definitions are still tracked.
        for (name, list) in &self.active {
            if !self.definitions.contains_key(name) {
                runs.extend(list.iter().cloned());
            }
        }
        runs
    }

    pub fn find_active(&self, run_id: RunId) -> Option<RunRecord> {
        self.active
            .values()
            .flatten()
            .find(|r| r.run_id() == run_id)
            .cloned()
    }

    pub fn latest(&self, name: &str) -> Option<RunRecord> {
        self.latest.get(name).cloned()
    }

    /// Retained completed runs, oldest first.
    pub fn history(&self, name: &str) -> Vec<RunRecord> {
        self.history
            .get(name)
            .map(HistoryRing::to_vec)
            .unwrap_or_default()
    }

    pub fn status(&self, name: &str) -> Result<CommandStatus> {
        self.require(name)?;
        let active = self.active.get(name).map(Vec::as_slice).unwrap_or(&[]);
        Ok(CommandStatus::derive(name, active, self.latest.get(name)))
    }

    // ---------------------------------------------------------------------
    // Debounce
    // ---------------------------------------------------------------------

    /// Check whether `name` may start now under its debounce window.
    pub fn check_debounce(
        &self,
        name: &str,
        window: Duration,
        mode: DebounceMode,
        now: Instant,
    ) -> Result<()> {
        if window.is_zero() {
            return Ok(());
        }
        let Some(ts) = self.timestamps.get(name) else {
            return Ok(());
        };
        let reference = match mode {
            DebounceMode::Start => ts.last_start,
            DebounceMode::Completion => ts.last_completion,
        };
        let Some(reference) = reference else {
            return Ok(());
        };

        let elapsed = now.saturating_duration_since(reference);
        if elapsed < window {
            return Err(CmdTriggerError::DebounceRejected {
                name: name.to_string(),
                window,
                elapsed,
            });
        }
        Ok(())
    }

    pub fn record_start(&mut self, name: &str, now: Instant) {
        self.timestamps.entry(name.to_string()).or_default().last_start = Some(now);
    }
}

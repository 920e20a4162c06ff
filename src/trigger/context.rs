// src/trigger/context.rs

//! Cycle-prevention context carried through one trigger propagation.

use std::collections::HashSet;

use crate::errors::{CmdTriggerError, Result};

/// Events visited along one propagation branch.
///
/// `seen` gives O(1) membership checks; `history` keeps the same events in
/// visiting order for breadcrumbs and run trigger chains. A context is never
/// shared between branches: extending it always returns a new value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerContext {
    seen: HashSet<String>,
    history: Vec<String>,
}

impl TriggerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn has_seen(&self, event: &str) -> bool {
        self.seen.contains(event)
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Child context that records `event`, or `CycleDetected` if the branch
    /// already visited it.
    pub fn enter(&self, event: &str) -> Result<TriggerContext> {
        if self.seen.contains(event) {
            return Err(CmdTriggerError::CycleDetected {
                event: event.to_string(),
                path: self.history.clone(),
            });
        }
        let mut child = self.clone();
        child.seen.insert(event.to_string());
        child.history.push(event.to_string());
        Ok(child)
    }

    /// Child context that appends `event` to the breadcrumb history without
    /// recording membership, so later visits are not treated as cycles.
    pub fn enter_untracked(&self, event: &str) -> TriggerContext {
        let mut child = self.clone();
        child.history.push(event.to_string());
        child
    }
}

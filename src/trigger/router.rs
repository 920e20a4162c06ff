// src/trigger/router.rs

//! Pattern indexes mapping event names to commands and callbacks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn, Span};

use crate::command::{CommandDefinition, CommandName};
use crate::errors::{CmdTriggerError, Result};
use crate::trigger::callback::{CallbackId, TriggerCallback, TriggerEvent};
use crate::trigger::context::TriggerContext;
use crate::trigger::pattern::EventPattern;

/// Everything one event resolves to, already in dispatch order.
#[derive(Clone, Default)]
pub struct Dispatch {
    /// Commands whose cancel-trigger set matches.
    pub cancel: Vec<CommandName>,
    /// Exact-match callbacks, then wildcard-match callbacks.
    pub callbacks: Vec<(CallbackId, Arc<dyn TriggerCallback>)>,
    /// Exact-match command triggers, then wildcard-match command triggers.
    pub commands: Vec<CommandName>,
}

impl Dispatch {
    pub fn is_empty(&self) -> bool {
        self.cancel.is_empty() && self.callbacks.is_empty() && self.commands.is_empty()
    }
}

/// Insertion-ordered pattern table.
///
/// Exact patterns are hashed by name; wildcard patterns are scanned in
/// registration order. Every entry carries a global sequence number so the
/// relative registration order survives across both halves.
struct PatternTable<T> {
    exact: HashMap<String, Vec<(u64, T)>>,
    wildcard: Vec<(u64, EventPattern, T)>,
}

impl<T: Clone> PatternTable<T> {
    fn new() -> Self {
        Self {
            exact: HashMap::new(),
            wildcard: Vec::new(),
        }
    }

    fn insert(&mut self, seq: u64, pattern: EventPattern, value: T) {
        if pattern.is_wildcard() {
            self.wildcard.push((seq, pattern, value));
        } else {
            self.exact
                .entry(pattern.as_str().to_string())
                .or_default()
                .push((seq, value));
        }
    }

    fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        for entries in self.exact.values_mut() {
            entries.retain(|(_, v)| keep(v));
        }
        self.exact.retain(|_, entries| !entries.is_empty());
        self.wildcard.retain(|(_, _, v)| keep(v));
    }

    fn exact_matches(&self, event: &str) -> impl Iterator<Item = &T> {
        self.exact
            .get(event)
            .into_iter()
            .flat_map(|entries| entries.iter().map(|(_, v)| v))
    }

    fn wildcard_matches<'a>(&'a self, event: &'a str) -> impl Iterator<Item = &'a T> + 'a {
        self.wildcard
            .iter()
            .filter(move |(_, p, _)| p.matches(event))
            .map(|(_, _, v)| v)
    }
}

/// Maps event names onto the commands and callbacks that react to them.
pub struct TriggerRouter {
    span: Span,
    commands: PatternTable<CommandName>,
    cancels: PatternTable<CommandName>,
    callbacks: PatternTable<(CallbackId, Arc<dyn TriggerCallback>)>,
    next_seq: u64,
}

impl TriggerRouter {
    pub fn new(span: Span) -> Self {
        Self {
            span,
            commands: PatternTable::new(),
            cancels: PatternTable::new(),
            callbacks: PatternTable::new(),
            next_seq: 0,
        }
    }

    fn seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Index the trigger and cancel-trigger patterns of a definition.
    ///
    /// Any previous routes for the same command are dropped first.
    pub fn add_command(&mut self, def: &CommandDefinition) -> Result<()> {
        let triggers = compile_all(&def.name, &def.triggers)?;
        let cancels = compile_all(&def.name, &def.cancel_on_triggers)?;

        self.remove_command(&def.name);

        for pattern in triggers {
            let seq = self.seq();
            self.commands.insert(seq, pattern, def.name.clone());
        }
        for pattern in cancels {
            let seq = self.seq();
            self.cancels.insert(seq, pattern, def.name.clone());
        }

        debug!(
            parent: &self.span,
            command = %def.name,
            triggers = ?def.triggers,
            cancel_on = ?def.cancel_on_triggers,
            "indexed command triggers"
        );
        Ok(())
    }

    pub fn remove_command(&mut self, name: &str) {
        self.commands.retain(|n| n != name);
        self.cancels.retain(|n| n != name);
    }

    pub fn add_callback(
        &mut self,
        pattern: &str,
        callback: Arc<dyn TriggerCallback>,
    ) -> Result<CallbackId> {
        let compiled = EventPattern::new(pattern).map_err(|e| {
            CmdTriggerError::InvalidDefinition(format!("invalid callback pattern '{pattern}': {e}"))
        })?;
        let seq = self.seq();
        let id = CallbackId(seq);
        self.callbacks.insert(seq, compiled, (id, callback));
        debug!(parent: &self.span, %pattern, callback = %id, "registered callback");
        Ok(id)
    }

    pub fn remove_callback(&mut self, id: CallbackId) -> bool {
        let mut removed = false;
        self.callbacks.retain(|(cb_id, _)| {
            let keep = *cb_id != id;
            removed |= !keep;
            keep
        });
        removed
    }

    /// Commands triggered by `event`: exact matches first, then wildcard
    /// matches, each in registration order, without duplicates.
    pub fn commands_for(&self, event: &str) -> Vec<CommandName> {
        ordered_unique(
            self.commands.exact_matches(event),
            self.commands.wildcard_matches(event),
        )
    }

    /// Commands whose active runs `event` cancels.
    pub fn cancellations_for(&self, event: &str) -> Vec<CommandName> {
        ordered_unique(
            self.cancels.exact_matches(event),
            self.cancels.wildcard_matches(event),
        )
    }

    pub fn callbacks_for(&self, event: &str) -> Vec<(CallbackId, Arc<dyn TriggerCallback>)> {
        let mut seen = HashSet::new();
        self.callbacks
            .exact_matches(event)
            .chain(self.callbacks.wildcard_matches(event))
            .filter(|(id, _)| seen.insert(*id))
            .cloned()
            .collect()
    }

    /// Resolve one event into its full dispatch plan.
    pub fn route(&self, event: &str) -> Dispatch {
        let dispatch = Dispatch {
            cancel: self.cancellations_for(event),
            callbacks: self.callbacks_for(event),
            commands: self.commands_for(event),
        };
        if dispatch.is_empty() {
            debug!(parent: &self.span, %event, "no subscribers for event");
        }
        dispatch
    }

    pub fn has_subscribers(&self, event: &str) -> bool {
        !self.route(event).is_empty()
    }

    /// Cycle check for `event` under `ctx`.
    ///
    /// `tracked = false` skips the check and does not record membership
    /// (used for commands that opted out of loop detection).
    pub fn enter(&self, ctx: &TriggerContext, event: &str, tracked: bool) -> Result<TriggerContext> {
        if !tracked {
            return Ok(ctx.enter_untracked(event));
        }
        ctx.enter(event).inspect_err(|e| {
            warn!(parent: &self.span, %event, path = ?ctx.history(), "{e}");
        })
    }
}

/// Invoke callbacks in order, logging failures under `span`.
///
/// With `fail_fast`, stops at the first failure. Otherwise every callback
/// runs and all failures are returned. No locks may be held by the caller:
/// callbacks are free to call back into the orchestrator.
pub fn invoke_callbacks(
    span: &Span,
    callbacks: &[(CallbackId, Arc<dyn TriggerCallback>)],
    event: &TriggerEvent,
    fail_fast: bool,
) -> Vec<CmdTriggerError> {
    let mut errors = Vec::new();
    for (id, cb) in callbacks {
        if let Err(e) = cb.on_event(event) {
            warn!(
                parent: span,
                event = %event.name,
                callback = %id,
                error = %e,
                "callback failed"
            );
            errors.push(CmdTriggerError::Callback {
                event: event.name.clone(),
                reason: format!("{e:#}"),
            });
            if fail_fast {
                break;
            }
        }
    }
    errors
}

fn compile_all(command: &str, patterns: &[String]) -> Result<Vec<EventPattern>> {
    let mut unique = HashSet::new();
    patterns
        .iter()
        .filter(|p| unique.insert(p.as_str()))
        .map(|p| {
            EventPattern::new(p.as_str()).map_err(|e| {
                CmdTriggerError::InvalidDefinition(format!(
                    "command '{command}' has invalid trigger pattern '{p}': {e}"
                ))
            })
        })
        .collect()
}

fn ordered_unique<'a>(
    exact: impl Iterator<Item = &'a CommandName>,
    wildcard: impl Iterator<Item = &'a CommandName>,
) -> Vec<CommandName> {
    let mut seen = HashSet::new();
    exact
        .chain(wildcard)
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect()
}

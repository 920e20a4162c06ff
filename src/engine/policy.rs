// src/engine/policy.rs

//! Concurrency arbitration for new runs.
//!
//! This is a pure decision function. It never touches the store or the
//! backend; the orchestrator applies the decision.

use crate::command::CommandDefinition;
use crate::run::RunRecord;
use crate::types::RetriggerPolicy;

/// Result of asking whether a new run may start.
#[derive(Debug, Clone)]
pub struct NewRunDecision {
    pub allow: bool,
    /// Active runs that must be cancelled before the new run starts.
    pub to_cancel: Vec<RunRecord>,
}

impl NewRunDecision {
    fn allow() -> Self {
        Self {
            allow: true,
            to_cancel: Vec::new(),
        }
    }

    fn deny() -> Self {
        Self {
            allow: false,
            to_cancel: Vec::new(),
        }
    }
}

/// Stateless policy deciding between allow, deny and cancel-existing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcurrencyPolicy;

impl ConcurrencyPolicy {
    /// Decide whether a new run of `def` may start given its active runs.
    ///
    /// - Below the limit (or unlimited when `max_concurrent == 0`): allow.
    /// - At the limit with `CancelAndRestart`: allow and cancel every active run.
    /// - At the limit with `Ignore`: deny.
    pub fn decide(def: &CommandDefinition, active: &[RunRecord]) -> NewRunDecision {
        if def.max_concurrent == 0 || active.len() < def.max_concurrent {
            return NewRunDecision::allow();
        }
        match def.on_retrigger {
            RetriggerPolicy::CancelAndRestart => NewRunDecision {
                allow: true,
                to_cancel: active.to_vec(),
            },
            RetriggerPolicy::Ignore => NewRunDecision::deny(),
        }
    }
}

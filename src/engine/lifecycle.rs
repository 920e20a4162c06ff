// src/engine/lifecycle.rs

//! Names of the events the engine emits on its own.

use std::fmt;

use crate::run::RunState;

/// Emitted once when shutdown begins.
pub const SHUTDOWN_EVENT: &str = "shutdown";

/// Run lifecycle phases that produce auto-events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    Started,
    Success,
    Failed,
    Cancelled,
    /// Composite phase after `Success` or `Failed` (and optionally
    /// `Cancelled`).
    Finished,
}

impl LifecyclePhase {
    pub const ALL: [LifecyclePhase; 5] = [
        LifecyclePhase::Started,
        LifecyclePhase::Success,
        LifecyclePhase::Failed,
        LifecyclePhase::Cancelled,
        LifecyclePhase::Finished,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LifecyclePhase::Started => "started",
            LifecyclePhase::Success => "success",
            LifecyclePhase::Failed => "failed",
            LifecyclePhase::Cancelled => "cancelled",
            LifecyclePhase::Finished => "finished",
        }
    }

    /// Event name for `command` under `prefix`, e.g. `success:Build` or
    /// `command_success:Build`.
    pub fn event_name(self, prefix: &str, command: &str) -> String {
        format!("{prefix}{}:{command}", self.as_str())
    }

    /// Phases emitted when a run ends in `state`, in emission order.
    pub fn completion_batch(state: RunState, finished_on_cancel: bool) -> Vec<LifecyclePhase> {
        match state {
            RunState::Success => vec![LifecyclePhase::Success, LifecyclePhase::Finished],
            RunState::Failed => vec![LifecyclePhase::Failed, LifecyclePhase::Finished],
            RunState::Cancelled if finished_on_cancel => {
                vec![LifecyclePhase::Cancelled, LifecyclePhase::Finished]
            }
            RunState::Cancelled => vec![LifecyclePhase::Cancelled],
            RunState::Pending | RunState::Running => Vec::new(),
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

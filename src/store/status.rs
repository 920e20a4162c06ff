// src/store/status.rs

use std::fmt;

use serde::Serialize;

use crate::run::{RunRecord, RunState};

/// Summary state of a command derived from its active and latest runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    NeverRun,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl StatusState {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusState::NeverRun => "never_run",
            StatusState::Running => "running",
            StatusState::Success => "success",
            StatusState::Failed => "failed",
            StatusState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only projection of one command's run state.
#[derive(Debug, Clone)]
pub struct CommandStatus {
    pub name: String,
    pub state: StatusState,
    pub active_count: usize,
    /// Most recent run: the newest active run if any, otherwise the latest
    /// completed one.
    pub last_run: Option<RunRecord>,
}

impl CommandStatus {
    pub(crate) fn derive(
        name: &str,
        active: &[RunRecord],
        latest: Option<&RunRecord>,
    ) -> Self {
        let state = if !active.is_empty() {
            StatusState::Running
        } else {
            match latest.map(RunRecord::state) {
                None => StatusState::NeverRun,
                Some(RunState::Success) => StatusState::Success,
                Some(RunState::Cancelled) => StatusState::Cancelled,
                Some(_) => StatusState::Failed,
            }
        };

        CommandStatus {
            name: name.to_string(),
            state,
            active_count: active.len(),
            last_run: active.last().or(latest).cloned(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == StatusState::Running
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Behaviour when a command is triggered while it is already at its
/// concurrency limit.
///
/// - `CancelAndRestart`: cancel every active run of the command, then start
///   the new one (default behaviour).
/// - `Ignore`: keep the active runs and reject the new trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetriggerPolicy {
    CancelAndRestart,
    Ignore,
}

impl Default for RetriggerPolicy {
    fn default() -> Self {
        RetriggerPolicy::CancelAndRestart
    }
}

impl fmt::Display for RetriggerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetriggerPolicy::CancelAndRestart => f.write_str("cancel_and_restart"),
            RetriggerPolicy::Ignore => f.write_str("ignore"),
        }
    }
}

impl FromStr for RetriggerPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cancel_and_restart" | "cancel-and-restart" => Ok(RetriggerPolicy::CancelAndRestart),
            "ignore" => Ok(RetriggerPolicy::Ignore),
            other => Err(format!(
                "invalid on_retrigger: {other} (expected \"cancel_and_restart\" or \"ignore\")"
            )),
        }
    }
}

/// Which timestamp a command's debounce window is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebounceMode {
    /// Measure from the last accepted run start.
    #[serde(alias = "on_start")]
    Start,
    /// Measure from the last run completion.
    #[serde(alias = "on_completion")]
    Completion,
}

impl Default for DebounceMode {
    fn default() -> Self {
        DebounceMode::Start
    }
}

impl FromStr for DebounceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "start" | "on_start" => Ok(DebounceMode::Start),
            "completion" | "on_completion" => Ok(DebounceMode::Completion),
            other => Err(format!(
                "invalid debounce_mode: {other} (expected \"start\" or \"completion\")"
            )),
        }
    }
}

// src/run/record.rs

//! Mutable state of a single execution attempt.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, Span};
use uuid::Uuid;

use crate::command::ResolvedInvocation;
use crate::errors::{CmdTriggerError, Result};

/// Lifecycle state of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Success | RunState::Failed | RunState::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Success => "success",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identifier of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> String {
        let mut s = self.0.simple().to_string();
        s.truncate(8);
        s
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug)]
struct RunData {
    state: RunState,
    success: Option<bool>,
    output: String,
    error: Option<String>,
    comment: Option<String>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    started_instant: Option<Instant>,
    duration: Option<Duration>,
}

#[derive(Debug)]
struct RecordInner {
    run_id: RunId,
    command_name: String,
    trigger_chain: Vec<String>,
    invocation: Option<Arc<ResolvedInvocation>>,
    created_at: DateTime<Utc>,
    data: Mutex<RunData>,
    state_tx: watch::Sender<RunState>,
    /// Span current when the record was created; transitions log under it.
    span: Span,
}

/// One execution attempt of a command.
///
/// A `RunRecord` is a cheap, clonable reference. The execution flow (the
/// backend driving the run) is the only writer until one of the terminal
/// transitions is applied; after that every mutator is a no-op and the
/// record is read-only history.
#[derive(Clone)]
pub struct RunRecord {
    inner: Arc<RecordInner>,
}

impl RunRecord {
    pub fn new(
        command_name: impl Into<String>,
        trigger_chain: Vec<String>,
        invocation: Option<Arc<ResolvedInvocation>>,
    ) -> Self {
        let (state_tx, _) = watch::channel(RunState::Pending);
        Self {
            inner: Arc::new(RecordInner {
                run_id: RunId::new(),
                command_name: command_name.into(),
                trigger_chain,
                invocation,
                created_at: Utc::now(),
                data: Mutex::new(RunData {
                    state: RunState::Pending,
                    success: None,
                    output: String::new(),
                    error: None,
                    comment: None,
                    started_at: None,
                    ended_at: None,
                    started_instant: None,
                    duration: None,
                }),
                state_tx,
                span: Span::current(),
            }),
        }
    }

    /// Rebuild a finalized record from a persisted snapshot.
    pub fn from_snapshot(snapshot: RunSnapshot) -> Result<Self> {
        if !snapshot.state.is_terminal() {
            return Err(CmdTriggerError::InvalidDefinition(format!(
                "cannot import non-terminal run {} of '{}' (state {})",
                snapshot.run_id, snapshot.command_name, snapshot.state
            )));
        }
        let (state_tx, _) = watch::channel(snapshot.state);
        let ended_at = snapshot.ended_at.unwrap_or_else(Utc::now);
        Ok(Self {
            inner: Arc::new(RecordInner {
                run_id: snapshot.run_id,
                command_name: snapshot.command_name,
                trigger_chain: snapshot.trigger_chain,
                invocation: snapshot.invocation.map(Arc::new),
                created_at: snapshot.started_at.unwrap_or(ended_at),
                data: Mutex::new(RunData {
                    state: snapshot.state,
                    success: snapshot.success,
                    output: snapshot.output,
                    error: snapshot.error,
                    comment: snapshot.comment,
                    started_at: snapshot.started_at,
                    ended_at: Some(ended_at),
                    started_instant: None,
                    duration: Some(Duration::from_millis(snapshot.duration_ms.unwrap_or(0))),
                }),
                state_tx,
                span: Span::current(),
            }),
        })
    }

    pub fn run_id(&self) -> RunId {
        self.inner.run_id
    }

    pub fn command_name(&self) -> &str {
        &self.inner.command_name
    }

    /// Ordered events that led to this run; empty for direct invocation.
    pub fn trigger_chain(&self) -> &[String] {
        &self.inner.trigger_chain
    }

    pub fn invocation(&self) -> Option<&ResolvedInvocation> {
        self.inner.invocation.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn state(&self) -> RunState {
        self.inner.data.lock().state
    }

    pub fn success(&self) -> Option<bool> {
        self.inner.data.lock().success
    }

    pub fn output(&self) -> String {
        self.inner.data.lock().output.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.inner.data.lock().error.clone()
    }

    /// Free-form note, e.g. the cancellation reason.
    pub fn comment(&self) -> Option<String> {
        self.inner.data.lock().comment.clone()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.data.lock().started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.inner.data.lock().ended_at
    }

    pub fn duration(&self) -> Option<Duration> {
        self.inner.data.lock().duration
    }

    pub fn duration_str(&self) -> String {
        format_duration(self.duration())
    }

    pub fn is_finalized(&self) -> bool {
        self.state().is_terminal()
    }

    /// Transition `Pending -> Running`. Returns `false` if the record was not
    /// pending.
    pub fn mark_running(&self) -> bool {
        let mut data = self.inner.data.lock();
        if data.state != RunState::Pending {
            debug!(
                parent: &self.inner.span,
                command = %self.inner.command_name,
                run_id = %self.inner.run_id.short(),
                state = %data.state,
                "ignoring mark_running on non-pending run"
            );
            return false;
        }
        data.state = RunState::Running;
        data.started_at = Some(Utc::now());
        data.started_instant = Some(Instant::now());
        drop(data);

        self.inner.state_tx.send_replace(RunState::Running);
        debug!(
            parent: &self.inner.span,
            command = %self.inner.command_name,
            run_id = %self.inner.run_id.short(),
            "run started"
        );
        true
    }

    pub fn mark_success(&self) -> bool {
        self.finalize(RunState::Success, None, None)
    }

    pub fn mark_failed(&self, detail: impl Into<String>) -> bool {
        self.finalize(RunState::Failed, Some(detail.into()), None)
    }

    pub fn mark_cancelled(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.finalize(
            RunState::Cancelled,
            Some("Command was cancelled".to_string()),
            Some(reason),
        )
    }

    /// Replace captured output. Ignored once the record is finalized.
    pub fn set_output(&self, output: impl Into<String>) -> bool {
        let mut data = self.inner.data.lock();
        if data.state.is_terminal() {
            return false;
        }
        data.output = output.into();
        true
    }

    /// Append to captured output. Ignored once the record is finalized.
    pub fn append_output(&self, chunk: &str) -> bool {
        let mut data = self.inner.data.lock();
        if data.state.is_terminal() {
            return false;
        }
        data.output.push_str(chunk);
        true
    }

    /// Wait until a terminal transition has been applied.
    pub async fn finalized(&self) -> RunState {
        let mut rx = self.inner.state_tx.subscribe();
        match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.inner.state_tx.subscribe()
    }

    /// Plain-data copy suitable for persistence or display.
    pub fn snapshot(&self) -> RunSnapshot {
        let data = self.inner.data.lock();
        RunSnapshot {
            run_id: self.inner.run_id,
            command_name: self.inner.command_name.clone(),
            trigger_chain: self.inner.trigger_chain.clone(),
            state: data.state,
            success: data.success,
            output: data.output.clone(),
            error: data.error.clone(),
            comment: data.comment.clone(),
            started_at: data.started_at,
            ended_at: data.ended_at,
            duration_ms: data.duration.map(|d| d.as_millis() as u64),
            invocation: self.inner.invocation.as_deref().cloned(),
        }
    }

    pub fn ptr_eq(&self, other: &RunRecord) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn finalize(&self, state: RunState, error: Option<String>, comment: Option<String>) -> bool {
        let mut data = self.inner.data.lock();
        if data.state.is_terminal() {
            debug!(
                parent: &self.inner.span,
                command = %self.inner.command_name,
                run_id = %self.inner.run_id.short(),
                current = %data.state,
                requested = %state,
                "run already finalized; ignoring terminal transition"
            );
            return false;
        }

        data.state = state;
        data.success = match state {
            RunState::Success => Some(true),
            RunState::Failed => Some(false),
            _ => None,
        };
        data.error = error;
        if comment.is_some() {
            data.comment = comment;
        }
        data.ended_at = Some(Utc::now());
        data.duration = Some(
            data.started_instant
                .map(|start| start.elapsed())
                .unwrap_or(Duration::ZERO),
        );
        let error = data.error.clone();
        drop(data);

        self.inner.state_tx.send_replace(state);
        debug!(
            parent: &self.inner.span,
            command = %self.inner.command_name,
            run_id = %self.inner.run_id.short(),
            state = %state,
            error = ?error,
            "run finalized"
        );
        true
    }
}

impl fmt::Debug for RunRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.inner.data.lock();
        f.debug_struct("RunRecord")
            .field("run_id", &self.inner.run_id.short())
            .field("command", &self.inner.command_name)
            .field("state", &data.state)
            .field("success", &data.success)
            .finish_non_exhaustive()
    }
}

/// Serializable copy of a [`RunRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: RunId,
    pub command_name: String,
    #[serde(default)]
    pub trigger_chain: Vec<String>,
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation: Option<ResolvedInvocation>,
}

impl RunSnapshot {
    /// Metadata document for on-disk run history.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self)
            .map_err(|e| CmdTriggerError::Other(anyhow::anyhow!("serializing run metadata: {e}")))
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

/// Human-readable duration: `2.4s`, `1m 23s`, `1h 5m`, or `-` when unknown.
pub fn format_duration(duration: Option<Duration>) -> String {
    let Some(d) = duration else {
        return "-".to_string();
    };
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        return format!("{secs:.1}s");
    }
    let total = d.as_secs();
    let (mins, secs) = (total / 60, total % 60);
    if mins < 60 {
        return format!("{mins}m {secs}s");
    }
    format!("{}h {}m", mins / 60, mins % 60)
}

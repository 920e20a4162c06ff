// src/run/handle.rs

//! Awaitable façade over a [`RunRecord`] for external callers.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::errors::{CmdTriggerError, Result};
use crate::run::record::{RunId, RunRecord, RunState};

/// Handle returned for every started run.
///
/// The handle owns a one-shot completion signal that the orchestrator fires
/// after the run has been finalized, moved into history and its lifecycle
/// events have been dispatched. Waiting never fails because the command
/// itself failed: it resolves with the finalized record and callers inspect
/// [`RunRecord::state`] / [`RunRecord::success`].
#[derive(Clone)]
pub struct RunHandle {
    record: RunRecord,
    done: watch::Receiver<bool>,
}

impl RunHandle {
    pub(crate) fn new(record: RunRecord, done: watch::Receiver<bool>) -> Self {
        Self { record, done }
    }

    /// Handle for a record that is already complete (e.g. imported history).
    pub fn completed(record: RunRecord) -> Self {
        let (_tx, rx) = watch::channel(true);
        Self { record, done: rx }
    }

    /// Wait for the run to finish and return the finalized record.
    pub async fn wait(&self) -> RunRecord {
        let mut done = self.done.clone();
        if done.wait_for(|d| *d).await.is_err() {
            // Signal owner went away without firing; fall back to the record.
            self.record.finalized().await;
        }
        self.record.clone()
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<RunRecord> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| CmdTriggerError::WaitTimedOut(timeout))
    }

    /// True once the completion signal has fired.
    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    pub fn record(&self) -> &RunRecord {
        &self.record
    }

    pub fn command_name(&self) -> &str {
        self.record.command_name()
    }

    pub fn run_id(&self) -> RunId {
        self.record.run_id()
    }

    pub fn state(&self) -> RunState {
        self.record.state()
    }

    pub fn success(&self) -> Option<bool> {
        self.record.success()
    }

    pub fn output(&self) -> String {
        self.record.output()
    }

    pub fn error(&self) -> Option<String> {
        self.record.error()
    }

    pub fn comment(&self) -> Option<String> {
        self.record.comment()
    }

    pub fn trigger_chain(&self) -> &[String] {
        self.record.trigger_chain()
    }

    pub fn is_finalized(&self) -> bool {
        self.record.is_finalized()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.record.started_at()
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.record.ended_at()
    }

    pub fn duration_str(&self) -> String {
        self.record.duration_str()
    }
}

impl fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunHandle")
            .field("command", &self.record.command_name())
            .field("run_id", &self.record.run_id().short())
            .field("state", &self.record.state())
            .finish()
    }
}

// src/exec/backend.rs

//! Pluggable execution backend abstraction.
//!
//! The orchestrator talks to an `ExecutionBackend` instead of spawning
//! processes itself. This makes it easy to swap in a fake backend in tests
//! while keeping the production implementation in [`process`](super::process).
//!
//! Contract:
//! - `start` takes ownership of driving the record to a terminal state. It
//!   must eventually call exactly one `mark_*` terminal method, or return an
//!   error *before* mutating the record if it cannot begin at all.
//! - `cancel` is idempotent and a no-op for records that are already
//!   terminal. It should try a soft stop first and force-stop after a grace
//!   period, keeping any output produced so far.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::command::ResolvedInvocation;
use crate::run::RunRecord;

/// Boxed future returned by backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Optional features a backend may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendCapability {
    /// Enforces per-invocation timeouts on its own.
    Timeout,
    /// Captures command output into the run record.
    OutputCapture,
    /// Sends a soft stop before forcing termination.
    GracefulCancel,
    /// Uses OS signals for cancellation.
    Signals,
}

impl fmt::Display for BackendCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendCapability::Timeout => "timeout",
            BackendCapability::OutputCapture => "output_capture",
            BackendCapability::GracefulCancel => "graceful_cancel",
            BackendCapability::Signals => "signals",
        };
        f.write_str(s)
    }
}

/// Trait abstracting how runs are actually executed.
///
/// Production code uses [`LocalProcessBackend`](super::LocalProcessBackend);
/// tests provide implementations that don't spawn real processes.
pub trait ExecutionBackend: Send + Sync {
    /// Begin executing `record`. Returns once the run has been launched.
    ///
    /// `start` may race with `cancel` for the same record. A record that is
    /// already finalized must not be launched.
    fn start(
        &self,
        record: RunRecord,
        invocation: Arc<ResolvedInvocation>,
    ) -> BackendFuture<'_, ()>;

    /// Stop `record`, finalizing it as cancelled with `reason`.
    ///
    /// If nothing has been launched yet, finalize the record so a concurrent
    /// `start` launches nothing.
    fn cancel(&self, record: RunRecord, reason: String) -> BackendFuture<'_, ()>;

    fn supports(&self, _capability: BackendCapability) -> bool {
        false
    }

    /// Called once at orchestrator shutdown.
    fn cleanup(&self) -> BackendFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

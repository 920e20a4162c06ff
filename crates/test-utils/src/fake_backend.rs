use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use cmdtrigger::exec::{BackendCapability, BackendFuture, ExecutionBackend};
use cmdtrigger::run::{RunId, RunRecord};
use cmdtrigger::ResolvedInvocation;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// What a fake run does once started.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail(String),
    /// Never finishes on its own; only cancellation ends it.
    Hang,
    /// `start` returns an error without touching the record.
    FailToStart(String),
}

/// Scripted behaviour for one command.
#[derive(Debug, Clone)]
pub struct Script {
    pub behavior: Behavior,
    pub delay: Duration,
    pub output: String,
}

impl Script {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            delay: Duration::ZERO,
            output: String::new(),
        }
    }

    pub fn succeed() -> Self {
        Self::new(Behavior::Succeed)
    }

    pub fn fail(detail: &str) -> Self {
        Self::new(Behavior::Fail(detail.to_string()))
    }

    pub fn hang() -> Self {
        Self::new(Behavior::Hang)
    }

    pub fn fail_to_start(reason: &str) -> Self {
        Self::new(Behavior::FailToStart(reason.to_string()))
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn output(mut self, output: &str) -> Self {
        self.output = output.to_string();
        self
    }
}

#[derive(Default)]
struct FakeInner {
    scripts: Mutex<HashMap<String, Script>>,
    default: Mutex<Option<Script>>,
    cancel_delay: Mutex<Duration>,
    fail_cancel: AtomicBool,
    started: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
    tasks: Mutex<HashMap<RunId, JoinHandle<()>>>,
    cleaned_up: AtomicBool,
}

/// An execution backend that:
/// - records which commands were started and cancelled
/// - finishes each run according to a per-command [`Script`]
///   (default: succeed immediately).
#[derive(Clone, Default)]
pub struct FakeBackend {
    inner: Arc<FakeInner>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, command: &str, script: Script) -> Self {
        self.set_script(command, script);
        self
    }

    pub fn set_script(&self, command: &str, script: Script) {
        self.inner
            .scripts
            .lock()
            .insert(command.to_string(), script);
    }

    /// Behaviour for commands without their own script.
    pub fn default_script(self, script: Script) -> Self {
        *self.inner.default.lock() = Some(script);
        self
    }

    /// Simulated grace period before a cancelled run is finalized.
    pub fn cancel_delay(self, delay: Duration) -> Self {
        *self.inner.cancel_delay.lock() = delay;
        self
    }

    /// Make `cancel` report an error (after doing nothing).
    pub fn failing_cancel(self) -> Self {
        self.inner.fail_cancel.store(true, Ordering::SeqCst);
        self
    }

    pub fn started(&self) -> Vec<String> {
        self.inner.started.lock().clone()
    }

    pub fn start_count(&self, command: &str) -> usize {
        self.inner
            .started
            .lock()
            .iter()
            .filter(|n| n.as_str() == command)
            .count()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.inner.cancelled.lock().clone()
    }

    pub fn cleaned_up(&self) -> bool {
        self.inner.cleaned_up.load(Ordering::SeqCst)
    }

    pub fn into_backend(self) -> Arc<dyn ExecutionBackend> {
        Arc::new(self)
    }

    fn script_for(&self, command: &str) -> Script {
        if let Some(s) = self.inner.scripts.lock().get(command) {
            return s.clone();
        }
        self.inner
            .default
            .lock()
            .clone()
            .unwrap_or_else(Script::succeed)
    }
}

impl ExecutionBackend for FakeBackend {
    fn start(
        &self,
        record: RunRecord,
        _invocation: Arc<ResolvedInvocation>,
    ) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let name = record.command_name().to_string();
            let script = self.script_for(&name);
            if let Behavior::FailToStart(reason) = &script.behavior {
                return Err(anyhow!("{reason}"));
            }
            self.inner.started.lock().push(name);

            let run_id = record.run_id();
            let task = tokio::spawn(async move {
                if !script.delay.is_zero() {
                    tokio::time::sleep(script.delay).await;
                }
                record.set_output(script.output.clone());
                match script.behavior {
                    Behavior::Succeed => {
                        record.mark_success();
                    }
                    Behavior::Fail(detail) => {
                        record.mark_failed(detail);
                    }
                    Behavior::Hang => std::future::pending::<()>().await,
                    Behavior::FailToStart(_) => {}
                }
            });
            self.inner.tasks.lock().insert(run_id, task);
            Ok(())
        })
    }

    fn cancel(&self, record: RunRecord, reason: String) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            if record.is_finalized() {
                return Ok(());
            }
            self.inner
                .cancelled
                .lock()
                .push(record.command_name().to_string());
            if self.inner.fail_cancel.load(Ordering::SeqCst) {
                return Err(anyhow!("simulated cancel failure"));
            }
            if let Some(task) = self.inner.tasks.lock().remove(&record.run_id()) {
                task.abort();
            }
            let delay = *self.inner.cancel_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            record.mark_cancelled(reason);
            Ok(())
        })
    }

    fn supports(&self, capability: BackendCapability) -> bool {
        matches!(capability, BackendCapability::OutputCapture)
    }

    fn cleanup(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.inner.cleaned_up.store(true, Ordering::SeqCst);
            for (_, task) in self.inner.tasks.lock().drain() {
                task.abort();
            }
            Ok(())
        })
    }
}

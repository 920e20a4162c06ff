// src/exec/process.rs

//! Local process backend built on `tokio::process`.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::command::ResolvedInvocation;
use crate::exec::backend::{BackendCapability, BackendFuture, ExecutionBackend};
use crate::run::{RunId, RunRecord};

/// Default time between the soft stop signal and a forced kill.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Request sent to a run's monitor task.
struct CancelRequest {
    reason: String,
    /// Fired once the monitor has finalized the record.
    ack: oneshot::Sender<()>,
}

/// Runs each invocation as `sh -c <command>` (`cmd /C` on Windows).
///
/// Stdout and stderr are merged line by line into the run's output. Each run
/// gets its own monitor task; cancellation sends SIGTERM, waits the grace
/// period, then kills the process.
///
/// A run is registered in `running` before its process is spawned, and the
/// registration and the cancel lookup happen under the same lock. A cancel
/// therefore either reaches the monitor or finalizes the record before the
/// process exists, in which case `start` spawns nothing.
#[derive(Clone)]
pub struct LocalProcessBackend {
    grace_period: Duration,
    running: Arc<Mutex<HashMap<RunId, oneshot::Sender<CancelRequest>>>>,
    span: Span,
}

impl Default for LocalProcessBackend {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

impl LocalProcessBackend {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            grace_period,
            running: Arc::new(Mutex::new(HashMap::new())),
            span: info_span!("process_backend"),
        }
    }

    /// Log under `span` instead of the backend's own root span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Number of runs whose monitor is still alive.
    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    fn build_command(invocation: &ResolvedInvocation) -> Command {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&invocation.command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&invocation.command);
            c
        };

        if let Some(cwd) = &invocation.cwd {
            cmd.current_dir(cwd);
        }
        cmd.envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn request_cancel(&self, record: RunRecord, reason: String) -> Result<()> {
        let tx = {
            let mut running = self.running.lock();
            match running.remove(&record.run_id()) {
                Some(tx) => tx,
                None => {
                    // Not registered yet: finalize now so a concurrent
                    // `start` sees the run as done and spawns nothing.
                    record.mark_cancelled(reason);
                    debug!(
                        parent: &self.span,
                        command = %record.command_name(),
                        run_id = %record.run_id().short(),
                        "no live process for run; cancelled before spawn"
                    );
                    return Ok(());
                }
            }
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if tx.send(CancelRequest { reason, ack: ack_tx }).is_err() {
            debug!(
                parent: &self.span,
                command = %record.command_name(),
                run_id = %record.run_id().short(),
                "process already finished while cancelling"
            );
            return Ok(());
        }
        // The monitor drops `ack` without sending only if it exits early.
        let _ = ack_rx.await;
        Ok(())
    }
}

impl ExecutionBackend for LocalProcessBackend {
    fn start(
        &self,
        record: RunRecord,
        invocation: Arc<ResolvedInvocation>,
    ) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let (cancel_tx, cancel_rx) = oneshot::channel();
            {
                let mut running = self.running.lock();
                if record.is_finalized() {
                    return Ok(());
                }
                running.insert(record.run_id(), cancel_tx);
            }

            info!(
                parent: &self.span,
                command = %record.command_name(),
                run_id = %record.run_id().short(),
                cmd = %invocation.command,
                "starting process"
            );

            let mut child = match Self::build_command(&invocation).spawn() {
                Ok(child) => child,
                Err(e) => {
                    self.running.lock().remove(&record.run_id());
                    let context = format!("spawning process for '{}'", record.command_name());
                    return Err(anyhow::Error::from(e).context(context));
                }
            };

            let readers = vec![
                child.stdout.take().map(|s| spawn_reader(s, record.clone(), &self.span)),
                child.stderr.take().map(|s| spawn_reader(s, record.clone(), &self.span)),
            ]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();

            // A cancel that arrived during the spawn is already buffered in
            // `cancel_rx`; the monitor picks it up first thing.
            let running = Arc::clone(&self.running);
            let grace = self.grace_period;
            tokio::spawn(
                async move {
                    monitor(child, record.clone(), readers, cancel_rx, grace).await;
                    running.lock().remove(&record.run_id());
                }
                .instrument(self.span.clone()),
            );
            Ok(())
        })
    }

    fn cancel(&self, record: RunRecord, reason: String) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            if record.is_finalized() {
                return Ok(());
            }
            self.request_cancel(record, reason).await
        })
    }

    fn supports(&self, capability: BackendCapability) -> bool {
        match capability {
            BackendCapability::OutputCapture | BackendCapability::GracefulCancel => true,
            BackendCapability::Signals => cfg!(unix),
            BackendCapability::Timeout => false,
        }
    }

    fn cleanup(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let senders: Vec<_> = self.running.lock().drain().collect();
            if !senders.is_empty() {
                info!(parent: &self.span, count = senders.len(), "killing remaining processes");
            }
            let mut acks = Vec::new();
            for (_, tx) in senders {
                let (ack_tx, ack_rx) = oneshot::channel();
                let request = CancelRequest {
                    reason: "backend cleanup".to_string(),
                    ack: ack_tx,
                };
                if tx.send(request).is_ok() {
                    acks.push(ack_rx);
                }
            }
            for ack in acks {
                let _ = ack.await;
            }
            Ok(())
        })
    }
}

fn spawn_reader<R>(stream: R, record: RunRecord, span: &Span) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(
        async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(command = %record.command_name(), "output: {}", line);
                record.append_output(&line);
                record.append_output("\n");
            }
        }
        .instrument(span.clone()),
    )
}

/// Wait for all output readers, but never longer than `limit`.
async fn drain_readers(readers: Vec<JoinHandle<()>>, limit: Duration) {
    let joined = async {
        for r in readers {
            let _ = r.await;
        }
    };
    if tokio::time::timeout(limit, joined).await.is_err() {
        debug!("output readers still open after process exit; dropping them");
    }
}

/// Drive one child process until it exits or is cancelled.
///
/// Either the process exits on its own (normal case) or a cancellation
/// request arrives, in which case the process is stopped gracefully.
async fn monitor(
    mut child: Child,
    record: RunRecord,
    readers: Vec<JoinHandle<()>>,
    mut cancel_rx: oneshot::Receiver<CancelRequest>,
    grace: Duration,
) {
    tokio::select! {
        status = child.wait() => {
            drain_readers(readers, grace).await;
            match status {
                Ok(status) if status.success() => {
                    info!(
                        command = %record.command_name(),
                        run_id = %record.run_id().short(),
                        "process exited successfully"
                    );
                    record.mark_success();
                }
                Ok(status) => {
                    let code = status.code().unwrap_or(-1);
                    info!(
                        command = %record.command_name(),
                        run_id = %record.run_id().short(),
                        exit_code = code,
                        "process exited with failure"
                    );
                    record.mark_failed(format!("Command exited with code {code}"));
                }
                Err(e) => {
                    warn!(
                        command = %record.command_name(),
                        error = %e,
                        "failed waiting for process"
                    );
                    record.mark_failed(format!("waiting for process: {e}"));
                }
            }
        }

        request = &mut cancel_rx => {
            match request {
                Ok(CancelRequest { reason, ack }) => {
                    info!(
                        command = %record.command_name(),
                        run_id = %record.run_id().short(),
                        %reason,
                        "cancellation requested; stopping process"
                    );
                    terminate(&mut child, grace).await;
                    drain_readers(readers, grace).await;
                    record.mark_cancelled(reason);
                    let _ = ack.send(());
                }
                Err(_) => {
                    // Backend dropped; the child is killed on drop.
                    debug!(
                        command = %record.command_name(),
                        "cancel channel closed without explicit cancellation"
                    );
                    let _ = child.wait().await;
                    drain_readers(readers, grace).await;
                    record.mark_failed("execution backend dropped");
                }
            }
        }
    }
}

/// Soft stop, then forced kill after `grace`.
async fn terminate(child: &mut Child, grace: Duration) {
    if send_sigterm(child) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(_) => return,
            Err(_) => debug!("process ignored SIGTERM within grace period; killing"),
        }
    }
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill child process on cancellation");
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return false;
    };
    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            debug!(pid, error = %e, "SIGTERM failed");
            false
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}

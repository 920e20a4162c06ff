// src/engine/orchestrator.rs

//! The execution-flow state machine.
//!
//! The orchestrator owns the public surface of the engine. It serializes
//! every store and router mutation through one mutex (`Core`), while each
//! started run is driven by its own task that the orchestrator never blocks
//! on. Lifecycle auto-events are routed back through the trigger router,
//! which may recurse into new runs; the trigger context carried along each
//! branch keeps that recursion finite.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::command::{
    CommandDefinition, CommandName, InvocationResolver, ResolvedInvocation, TemplateResolver,
};
use crate::engine::lifecycle::{LifecyclePhase, SHUTDOWN_EVENT};
use crate::engine::policy::ConcurrencyPolicy;
use crate::errors::{CmdTriggerError, Result};
use crate::exec::ExecutionBackend;
use crate::run::{format_duration, RunHandle, RunId, RunRecord, RunSnapshot, RunState};
use crate::store::{CommandStatus, RunStateStore};
use crate::trigger::{
    invoke_callbacks, CallbackId, ErrorCallback, LifecycleCallbacks, TriggerCallback,
    TriggerContext, TriggerEvent, TriggerRouter,
};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Engine-wide behaviour switches.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Prepended to lifecycle event names: `""` gives `success:Build`,
    /// `"command_"` gives `command_success:Build`.
    pub lifecycle_prefix: String,
    /// Also emit `finished:<name>` after `cancelled:<name>`.
    pub emit_finished_on_cancel: bool,
    pub shutdown_timeout: Duration,
    pub cancel_on_shutdown: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            lifecycle_prefix: String::new(),
            emit_finished_on_cancel: false,
            shutdown_timeout: Duration::from_secs(5),
            cancel_on_shutdown: true,
        }
    }
}

/// Parameters of one shutdown call.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownOptions {
    /// Upper bound on waiting for active runs to resolve.
    pub timeout: Duration,
    /// Cancel active runs instead of letting them finish.
    pub cancel_active: bool,
}

impl From<&OrchestratorSettings> for ShutdownOptions {
    fn from(settings: &OrchestratorSettings) -> Self {
        Self {
            timeout: settings.shutdown_timeout,
            cancel_active: settings.cancel_on_shutdown,
        }
    }
}

/// What happened to the runs that were active when shutdown began.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownSummary {
    pub cancelled: usize,
    pub completed: usize,
    pub timed_out: usize,
}

/// Report of one `fire` call.
#[derive(Debug)]
pub struct FireOutcome {
    pub event: String,
    /// Propagation path including `event`.
    pub history: Vec<String>,
    /// Runs started directly by this event, in dispatch order.
    pub started: Vec<RunHandle>,
    /// Commands that matched but did not start, with the reason.
    pub errors: Vec<(CommandName, CmdTriggerError)>,
    /// Active runs cancelled through cancel-triggers.
    pub cancelled: usize,
}

impl FireOutcome {
    pub fn handle(&self, command: &str) -> Option<&RunHandle> {
        self.started.iter().find(|h| h.command_name() == command)
    }

    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.errors.is_empty() && self.cancelled == 0
    }
}

/// Per-run bookkeeping that only lives while the run is active.
struct RunTicket {
    record: RunRecord,
    /// Context the run was started under; lifecycle events branch from it.
    context: TriggerContext,
    loop_detection: bool,
    done_tx: watch::Sender<bool>,
}

/// A run that passed admission; `to_cancel` are the runs it replaces.
struct Admission {
    def: CommandDefinition,
    now: Instant,
    to_cancel: Vec<RunRecord>,
}

struct Core {
    store: RunStateStore,
    router: TriggerRouter,
    tickets: HashMap<RunId, RunTicket>,
    shutting_down: bool,
}

struct Inner {
    span: Span,
    backend: Arc<dyn ExecutionBackend>,
    resolver: Arc<dyn InvocationResolver>,
    settings: OrchestratorSettings,
    core: Mutex<Core>,
    error_callbacks: Mutex<Vec<ErrorCallback>>,
    shutdown: OnceCell<ShutdownSummary>,
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    backend: Arc<dyn ExecutionBackend>,
    resolver: Option<Arc<dyn InvocationResolver>>,
    settings: OrchestratorSettings,
    span: Option<Span>,
    definitions: Vec<CommandDefinition>,
}

impl OrchestratorBuilder {
    pub fn resolver(mut self, resolver: Arc<dyn InvocationResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Span every orchestrator and router log line is parented to.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn command(mut self, def: CommandDefinition) -> Self {
        self.definitions.push(def);
        self
    }

    pub fn commands(mut self, defs: impl IntoIterator<Item = CommandDefinition>) -> Self {
        self.definitions.extend(defs);
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let span = self.span.unwrap_or_else(|| info_span!("cmdtrigger"));
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(TemplateResolver::default()));

        let orchestrator = Orchestrator {
            inner: Arc::new(Inner {
                backend: self.backend,
                resolver,
                settings: self.settings,
                core: Mutex::new(Core {
                    store: RunStateStore::with_span(span.clone()),
                    router: TriggerRouter::new(span.clone()),
                    tickets: HashMap::new(),
                    shutting_down: false,
                }),
                error_callbacks: Mutex::new(Vec::new()),
                shutdown: OnceCell::new(),
                span,
            }),
        };

        for def in self.definitions {
            orchestrator.register(def)?;
        }
        Ok(orchestrator)
    }
}

/// Coordinates definitions, runs, triggers and the execution backend.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder(backend: Arc<dyn ExecutionBackend>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            backend,
            resolver: None,
            settings: OrchestratorSettings::default(),
            span: None,
            definitions: Vec::new(),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    pub fn span(&self) -> &Span {
        &self.inner.span
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.core.lock().shutting_down
    }

    /// Lifecycle event name for `command` under the configured prefix.
    pub fn lifecycle_event(&self, phase: LifecyclePhase, command: &str) -> String {
        phase.event_name(&self.inner.settings.lifecycle_prefix, command)
    }

    // ---------------------------------------------------------------------
    // Definitions
    // ---------------------------------------------------------------------

    pub fn register(&self, def: CommandDefinition) -> Result<()> {
        let mut core = self.inner.core.lock();
        if core.shutting_down {
            return Err(CmdTriggerError::ShutdownRejected);
        }
        core.store.register(def.clone())?;
        if let Err(e) = core.router.add_command(&def) {
            core.store.remove(&def.name);
            return Err(e);
        }
        drop(core);

        self.log_registration(&def);
        Ok(())
    }

    /// Register `def`, replacing any definition with the same name.
    ///
    /// The replaced command's routes move to the end of the registration
    /// order. Active runs keep going under the old definition.
    pub fn replace(&self, def: CommandDefinition) -> Result<Option<CommandDefinition>> {
        let mut core = self.inner.core.lock();
        if core.shutting_down {
            return Err(CmdTriggerError::ShutdownRejected);
        }
        def.validate()?;
        core.router.add_command(&def)?;
        let previous = core.store.replace(def.clone())?;
        drop(core);

        self.log_registration(&def);
        Ok(previous)
    }

    /// Remove a definition and cancel its active runs.
    pub async fn remove(&self, name: &str) -> Result<CommandDefinition> {
        let (def, active) = {
            let mut core = self.inner.core.lock();
            if core.shutting_down {
                return Err(CmdTriggerError::ShutdownRejected);
            }
            let active = core.store.active_runs(name);
            let def = core
                .store
                .remove(name)
                .ok_or_else(|| CmdTriggerError::DefinitionNotFound(name.to_string()))?;
            core.router.remove_command(name);
            (def, active)
        };

        info!(parent: &self.inner.span, command = %name, active = active.len(), "command removed");
        for record in active {
            self.cancel_record(&record, "command removed".to_string())
                .await;
        }
        Ok(def)
    }

    fn log_registration(&self, def: &CommandDefinition) {
        debug!(
            parent: &self.inner.span,
            command = %def.name,
            triggers = ?def.triggers,
            max_concurrent = def.max_concurrent,
            on_retrigger = %def.on_retrigger,
            "command registered"
        );
        if !def.loop_detection {
            warn!(
                parent: &self.inner.span,
                command = %def.name,
                "loop detection disabled; lifecycle events of this command can re-trigger it without bound"
            );
        }
    }

    /// Registered command names in registration order.
    pub fn command_names(&self) -> Vec<CommandName> {
        self.inner.core.lock().store.names()
    }

    pub fn definition(&self, name: &str) -> Option<CommandDefinition> {
        self.inner.core.lock().store.definition(name).cloned()
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn status(&self, name: &str) -> Result<CommandStatus> {
        self.inner.core.lock().store.status(name)
    }

    /// Retained completed runs of `name`, oldest first.
    pub fn history(&self, name: &str) -> Result<Vec<RunRecord>> {
        let core = self.inner.core.lock();
        core.store.require(name)?;
        Ok(core.store.history(name))
    }

    pub fn latest(&self, name: &str) -> Option<RunRecord> {
        self.inner.core.lock().store.latest(name)
    }

    pub fn active_runs(&self, name: &str) -> Vec<RunRecord> {
        self.inner.core.lock().store.active_runs(name)
    }

    pub fn active_handles(&self, name: &str) -> Vec<RunHandle> {
        let core = self.inner.core.lock();
        core.store
            .active_runs(name)
            .iter()
            .filter_map(|r| core.tickets.get(&r.run_id()))
            .map(|t| RunHandle::new(t.record.clone(), t.done_tx.subscribe()))
            .collect()
    }

    /// Handles for every active run of every command.
    pub fn all_active_handles(&self) -> Vec<RunHandle> {
        let core = self.inner.core.lock();
        core.store
            .all_active()
            .iter()
            .filter_map(|r| core.tickets.get(&r.run_id()))
            .map(|t| RunHandle::new(t.record.clone(), t.done_tx.subscribe()))
            .collect()
    }

    pub fn handle_for(&self, run_id: RunId) -> Option<RunHandle> {
        let core = self.inner.core.lock();
        core.tickets
            .get(&run_id)
            .map(|t| RunHandle::new(t.record.clone(), t.done_tx.subscribe()))
    }

    /// Commands whose trigger set matches `event`, in dispatch order.
    pub fn commands_for_trigger(&self, event: &str) -> Vec<CommandName> {
        self.inner.core.lock().router.commands_for(event)
    }

    pub fn has_trigger(&self, event: &str) -> bool {
        !self.commands_for_trigger(event).is_empty()
    }

    /// Resolve the invocation `run` would use, without running anything.
    pub fn preview(
        &self,
        name: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<ResolvedInvocation> {
        let def = self
            .definition(name)
            .ok_or_else(|| CmdTriggerError::DefinitionNotFound(name.to_string()))?;
        self.inner.resolver.resolve(&def, vars)
    }

    /// Feed a persisted run back into history.
    pub fn import_history(&self, snapshot: RunSnapshot) -> Result<()> {
        let record = RunRecord::from_snapshot(snapshot)?;
        let mut core = self.inner.core.lock();
        core.store.require(record.command_name())?;
        core.store.add_to_history(record)
    }

    // ---------------------------------------------------------------------
    // Callbacks
    // ---------------------------------------------------------------------

    /// Subscribe `callback` to events matching `pattern`.
    pub fn on(
        &self,
        pattern: &str,
        callback: impl TriggerCallback + 'static,
    ) -> Result<CallbackId> {
        self.inner
            .core
            .lock()
            .router
            .add_callback(pattern, Arc::new(callback))
    }

    pub fn off(&self, id: CallbackId) -> bool {
        self.inner.core.lock().router.remove_callback(id)
    }

    /// Receive errors raised while propagating lifecycle auto-events.
    pub fn on_error(&self, callback: impl Fn(&CmdTriggerError) + Send + Sync + 'static) {
        self.inner.error_callbacks.lock().push(Arc::new(callback));
    }

    /// Register per-command success/failure/cancellation hooks.
    pub fn set_lifecycle_callback(
        &self,
        name: &str,
        callbacks: LifecycleCallbacks,
    ) -> Result<Vec<CallbackId>> {
        let prefix = &self.inner.settings.lifecycle_prefix;
        let mut core = self.inner.core.lock();
        core.store.require(name)?;

        let hooks = [
            (LifecyclePhase::Success, callbacks.on_success),
            (LifecyclePhase::Failed, callbacks.on_failed),
            (LifecyclePhase::Cancelled, callbacks.on_cancelled),
        ];
        let mut ids = Vec::new();
        for (phase, hook) in hooks {
            if let Some(hook) = hook {
                let event = phase.event_name(prefix, name);
                ids.push(core.router.add_callback(&event, hook)?);
            }
        }
        Ok(ids)
    }

    fn report_error(&self, error: CmdTriggerError) {
        if error.is_rejection() {
            info!(parent: &self.inner.span, %error, "chained run rejected");
            return;
        }
        warn!(parent: &self.inner.span, %error, "error during event propagation");
        let callbacks = self.inner.error_callbacks.lock().clone();
        for cb in callbacks {
            cb(&error);
        }
    }

    // ---------------------------------------------------------------------
    // Running
    // ---------------------------------------------------------------------

    /// Start `name` directly with per-run variable overrides.
    pub async fn run(&self, name: &str, vars: BTreeMap<String, String>) -> Result<RunHandle> {
        self.start_run(name, &vars, &TriggerContext::new()).await
    }

    /// Fire `event`, extending `context` when the event is itself part of a
    /// larger propagation.
    ///
    /// Cancel-triggers are applied first, then callbacks (exact, then
    /// wildcard), then matching commands are started (exact, then wildcard).
    /// A failing callback aborts the call. Commands that are rejected or fail
    /// to start are reported in the outcome without stopping their siblings.
    pub async fn fire(&self, event: &str, context: Option<TriggerContext>) -> Result<FireOutcome> {
        let parent = context.unwrap_or_default();
        let (ctx, dispatch) = {
            let core = self.inner.core.lock();
            if core.shutting_down {
                return Err(CmdTriggerError::ShutdownRejected);
            }
            let ctx = core.router.enter(&parent, event, true)?;
            (ctx, core.router.route(event))
        };

        info!(
            parent: &self.inner.span,
            %event,
            commands = ?dispatch.commands,
            callbacks = dispatch.callbacks.len(),
            "trigger fired"
        );

        let mut outcome = FireOutcome {
            event: event.to_string(),
            history: ctx.history().to_vec(),
            started: Vec::new(),
            errors: Vec::new(),
            cancelled: 0,
        };

        let reason = format!("cancelled by trigger '{event}'");
        for name in &dispatch.cancel {
            outcome.cancelled += self.cancel_command(name, &reason).await;
        }

        let trigger_event = TriggerEvent {
            name: event.to_string(),
            history: ctx.history().to_vec(),
            run: None,
            auto: false,
        };
        if let Some(err) = invoke_callbacks(&self.inner.span, &dispatch.callbacks, &trigger_event, true)
            .into_iter()
            .next()
        {
            return Err(err);
        }

        let no_vars = BTreeMap::new();
        for name in dispatch.commands {
            match self.start_run(&name, &no_vars, &ctx).await {
                Ok(handle) => outcome.started.push(handle),
                Err(e) => {
                    info!(parent: &self.inner.span, command = %name, %event, error = %e, "triggered run not started");
                    outcome.errors.push((name, e));
                }
            }
        }
        Ok(outcome)
    }

    fn admit(&self, name: &str) -> Result<Admission> {
        Self::admit_locked(&self.inner.core.lock(), name)
    }

    /// Shutdown, lookup, debounce and concurrency checks for a new run of
    /// `name`. Pure with respect to `core`.
    fn admit_locked(core: &Core, name: &str) -> Result<Admission> {
        if core.shutting_down {
            return Err(CmdTriggerError::ShutdownRejected);
        }
        let def = core.store.require(name)?.clone();

        let now = Instant::now();
        core.store
            .check_debounce(name, def.debounce, def.debounce_mode, now)?;

        let active = core.store.active_runs(name);
        let decision = ConcurrencyPolicy::decide(&def, &active);
        if !decision.allow {
            return Err(CmdTriggerError::ConcurrencyRejected {
                name: name.to_string(),
                active: active.len(),
                limit: def.max_concurrent,
                policy: def.on_retrigger,
            });
        }
        Ok(Admission {
            def,
            now,
            to_cancel: decision.to_cancel,
        })
    }

    /// Debounce, arbitrate, register and launch one run.
    fn start_run<'a>(
        &'a self,
        name: &'a str,
        vars: &'a BTreeMap<String, String>,
        ctx: &'a TriggerContext,
    ) -> BoxFuture<'a, Result<RunHandle>> {
        Box::pin(async move {
            // The resolver is user code and may call back into the
            // orchestrator, so it runs outside the core lock. Admission is
            // checked again once the invocation is ready.
            let mut def = self.admit(name)?.def;
            let (record, invocation, to_cancel, handle, loop_detection) = loop {
                let invocation = Arc::new(self.inner.resolver.resolve(&def, vars)?);

                let mut core = self.inner.core.lock();
                let admitted = Self::admit_locked(&core, name)?;
                if admitted.def != def {
                    // Replaced while resolving; resolve the new definition.
                    def = admitted.def;
                    continue;
                }
                let Admission { def, now, to_cancel } = admitted;

                core.store.record_start(name, now);
                let record = self.inner.span.in_scope(|| {
                    RunRecord::new(name, ctx.history().to_vec(), Some(Arc::clone(&invocation)))
                });
                core.store.add_active(record.clone());

                let (done_tx, done_rx) = watch::channel(false);
                core.tickets.insert(
                    record.run_id(),
                    RunTicket {
                        record: record.clone(),
                        context: ctx.clone(),
                        loop_detection: def.loop_detection,
                        done_tx,
                    },
                );
                let handle = RunHandle::new(record.clone(), done_rx);
                break (record, invocation, to_cancel, handle, def.loop_detection);
            };

            info!(
                parent: &self.inner.span,
                command = %name,
                run_id = %record.run_id().short(),
                chain = ?record.trigger_chain(),
                "run accepted"
            );

            for old in to_cancel {
                self.cancel_record(&old, format!("restarted by run {}", record.run_id().short()))
                    .await;
            }

            self.emit_lifecycle(&record, ctx, loop_detection, vec![LifecyclePhase::Started])
                .await;

            if record.is_finalized() {
                // Cancelled while its started event was propagating.
                self.finish_run(&record).await;
                return Ok(handle);
            }

            record.mark_running();
            if let Err(e) = self
                .inner
                .backend
                .start(record.clone(), Arc::clone(&invocation))
                .await
            {
                let reason = format!("{e:#}");
                warn!(
                    parent: &self.inner.span,
                    command = %name,
                    run_id = %record.run_id().short(),
                    error = %reason,
                    "backend failed to start run"
                );
                record.mark_failed(reason.clone());
                self.finish_run(&record).await;
                return Err(CmdTriggerError::BackendStartFailure {
                    name: name.to_string(),
                    reason,
                });
            }

            let this = self.clone();
            let timeout = invocation.timeout;
            let driven = record.clone();
            tokio::spawn(
                async move { this.drive(driven, timeout).await }.instrument(self.inner.span.clone()),
            );

            Ok(handle)
        })
    }

    /// Wait for a started run to finalize, enforcing its timeout.
    async fn drive(self, record: RunRecord, timeout: Option<Duration>) {
        match timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, record.finalized()).await.is_err() {
                    warn!(
                        parent: &self.inner.span,
                        command = %record.command_name(),
                        run_id = %record.run_id().short(),
                        timeout = %format_duration(Some(limit)),
                        "run timed out"
                    );
                    let reason = format!("timed out after {}", format_duration(Some(limit)));
                    self.cancel_record(&record, reason).await;
                }
            }
            None => {
                record.finalized().await;
            }
        }
        self.finish_run(&record).await;
    }

    /// Move a finalized run into history, emit its completion events and
    /// release its handle. Only the first call for a run has any effect.
    async fn finish_run(&self, record: &RunRecord) {
        let ticket = {
            let mut core = self.inner.core.lock();
            if !core.store.complete_run(record) {
                return;
            }
            core.tickets.remove(&record.run_id())
        };

        let state = record.state();
        info!(
            parent: &self.inner.span,
            command = %record.command_name(),
            run_id = %record.run_id().short(),
            %state,
            duration = %record.duration_str(),
            "run finished"
        );

        let Some(ticket) = ticket else {
            return;
        };
        let phases =
            LifecyclePhase::completion_batch(state, self.inner.settings.emit_finished_on_cancel);
        self.emit_lifecycle(record, &ticket.context, ticket.loop_detection, phases)
            .await;
        ticket.done_tx.send_replace(true);
    }

    /// Route one batch of lifecycle events for `record`.
    ///
    /// Every event of the batch branches from the run's own context. All
    /// cancellations and callbacks of the batch run before any chained
    /// command starts. Errors are reported, never raised.
    fn emit_lifecycle<'a>(
        &'a self,
        record: &'a RunRecord,
        base: &'a TriggerContext,
        tracked: bool,
        phases: Vec<LifecyclePhase>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let snapshot = record.snapshot();
            let mut chained = Vec::new();

            for phase in phases {
                let event = self.lifecycle_event(phase, record.command_name());
                let entered = {
                    let core = self.inner.core.lock();
                    core.router
                        .enter(base, &event, tracked)
                        .map(|ctx| (ctx, core.router.route(&event)))
                };
                let (ctx, dispatch) = match entered {
                    Ok(found) => found,
                    Err(e) => {
                        self.report_error(e);
                        continue;
                    }
                };

                debug!(parent: &self.inner.span, %event, history = ?ctx.history(), "lifecycle event");

                let reason = format!("cancelled by trigger '{event}'");
                for name in &dispatch.cancel {
                    self.cancel_command(name, &reason).await;
                }

                let trigger_event = TriggerEvent {
                    name: event.clone(),
                    history: ctx.history().to_vec(),
                    run: Some(snapshot.clone()),
                    auto: true,
                };
                for e in invoke_callbacks(&self.inner.span, &dispatch.callbacks, &trigger_event, false)
                {
                    self.report_error(e);
                }

                if !dispatch.commands.is_empty() {
                    chained.push((ctx, dispatch.commands));
                }
            }

            let no_vars = BTreeMap::new();
            for (ctx, commands) in chained {
                for name in commands {
                    if let Err(e) = self.start_run(&name, &no_vars, &ctx).await {
                        self.report_error(e);
                    }
                }
            }
        })
    }

    // ---------------------------------------------------------------------
    // Cancellation
    // ---------------------------------------------------------------------

    /// Cancel one run through the backend, then make sure it is finalized
    /// and its completion is processed. Returns `true` if the run ended up
    /// cancelled. Backend errors are logged and swallowed.
    async fn cancel_record(&self, record: &RunRecord, reason: String) -> bool {
        if record.is_finalized() {
            self.finish_run(record).await;
            return false;
        }

        info!(
            parent: &self.inner.span,
            command = %record.command_name(),
            run_id = %record.run_id().short(),
            %reason,
            "cancelling run"
        );
        if let Err(e) = self
            .inner
            .backend
            .cancel(record.clone(), reason.clone())
            .await
        {
            warn!(
                parent: &self.inner.span,
                command = %record.command_name(),
                run_id = %record.run_id().short(),
                error = %e,
                "backend cancel failed; finalizing run anyway"
            );
        }
        record.mark_cancelled(reason);
        let cancelled = record.state() == RunState::Cancelled;
        self.finish_run(record).await;
        cancelled
    }

    /// Cancel every active run of `name`. Returns how many were cancelled.
    pub async fn cancel_command(&self, name: &str, reason: &str) -> usize {
        let active = self.active_runs(name);
        let mut cancelled = 0;
        for record in active {
            if self.cancel_record(&record, reason.to_string()).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Cancel one active run. Returns `false` if it was not active.
    pub async fn cancel_run(&self, run_id: RunId, reason: &str) -> bool {
        let record = self.inner.core.lock().store.find_active(run_id);
        match record {
            Some(record) => self.cancel_record(&record, reason.to_string()).await,
            None => false,
        }
    }

    /// Cancel every active run of every command.
    pub async fn cancel_all(&self, reason: &str) -> usize {
        let active = self.inner.core.lock().store.all_active();
        let mut cancelled = 0;
        for record in active {
            if self.cancel_record(&record, reason.to_string()).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    // ---------------------------------------------------------------------
    // Shutdown
    // ---------------------------------------------------------------------

    /// Shut down with the configured timeout and cancellation setting.
    pub async fn shutdown_default(&self) -> ShutdownSummary {
        self.shutdown(ShutdownOptions::from(&self.inner.settings)).await
    }

    /// Stop accepting work, emit the shutdown event, then cancel (or wait
    /// for) every active run for at most `options.timeout`.
    ///
    /// Idempotent: later calls return the first call's summary.
    pub async fn shutdown(&self, options: ShutdownOptions) -> ShutdownSummary {
        *self
            .inner
            .shutdown
            .get_or_init(|| self.perform_shutdown(options))
            .await
    }

    async fn perform_shutdown(&self, options: ShutdownOptions) -> ShutdownSummary {
        let (callbacks, active) = {
            let mut core = self.inner.core.lock();
            core.shutting_down = true;
            let active: Vec<RunHandle> = core
                .store
                .all_active()
                .into_iter()
                .filter_map(|r| {
                    core.tickets
                        .get(&r.run_id())
                        .map(|t| RunHandle::new(r.clone(), t.done_tx.subscribe()))
                })
                .collect();
            (core.router.callbacks_for(SHUTDOWN_EVENT), active)
        };

        info!(
            parent: &self.inner.span,
            active = active.len(),
            cancel = options.cancel_active,
            timeout = %format_duration(Some(options.timeout)),
            "shutting down"
        );

        let event = TriggerEvent {
            name: SHUTDOWN_EVENT.to_string(),
            history: vec![SHUTDOWN_EVENT.to_string()],
            run: None,
            auto: true,
        };
        for e in invoke_callbacks(&self.inner.span, &callbacks, &event, false) {
            self.report_error(e);
        }

        let mut tasks = JoinSet::new();
        for handle in &active {
            let this = self.clone();
            let handle = handle.clone();
            let cancel = options.cancel_active;
            tasks.spawn(
                async move {
                    if cancel {
                        this.cancel_record(handle.record(), "orchestrator shutdown".to_string())
                            .await;
                    }
                    handle.wait().await;
                }
                .instrument(self.inner.span.clone()),
            );
        }

        let waited = tokio::time::timeout(options.timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if waited.is_err() {
            warn!(parent: &self.inner.span, "shutdown timeout elapsed with runs still active");
        }
        tasks.abort_all();

        let mut summary = ShutdownSummary::default();
        for handle in &active {
            if !handle.is_done() {
                summary.timed_out += 1;
            } else if handle.state() == RunState::Cancelled {
                summary.cancelled += 1;
            } else {
                summary.completed += 1;
            }
        }

        if let Err(e) = self.inner.backend.cleanup().await {
            warn!(parent: &self.inner.span, error = %e, "backend cleanup failed");
        }

        info!(
            parent: &self.inner.span,
            cancelled = summary.cancelled,
            completed = summary.completed,
            timed_out = summary.timed_out,
            "shutdown complete"
        );
        summary
    }
}

// tests/orchestrator_api.rs

mod common;
use crate::common::builders::{def, orchestrator};
use crate::common::{init_tracing, no_vars, with_timeout, FakeBackend, Script, TestResult};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;

use cmdtrigger::command::{InvocationResolver, ResolvedInvocation, TemplateResolver};
use cmdtrigger::engine::{LifecyclePhase, Orchestrator};
use cmdtrigger::run::{RunRecord, RunState};
use cmdtrigger::store::StatusState;
use cmdtrigger::trigger::{LifecycleCallbacks, TriggerEvent};
use cmdtrigger::{CmdTriggerError, CmdTriggerResult, CommandDefinition, OrchestratorSettings};

fn counter() -> (
    Arc<AtomicUsize>,
    impl Fn(&TriggerEvent) -> anyhow::Result<()> + Send + Sync + 'static,
) {
    let count = Arc::new(AtomicUsize::new(0));
    let inner = Arc::clone(&count);
    (count, move |_: &TriggerEvent| -> anyhow::Result<()> {
        inner.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

/// never_run, then running while the run is active, then success.
#[tokio::test(start_paused = true)]
async fn status_tracks_the_run() -> TestResult {
    init_tracing();

    let backend =
        FakeBackend::new().script("Build", Script::succeed().after(Duration::from_millis(30)));
    let orch = orchestrator(backend.into_backend(), vec![def("Build", &[])]);

    let status = orch.status("Build")?;
    assert_eq!(status.state, StatusState::NeverRun);
    assert!(status.last_run.is_none());

    let handle = orch.run("Build", no_vars()).await?;
    let status = orch.status("Build")?;
    assert_eq!(status.state, StatusState::Running);
    assert_eq!(status.active_count, 1);
    assert_eq!(
        status.last_run.map(|r| r.run_id()),
        Some(handle.run_id())
    );
    assert_eq!(orch.active_handles("Build").len(), 1);
    assert!(orch.handle_for(handle.run_id()).is_some());

    handle.wait().await;
    let status = orch.status("Build")?;
    assert_eq!(status.state, StatusState::Success);
    assert_eq!(status.active_count, 0);
    assert!(orch.handle_for(handle.run_id()).is_none());
    assert!(orch.all_active_handles().is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_and_duplicate_names_are_errors() -> TestResult {
    init_tracing();

    let orch = orchestrator(FakeBackend::new().into_backend(), vec![def("Build", &[])]);

    let err = orch.run("Nope", no_vars()).await.unwrap_err();
    assert!(matches!(err, CmdTriggerError::DefinitionNotFound(ref n) if n == "Nope"));
    assert!(matches!(
        orch.status("Nope"),
        Err(CmdTriggerError::DefinitionNotFound(_))
    ));
    assert!(orch.history("Nope").is_err());

    let err = orch.register(def("Build", &["other"])).unwrap_err();
    assert!(matches!(err, CmdTriggerError::DuplicateDefinition(ref n) if n == "Build"));
    assert!(orch.commands_for_trigger("other").is_empty());

    let bad = CommandDefinition::builder("Bad", "   ").build();
    assert!(matches!(bad, Err(CmdTriggerError::InvalidDefinition(_))));
    Ok(())
}

/// Replacing a definition swaps its triggers and moves it to the end of
/// dispatch order. Runs use the new template.
#[tokio::test]
async fn replace_swaps_triggers() -> TestResult {
    init_tracing();

    let orch = orchestrator(
        FakeBackend::new().into_backend(),
        vec![def("A", &["go"]), def("B", &["go"])],
    );
    assert_eq!(orch.commands_for_trigger("go"), vec!["A", "B"]);

    let previous = orch.replace(
        CommandDefinition::builder("A", "echo new")
            .triggers(["go", "also"])
            .build()?,
    )?;
    assert_eq!(previous.map(|d| d.command), Some("echo A".to_string()));
    assert_eq!(orch.commands_for_trigger("go"), vec!["B", "A"]);
    assert!(orch.has_trigger("also"));
    assert_eq!(orch.command_names(), vec!["B", "A"]);

    let run = orch.run("A", no_vars()).await?.wait().await;
    assert_eq!(
        run.invocation().map(|i| i.command.as_str()),
        Some("echo new")
    );

    assert!(orch.replace(def("C", &[]))?.is_none());
    assert!(orch.definition("C").is_some());
    Ok(())
}

/// Removing a command cancels its active runs and drops its routes.
#[tokio::test]
async fn remove_cancels_active_runs() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new().default_script(Script::hang());
    let orch = orchestrator(
        backend.clone().into_backend(),
        vec![def("Serve", &["start"])],
    );
    let handle = orch.run("Serve", no_vars()).await?;

    let removed = orch.remove("Serve").await?;
    assert_eq!(removed.name, "Serve");

    let record = with_timeout(handle.wait()).await;
    assert_eq!(record.state(), RunState::Cancelled);
    assert_eq!(record.comment().as_deref(), Some("command removed"));
    assert!(!orch.has_trigger("start"));
    assert!(orch.definition("Serve").is_none());
    assert!(orch.latest("Serve").is_none());
    assert!(orch.all_active_handles().is_empty());

    assert!(matches!(
        orch.remove("Serve").await,
        Err(CmdTriggerError::DefinitionNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn lifecycle_callbacks_fire_per_outcome() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new();
    let orch = orchestrator(backend.clone().into_backend(), vec![def("Job", &[])]);

    let (successes, on_success) = counter();
    let (failures, on_failed) = counter();
    let ids = orch.set_lifecycle_callback(
        "Job",
        LifecycleCallbacks::new()
            .on_success(on_success)
            .on_failed(on_failed),
    )?;
    assert_eq!(ids.len(), 2);

    orch.run("Job", no_vars()).await?.wait().await;
    backend.set_script("Job", Script::fail("exit 1"));
    orch.run("Job", no_vars()).await?.wait().await;
    orch.run("Job", no_vars()).await?.wait().await;

    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert_eq!(failures.load(Ordering::SeqCst), 2);

    assert!(orch.off(ids[1]));
    orch.run("Job", no_vars()).await?.wait().await;
    assert_eq!(failures.load(Ordering::SeqCst), 2);

    assert!(orch
        .set_lifecycle_callback("Missing", LifecycleCallbacks::new())
        .is_err());
    Ok(())
}

/// Lifecycle callbacks follow the configured event prefix.
#[tokio::test]
async fn lifecycle_callbacks_use_prefix() -> TestResult {
    init_tracing();

    let orch = Orchestrator::builder(FakeBackend::new().into_backend())
        .settings(OrchestratorSettings {
            lifecycle_prefix: "command_".to_string(),
            ..OrchestratorSettings::default()
        })
        .command(def("Job", &[]))
        .build()?;
    assert_eq!(
        orch.lifecycle_event(LifecyclePhase::Success, "Job"),
        "command_success:Job"
    );

    let (count, cb) = counter();
    orch.set_lifecycle_callback("Job", LifecycleCallbacks::new().on_success(cb))?;
    orch.run("Job", no_vars()).await?.wait().await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn preview_resolves_templates() -> TestResult {
    init_tracing();

    let resolver = TemplateResolver::new(BTreeMap::from([(
        "target".to_string(),
        "debug".to_string(),
    )]));
    let build = CommandDefinition::builder("Build", "cargo build --profile {{ target }}")
        .env("RUST_LOG", "info")
        .timeout(Duration::from_secs(60))
        .build()?;
    let lint = CommandDefinition::builder("Lint", "lint {{path}}").build()?;
    let orch = Orchestrator::builder(FakeBackend::new().into_backend())
        .resolver(Arc::new(resolver))
        .commands([build, lint])
        .build()?;

    let inv = orch.preview("Build", &no_vars())?;
    assert_eq!(inv.command, "cargo build --profile debug");
    assert_eq!(inv.env.get("RUST_LOG").map(String::as_str), Some("info"));
    assert_eq!(inv.timeout, Some(Duration::from_secs(60)));

    let overrides = BTreeMap::from([("target".to_string(), "release".to_string())]);
    let inv = orch.preview("Build", &overrides)?;
    assert_eq!(inv.command, "cargo build --profile release");
    assert_eq!(inv.vars.get("target").map(String::as_str), Some("release"));

    match orch.preview("Lint", &no_vars()).unwrap_err() {
        CmdTriggerError::UnresolvedVariable { name, variable } => {
            assert_eq!(name, "Lint");
            assert_eq!(variable, "path");
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = orch.run("Lint", no_vars()).await.unwrap_err();
    assert!(matches!(err, CmdTriggerError::UnresolvedVariable { .. }));
    assert!(orch.latest("Lint").is_none());
    Ok(())
}

#[tokio::test]
async fn imported_history_is_visible() -> TestResult {
    init_tracing();

    let orch = orchestrator(FakeBackend::new().into_backend(), vec![def("Build", &[])]);

    let old = RunRecord::new("Build", vec!["save".to_string()], None);
    old.mark_running();
    old.mark_failed("exit 1");
    orch.import_history(old.snapshot())?;

    let history = orch.history("Build")?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].run_id(), old.run_id());
    assert_eq!(orch.status("Build")?.state, StatusState::Failed);

    let running = RunRecord::new("Build", Vec::new(), None);
    running.mark_running();
    assert!(orch.import_history(running.snapshot()).is_err());

    let stranger = RunRecord::new("Other", Vec::new(), None);
    stranger.mark_success();
    assert!(matches!(
        orch.import_history(stranger.snapshot()),
        Err(CmdTriggerError::DefinitionNotFound(_))
    ));
    Ok(())
}

/// A cancel-trigger stops every active run of the command.
#[tokio::test]
async fn cancel_trigger_stops_all_active_runs() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new().default_script(Script::hang());
    let worker = CommandDefinition::builder("Worker", "work")
        .trigger("work")
        .cancel_on("stop")
        .max_concurrent(0)
        .build()?;
    let orch = orchestrator(backend.clone().into_backend(), vec![worker]);

    orch.fire("work", None).await?;
    orch.fire("work", None).await?;
    assert_eq!(orch.active_runs("Worker").len(), 2);

    let outcome = orch.fire("stop", None).await?;
    assert_eq!(outcome.cancelled, 2);
    assert!(outcome.started.is_empty());
    assert!(orch.active_runs("Worker").is_empty());
    for run in orch.history("Worker")? {
        assert_eq!(run.comment().as_deref(), Some("cancelled by trigger 'stop'"));
    }
    assert_eq!(backend.cancelled().len(), 2);

    assert!(orch.fire("nothing", None).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn cancel_all_counts_cancelled_runs() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new().default_script(Script::hang());
    let orch = orchestrator(
        backend.into_backend(),
        vec![def("A", &["go"]), def("B", &["go"])],
    );
    orch.fire("go", None).await?;
    assert_eq!(orch.all_active_handles().len(), 2);

    assert_eq!(orch.cancel_all("bye").await, 2);
    assert_eq!(orch.cancel_all("bye").await, 0);
    assert_eq!(orch.status("A")?.state, StatusState::Cancelled);
    Ok(())
}

type ResolveHook = Box<dyn Fn(&Orchestrator, &CommandDefinition) + Send + Sync>;

/// Template resolver that first hands the orchestrator to a hook.
struct HookedResolver {
    orch: Arc<OnceLock<Orchestrator>>,
    hook: ResolveHook,
}

impl InvocationResolver for HookedResolver {
    fn resolve(
        &self,
        definition: &CommandDefinition,
        overrides: &BTreeMap<String, String>,
    ) -> CmdTriggerResult<ResolvedInvocation> {
        if let Some(orch) = self.orch.get() {
            (self.hook)(orch, definition);
        }
        TemplateResolver::default().resolve(definition, overrides)
    }
}

fn hooked_orchestrator(
    hook: impl Fn(&Orchestrator, &CommandDefinition) + Send + Sync + 'static,
    defs: Vec<CommandDefinition>,
) -> CmdTriggerResult<Orchestrator> {
    let slot = Arc::new(OnceLock::new());
    let resolver = HookedResolver {
        orch: Arc::clone(&slot),
        hook: Box::new(hook),
    };
    let orch = Orchestrator::builder(FakeBackend::new().into_backend())
        .resolver(Arc::new(resolver))
        .commands(defs)
        .build()?;
    let _ = slot.set(orch.clone());
    Ok(orch)
}

/// Resolvers may query the orchestrator while a run is being set up.
#[tokio::test]
async fn resolver_can_query_status() -> TestResult {
    init_tracing();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let orch = hooked_orchestrator(
        move |orch, def| {
            if let Ok(status) = orch.status(&def.name) {
                sink.lock().push(status.state);
            }
        },
        vec![def("Build", &[])],
    )?;

    let record = with_timeout(orch.run("Build", no_vars()).await?.wait()).await;
    assert_eq!(record.state(), RunState::Success);
    orch.preview("Build", &no_vars())?;

    assert_eq!(
        *seen.lock(),
        vec![StatusState::NeverRun, StatusState::Success]
    );
    Ok(())
}

/// A definition replaced while its invocation is resolved is resolved
/// again, so the run uses the new command.
#[tokio::test]
async fn replace_during_resolve_uses_new_definition() -> TestResult {
    init_tracing();

    let orch = hooked_orchestrator(
        |orch, def| {
            if def.command == "echo v1" {
                let v2 = CommandDefinition::builder("Build", "echo v2")
                    .build()
                    .expect("valid definition");
                orch.replace(v2).expect("replace succeeds");
            }
        },
        vec![CommandDefinition::builder("Build", "echo v1").build()?],
    )?;

    let record = with_timeout(orch.run("Build", no_vars()).await?.wait()).await;
    assert_eq!(record.state(), RunState::Success);
    assert_eq!(
        record.invocation().map(|i| i.command.as_str()),
        Some("echo v2")
    );
    assert_eq!(orch.history("Build")?.len(), 1);
    Ok(())
}

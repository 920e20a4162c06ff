// tests/router.rs

mod common;
use crate::common::builders::{def, orchestrator};
use crate::common::{init_tracing, no_vars, EventRecorder, FakeBackend, Script, TestResult};

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::Span;

use cmdtrigger::run::RunState;
use cmdtrigger::trigger::{EventPattern, TriggerContext, TriggerEvent, TriggerRouter};
use cmdtrigger::CommandDefinition;

fn router(defs: &[CommandDefinition]) -> TriggerRouter {
    let mut router = TriggerRouter::new(Span::none());
    for d in defs {
        router.add_command(d).expect("valid patterns");
    }
    router
}

#[test]
fn wildcard_star_matches_any_substring() {
    let p = EventPattern::new("build:*").unwrap();
    assert!(p.is_wildcard());
    assert!(p.matches("build:web"));
    assert!(p.matches("build:"));
    assert!(p.matches("build:a:b"));
    assert!(!p.matches("rebuild:web"));

    let all = EventPattern::new("*").unwrap();
    assert!(all.matches("success:Lint"));

    let mid = EventPattern::new("success:*-web").unwrap();
    assert!(mid.matches("success:build-web"));
    assert!(!mid.matches("success:build-api"));
}

#[test]
fn other_glob_characters_are_literal() {
    let p = EventPattern::new("build[1]?").unwrap();
    assert!(!p.is_wildcard());
    assert!(p.matches("build[1]?"));
    assert!(!p.matches("build1x"));

    let mixed = EventPattern::new("job[?]:*").unwrap();
    assert!(mixed.matches("job[?]:done"));
    assert!(!mixed.matches("jobx:done"));
    assert!(EventPattern::new("  ").is_err());
}

/// Exact matches come first, then wildcard matches, each in registration
/// order, with every command listed once.
#[test]
fn commands_are_ordered_exact_then_wildcard() {
    let r = router(&[
        def("All", &["build:*"]),
        def("Web", &["build:web"]),
        def("Both", &["build:web", "*:web"]),
        def("Api", &["build:api"]),
    ]);

    assert_eq!(r.commands_for("build:web"), vec!["Web", "Both", "All"]);
    assert_eq!(r.commands_for("build:api"), vec!["Api", "All"]);
    assert_eq!(r.commands_for("test:web"), vec!["Both"]);
    assert!(r.commands_for("deploy").is_empty());
}

#[test]
fn re_adding_a_command_moves_it_last() {
    let mut r = router(&[def("A", &["go"]), def("B", &["go"])]);
    r.add_command(&def("A", &["go"])).unwrap();
    assert_eq!(r.commands_for("go"), vec!["B", "A"]);

    r.remove_command("B");
    assert_eq!(r.commands_for("go"), vec!["A"]);
}

#[test]
fn cancel_routes_are_separate_from_triggers() {
    let server = CommandDefinition::builder("Server", "serve")
        .trigger("start")
        .cancel_on("stop:*")
        .build()
        .unwrap();
    let r = router(&[server]);

    assert_eq!(r.cancellations_for("stop:all"), vec!["Server"]);
    assert!(r.commands_for("stop:all").is_empty());

    let dispatch = r.route("stop:now");
    assert_eq!(dispatch.cancel, vec!["Server"]);
    assert!(dispatch.commands.is_empty());
    assert!(r.has_subscribers("start"));
    assert!(!r.has_subscribers("restart"));
}

#[test]
fn callbacks_follow_exact_then_wildcard_and_can_be_removed() {
    let mut r = router(&[]);
    let noop = |_: &TriggerEvent| -> anyhow::Result<()> { Ok(()) };
    let wild = r.add_callback("*", Arc::new(noop)).unwrap();
    let exact = r.add_callback("save", Arc::new(noop)).unwrap();

    let ids: Vec<_> = r.callbacks_for("save").iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![exact, wild]);

    assert!(r.remove_callback(wild));
    assert!(!r.remove_callback(wild));
    let ids: Vec<_> = r.callbacks_for("other").iter().map(|(id, _)| *id).collect();
    assert!(ids.is_empty());
}

#[test]
fn untracked_entry_skips_cycle_check() {
    let r = router(&[]);
    let ctx = TriggerContext::new().enter("a").unwrap();

    assert!(r.enter(&ctx, "a", true).is_err());
    let again = r.enter(&ctx, "a", false).unwrap();
    assert_eq!(again.history(), &["a", "a"]);
    assert!(again.enter("b").is_ok());
}

/// On one fired event: cancel-triggers apply first, then callbacks, then
/// commands start.
#[tokio::test]
async fn fire_cancels_then_calls_back_then_starts() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new().script("Server", Script::hang());
    let server = CommandDefinition::builder("Server", "serve")
        .cancel_on("deploy")
        .build()?;
    let orch = orchestrator(
        backend.clone().into_backend(),
        vec![server, def("Deploy", &["deploy"])],
    );

    let server_run = orch.run("Server", no_vars()).await?;

    let seen: Arc<Mutex<Vec<(RunState, usize)>>> = Arc::default();
    {
        let seen = Arc::clone(&seen);
        let backend = backend.clone();
        let server_run = server_run.clone();
        orch.on("deploy", move |_: &TriggerEvent| -> anyhow::Result<()> {
            seen.lock()
                .push((server_run.state(), backend.start_count("Deploy")));
            Ok(())
        })?;
    }

    let outcome = orch.fire("deploy", None).await?;
    assert_eq!(outcome.cancelled, 1);
    assert!(outcome.handle("Deploy").is_some());
    assert_eq!(*seen.lock(), vec![(RunState::Cancelled, 0)]);
    assert_eq!(
        server_run.comment().as_deref(),
        Some("cancelled by trigger 'deploy'")
    );
    Ok(())
}

/// Commands matched by one event start in router order.
#[tokio::test]
async fn triggered_runs_start_in_dispatch_order() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new();
    let orch = orchestrator(
        backend.clone().into_backend(),
        vec![
            def("Prefixed", &["sa*"]),
            def("Format", &["save"]),
            def("Lint", &["save"]),
        ],
    );
    let recorder = EventRecorder::new();
    orch.on("started:*", recorder.clone())?;

    let outcome = orch.fire("save", None).await?;
    let started: Vec<_> = outcome.started.iter().map(|h| h.command_name()).collect();
    assert_eq!(started, vec!["Format", "Lint", "Prefixed"]);
    assert_eq!(
        recorder.names(),
        vec!["started:Format", "started:Lint", "started:Prefixed"]
    );
    Ok(())
}

// tests/records.rs

mod common;
use crate::common::builders::{def, orchestrator};
use crate::common::{init_tracing, no_vars, FakeBackend, Script, TestResult};

use std::sync::Arc;
use std::time::Duration;

use cmdtrigger::exec::ExecutionBackend;
use cmdtrigger::run::{format_duration, RunHandle, RunRecord, RunSnapshot, RunState};
use cmdtrigger::store::HistoryRing;
use cmdtrigger::{CmdTriggerError, ResolvedInvocation};

fn record() -> RunRecord {
    RunRecord::new(
        "Build",
        vec!["save".to_string()],
        Some(Arc::new(ResolvedInvocation::plain("make"))),
    )
}

#[test]
fn new_record_is_pending() {
    let r = record();
    assert_eq!(r.state(), RunState::Pending);
    assert_eq!(r.success(), None);
    assert!(r.started_at().is_none());
    assert!(r.ended_at().is_none());
    assert_eq!(r.duration_str(), "-");
    assert_eq!(r.trigger_chain(), &["save"]);
    assert_eq!(r.invocation().map(|i| i.command.as_str()), Some("make"));
}

#[test]
fn success_sets_result_fields() {
    let r = record();
    assert!(r.mark_running());
    assert!(r.started_at().is_some());
    assert!(r.ended_at().is_none());
    assert!(!r.mark_running());

    assert!(r.append_output("line 1\n"));
    assert!(r.mark_success());
    assert_eq!(r.state(), RunState::Success);
    assert_eq!(r.success(), Some(true));
    assert!(r.error().is_none());
    assert!(r.ended_at().is_some());
    assert!(r.duration().is_some());
    assert_eq!(r.output(), "line 1\n");
}

/// After the first terminal transition every mutator is a no-op.
#[test]
fn finalized_record_is_immutable() {
    let r = record();
    r.mark_running();
    assert!(r.mark_cancelled("user request"));
    let ended = r.ended_at();

    assert!(!r.mark_cancelled("second"));
    assert!(!r.mark_success());
    assert!(!r.mark_failed("late"));
    assert!(!r.append_output("late output"));
    assert!(!r.set_output("replaced"));

    assert_eq!(r.state(), RunState::Cancelled);
    assert_eq!(r.success(), None);
    assert_eq!(r.comment().as_deref(), Some("user request"));
    assert_eq!(r.error().as_deref(), Some("Command was cancelled"));
    assert_eq!(r.ended_at(), ended);
    assert!(r.output().is_empty());
}

#[test]
fn failure_records_detail() {
    let r = record();
    r.mark_running();
    assert!(r.mark_failed("Command exited with code 2"));
    assert_eq!(r.success(), Some(false));
    assert_eq!(r.error().as_deref(), Some("Command exited with code 2"));
}

/// A record cancelled before it ever ran still gets an end time and a zero
/// duration.
#[test]
fn cancel_while_pending() {
    let r = record();
    assert!(r.mark_cancelled("restarted"));
    assert!(r.started_at().is_none());
    assert!(r.ended_at().is_some());
    assert_eq!(r.duration(), Some(Duration::ZERO));
    assert!(!r.mark_running());
}

#[test]
fn snapshot_round_trips_through_toml() -> TestResult {
    let r = record();
    r.mark_running();
    r.append_output("ok\n");
    r.mark_success();

    let snapshot = r.snapshot();
    let text = snapshot.to_toml()?;
    assert!(text.contains("state = \"success\""));
    assert!(text.contains("command_name = \"Build\""));

    let parsed = RunSnapshot::from_toml(&text)?;
    assert_eq!(parsed.run_id, r.run_id());
    assert_eq!(parsed.state, RunState::Success);
    assert_eq!(parsed.output, "ok\n");
    assert_eq!(parsed.trigger_chain, vec!["save".to_string()]);
    assert_eq!(parsed.invocation, Some(ResolvedInvocation::plain("make")));
    Ok(())
}

#[test]
fn non_terminal_snapshot_cannot_be_restored() {
    let r = record();
    r.mark_running();
    let err = RunRecord::from_snapshot(r.snapshot()).unwrap_err();
    assert!(matches!(err, CmdTriggerError::InvalidDefinition(_)));
}

#[test]
fn duration_formatting() {
    assert_eq!(format_duration(None), "-");
    assert_eq!(format_duration(Some(Duration::from_millis(2400))), "2.4s");
    assert_eq!(format_duration(Some(Duration::from_secs(83))), "1m 23s");
    assert_eq!(format_duration(Some(Duration::from_secs(3900))), "1h 5m");
}

#[test]
fn history_ring_evicts_oldest() {
    let mut ring = HistoryRing::new(2);
    assert_eq!(ring.push(1), None);
    assert_eq!(ring.push(2), None);
    assert_eq!(ring.push(3), Some(1));
    assert_eq!(ring.to_vec(), vec![2, 3]);
    assert_eq!(ring.last(), Some(&3));
}

#[test]
fn zero_capacity_ring_keeps_nothing() {
    let mut ring = HistoryRing::new(0);
    assert_eq!(ring.push("a"), Some("a"));
    assert!(ring.is_empty());
    assert_eq!(ring.last(), None);
}

#[test]
fn shrinking_ring_drops_oldest() {
    let mut ring = HistoryRing::new(4);
    for i in 0..4 {
        ring.push(i);
    }
    ring.resize(2);
    assert_eq!(ring.capacity(), 2);
    assert_eq!(ring.to_vec(), vec![2, 3]);
}

#[tokio::test]
async fn handle_wait_timeout_expires_for_hanging_run() -> TestResult {
    init_tracing();

    let orch = orchestrator(
        FakeBackend::new().default_script(Script::hang()).into_backend(),
        vec![def("Serve", &[])],
    );
    let handle = orch.run("Serve", no_vars()).await?;

    let err = handle
        .wait_timeout(Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, CmdTriggerError::WaitTimedOut(_)));
    assert!(!handle.is_done());

    orch.cancel_run(handle.run_id(), "done waiting").await;
    let record = handle.wait_timeout(Duration::from_secs(1)).await?;
    assert_eq!(record.state(), RunState::Cancelled);
    assert!(handle.is_done());
    Ok(())
}

#[tokio::test]
async fn completed_handle_resolves_immediately() -> TestResult {
    let r = record();
    r.mark_running();
    r.mark_failed("boom");
    let handle = RunHandle::completed(r);
    assert!(handle.is_done());
    let record = handle.wait_timeout(Duration::from_millis(10)).await?;
    assert_eq!(record.state(), RunState::Failed);
    Ok(())
}

/// Cancelling a run that already finished changes nothing, through the
/// orchestrator or the backend.
#[tokio::test]
async fn cancel_after_completion_is_a_no_op() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new();
    let orch = orchestrator(backend.clone().into_backend(), vec![def("Build", &[])]);

    let handle = orch.run("Build", no_vars()).await?;
    let record = handle.wait().await;
    assert_eq!(record.state(), RunState::Success);

    assert!(!orch.cancel_run(record.run_id(), "too late").await);
    assert!(!orch.cancel_run(record.run_id(), "still too late").await);
    backend
        .cancel(record.clone(), "direct".to_string())
        .await?;

    assert_eq!(record.state(), RunState::Success);
    assert!(record.comment().is_none());
    assert!(backend.cancelled().is_empty());
    assert_eq!(orch.history("Build")?.len(), 1);
    Ok(())
}

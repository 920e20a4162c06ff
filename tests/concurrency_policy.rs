// tests/concurrency_policy.rs

use proptest::prelude::*;

use cmdtrigger::engine::ConcurrencyPolicy;
use cmdtrigger::run::RunRecord;
use cmdtrigger::types::RetriggerPolicy;
use cmdtrigger::CommandDefinition;

fn definition(limit: usize, policy: RetriggerPolicy) -> CommandDefinition {
    CommandDefinition::builder("Job", "echo job")
        .max_concurrent(limit)
        .on_retrigger(policy)
        .build()
        .expect("valid definition")
}

fn active(n: usize) -> Vec<RunRecord> {
    (0..n).map(|_| RunRecord::new("Job", Vec::new(), None)).collect()
}

fn policy_strategy() -> impl Strategy<Value = RetriggerPolicy> {
    prop_oneof![
        Just(RetriggerPolicy::CancelAndRestart),
        Just(RetriggerPolicy::Ignore)
    ]
}

#[test]
fn below_limit_allows_without_cancelling() {
    let def = definition(2, RetriggerPolicy::Ignore);
    let decision = ConcurrencyPolicy::decide(&def, &active(1));
    assert!(decision.allow);
    assert!(decision.to_cancel.is_empty());
}

#[test]
fn at_limit_with_ignore_denies() {
    let def = definition(1, RetriggerPolicy::Ignore);
    let decision = ConcurrencyPolicy::decide(&def, &active(1));
    assert!(!decision.allow);
    assert!(decision.to_cancel.is_empty());
}

#[test]
fn at_limit_with_cancel_and_restart_cancels_every_active_run() {
    let def = definition(2, RetriggerPolicy::CancelAndRestart);
    let runs = active(2);
    let decision = ConcurrencyPolicy::decide(&def, &runs);
    assert!(decision.allow);
    assert_eq!(decision.to_cancel.len(), 2);
    for (cancel, run) in decision.to_cancel.iter().zip(&runs) {
        assert!(cancel.ptr_eq(run));
    }
}

#[test]
fn zero_limit_is_unlimited() {
    let def = definition(0, RetriggerPolicy::Ignore);
    let decision = ConcurrencyPolicy::decide(&def, &active(50));
    assert!(decision.allow);
    assert!(decision.to_cancel.is_empty());
}

proptest! {
    /// The decision only depends on the limit, the policy and the number of
    /// active runs, and asking twice yields the same answer.
    #[test]
    fn decide_is_deterministic(
        limit in 0usize..6,
        active_count in 0usize..8,
        policy in policy_strategy(),
    ) {
        let def = definition(limit, policy);
        let runs = active(active_count);

        let first = ConcurrencyPolicy::decide(&def, &runs);
        let second = ConcurrencyPolicy::decide(&def, &runs);

        prop_assert_eq!(first.allow, second.allow);
        prop_assert_eq!(first.to_cancel.len(), second.to_cancel.len());
        for (a, b) in first.to_cancel.iter().zip(&second.to_cancel) {
            prop_assert!(a.ptr_eq(b));
        }

        let below = limit == 0 || active_count < limit;
        match (below, policy) {
            (true, _) => {
                prop_assert!(first.allow);
                prop_assert!(first.to_cancel.is_empty());
            }
            (false, RetriggerPolicy::CancelAndRestart) => {
                prop_assert!(first.allow);
                prop_assert_eq!(first.to_cancel.len(), active_count);
            }
            (false, RetriggerPolicy::Ignore) => {
                prop_assert!(!first.allow);
                prop_assert!(first.to_cancel.is_empty());
            }
        }
    }
}

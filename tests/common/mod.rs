#![allow(dead_code)]

pub use cmdtrigger_test_utils::builders;
pub use cmdtrigger_test_utils::{
    init_tracing, with_timeout, Behavior, EventRecorder, FakeBackend, Script,
};

use std::collections::BTreeMap;
use std::error::Error;
use std::time::Duration;

pub type TestResult = Result<(), Box<dyn Error>>;

/// No variable overrides.
pub fn no_vars() -> BTreeMap<String, String> {
    BTreeMap::new()
}

/// Poll `cond` every few milliseconds until it holds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    while !cond() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

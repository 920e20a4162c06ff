use std::sync::Arc;
use std::time::Duration;

use cmdtrigger::trigger::{TriggerCallback, TriggerEvent};
use parking_lot::Mutex;

/// Callback that records every event it receives.
///
/// Subscribe it with `orchestrator.on("*", recorder.clone())` to capture the
/// full event stream in dispatch order.
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<TriggerEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TriggerEvent> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Poll until at least `n` events arrived.
    pub async fn wait_for_len(&self, n: usize) {
        while self.len() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl TriggerCallback for EventRecorder {
    fn on_event(&self, event: &TriggerEvent) -> anyhow::Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

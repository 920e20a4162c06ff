// src/trigger/callback.rs

//! Typed callback interface for event subscribers.

use std::fmt;
use std::sync::Arc;

use crate::errors::CmdTriggerError;
use crate::run::RunSnapshot;

/// An event as delivered to callbacks.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    pub name: String,
    /// Propagation path including this event.
    pub history: Vec<String>,
    /// The run this event describes, for lifecycle events.
    pub run: Option<RunSnapshot>,
    /// `true` for events emitted by the engine itself.
    pub auto: bool,
}

/// Handler for events matching a registered pattern.
///
/// Any `Fn(&TriggerEvent) -> anyhow::Result<()>` closure implements this.
pub trait TriggerCallback: Send + Sync {
    fn on_event(&self, event: &TriggerEvent) -> anyhow::Result<()>;
}

impl<F> TriggerCallback for F
where
    F: Fn(&TriggerEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &TriggerEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Receives errors raised while propagating engine-generated events.
pub type ErrorCallback = Arc<dyn Fn(&CmdTriggerError) + Send + Sync>;

/// Identifier returned by callback registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(pub(crate) u64);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb#{}", self.0)
    }
}

/// Per-command lifecycle hooks, registered as exact callbacks on that
/// command's lifecycle events.
#[derive(Default, Clone)]
pub struct LifecycleCallbacks {
    pub on_success: Option<Arc<dyn TriggerCallback>>,
    pub on_failed: Option<Arc<dyn TriggerCallback>>,
    pub on_cancelled: Option<Arc<dyn TriggerCallback>>,
}

impl LifecycleCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(mut self, cb: impl TriggerCallback + 'static) -> Self {
        self.on_success = Some(Arc::new(cb));
        self
    }

    pub fn on_failed(mut self, cb: impl TriggerCallback + 'static) -> Self {
        self.on_failed = Some(Arc::new(cb));
        self
    }

    pub fn on_cancelled(mut self, cb: impl TriggerCallback + 'static) -> Self {
        self.on_cancelled = Some(Arc::new(cb));
        self
    }
}

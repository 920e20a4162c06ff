// src/trigger/mod.rs

//! Event routing: patterns, cycle-prevention context and callbacks.

pub mod callback;
pub mod context;
pub mod pattern;
pub mod router;

pub use callback::{CallbackId, ErrorCallback, LifecycleCallbacks, TriggerCallback, TriggerEvent};
pub use context::TriggerContext;
pub use pattern::{EventPattern, PatternError};
pub use router::{invoke_callbacks, Dispatch, TriggerRouter};

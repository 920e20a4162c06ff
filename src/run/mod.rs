// src/run/mod.rs

//! Run records and handles.

pub mod handle;
pub mod record;

pub use handle::RunHandle;
pub use record::{format_duration, RunId, RunRecord, RunSnapshot, RunState};

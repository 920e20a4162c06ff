// src/store/mod.rs

//! Run-state registry.
//!
//! - [`state`] holds [`RunStateStore`], the single mutable record of
//!   definitions, active runs, history and debounce timestamps.
//! - [`ring`] provides the bounded [`HistoryRing`] used for history.
//! - [`status`] derives [`CommandStatus`] projections.

pub mod ring;
pub mod state;
pub mod status;

pub use ring::HistoryRing;
pub use state::RunStateStore;
pub use status::{CommandStatus, StatusState};

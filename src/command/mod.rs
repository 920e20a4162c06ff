// src/command/mod.rs

//! Command definitions and invocation resolution.
//!
//! - [`definition`] holds the immutable [`CommandDefinition`] and its builder.
//! - [`invocation`] holds [`ResolvedInvocation`] plus the
//!   [`InvocationResolver`] seam and its default [`TemplateResolver`].

pub mod definition;
pub mod invocation;

pub use definition::{CommandDefinition, CommandDefinitionBuilder, CommandName};
pub use invocation::{InvocationResolver, ResolvedInvocation, TemplateResolver};

// src/trigger/pattern.rs

use std::fmt;

use globset::{GlobBuilder, GlobMatcher};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("event pattern cannot be empty")]
    Empty,

    #[error(transparent)]
    Glob(#[from] globset::Error),
}

/// An event-name pattern: either an exact name or a wildcard pattern where
/// `*` matches any substring (including `:`).
///
/// All other glob metacharacters are treated literally, so `build[1]` only
/// matches the event named `build[1]`.
#[derive(Clone)]
pub struct EventPattern {
    raw: String,
    matcher: Option<GlobMatcher>,
}

impl EventPattern {
    pub fn new(raw: impl Into<String>) -> Result<Self, PatternError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(PatternError::Empty);
        }

        let matcher = if raw.contains('*') {
            let mut escaped = raw
                .split('*')
                .map(globset::escape)
                .collect::<Vec<_>>()
                .join("*");
            // `**` has path-recursive meaning in globset; one star is enough.
            while escaped.contains("**") {
                escaped = escaped.replace("**", "*");
            }
            let glob = GlobBuilder::new(&escaped)
                .literal_separator(false)
                .backslash_escape(false)
                .build()?;
            Some(glob.compile_matcher())
        } else {
            None
        };

        Ok(Self { raw, matcher })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_wildcard(&self) -> bool {
        self.matcher.is_some()
    }

    pub fn matches(&self, event: &str) -> bool {
        match &self.matcher {
            Some(m) => m.is_match(event),
            None => self.raw == event,
        }
    }
}

impl fmt::Debug for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventPattern").field(&self.raw).finish()
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

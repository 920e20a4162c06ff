// src/command/invocation.rs

//! Resolved invocations and the resolver seam that produces them.
//!
//! The engine never interprets command templates itself. It asks an
//! [`InvocationResolver`] for a fully resolved [`ResolvedInvocation`] at
//! run-start time and hands that snapshot to the execution backend.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::command::CommandDefinition;
use crate::errors::{CmdTriggerError, Result};

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.-]*)\s*\}\}").expect("placeholder regex is valid")
});

/// Concrete, immutable description of what a backend should execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedInvocation {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    #[serde(default, with = "duration_ms_opt", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Variables that were in effect when the command was resolved.
    pub vars: BTreeMap<String, String>,
}

impl ResolvedInvocation {
    /// Invocation that runs `command` verbatim with no extra environment.
    pub fn plain(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            env: BTreeMap::new(),
            timeout: None,
            vars: BTreeMap::new(),
        }
    }
}

/// Produces a [`ResolvedInvocation`] for a definition plus per-run variable
/// overrides.
///
/// The orchestrator calls `resolve` without holding its own lock, so an
/// implementation may query the orchestrator.
pub trait InvocationResolver: Send + Sync {
    fn resolve(
        &self,
        definition: &CommandDefinition,
        overrides: &BTreeMap<String, String>,
    ) -> Result<ResolvedInvocation>;
}

/// Default single-pass resolver for `{{ name }}` placeholders.
///
/// Global variables are overlaid with per-run overrides. Values are not
/// themselves re-expanded.
#[derive(Debug, Clone, Default)]
pub struct TemplateResolver {
    vars: BTreeMap<String, String>,
    default_cwd: Option<PathBuf>,
}

impl TemplateResolver {
    pub fn new(vars: BTreeMap<String, String>) -> Self {
        Self {
            vars,
            default_cwd: None,
        }
    }

    /// Working directory used when a definition does not set one.
    pub fn with_default_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.default_cwd = Some(cwd.into());
        self
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    fn substitute(
        name: &str,
        template: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<String> {
        let mut missing: Option<String> = None;
        let out = PLACEHOLDER_RE.replace_all(template, |caps: &Captures<'_>| {
            let key = &caps[1];
            match vars.get(key) {
                Some(value) => value.clone(),
                None => {
                    missing.get_or_insert_with(|| key.to_string());
                    caps[0].to_string()
                }
            }
        });

        match missing {
            Some(variable) => Err(CmdTriggerError::UnresolvedVariable {
                name: name.to_string(),
                variable,
            }),
            None => Ok(out.into_owned()),
        }
    }
}

impl InvocationResolver for TemplateResolver {
    fn resolve(
        &self,
        definition: &CommandDefinition,
        overrides: &BTreeMap<String, String>,
    ) -> Result<ResolvedInvocation> {
        let mut vars = self.vars.clone();
        vars.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

        let command = Self::substitute(&definition.name, &definition.command, &vars)?;

        Ok(ResolvedInvocation {
            command,
            cwd: definition.cwd.clone().or_else(|| self.default_cwd.clone()),
            env: definition.env.clone(),
            timeout: definition.timeout,
            vars,
        })
    }
}

pub(crate) mod duration_ms_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

// src/config/validate.rs

use std::collections::HashSet;

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use tracing::warn;

use crate::command::CommandDefinition;
use crate::config::model::{ConfigFile, RawConfigFile};
use crate::engine::LifecyclePhase;
use crate::errors::{CmdTriggerError, Result};
use crate::trigger::EventPattern;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = CmdTriggerError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let definitions = validate_raw_config(&raw)?;
        let cycles = trigger_cycles(&definitions, &raw.settings.lifecycle_prefix);
        report_cycles(&definitions, &cycles);
        Ok(ConfigFile::new_unchecked(
            raw.settings,
            raw.variables,
            definitions,
            cycles,
        ))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<Vec<CommandDefinition>> {
    ensure_has_commands(cfg)?;
    validate_settings(cfg)?;
    ensure_unique_names(cfg)?;

    cfg.commands
        .iter()
        .map(|c| {
            let def = c.to_definition();
            def.validate()
                .map_err(|e| CmdTriggerError::ConfigError(e.to_string()))?;
            Ok(def)
        })
        .collect()
}

fn ensure_has_commands(cfg: &RawConfigFile) -> Result<()> {
    if cfg.commands.is_empty() {
        return Err(CmdTriggerError::ConfigError(
            "config must contain at least one [[command]] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_settings(cfg: &RawConfigFile) -> Result<()> {
    if cfg.settings.shutdown_timeout_ms == 0 {
        return Err(CmdTriggerError::ConfigError(
            "[settings].shutdown_timeout_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.settings.lifecycle_prefix.contains(':') {
        return Err(CmdTriggerError::ConfigError(format!(
            "[settings].lifecycle_prefix must not contain ':' (got '{}')",
            cfg.settings.lifecycle_prefix
        )));
    }
    Ok(())
}

fn ensure_unique_names(cfg: &RawConfigFile) -> Result<()> {
    let mut seen = HashSet::new();
    for c in &cfg.commands {
        if !seen.insert(c.name.as_str()) {
            return Err(CmdTriggerError::ConfigError(format!(
                "command '{}' is defined more than once",
                c.name
            )));
        }
    }
    Ok(())
}

/// Find groups of commands whose lifecycle events trigger each other.
///
/// Edge direction: A -> B when some lifecycle event of A matches a trigger
/// pattern of B. Each strongly connected component with more than one
/// command, or a command that triggers itself, is one cycle.
pub fn trigger_cycles(defs: &[CommandDefinition], prefix: &str) -> Vec<Vec<String>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for def in defs {
        graph.add_node(def.name.as_str());
    }

    let compiled: Vec<(&str, Vec<EventPattern>)> = defs
        .iter()
        .map(|d| {
            let patterns = d
                .triggers
                .iter()
                .filter_map(|t| EventPattern::new(t.as_str()).ok())
                .collect();
            (d.name.as_str(), patterns)
        })
        .collect();

    for source in defs {
        let events: Vec<String> = LifecyclePhase::ALL
            .iter()
            .map(|p| p.event_name(prefix, &source.name))
            .collect();
        for (target, patterns) in &compiled {
            let hit = events
                .iter()
                .any(|e| patterns.iter().any(|p| p.matches(e)));
            if hit {
                graph.add_edge(source.name.as_str(), *target, ());
            }
        }
    }

    let mut cycles: Vec<Vec<String>> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .map(|scc| {
            let mut names: Vec<String> = scc.into_iter().map(str::to_string).collect();
            names.sort();
            names
        })
        .collect();
    cycles.sort();
    cycles
}

fn report_cycles(defs: &[CommandDefinition], cycles: &[Vec<String>]) {
    for cycle in cycles {
        let unchecked: Vec<&str> = cycle
            .iter()
            .filter(|n| defs.iter().any(|d| &d.name == *n && !d.loop_detection))
            .map(String::as_str)
            .collect();
        if unchecked.is_empty() {
            warn!(
                commands = ?cycle,
                "trigger cycle in config; it will be stopped at runtime by cycle detection"
            );
        } else {
            warn!(
                commands = ?cycle,
                loop_detection_off = ?unchecked,
                "trigger cycle includes commands without loop detection; it may never terminate"
            );
        }
    }
}

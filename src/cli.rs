// src/cli.rs

//! CLI argument parsing using `clap`.

use std::collections::BTreeMap;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `cmdtrigger`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cmdtrigger",
    version,
    about = "Run named commands in reaction to trigger events.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "cmdtrigger.toml")]
    pub config: String,

    /// Fire a trigger event. May be given multiple times.
    #[arg(long = "fire", value_name = "EVENT")]
    pub fire: Vec<String>,

    /// Run a command directly by name. May be given multiple times.
    #[arg(long = "run", value_name = "NAME")]
    pub run: Vec<String>,

    /// Variable override for directly run commands, as KEY=VALUE.
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CMDTRIGGER_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print commands and triggers, but don't execute
    /// anything.
    #[arg(long)]
    pub dry_run: bool,
}

impl CliArgs {
    pub fn var_map(&self) -> BTreeMap<String, String> {
        self.vars.iter().cloned().collect()
    }
}

fn parse_var(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

// src/lib.rs

pub mod cli;
pub mod command;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod run;
pub mod store;
pub mod trigger;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{info, info_span, warn};

use crate::cli::CliArgs;
use crate::config::{load_and_validate, ConfigFile};
use crate::engine::Orchestrator;
use crate::exec::LocalProcessBackend;
use crate::run::{RunHandle, RunState};

pub use crate::command::{CommandDefinition, ResolvedInvocation};
pub use crate::engine::{FireOutcome, OrchestratorSettings, ShutdownOptions, ShutdownSummary};
pub use crate::errors::{CmdTriggerError, Result as CmdTriggerResult};
pub use crate::run::RunRecord;
pub use crate::trigger::{TriggerContext, TriggerEvent};
pub use crate::types::{DebounceMode, RetriggerPolicy};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the local process backend and the orchestrator
/// - the requested direct runs and trigger events
/// - Ctrl-C handling and graceful shutdown
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    if args.run.is_empty() && args.fire.is_empty() {
        warn!("nothing to do: pass --run <NAME> or --fire <EVENT>");
        return Ok(());
    }

    let span = info_span!("cmdtrigger");
    let backend = LocalProcessBackend::new(cfg.settings.grace_period()).with_span(span.clone());
    let resolver = cfg.resolver().with_default_cwd(config_root_dir(&config_path));
    let orchestrator = Orchestrator::builder(Arc::new(backend))
        .span(span)
        .resolver(Arc::new(resolver))
        .settings(cfg.settings.orchestrator_settings())
        .commands(cfg.definitions().iter().cloned())
        .build()?;

    let mut direct: Vec<RunHandle> = Vec::new();
    let mut start_failures = 0usize;

    let vars = args.var_map();
    for name in &args.run {
        match orchestrator.run(name, vars.clone()).await {
            Ok(handle) => direct.push(handle),
            Err(e) => {
                eprintln!("{name}: {e}");
                start_failures += 1;
            }
        }
    }

    for event in &args.fire {
        let outcome = orchestrator.fire(event, None).await?;
        if outcome.is_empty() {
            warn!(%event, "no command reacted to event");
        }
        for (name, e) in &outcome.errors {
            eprintln!("{name}: {e}");
        }
    }

    tokio::select! {
        _ = settle(&orchestrator, &direct) => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                eprintln!("failed to listen for Ctrl+C: {e}");
            }
            info!("Ctrl+C received; shutting down");
        }
    }

    let summary = orchestrator.shutdown_default().await;
    if summary.cancelled + summary.timed_out > 0 {
        println!(
            "shutdown: {} cancelled, {} completed, {} timed out",
            summary.cancelled, summary.completed, summary.timed_out
        );
    }

    let failed = direct
        .iter()
        .filter(|h| h.state() != RunState::Success)
        .count()
        + start_failures;
    if failed > 0 {
        bail!("{failed} requested run(s) did not succeed");
    }
    Ok(())
}

/// Wait until the requested runs and everything they chained have finished.
async fn settle(orchestrator: &Orchestrator, direct: &[RunHandle]) {
    for handle in direct {
        print_result(&handle.wait().await);
    }
    loop {
        let active = orchestrator.all_active_handles();
        if active.is_empty() {
            break;
        }
        for handle in active {
            print_result(&handle.wait().await);
        }
    }
}

fn print_result(record: &RunRecord) {
    let chain = if record.trigger_chain().is_empty() {
        String::new()
    } else {
        format!(" [{}]", record.trigger_chain().join(" -> "))
    };
    println!(
        "{}: {} ({}){}",
        record.command_name(),
        record.state(),
        record.duration_str(),
        chain
    );
    if let Some(err) = record.error() {
        println!("  error: {err}");
    }
}

/// Directory commands run in when they don't set `cwd`.
///
/// - If the config path has a non-empty parent (e.g. "configs/cmdtrigger.toml"),
///   we use that directory.
/// - If it's just a bare filename, we fall back to the current working
///   directory "."
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Simple dry-run output: print settings, commands and trigger cycles.
fn print_dry_run(cfg: &ConfigFile) {
    println!("cmdtrigger dry-run");
    println!(
        "  settings.cancel_grace_period_ms = {}",
        cfg.settings.cancel_grace_period_ms
    );
    println!(
        "  settings.lifecycle_prefix = {:?}",
        cfg.settings.lifecycle_prefix
    );
    println!();

    println!("commands ({}):", cfg.definitions().len());
    let resolver = cfg.resolver();
    for def in cfg.definitions() {
        println!("  - {}", def.name);
        match crate::command::InvocationResolver::resolve(&resolver, def, &Default::default()) {
            Ok(inv) => println!("      command: {}", inv.command),
            Err(e) => println!("      command: {} ({e})", def.command),
        }
        if !def.triggers.is_empty() {
            println!("      triggers: {:?}", def.triggers);
        }
        if !def.cancel_on_triggers.is_empty() {
            println!("      cancel_on_triggers: {:?}", def.cancel_on_triggers);
        }
        println!(
            "      max_concurrent: {}, on_retrigger: {}",
            def.max_concurrent, def.on_retrigger
        );
        if let Some(timeout) = def.timeout {
            println!("      timeout: {timeout:?}");
        }
        if def.is_debounced() {
            println!("      debounce: {:?} ({:?})", def.debounce, def.debounce_mode);
        }
        if !def.loop_detection {
            println!("      loop_detection: false");
        }
    }

    for cycle in cfg.trigger_cycles() {
        println!();
        println!("trigger cycle: {}", cycle.join(" -> "));
    }
}

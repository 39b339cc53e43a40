// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod model;
pub mod modifier;
pub mod progress;
pub mod store;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cli::CliArgs;
use crate::config::{install_with_id, load_and_validate, PlaybookFile};
use crate::dag::render_mermaid;
use crate::engine::{FileJournal, Journal, MemoryJournal, RunReport, Scheduler};
use crate::exec::ShellDispatcher;
use crate::model::Status;
use crate::progress::LogProgressSink;
use crate::store::{MemoryStore, PlaybookStore};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - playbook loading and installation into an in-memory store
/// - the scheduler with the local shell dispatcher
/// - the optional on-disk journal
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let file = load_and_validate(&args.playbook)?;

    let store = MemoryStore::new();
    let run_id = install_with_id(&file, &store, args.run_id.unwrap_or_else(Uuid::new_v4))?;
    info!(%run_id, name = %file.name, steps = file.steps.len(), "playbook installed");

    if args.dry_run {
        print_dry_run(&file, &store, run_id).await?;
        return Ok(());
    }

    let journal: Arc<dyn Journal> = match &args.journal {
        Some(path) => {
            info!(path = ?path, "recording run in journal");
            Arc::new(FileJournal::new(path))
        }
        None => Arc::new(MemoryJournal::new()),
    };

    let scheduler = Scheduler::new(Arc::new(store.clone()), Arc::new(ShellDispatcher::new()))
        .with_journal(journal)
        .with_progress(Arc::new(LogProgressSink))
        .with_config(file.engine);

    // Ctrl-C → stop scheduling; the journal keeps what was seen.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            return;
        }
        let _ = shutdown_tx.send(true);
    });

    let report = scheduler.run_until(run_id, shutdown_rx).await?;
    print_report(&report, &store).await?;

    if report.cancelled {
        warn!(%run_id, "run interrupted; rerun with the same --journal and --run-id to resume");
        return Ok(());
    }
    if report.status == Status::Error {
        bail!(
            "playbook '{}' ended in error: {}",
            file.name,
            report.error.as_deref().unwrap_or("one or more steps failed")
        );
    }
    Ok(())
}

/// Final status of the run and of every step.
async fn print_report(report: &RunReport, store: &MemoryStore) -> Result<()> {
    println!(
        "playbook {}: {} ({}/{} steps)",
        report.run_id, report.status, report.completed_steps, report.total_steps
    );
    for step in store.get_steps(report.run_id).await? {
        println!("  {:<20} {}", step.label, step.status);
        if let Some(result) = report.result(&step.label) {
            if let Some(message) = &result.message {
                println!("      ! {message}");
            }
            let output = result.output.trim();
            if !output.is_empty() {
                for line in output.lines() {
                    println!("      | {line}");
                }
            }
        }
    }
    Ok(())
}

/// Dry-run output: print steps, deps, jobs and the Mermaid graph.
async fn print_dry_run(file: &PlaybookFile, store: &MemoryStore, run_id: Uuid) -> Result<()> {
    println!("harbinger dry-run: {}", file.name);
    println!(
        "  config.failed_predecessor = {:?}",
        file.engine.graph.failed_predecessor
    );
    println!(
        "  config.dangling_dependency = {:?}",
        file.engine.graph.dangling_dependency
    );
    println!();

    println!("steps ({}):", file.steps.len());
    let mut commands = HashMap::new();
    let steps = store.get_steps(run_id).await?;
    for (def, step) in file.steps.iter().zip(steps.iter()) {
        println!("  - {}", def.label);
        if let Some(command) = def.job.command() {
            println!("      cmd: {command}");
            commands.insert(step.id, command.to_string());
        }
        let deps = step.dependencies();
        if !deps.is_empty() {
            println!("      depends_on: {deps:?}");
        }
        if let Some(delay) = def.delay {
            println!("      delay: {delay:?}");
        }
        if let Some(at) = def.execute_after {
            println!("      execute_after: {at}");
        }
        for modifier in &def.modifiers {
            println!(
                "      modifier: {} -> {}{}",
                modifier.input,
                modifier.output_path,
                modifier
                    .regex
                    .as_deref()
                    .map(|r| format!(" (regex {r})"))
                    .unwrap_or_default()
            );
        }
    }
    println!();

    let rendered = render_mermaid(&steps, &commands);
    println!("{}", rendered.mermaid);
    if !rendered.acyclic {
        println!("WARNING: the step graph contains a cycle; the run would fail");
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}

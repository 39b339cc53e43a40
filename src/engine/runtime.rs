// src/engine/runtime.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::activity::call;
use crate::engine::core::{ReadyStep, RunCore};
use crate::engine::journal::{Journal, JournalEntry, MemoryJournal, Replay};
use crate::engine::EngineConfig;
use crate::errors::{PlaybookError, Result};
use crate::exec::{JobDispatcher, StepContext, StepExecutor};
use crate::model::{JobHandle, Label, Status, WorkflowStepResult};
use crate::modifier::ModifierEngine;
use crate::progress::{LogProgressSink, ProgressSink, ProgressTracker};
use crate::store::PlaybookStore;

/// How one execution of a run ended.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: Status,
    pub completed_steps: usize,
    pub total_steps: usize,
    /// Results in the order the scheduler consumed them, replayed ones
    /// included.
    pub results: Vec<WorkflowStepResult>,
    /// The loop stopped on a shutdown signal; the run is still `running`.
    pub cancelled: bool,
    /// Why the run ended in `error`.
    pub error: Option<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == Status::Completed
    }

    pub fn result(&self, label: &str) -> Option<&WorkflowStepResult> {
        self.results.iter().find(|r| r.label == label)
    }
}

/// Message a step task sends back when it is done.
struct StepMessage {
    label: Label,
    outcome: Result<WorkflowStepResult>,
}

enum LoopExit {
    Drained,
    Cancelled,
}

/// Drives a playbook run to a terminal state.
///
/// This is the async/IO shell around [`RunCore`]: it dispatches every ready
/// step as its own task, drains their results from a single completion
/// channel, and persists what the core decides. The core is only ever
/// touched from the loop, so it needs no locking.
pub struct Scheduler {
    store: Arc<dyn PlaybookStore>,
    dispatcher: Arc<dyn JobDispatcher>,
    journal: Arc<dyn Journal>,
    progress: Arc<dyn ProgressSink>,
    config: EngineConfig,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Scheduler with an in-memory journal, log-only progress and the
    /// default engine configuration.
    pub fn new(store: Arc<dyn PlaybookStore>, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            journal: Arc::new(MemoryJournal::new()),
            progress: Arc::new(LogProgressSink),
            config: EngineConfig::default(),
        }
    }

    pub fn with_journal(mut self, journal: Arc<dyn Journal>) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute a run until every step is resolved.
    pub async fn run(&self, run_id: Uuid) -> Result<RunReport> {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        self.run_until(run_id, shutdown_rx).await
    }

    /// Execute a run until every step is resolved or `shutdown` turns
    /// `true`.
    ///
    /// A graph that cannot be built (cycle, duplicate or dangling label)
    /// ends the run in `error` before anything is dispatched. A step that
    /// cannot be prepared (missing job or target) aborts the run. Both are
    /// reported through the returned [`RunReport`]; `Err` is reserved for a
    /// run that cannot be started at all.
    pub async fn run_until(
        &self,
        run_id: Uuid,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunReport> {
        let calls = self.config.calls;
        let store = &self.store;
        let journal = &self.journal;

        let playbook = call("get_playbook", calls.lookup, || store.get_playbook(run_id))
            .await?
            .ok_or(PlaybookError::RunNotFound(run_id))?;
        if playbook.status.is_terminal() {
            return Err(PlaybookError::RunFinished(run_id, playbook.status));
        }

        let steps = call("get_playbook_steps", calls.lookup, || store.get_steps(run_id)).await?;
        let total = steps.len();
        info!(%run_id, name = %playbook.name, steps = total, "running playbook");

        let stored: HashMap<Label, (Uuid, Status)> = steps
            .iter()
            .map(|step| (step.label.clone(), (step.id, step.status)))
            .collect();

        let mut core = match RunCore::new(run_id, steps, self.config.graph) {
            Ok(core) => core,
            Err(e) if e.is_graph_error() => {
                error!(%run_id, error = %e, "playbook graph is invalid; nothing dispatched");
                self.set_run_status(run_id, Status::Error, 0).await?;
                return Ok(RunReport {
                    run_id,
                    status: Status::Error,
                    completed_steps: 0,
                    total_steps: total,
                    results: Vec::new(),
                    cancelled: false,
                    error: Some(e.to_string()),
                });
            }
            Err(e) => return Err(e),
        };

        let entries = call("journal_replay", calls.lookup, || journal.replay(run_id)).await?;
        let replay = Replay::from_entries(entries);
        let resuming = !replay.is_empty();
        let mut in_flight = replay.in_flight;
        if resuming {
            let restored = core.restore(replay.completed);
            let synced = self.sync_replayed_statuses(&core, &stored).await?;
            info!(
                %run_id,
                restored,
                synced,
                in_flight = in_flight.len(),
                "resuming run from journal"
            );
        }

        let mut progress = ProgressTracker::create(
            Arc::clone(&self.progress),
            run_id.to_string(),
            format!("Running playbook {}", playbook.name),
            total as u64,
        )
        .await?;
        if core.completed() > 0 {
            bump(&mut progress, core.completed()).await;
        }

        self.set_run_status(run_id, Status::Running, core.completed())
            .await?;

        let exit = self
            .drive(&mut core, &mut in_flight, &mut progress, &mut shutdown)
            .await;

        let mut report = RunReport {
            run_id,
            status: Status::Running,
            completed_steps: core.completed(),
            total_steps: total,
            results: core.results_in_order(),
            cancelled: false,
            error: None,
        };

        match exit {
            Ok(LoopExit::Drained) => {
                self.set_run_status(run_id, Status::Completed, total).await?;
                if let Err(e) = progress.finish().await {
                    warn!(%run_id, error = %e, "failed to clear progress");
                }
                info!(%run_id, steps = total, "playbook completed");
                report.status = Status::Completed;
                report.completed_steps = total;
            }
            Ok(LoopExit::Cancelled) => {
                warn!(%run_id, completed = core.completed(), "shutdown requested; abandoning in-flight steps");
                if let Err(e) = progress.discard().await {
                    warn!(%run_id, error = %e, "failed to clear progress");
                }
                report.cancelled = true;
            }
            Err(e) => {
                error!(%run_id, error = %e, "playbook run failed");
                if let Err(update) = self.set_run_status(run_id, Status::Error, total).await {
                    error!(%run_id, error = %update, "failed to record run failure");
                }
                if let Err(e) = progress.finish().await {
                    warn!(%run_id, error = %e, "failed to clear progress");
                }
                report.status = Status::Error;
                report.completed_steps = total;
                report.error = Some(e.to_string());
            }
        }

        Ok(report)
    }

    /// Bring the store in line with results replayed from the journal.
    ///
    /// Steps whose stored status already matches are left alone, so a
    /// resume against the same store adds no history.
    async fn sync_replayed_statuses(
        &self,
        core: &RunCore,
        stored: &HashMap<Label, (Uuid, Status)>,
    ) -> Result<usize> {
        let store = &self.store;
        let mut synced = 0;
        for result in core.results_in_order() {
            let Some(&(step_id, status)) = stored.get(&result.label) else {
                continue;
            };
            if status == result.status {
                continue;
            }
            debug!(label = %result.label, from = %status, to = %result.status, "restoring step status");
            call("update_playbook_step_status", self.config.calls.update, || {
                store.update_step_status(step_id, result.status)
            })
            .await?;
            synced += 1;
        }
        Ok(synced)
    }

    /// The scheduling loop proper.
    async fn drive(
        &self,
        core: &mut RunCore,
        in_flight: &mut HashMap<Label, JobHandle>,
        progress: &mut ProgressTracker,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<LoopExit> {
        let run_id = core.run_id();
        let ctx = StepContext {
            run_id,
            store: Arc::clone(&self.store),
            dispatcher: Arc::clone(&self.dispatcher),
            journal: Arc::clone(&self.journal),
            calls: self.config.calls,
        };
        let modifiers = ModifierEngine::new(
            Arc::clone(&self.store),
            self.config.modifiers,
            self.config.calls,
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<StepMessage>();
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut outstanding = 0usize;

        while core.is_active() {
            for ready in core.take_ready() {
                outstanding += 1;
                match ready {
                    ReadyStep::Unresolved(result) => {
                        warn!(%run_id, label = %result.label, "label does not resolve to a step");
                        let _ = tx.send(StepMessage {
                            label: result.label.clone(),
                            outcome: Ok(result),
                        });
                    }
                    ReadyStep::Dispatch(step) => {
                        let executor = StepExecutor::for_step(&step);
                        let handle = in_flight.remove(&step.label);
                        if handle.is_none() {
                            let report = modifiers.apply(&step, core.results()).await?;
                            if !report.is_clean() {
                                debug!(
                                    %run_id,
                                    label = %step.label,
                                    skipped = report.skipped.len(),
                                    "dispatching with unmodified arguments"
                                );
                            }
                        }

                        debug!(%run_id, label = %step.label, ?executor, "dispatching step");
                        let ctx = ctx.clone();
                        let tx = tx.clone();
                        tasks.spawn(async move {
                            let outcome = match handle {
                                Some(handle) => executor.resume(&ctx, &step, &handle).await,
                                None => executor.execute(&ctx, &step).await,
                            };
                            let _ = tx.send(StepMessage {
                                label: step.label,
                                outcome,
                            });
                        });
                    }
                }
            }

            if outstanding == 0 {
                return Err(PlaybookError::Other(anyhow::anyhow!(
                    "scheduler stalled with unresolved steps"
                )));
            }

            let message = tokio::select! {
                _ = shutdown_requested(shutdown) => return Ok(LoopExit::Cancelled),
                Some(message) = rx.recv() => message,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            return Err(PlaybookError::Other(anyhow::anyhow!(
                                "step task panicked: {e}"
                            )));
                        }
                    }
                    continue;
                }
            };
            outstanding -= 1;

            let result = match message.outcome {
                Ok(result) => result,
                Err(e) => {
                    error!(%run_id, label = %message.label, error = %e, "step could not be prepared");
                    return Err(e);
                }
            };
            self.consume(core, progress, result).await?;
        }

        Ok(LoopExit::Drained)
    }

    /// Apply one result: journal it, resolve it in the core, then persist
    /// progress and statuses.
    async fn consume(
        &self,
        core: &mut RunCore,
        progress: &mut ProgressTracker,
        result: WorkflowStepResult,
    ) -> Result<()> {
        let run_id = core.run_id();
        let label = result.label.clone();
        let status = result.status;

        self.journal_completion(run_id, &result).await?;

        let Some(consumed) = core.complete(result) else {
            return Ok(());
        };
        info!(
            %run_id,
            %label,
            %status,
            completed = core.completed(),
            total = core.total(),
            "step finished"
        );

        if consumed.counted > 0 {
            bump(progress, consumed.counted).await;
        }
        self.set_run_status(run_id, Status::Running, core.completed())
            .await?;
        if let Some(step_id) = consumed.step_id {
            self.set_step_status(step_id, status).await?;
        }

        for (step_id, skipped) in consumed.skipped {
            warn!(%run_id, label = %skipped.label, "step skipped after failed predecessor");
            self.journal_completion(run_id, &skipped).await?;
            self.set_step_status(step_id, Status::Error).await?;
        }

        Ok(())
    }

    async fn journal_completion(&self, run_id: Uuid, result: &WorkflowStepResult) -> Result<()> {
        let journal = &self.journal;
        let entry = JournalEntry::Completed {
            run_id,
            result: result.clone(),
        };
        call("journal_completion", self.config.calls.update, || {
            journal.record(entry.clone())
        })
        .await
    }

    async fn set_run_status(&self, run_id: Uuid, status: Status, completed: usize) -> Result<()> {
        let store = &self.store;
        call("update_playbook_status", self.config.calls.update, || {
            store.update_run_status(run_id, status, completed)
        })
        .await
    }

    async fn set_step_status(&self, step_id: Uuid, status: Status) -> Result<()> {
        let store = &self.store;
        call("update_playbook_step_status", self.config.calls.update, || {
            store.update_step_status(step_id, status)
        })
        .await
    }
}

async fn bump(progress: &mut ProgressTracker, n: usize) {
    if let Err(e) = progress.increase(n as u64).await {
        warn!(id = %progress.bar().id, error = %e, "failed to update progress");
    }
}

/// Resolves once the shutdown flag is set. Never resolves if the sender is
/// gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

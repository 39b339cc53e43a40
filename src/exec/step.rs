// src/exec/step.rs

//! Execution of a single step, polymorphic over the job it wraps.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::activity::{call, CallPolicies, CallPolicy};
use crate::engine::journal::{Journal, JournalEntry};
use crate::errors::{PlaybookError, Result};
use crate::exec::backend::{DispatchRequest, DispatchTarget, JobDispatcher, ProxyProcedure};
use crate::model::{ChainStep, JobHandle, JobRef, Status, WorkflowStepResult};
use crate::store::PlaybookStore;

/// Everything a step task needs, shared by all step tasks of a run.
#[derive(Clone)]
pub struct StepContext {
    pub run_id: Uuid,
    pub store: Arc<dyn PlaybookStore>,
    pub dispatcher: Arc<dyn JobDispatcher>,
    pub journal: Arc<dyn Journal>,
    pub calls: CallPolicies,
}

/// Stable idempotency key of a step's dispatch.
pub fn dispatch_key(run_id: Uuid, label: &str) -> String {
    format!("{run_id}:{label}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepExecutor {
    C2 { job_id: Uuid },
    Proxy { job_id: Uuid },
    /// Structural-only node: honours its gating, then completes.
    NoOp,
}

impl StepExecutor {
    pub fn for_step(step: &ChainStep) -> Self {
        match step.job {
            JobRef::C2(job_id) => StepExecutor::C2 { job_id },
            JobRef::Proxy(job_id) => StepExecutor::Proxy { job_id },
            JobRef::None => StepExecutor::NoOp,
        }
    }

    /// Run the step to completion.
    ///
    /// Remote failures are folded into an `error` result. An `Err` means the
    /// step could not even be prepared (job or target missing, store down)
    /// and aborts the whole run.
    pub async fn execute(&self, ctx: &StepContext, step: &ChainStep) -> Result<WorkflowStepResult> {
        match *self {
            StepExecutor::C2 { job_id } => run_c2_step(ctx, step, job_id).await,
            StepExecutor::Proxy { job_id } => run_proxy_step(ctx, step, job_id).await,
            StepExecutor::NoOp => run_empty_step(ctx, step).await,
        }
    }

    /// Pick up a step whose job was dispatched by an earlier execution of
    /// the run: wait on the recorded handle instead of dispatching again.
    pub async fn resume(
        &self,
        ctx: &StepContext,
        step: &ChainStep,
        handle: &JobHandle,
    ) -> Result<WorkflowStepResult> {
        info!(
            run_id = %ctx.run_id,
            label = %step.label,
            task_id = %handle.task_id,
            "re-awaiting job dispatched before restart"
        );
        let policy = match self {
            StepExecutor::Proxy { .. } => ctx.calls.completion.no_retry(),
            _ => ctx.calls.completion,
        };
        Ok(await_handle(ctx, step, handle, policy).await)
    }
}

async fn run_c2_step(ctx: &StepContext, step: &ChainStep, job_id: Uuid) -> Result<WorkflowStepResult> {
    let store = &ctx.store;

    let job = call("get_c2_job", ctx.calls.lookup, || store.get_c2_job(job_id))
        .await?
        .ok_or(PlaybookError::JobNotFound(job_id))?;

    let implant_id = job.c2_implant_id;
    let implant = call("get_c2_implant", ctx.calls.lookup, || store.get_implant(implant_id))
        .await?
        .ok_or(PlaybookError::ImplantNotFound {
            job: job.id,
            implant: implant_id,
        })?;

    gate(ctx, step).await?;
    set_status(ctx, step, Status::Starting).await?;

    let request = DispatchRequest {
        key: dispatch_key(ctx.run_id, &step.label),
        target: DispatchTarget::C2 {
            job: job.clone(),
            implant,
        },
    };
    let handle = match call("run_job", ctx.calls.dispatch, || {
        ctx.dispatcher.dispatch(request.clone())
    })
    .await
    {
        Ok(handle) => handle,
        Err(e) => return Ok(dispatch_failed(step, e)),
    };

    let task_id = handle.task_id;
    call("update_c2_job_c2_task_id", ctx.calls.update, || {
        store.set_c2_task_id(job.id, task_id)
    })
    .await?;

    record_dispatch(ctx, step, &handle).await?;
    set_status(ctx, step, Status::Running).await?;

    Ok(await_handle(ctx, step, &handle, ctx.calls.completion).await)
}

async fn run_proxy_step(
    ctx: &StepContext,
    step: &ChainStep,
    job_id: Uuid,
) -> Result<WorkflowStepResult> {
    let store = &ctx.store;

    let job = call("get_proxy_job", ctx.calls.lookup, || store.get_proxy_job(job_id))
        .await?
        .ok_or(PlaybookError::JobNotFound(job_id))?;

    let server = match job.socks_server_id {
        Some(server_id) => Some(
            call("get_socks_server", ctx.calls.lookup, || {
                store.get_socks_server(server_id)
            })
            .await?
            .ok_or(PlaybookError::ServerNotFound {
                job: job.id,
                server: server_id,
            })?,
        ),
        None => None,
    };

    let procedure = server
        .as_ref()
        .map(|s| ProxyProcedure::from(s.operating_system))
        .unwrap_or(ProxyProcedure::Posix);

    gate(ctx, step).await?;
    set_status(ctx, step, Status::Starting).await?;

    debug!(label = %step.label, ?procedure, "dispatching proxy job");

    let request = DispatchRequest {
        key: dispatch_key(ctx.run_id, &step.label),
        target: DispatchTarget::Proxy {
            job,
            server,
            procedure,
        },
    };
    // Proxy jobs are not assumed idempotent: one attempt only.
    let handle = match call("run_socks", ctx.calls.dispatch.no_retry(), || {
        ctx.dispatcher.dispatch(request.clone())
    })
    .await
    {
        Ok(handle) => handle,
        Err(e) => return Ok(dispatch_failed(step, e)),
    };

    record_dispatch(ctx, step, &handle).await?;
    set_status(ctx, step, Status::Running).await?;

    Ok(await_handle(ctx, step, &handle, ctx.calls.completion.no_retry()).await)
}

async fn run_empty_step(ctx: &StepContext, step: &ChainStep) -> Result<WorkflowStepResult> {
    debug!(label = %step.label, "running empty step");
    gate(ctx, step).await?;
    Ok(WorkflowStepResult::completed(step.id, step.label.clone(), ""))
}

/// Honour the not-before time and the fixed delay, in that order.
async fn gate(ctx: &StepContext, step: &ChainStep) -> Result<()> {
    if !step.is_gated() {
        return Ok(());
    }

    set_status(ctx, step, Status::Scheduled).await?;

    if let Some(not_before) = step.execute_after {
        if let Ok(wait) = (not_before - Utc::now()).to_std() {
            info!(label = %step.label, %not_before, "waiting for not-before time");
            tokio::time::sleep(wait).await;
        }
    }

    if let Some(delay) = step.delay {
        info!(label = %step.label, ?delay, "waiting before starting step");
        tokio::time::sleep(delay).await;
    }

    Ok(())
}

async fn set_status(ctx: &StepContext, step: &ChainStep, status: Status) -> Result<()> {
    let store = &ctx.store;
    call("update_playbook_step_status", ctx.calls.update, || {
        store.update_step_status(step.id, status)
    })
    .await
}

async fn record_dispatch(ctx: &StepContext, step: &ChainStep, handle: &JobHandle) -> Result<()> {
    let entry = JournalEntry::Dispatched {
        run_id: ctx.run_id,
        label: step.label.clone(),
        handle: handle.clone(),
    };
    call("journal_dispatch", ctx.calls.update, || {
        ctx.journal.record(entry.clone())
    })
    .await
}

async fn await_handle(
    ctx: &StepContext,
    step: &ChainStep,
    handle: &JobHandle,
    policy: CallPolicy,
) -> WorkflowStepResult {
    match call("wait_for_task", policy, || ctx.dispatcher.await_completion(handle)).await {
        Ok(mut result) => {
            result.label = step.label.clone();
            if result.id.is_none() {
                result.id = Some(handle.task_id);
            }
            result
        }
        Err(e) => {
            warn!(label = %step.label, error = %e, "job did not complete");
            WorkflowStepResult::failed(Some(handle.task_id), step.label.clone(), e.to_string())
        }
    }
}

fn dispatch_failed(step: &ChainStep, err: PlaybookError) -> WorkflowStepResult {
    warn!(label = %step.label, error = %err, "job dispatch failed");
    WorkflowStepResult::failed(None, step.label.clone(), err.to_string())
}

// src/exec/shell.rs

//! Local process dispatcher.
//!
//! Runs every job as a shell command on the local machine. The CLI uses it
//! to execute playbooks without a C2 server or a SOCKS executor.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{PlaybookError, Result};
use crate::exec::backend::{DispatchRequest, DispatchTarget, JobDispatcher, ProxyProcedure};
use crate::model::{JobHandle, WorkflowStepResult};

type Outcome = watch::Receiver<Option<WorkflowStepResult>>;

#[derive(Default)]
struct Jobs {
    by_key: HashMap<String, JobHandle>,
    outcomes: HashMap<Uuid, Outcome>,
}

/// [`JobDispatcher`] that spawns `sh -c` (or `cmd /C`) processes.
///
/// A repeated idempotency key returns the handle of the process started for
/// it the first time.
#[derive(Default)]
pub struct ShellDispatcher {
    jobs: Mutex<Jobs>,
}

impl ShellDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Jobs>> {
        self.jobs
            .lock()
            .map_err(|_| PlaybookError::Dispatch("shell dispatcher lock poisoned".to_string()))
    }
}

#[async_trait]
impl JobDispatcher for ShellDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> Result<JobHandle> {
        let mut jobs = self.lock()?;
        if let Some(handle) = jobs.by_key.get(&request.key) {
            debug!(key = %request.key, "job already dispatched; returning existing handle");
            return Ok(handle.clone());
        }

        let script = render_command(request.target.command(), request.target.arguments());
        let windows = match &request.target {
            DispatchTarget::Proxy { procedure, .. } => *procedure == ProxyProcedure::Windows,
            DispatchTarget::C2 { .. } => cfg!(windows),
        };

        let mut cmd = if windows {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&script);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&script);
            c
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| PlaybookError::Dispatch(format!("spawning '{script}': {e}")))?;

        let handle = JobHandle {
            key: request.key.clone(),
            task_id: Uuid::new_v4(),
            queue: request.target.queue(),
        };
        info!(key = %handle.key, task_id = %handle.task_id, cmd = %script, "started job process");

        let (tx, rx) = watch::channel(None);
        let task_id = handle.task_id;
        tokio::spawn(async move {
            let result = match wait_for_child(child, task_id).await {
                Ok((true, stdout)) => WorkflowStepResult::completed(task_id, "", stdout),
                Ok((false, stdout)) => WorkflowStepResult::error(Some(task_id), "", stdout),
                Err(e) => {
                    warn!(%task_id, error = %e, "job process failed");
                    WorkflowStepResult::failed(Some(task_id), "", format!("{e:#}"))
                }
            };
            let _ = tx.send(Some(result));
        });

        jobs.by_key.insert(request.key, handle.clone());
        jobs.outcomes.insert(task_id, rx);
        Ok(handle)
    }

    async fn await_completion(&self, handle: &JobHandle) -> Result<WorkflowStepResult> {
        let mut rx = self
            .lock()?
            .outcomes
            .get(&handle.task_id)
            .cloned()
            .ok_or_else(|| {
                PlaybookError::Dispatch(format!(
                    "task {} was not started by this process; local jobs do not survive a restart",
                    handle.task_id
                ))
            })?;

        let result = rx
            .wait_for(|outcome| outcome.is_some())
            .await
            .map_err(|_| PlaybookError::Dispatch(format!("task {} vanished", handle.task_id)))?
            .clone();

        result.ok_or_else(|| PlaybookError::Dispatch(format!("task {} has no result", handle.task_id)))
    }
}

/// Wait for the process and collect its stdout. Returns whether it exited
/// successfully.
async fn wait_for_child(mut child: tokio::process::Child, task_id: Uuid) -> anyhow::Result<(bool, String)> {
    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(%task_id, "stderr: {}", line);
            }
        });
    }

    let output = child
        .wait_with_output()
        .await
        .with_context(|| format!("waiting for process of task {task_id}"))?;

    let code = output.status.code().unwrap_or(-1);
    info!(%task_id, exit_code = code, success = output.status.success(), "job process exited");

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    Ok((output.status.success(), stdout))
}

/// Fill `{key}` placeholders from the top-level scalar job arguments.
pub fn render_command(template: &str, arguments: &Value) -> String {
    let Some(map) = arguments.as_object() else {
        return template.to_string();
    };

    map.iter().fold(template.to_string(), |cmd, (key, value)| {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return cmd,
        };
        cmd.replace(&format!("{{{key}}}"), &text)
    })
}

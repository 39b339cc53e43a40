use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use harbinger::errors::{PlaybookError, Result};
use harbinger::exec::{DispatchRequest, DispatchTarget, JobDispatcher, ProxyProcedure};
use harbinger::model::{JobHandle, Status, WorkflowStepResult};
use harbinger::store::MemoryStore;
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

/// Scripted behaviour of one job, keyed by its command.
#[derive(Debug, Clone)]
pub struct FakeJob {
    status: Status,
    output: String,
    delay: Duration,
    reject: bool,
    held: bool,
    ingest_after: Option<Duration>,
}

impl FakeJob {
    pub fn ok(output: &str) -> Self {
        Self {
            status: Status::Completed,
            output: output.to_string(),
            delay: Duration::ZERO,
            reject: false,
            held: false,
            ingest_after: None,
        }
    }

    pub fn error(output: &str) -> Self {
        Self {
            status: Status::Error,
            ..Self::ok(output)
        }
    }

    /// Submission itself fails.
    pub fn rejected() -> Self {
        Self {
            reject: true,
            ..Self::ok("")
        }
    }

    /// Complete only after this long.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Never complete until [`FakeDispatcher::release`] is called.
    pub fn held(mut self) -> Self {
        self.held = true;
        self
    }

    /// Report no inline output; ingest it into the store under the task id
    /// this long after completion instead.
    pub fn ingested_after(mut self, lag: Duration) -> Self {
        self.ingest_after = Some(lag);
        self
    }
}

/// What the dispatcher was asked to run.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRecord {
    pub key: String,
    pub command: String,
    pub arguments: Value,
    pub queue: String,
    /// `None` for C2 jobs.
    pub procedure: Option<ProxyProcedure>,
}

#[derive(Default)]
struct State {
    scripts: HashMap<String, FakeJob>,
    by_key: HashMap<String, JobHandle>,
    jobs: HashMap<Uuid, FakeJob>,
    dispatched: Vec<DispatchRecord>,
    duplicates: usize,
    awaited: Vec<Uuid>,
    gates: HashMap<String, watch::Sender<bool>>,
}

/// A fake dispatcher that:
/// - records which jobs were dispatched, in order, with their arguments
/// - completes jobs as scripted per command (default: `completed`, no output)
/// - returns the original handle for a repeated idempotency key
#[derive(Clone, Default)]
pub struct FakeDispatcher {
    state: Arc<Mutex<State>>,
    store: Option<MemoryStore>,
}

impl FakeDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that [`FakeJob::ingested_after`] output is written to.
    pub fn with_store(mut self, store: MemoryStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn script(self, command: &str, job: FakeJob) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            if job.held {
                let (tx, _rx) = watch::channel(false);
                state.gates.insert(command.to_string(), tx);
            }
            state.scripts.insert(command.to_string(), job);
        }
        self
    }

    /// Let held jobs with this command complete.
    pub fn release(&self, command: &str) {
        let state = self.state.lock().unwrap();
        if let Some(gate) = state.gates.get(command) {
            gate.send_replace(true);
        }
    }

    pub fn dispatched(&self) -> Vec<DispatchRecord> {
        self.state.lock().unwrap().dispatched.clone()
    }

    /// Commands in dispatch order.
    pub fn commands(&self) -> Vec<String> {
        self.dispatched().into_iter().map(|d| d.command).collect()
    }

    pub fn dispatch_count(&self) -> usize {
        self.state.lock().unwrap().dispatched.len()
    }

    /// Dispatches answered with an existing handle.
    pub fn duplicate_count(&self) -> usize {
        self.state.lock().unwrap().duplicates
    }

    pub fn awaited(&self) -> Vec<Uuid> {
        self.state.lock().unwrap().awaited.clone()
    }

    pub fn record_for(&self, command: &str) -> Option<DispatchRecord> {
        self.dispatched().into_iter().find(|d| d.command == command)
    }
}

#[async_trait]
impl JobDispatcher for FakeDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> Result<JobHandle> {
        let mut state = self.state.lock().unwrap();

        if let Some(handle) = state.by_key.get(&request.key) {
            let handle = handle.clone();
            state.duplicates += 1;
            return Ok(handle);
        }

        let command = request.target.command().to_string();
        let job = state
            .scripts
            .get(&command)
            .cloned()
            .unwrap_or_else(|| FakeJob::ok(""));
        if job.reject {
            return Err(PlaybookError::Dispatch(format!("{command} rejected")));
        }

        let procedure = match &request.target {
            DispatchTarget::Proxy { procedure, .. } => Some(*procedure),
            DispatchTarget::C2 { .. } => None,
        };
        state.dispatched.push(DispatchRecord {
            key: request.key.clone(),
            command: command.clone(),
            arguments: request.target.arguments().clone(),
            queue: request.target.queue(),
            procedure,
        });

        let handle = JobHandle {
            key: request.key.clone(),
            task_id: Uuid::new_v4(),
            queue: request.target.queue(),
        };
        state.jobs.insert(handle.task_id, job);
        state.by_key.insert(request.key, handle.clone());
        Ok(handle)
    }

    async fn await_completion(&self, handle: &JobHandle) -> Result<WorkflowStepResult> {
        let (job, command, gate) = {
            let mut state = self.state.lock().unwrap();
            state.awaited.push(handle.task_id);
            let job = state
                .jobs
                .get(&handle.task_id)
                .cloned()
                .ok_or_else(|| PlaybookError::Dispatch(format!("unknown task {}", handle.task_id)))?;
            let command = state
                .dispatched
                .iter()
                .find(|d| d.key == handle.key)
                .map(|d| d.command.clone())
                .unwrap_or_default();
            let gate = state.gates.get(&command).map(|tx| tx.subscribe());
            (job, command, gate)
        };

        if let Some(mut gate) = gate {
            gate.wait_for(|released| *released)
                .await
                .map_err(|_| PlaybookError::Dispatch(format!("{command} gate dropped")))?;
        }
        if !job.delay.is_zero() {
            tokio::time::sleep(job.delay).await;
        }

        let inline = match (job.ingest_after, &self.store) {
            (Some(lag), Some(store)) => {
                let store = store.clone();
                let task_id = handle.task_id;
                let output = job.output.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(lag).await;
                    let _ = store.append_output(task_id, &output);
                });
                String::new()
            }
            _ => job.output.clone(),
        };

        Ok(WorkflowStepResult {
            id: Some(handle.task_id),
            label: String::new(),
            status: job.status,
            output: inline,
            message: None,
        })
    }
}

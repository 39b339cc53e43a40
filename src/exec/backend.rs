// src/exec/backend.rs

//! Pluggable job dispatch abstraction.
//!
//! Step executors talk to a `JobDispatcher` instead of a concrete C2
//! connector or SOCKS runner. Production wires in the real connectors;
//! the CLI uses [`super::shell::ShellDispatcher`]; tests provide fakes that
//! record what was dispatched and complete jobs on demand.

use async_trait::async_trait;

use crate::errors::Result;
use crate::model::{C2Job, Implant, JobHandle, OsFlavor, ProxyJob, SocksServer, WorkflowStepResult};

/// Sub-procedure used to run a proxy job, chosen by the executor's
/// operating-system flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyProcedure {
    Posix,
    Windows,
}

impl From<OsFlavor> for ProxyProcedure {
    fn from(os: OsFlavor) -> Self {
        match os {
            OsFlavor::Windows => ProxyProcedure::Windows,
            OsFlavor::Linux => ProxyProcedure::Posix,
        }
    }
}

#[derive(Debug, Clone)]
pub enum DispatchTarget {
    C2 {
        job: C2Job,
        implant: Implant,
    },
    Proxy {
        job: ProxyJob,
        server: Option<SocksServer>,
        procedure: ProxyProcedure,
    },
}

impl DispatchTarget {
    pub fn command(&self) -> &str {
        match self {
            DispatchTarget::C2 { job, .. } => &job.command,
            DispatchTarget::Proxy { job, .. } => &job.command,
        }
    }

    pub fn arguments(&self) -> &serde_json::Value {
        match self {
            DispatchTarget::C2 { job, .. } => &job.arguments,
            DispatchTarget::Proxy { job, .. } => &job.arguments,
        }
    }

    /// Queue the job is submitted to.
    pub fn queue(&self) -> String {
        match self {
            DispatchTarget::C2 { implant, .. } => implant.job_queue(),
            DispatchTarget::Proxy { .. } => "socks_jobs".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Stable idempotency key (`"{run_id}:{label}"`). Dispatching the same
    /// key twice must return the original handle and not start a new job.
    pub key: String,
    pub target: DispatchTarget,
}

/// Trait abstracting where jobs are executed.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    /// Submit a job and return a handle to wait on.
    async fn dispatch(&self, request: DispatchRequest) -> Result<JobHandle>;

    /// Wait for a dispatched job to finish.
    ///
    /// The returned result's `label` is overwritten by the caller.
    async fn await_completion(&self, handle: &JobHandle) -> Result<WorkflowStepResult>;
}

// src/model/job.rs

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::Status;

/// A command queued against a C2 implant.
#[derive(Debug, Clone)]
pub struct C2Job {
    pub id: Uuid,
    pub command: String,
    /// Structured arguments; modifiers patch into this tree.
    pub arguments: Value,
    pub c2_implant_id: Uuid,
    /// Task created on the C2 server once the job was submitted.
    pub c2_task_id: Option<Uuid>,
    pub status: Status,
}

impl C2Job {
    pub fn new(command: impl Into<String>, c2_implant_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            command: command.into(),
            arguments: Value::Object(Default::default()),
            c2_implant_id,
            c2_task_id: None,
            status: Status::Created,
        }
    }
}

/// A command executed through proxied tooling on a SOCKS server.
#[derive(Debug, Clone)]
pub struct ProxyJob {
    pub id: Uuid,
    pub command: String,
    pub arguments: Value,
    pub socks_server_id: Option<Uuid>,
    pub status: Status,
}

impl ProxyJob {
    pub fn new(command: impl Into<String>, socks_server_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            command: command.into(),
            arguments: Value::Object(Default::default()),
            socks_server_id,
            status: Status::Created,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Implant {
    pub id: Uuid,
    pub c2_server_id: Uuid,
    pub hostname: String,
}

impl Implant {
    /// Queue that the implant's C2 server pulls jobs from.
    pub fn job_queue(&self) -> String {
        format!("{}_jobs", self.c2_server_id)
    }
}

/// Operating-system flavour of a proxy executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFlavor {
    Linux,
    Windows,
}

impl Default for OsFlavor {
    fn default() -> Self {
        OsFlavor::Linux
    }
}

#[derive(Debug, Clone)]
pub struct SocksServer {
    pub id: Uuid,
    pub hostname: String,
    pub operating_system: OsFlavor,
}

/// Reference to a dispatched job, stable across process restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    /// Idempotency key the job was dispatched under.
    pub key: String,
    /// Identifier of the remote task; step output is looked up by it.
    pub task_id: Uuid,
    pub queue: String,
}

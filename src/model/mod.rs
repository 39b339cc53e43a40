// src/model/mod.rs

//! Playbook data model.
//!
//! - [`playbook`] holds the run (`Playbook`) and its steps (`ChainStep`),
//!   including the modifiers attached to each step.
//! - [`job`] holds the jobs a step wraps plus the targets they run on.
//! - [`result`] holds the ephemeral completion record of a step.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod job;
pub mod playbook;
pub mod result;

pub use job::{C2Job, Implant, JobHandle, OsFlavor, ProxyJob, SocksServer};
pub use playbook::{ChainStep, JobRef, ModifierStatus, Playbook, StepModifier};
pub use result::WorkflowStepResult;

/// Canonical step label type: the free-form graph node key.
pub type Label = String;

/// Lifecycle status shared by runs and steps.
///
/// Runs only use `Created`, `Running`, `Completed` and `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Created,
    Scheduled,
    Starting,
    Running,
    Completed,
    Error,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Created => "created",
            Status::Scheduled => "scheduled",
            Status::Starting => "starting",
            Status::Running => "running",
            Status::Completed => "completed",
            Status::Error => "error",
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Created
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

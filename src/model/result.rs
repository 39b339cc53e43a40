// src/model/result.rs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Label, Status};

/// Completion record of one step, produced by a step executor and consumed
/// exactly once by the scheduler loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStepResult {
    /// Identifier the step's output can be fetched under (task id, proxy job
    /// id or step id). `None` when no step could be resolved for the label.
    pub id: Option<Uuid>,
    pub label: Label,
    pub status: Status,
    /// What the job itself printed. Only this is fed to modifiers.
    #[serde(default)]
    pub output: String,
    /// Why the scheduler failed the step without the job finishing, for
    /// example a rejected dispatch or a skipped dependent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WorkflowStepResult {
    pub fn completed(id: Uuid, label: impl Into<Label>, output: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            label: label.into(),
            status: Status::Completed,
            output: output.into(),
            message: None,
        }
    }

    /// The job ran and reported failure; `output` is what it printed.
    pub fn error(id: Option<Uuid>, label: impl Into<Label>, output: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            status: Status::Error,
            output: output.into(),
            message: None,
        }
    }

    /// The step failed without producing output of its own.
    pub fn failed(id: Option<Uuid>, label: impl Into<Label>, message: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            status: Status::Error,
            output: String::new(),
            message: Some(message.into()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == Status::Completed
    }
}

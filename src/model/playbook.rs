// src/model/playbook.rs

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Label, Status};

/// One execution of a declared step graph.
#[derive(Debug, Clone)]
pub struct Playbook {
    pub id: Uuid,
    pub name: String,
    pub status: Status,
    /// Number of steps declared in this run.
    pub steps: usize,
    /// Number of steps that reached a terminal state.
    pub completed: usize,
    pub time_created: DateTime<Utc>,
    pub time_updated: Option<DateTime<Utc>>,
}

impl Playbook {
    pub fn new(name: impl Into<String>, steps: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: Status::Created,
            steps,
            completed: 0,
            time_created: Utc::now(),
            time_updated: None,
        }
    }
}

/// The job a step wraps. A step runs exactly one job, or none at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRef {
    C2(Uuid),
    Proxy(Uuid),
    None,
}

/// One node of the playbook graph.
#[derive(Debug, Clone)]
pub struct ChainStep {
    pub id: Uuid,
    pub playbook_id: Uuid,
    /// Declaration order within the playbook.
    pub number: u32,
    pub label: Label,
    /// Comma-separated predecessor labels; empty for a root step.
    pub depends_on: String,
    pub delay: Option<Duration>,
    /// Absolute not-before time.
    pub execute_after: Option<DateTime<Utc>>,
    pub status: Status,
    pub job: JobRef,
    pub modifiers: Vec<StepModifier>,
    pub time_started: Option<DateTime<Utc>>,
    pub time_completed: Option<DateTime<Utc>>,
}

impl ChainStep {
    pub fn new(playbook_id: Uuid, label: impl Into<Label>) -> Self {
        Self {
            id: Uuid::new_v4(),
            playbook_id,
            number: 0,
            label: label.into(),
            depends_on: String::new(),
            delay: None,
            execute_after: None,
            status: Status::Created,
            job: JobRef::None,
            modifiers: Vec::new(),
            time_started: None,
            time_completed: None,
        }
    }

    /// Predecessor labels parsed from `depends_on`.
    ///
    /// Entries are trimmed and empty entries (e.g. from a trailing comma)
    /// are ignored.
    pub fn dependencies(&self) -> Vec<Label> {
        self.depends_on
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Whether the step has to wait before it may start.
    pub fn is_gated(&self) -> bool {
        self.delay.is_some_and(|d| !d.is_zero()) || self.execute_after.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierStatus {
    Created,
    Completed,
    Error,
}

/// Extracts data from a predecessor's output and writes it into the owning
/// step's job before dispatch.
#[derive(Debug, Clone)]
pub struct StepModifier {
    pub id: Uuid,
    pub regex: Option<String>,
    /// Label of the predecessor whose output is read.
    pub input: Label,
    /// Destination inside the job document, e.g. `arguments.target`.
    pub output_path: String,
    pub status: ModifierStatus,
    pub status_message: Option<String>,
}

impl StepModifier {
    pub fn new(input: impl Into<Label>, output_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            regex: None,
            input: input.into(),
            output_path: output_path.into(),
            status: ModifierStatus::Created,
            status_message: None,
        }
    }

    pub fn with_regex(mut self, regex: impl Into<String>) -> Self {
        self.regex = Some(regex.into());
        self
    }
}

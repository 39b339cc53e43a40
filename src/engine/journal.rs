// src/engine/journal.rs

//! Replay journal that makes a run resumable.
//!
//! Two facts are recorded per step: that its job was dispatched (with the
//! handle to wait on) and that its result was consumed by the scheduler. On
//! restart the scheduler replays consumed results instead of dispatching the
//! steps again, and re-awaits handles of steps that were in flight.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{PlaybookError, Result};
use crate::model::{JobHandle, Label, WorkflowStepResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEntry {
    Dispatched {
        run_id: Uuid,
        label: Label,
        handle: JobHandle,
    },
    Completed {
        run_id: Uuid,
        result: WorkflowStepResult,
    },
}

impl JournalEntry {
    pub fn run_id(&self) -> Uuid {
        match self {
            JournalEntry::Dispatched { run_id, .. } | JournalEntry::Completed { run_id, .. } => {
                *run_id
            }
        }
    }
}

/// What a previous execution of a run already observed.
#[derive(Debug, Clone, Default)]
pub struct Replay {
    /// Consumed results, in the order they were consumed.
    pub completed: Vec<WorkflowStepResult>,
    /// Handles of dispatched steps whose result was never consumed.
    pub in_flight: HashMap<Label, JobHandle>,
}

impl Replay {
    pub fn from_entries(entries: impl IntoIterator<Item = JournalEntry>) -> Self {
        let mut replay = Replay::default();
        for entry in entries {
            match entry {
                JournalEntry::Dispatched { label, handle, .. } => {
                    replay.in_flight.insert(label, handle);
                }
                JournalEntry::Completed { result, .. } => {
                    replay.in_flight.remove(&result.label);
                    replay.completed.push(result);
                }
            }
        }
        replay
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.in_flight.is_empty()
    }
}

#[async_trait]
pub trait Journal: Send + Sync {
    async fn record(&self, entry: JournalEntry) -> Result<()>;

    /// Entries recorded for `run_id`, oldest first.
    async fn replay(&self, run_id: Uuid) -> Result<Vec<JournalEntry>>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryJournal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn record(&self, entry: JournalEntry) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| PlaybookError::Store("journal lock poisoned".to_string()))?
            .push(entry);
        Ok(())
    }

    async fn replay(&self, run_id: Uuid) -> Result<Vec<JournalEntry>> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| PlaybookError::Store("journal lock poisoned".to_string()))?
            .iter()
            .filter(|e| e.run_id() == run_id)
            .cloned()
            .collect())
    }
}

/// Append-only JSON-lines journal on disk.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileJournal {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Journal for FileJournal {
    async fn record(&self, entry: JournalEntry) -> Result<()> {
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn replay(&self, run_id: Uuid) -> Result<Vec<JournalEntry>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "no journal yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(line) {
                Ok(entry) if entry.run_id() == run_id => entries.push(entry),
                Ok(_) => {}
                // A crash can leave a torn last line behind.
                Err(e) => warn!(path = ?self.path, line = lineno + 1, error = %e, "skipping unreadable journal line"),
            }
        }
        Ok(entries)
    }
}

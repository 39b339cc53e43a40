// src/errors.rs

//! Crate-wide error type and result alias.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::model::Status;
use crate::modifier::path::PathError;

#[derive(Error, Debug)]
pub enum PlaybookError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Cycle detected in playbook: {0}")]
    GraphCycle(String),

    #[error("step '{label}' depends on undeclared label '{dependency}'")]
    DanglingDependency { label: String, dependency: String },

    #[error("duplicate step label '{0}'")]
    DuplicateLabel(String),

    #[error("playbook {0} was not found")]
    RunNotFound(Uuid),

    #[error("playbook {0} already finished with status {1}")]
    RunFinished(Uuid, Status),

    #[error("job {0} was not found")]
    JobNotFound(Uuid),

    #[error("implant {implant} for job {job} was not found")]
    ImplantNotFound { job: Uuid, implant: Uuid },

    #[error("socks server {server} for job {job} was not found")]
    ServerNotFound { job: Uuid, server: Uuid },

    #[error("{call} timed out after {after:?}")]
    Timeout { call: String, after: Duration },

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("journal error: {0}")]
    Journal(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PlaybookError {
    /// Errors that abort a run before any step has been dispatched.
    pub fn is_graph_error(&self) -> bool {
        matches!(
            self,
            PlaybookError::GraphCycle(_)
                | PlaybookError::DanglingDependency { .. }
                | PlaybookError::DuplicateLabel(_)
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PlaybookError>;

// src/engine/mod.rs

//! Orchestration engine for playbook runs.
//!
//! This module ties together:
//! - the pure per-run state machine ([`core`])
//! - the async scheduler loop that dispatches steps and drains their
//!   completions ([`runtime`])
//! - the remote call policy every store and dispatcher call goes through
//!   ([`activity`])
//! - the replay journal that makes a run resumable ([`journal`])

use crate::dag::GraphOptions;
use crate::engine::activity::CallPolicies;
use crate::modifier::ModifierConfig;

/// Engine options shared by the core and the async shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineConfig {
    pub graph: GraphOptions,
    pub modifiers: ModifierConfig,
    pub calls: CallPolicies,
}

pub mod activity;
pub mod core;
pub mod journal;
pub mod runtime;

pub use activity::{call, CallPolicy};
pub use core::{Consumed, ReadyStep, RunCore};
pub use journal::{FileJournal, Journal, JournalEntry, MemoryJournal, Replay};
pub use runtime::{RunReport, Scheduler};

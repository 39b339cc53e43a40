// src/modifier/mod.rs

//! Cross-step data flow.
//!
//! - [`path`] writes a value at a dotted path inside a job document.
//! - [`engine`] reads a predecessor's output and patches a successor's job
//!   before it is dispatched.

pub mod engine;
pub mod path;

pub use engine::{ModifierConfig, ModifierEngine, ModifierReport, SkippedModifier};
pub use path::{patch_job, PathError, ValuePath};

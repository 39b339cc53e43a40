// src/config/mod.rs

//! Playbook definition files.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a playbook file from disk (`loader.rs`).
//! - Validate references, durations and patterns (`validate.rs`).
//! - Install a validated file into a store as a new run (`install.rs`).

pub mod install;
pub mod loader;
pub mod model;
pub mod validate;

pub use install::{install, install_with_id};
pub use loader::{default_playbook_path, load_and_validate, load_from_path, load_from_str};
pub use model::{JobDefinition, PlaybookFile, RawPlaybookFile, StepDefinition};
pub use validate::engine_config;

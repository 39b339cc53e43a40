// src/dag/mod.rs

//! Dependency graph of a playbook run.
//!
//! - [`graph`] builds the label-keyed graph, detects cycles and exposes the
//!   ready frontier.
//! - [`render`] produces a Mermaid rendering for display.

pub mod graph;
pub mod render;

pub use graph::{DependencyGraph, GraphOptions, NodeState, Resolution};
pub use render::{render_mermaid, RenderedGraph};

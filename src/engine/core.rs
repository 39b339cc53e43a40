// src/engine/core.rs

//! Pure per-run scheduling state.
//!
//! [`RunCore`] owns the dependency graph, the label index of the run's steps
//! and the results consumed so far. It decides what is ready and what a
//! consumed result means for the rest of the graph, but performs no IO: the
//! async shell (`engine::runtime::Scheduler`) dispatches, persists and
//! reports on its behalf.
//!
//! The core is intended to be unit tested without any Tokio, channels, store
//! or dispatcher.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::dag::{DependencyGraph, GraphOptions, Resolution};
use crate::errors::Result;
use crate::model::{ChainStep, Label, WorkflowStepResult};

/// A node handed out by [`RunCore::take_ready`].
#[derive(Debug, Clone)]
pub enum ReadyStep {
    /// A declared step to run.
    Dispatch(ChainStep),
    /// The label does not resolve to a declared step; this error result
    /// stands in for its execution.
    Unresolved(WorkflowStepResult),
}

/// What consuming one result changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Consumed {
    /// Step id of the consumed result, if the label names a declared step.
    pub step_id: Option<Uuid>,
    /// Declared steps resolved by this consumption (the step itself plus
    /// skipped dependents).
    pub counted: usize,
    /// Results synthesized for dependents that will never be dispatched.
    pub skipped: Vec<(Uuid, WorkflowStepResult)>,
}

#[derive(Debug)]
pub struct RunCore {
    run_id: Uuid,
    graph: DependencyGraph,
    steps: HashMap<Label, ChainStep>,
    results: HashMap<Label, WorkflowStepResult>,
    /// Labels in the order their results were consumed.
    order: Vec<Label>,
    completed: usize,
}

impl RunCore {
    /// Build the run state. Fails if the graph cannot be built.
    pub fn new(run_id: Uuid, steps: Vec<ChainStep>, options: GraphOptions) -> Result<Self> {
        let graph = DependencyGraph::build(&steps, options)?;
        let steps = steps
            .into_iter()
            .map(|step| (step.label.clone(), step))
            .collect();

        Ok(Self {
            run_id,
            graph,
            steps,
            results: HashMap::new(),
            order: Vec::new(),
            completed: 0,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Number of declared steps.
    pub fn total(&self) -> usize {
        self.steps.len()
    }

    /// Number of declared steps resolved so far.
    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn is_active(&self) -> bool {
        self.graph.is_active()
    }

    pub fn step(&self, label: &str) -> Option<&ChainStep> {
        self.steps.get(label)
    }

    /// Results consumed so far, keyed by label.
    pub fn results(&self) -> &HashMap<Label, WorkflowStepResult> {
        &self.results
    }

    /// Results in consumption order.
    pub fn results_in_order(&self) -> Vec<WorkflowStepResult> {
        self.order
            .iter()
            .filter_map(|label| self.results.get(label))
            .cloned()
            .collect()
    }

    /// Hand out every node that just became ready. Each node is handed out
    /// exactly once.
    pub fn take_ready(&mut self) -> Vec<ReadyStep> {
        self.graph
            .take_ready()
            .into_iter()
            .map(|label| match self.steps.get(&label) {
                Some(step) => ReadyStep::Dispatch(step.clone()),
                None => ReadyStep::Unresolved(WorkflowStepResult::failed(
                    None,
                    label.clone(),
                    format!("no step declared for label '{label}'"),
                )),
            })
            .collect()
    }

    /// Consume a result.
    ///
    /// Returns `None` when a result for the label was already consumed.
    pub fn complete(&mut self, result: WorkflowStepResult) -> Option<Consumed> {
        if self.results.contains_key(&result.label) {
            debug!(label = %result.label, "result already consumed; ignoring");
            return None;
        }

        let resolution = if result.succeeded() {
            Resolution::Succeeded
        } else {
            Resolution::Failed
        };
        let label = result.label.clone();
        let skipped_labels = self.graph.done(&label, resolution);

        let mut consumed = Consumed {
            step_id: self.steps.get(&label).map(|s| s.id),
            ..Consumed::default()
        };
        if consumed.step_id.is_some() {
            consumed.counted += 1;
        }
        self.record(result);

        for skipped in skipped_labels {
            let result = WorkflowStepResult::failed(
                None,
                skipped.clone(),
                format!("skipped: predecessor '{label}' did not complete"),
            );
            if let Some(step) = self.steps.get(&skipped) {
                consumed.counted += 1;
                consumed.skipped.push((step.id, result.clone()));
            }
            self.record(result);
        }

        self.completed += consumed.counted;
        Some(consumed)
    }

    /// Re-apply results observed by an earlier execution of this run, in the
    /// order they were consumed. Returns how many were applied.
    pub fn restore(&mut self, results: impl IntoIterator<Item = WorkflowStepResult>) -> usize {
        results
            .into_iter()
            .filter_map(|result| self.complete(result))
            .count()
    }

    fn record(&mut self, result: WorkflowStepResult) {
        self.order.push(result.label.clone());
        self.results.insert(result.label.clone(), result);
    }
}

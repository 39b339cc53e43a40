// src/dag/graph.rs

use std::collections::{BTreeMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::{debug, warn};

use crate::errors::{PlaybookError, Result};
use crate::model::{ChainStep, Label};
use crate::types::{DanglingDependencyPolicy, FailedPredecessorPolicy};

/// How a node left the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Succeeded,
    Failed,
    /// Never dispatched because a predecessor failed under
    /// [`FailedPredecessorPolicy::Block`].
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Waiting for predecessors.
    Pending,
    /// Handed out by [`DependencyGraph::take_ready`]; no result yet.
    Dispatched,
    Done(Resolution),
}

/// Options that decide how the graph treats ambiguous input.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphOptions {
    pub failed_predecessor: FailedPredecessorPolicy,
    pub dangling_dependency: DanglingDependencyPolicy,
}

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct DagNode {
    deps: Vec<Label>,
    dependents: Vec<Label>,
    state: NodeState,
    /// Created for an undeclared `depends_on` label; no step backs it.
    phantom: bool,
}

impl DagNode {
    fn new(deps: Vec<Label>, phantom: bool) -> Self {
        Self {
            deps,
            dependents: Vec::new(),
            state: NodeState::Pending,
            phantom,
        }
    }
}

/// Label-keyed dependency graph of one run.
///
/// Building the graph runs cycle detection to completion, so a graph that
/// exists is acyclic. The graph tracks completion only: whether a resolved
/// node unblocks its dependents is decided by the failed-predecessor policy.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: BTreeMap<Label, DagNode>,
    failed_predecessor: FailedPredecessorPolicy,
}

impl DependencyGraph {
    /// Build the graph from a run's steps.
    ///
    /// Fails with [`PlaybookError::DuplicateLabel`] when two steps share a
    /// label, [`PlaybookError::DanglingDependency`] for an undeclared
    /// predecessor under [`DanglingDependencyPolicy::Reject`], and
    /// [`PlaybookError::GraphCycle`] when the dependencies form a cycle.
    pub fn build(steps: &[ChainStep], options: GraphOptions) -> Result<Self> {
        let mut nodes: BTreeMap<Label, DagNode> = BTreeMap::new();

        for step in steps {
            if nodes.contains_key(&step.label) {
                return Err(PlaybookError::DuplicateLabel(step.label.clone()));
            }
            nodes.insert(step.label.clone(), DagNode::new(Vec::new(), false));
        }

        let declared: HashSet<&str> = steps.iter().map(|s| s.label.as_str()).collect();
        let mut phantoms: Vec<Label> = Vec::new();

        for step in steps {
            let mut deps: Vec<Label> = Vec::new();
            for dep in step.dependencies() {
                if deps.contains(&dep) {
                    continue;
                }
                if !declared.contains(dep.as_str()) {
                    match options.dangling_dependency {
                        DanglingDependencyPolicy::Reject => {
                            return Err(PlaybookError::DanglingDependency {
                                label: step.label.clone(),
                                dependency: dep,
                            });
                        }
                        DanglingDependencyPolicy::Drop => {
                            warn!(
                                label = %step.label,
                                dependency = %dep,
                                "dropping dependency on undeclared label"
                            );
                            continue;
                        }
                        DanglingDependencyPolicy::Synthesize => {
                            warn!(
                                label = %step.label,
                                dependency = %dep,
                                "dependency on undeclared label; adding phantom node"
                            );
                            if !phantoms.contains(&dep) {
                                phantoms.push(dep.clone());
                            }
                        }
                    }
                }
                deps.push(dep);
            }
            if let Some(node) = nodes.get_mut(&step.label) {
                node.deps = deps;
            }
        }

        for phantom in phantoms {
            nodes.insert(phantom, DagNode::new(Vec::new(), true));
        }

        // Second pass: populate dependents based on deps.
        let labels: Vec<Label> = nodes.keys().cloned().collect();
        for label in labels {
            let deps = nodes
                .get(&label)
                .map(|n| n.deps.clone())
                .unwrap_or_default();

            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(&dep) {
                    dep_node.dependents.push(label.clone());
                }
            }
        }

        detect_cycle(&nodes)?;

        debug!(nodes = nodes.len(), "dependency graph built");

        Ok(Self {
            nodes,
            failed_predecessor: options.failed_predecessor,
        })
    }

    /// All node labels, in lexical order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Immediate predecessors of a node.
    pub fn dependencies_of(&self, label: &str) -> &[Label] {
        self.nodes
            .get(label)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a node.
    pub fn dependents_of(&self, label: &str) -> &[Label] {
        self.nodes
            .get(label)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_phantom(&self, label: &str) -> bool {
        self.nodes.get(label).is_some_and(|n| n.phantom)
    }

    pub fn state_of(&self, label: &str) -> Option<NodeState> {
        self.nodes.get(label).map(|n| n.state)
    }

    /// Pending nodes whose predecessors are all resolved.
    pub fn ready(&self) -> Vec<Label> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.state == NodeState::Pending)
            .filter(|(_, node)| {
                node.deps.iter().all(|dep| {
                    matches!(
                        self.nodes.get(dep).map(|d| d.state),
                        Some(NodeState::Done(_))
                    )
                })
            })
            .map(|(label, _)| label.clone())
            .collect()
    }

    /// Return the ready frontier and mark it dispatched, so each node is
    /// handed out exactly once.
    pub fn take_ready(&mut self) -> Vec<Label> {
        let ready = self.ready();
        for label in &ready {
            if let Some(node) = self.nodes.get_mut(label) {
                node.state = NodeState::Dispatched;
            }
        }
        ready
    }

    /// Mark a node resolved.
    ///
    /// Returns the dependents that were skipped as a consequence (only ever
    /// non-empty under [`FailedPredecessorPolicy::Block`] for a non-success
    /// resolution). Resolving an unknown or already resolved node is a no-op.
    pub fn done(&mut self, label: &str, resolution: Resolution) -> Vec<Label> {
        match self.nodes.get_mut(label) {
            Some(node) => {
                if let NodeState::Done(previous) = node.state {
                    warn!(label, ?previous, "node already resolved; ignoring");
                    return Vec::new();
                }
                node.state = NodeState::Done(resolution);
            }
            None => {
                warn!(label, "resolution for unknown node; ignoring");
                return Vec::new();
            }
        }

        if resolution == Resolution::Succeeded
            || self.failed_predecessor == FailedPredecessorPolicy::Unblock
        {
            return Vec::new();
        }

        let mut skipped = Vec::new();
        let mut stack: Vec<Label> = self.dependents_of(label).to_vec();

        while let Some(name) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(&name) {
                if node.state == NodeState::Pending {
                    node.state = NodeState::Done(Resolution::Skipped);
                    debug!(label = %name, "skipping dependent of failed step");
                    stack.extend(node.dependents.iter().cloned());
                    skipped.push(name);
                }
            }
        }

        skipped
    }

    /// `true` until every node is resolved.
    pub fn is_active(&self) -> bool {
        self.nodes
            .values()
            .any(|n| !matches!(n.state, NodeState::Done(_)))
    }
}

fn detect_cycle(nodes: &BTreeMap<Label, DagNode>) -> Result<()> {
    // Edge direction: dep -> node.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for label in nodes.keys() {
        graph.add_node(label.as_str());
    }

    for (label, node) in nodes.iter() {
        for dep in node.deps.iter() {
            graph.add_edge(dep.as_str(), label.as_str(), ());
        }
    }

    // A topological sort fails if and only if there is a cycle.
    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(PlaybookError::GraphCycle(format!(
            "cycle detected in step dependencies involving '{}'",
            cycle.node_id()
        ))),
    }
}

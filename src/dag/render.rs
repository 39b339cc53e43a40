// src/dag/render.rs

//! Human-readable graph rendering (Mermaid flowchart syntax).
//!
//! The rendering is for display only; execution never reads it back.

use std::collections::HashMap;
use std::fmt::Write;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use uuid::Uuid;

use crate::model::{ChainStep, Label};

const CLASS_DEFS: &[(&str, &str)] = &[
    ("completed", "#21BA45"),
    ("running", "#9370DB"),
    ("starting", "#9370DB"),
    ("scheduled", "#9370DB"),
    ("created", "#767676"),
    ("error", "#C10015"),
];

#[derive(Debug, Clone)]
pub struct RenderedGraph {
    pub mermaid: String,
    pub acyclic: bool,
}

/// Render the steps as an edge list with one status-annotated line per node.
///
/// Node ids are positional (`n0`, `n1`, ...) so that labels never have to
/// be valid Mermaid identifiers; the label only appears in the node text.
/// A label declared twice maps to its first node. Undeclared labels named
/// in `depends_on` get a plain node of their own.
///
/// `commands` maps a step id to the command of the job it wraps; steps
/// without an entry are labelled with their label only.
pub fn render_mermaid(steps: &[ChainStep], commands: &HashMap<Uuid, String>) -> RenderedGraph {
    let dependencies: Vec<Vec<Label>> = steps.iter().map(ChainStep::dependencies).collect();

    let mut ids: HashMap<&str, usize> = HashMap::new();
    for (index, step) in steps.iter().enumerate() {
        ids.entry(step.label.as_str()).or_insert(index);
    }
    let mut phantoms: Vec<&str> = Vec::new();
    for dep in dependencies.iter().flatten() {
        if !ids.contains_key(dep.as_str()) {
            ids.insert(dep.as_str(), steps.len() + phantoms.len());
            phantoms.push(dep.as_str());
        }
    }

    let mut out = String::from("graph LR\n");
    let mut edges: DiGraphMap<usize, ()> = DiGraphMap::new();

    for (index, (step, deps)) in steps.iter().zip(&dependencies).enumerate() {
        let node = ids[step.label.as_str()];
        edges.add_node(node);
        for dep in deps {
            let from = ids[dep.as_str()];
            edges.add_edge(from, node, ());
            let _ = writeln!(out, "    n{from}-->n{node}");
        }

        if node != index {
            continue;
        }
        let text = match commands.get(&step.id) {
            Some(command) => format!("{}: {}", step.label, command),
            None => step.label.clone(),
        };
        let _ = writeln!(out, "    n{node}(\"{}\"):::{}", escape(&text), step.status);
    }

    for label in &phantoms {
        let _ = writeln!(out, "    n{}(\"{}\")", ids[label], escape(label));
    }

    for (class, fill) in CLASS_DEFS {
        let _ = writeln!(out, "    classDef {} fill:{}", class, fill);
    }

    let acyclic = toposort(&edges, None).is_ok();

    RenderedGraph {
        mermaid: out,
        acyclic,
    }
}

/// Node text is quoted; quotes, brackets and arrows inside it are entities.
fn escape(text: &str) -> String {
    text.replace('"', "#quot;")
        .replace('(', "#40;")
        .replace(')', "#41;")
        .replace('[', "#91;")
        .replace(']', "#93;")
        .replace('{', "#123;")
        .replace('}', "#125;")
        .replace('<', "#lt;")
        .replace('>', "#gt;")
}

//! Dot rendering of a mesh for debugging.
//!
//! Builds a `petgraph` view of the mesh and renders it through
//! `petgraph::dot::Dot`. Purely observational: no pipeline state is
//! touched.
//!
//! In simple mode nodes are labeled with their id and filled with a color
//! taken from the first six characters of their content hash, which makes
//! identical operations visually identical across the graph. In full mode
//! the label carries the trace entry, the hash, and one line per option
//! assignment.
use std::collections::HashMap;
use std::fmt;

use petgraph::dot::{Config, Dot};
use petgraph::stable_graph::StableDiGraph;

use crate::mesh::{Mesh, MeshNode, NodeId};

#[derive(Debug)]
struct DotNode {
    label: String,
    fill: Option<String>,
}

impl fmt::Display for DotNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Renders the mesh in Graphviz dot syntax.
pub fn to_dot(mesh: &Mesh, simple: bool) -> String {
    let mut graph: StableDiGraph<DotNode, ()> = StableDiGraph::new();
    let mut index: HashMap<NodeId, petgraph::stable_graph::NodeIndex> = HashMap::new();

    let start = mesh.node(mesh.start());
    for node in start.into_iter().chain(mesh.nodes()) {
        let dot_node = if node.id == mesh.start() {
            DotNode {
                label: "Start".to_owned(),
                fill: None,
            }
        } else if simple {
            DotNode {
                label: node.id.to_string(),
                fill: Some(hash_color(&node.hash)),
            }
        } else {
            DotNode {
                label: full_label(node),
                fill: None,
            }
        };
        index.insert(node.id, graph.add_node(dot_node));
    }

    for node in start.into_iter().chain(mesh.nodes()) {
        let Some(&from) = index.get(&node.id) else {
            continue;
        };
        for succ in node.successors() {
            if let Some(&to) = index.get(succ) {
                graph.add_edge(from, to, ());
            }
        }
    }

    let dot = Dot::with_attr_getters(
        &graph,
        &[Config::NodeNoLabel, Config::EdgeNoLabel],
        &|_, _| String::new(),
        &|_, (_, weight)| match &weight.fill {
            Some(color) => format!(
                "label = \"{}\" color = \"#{color}\" fillcolor = \"#{color}\" style = \"filled\"",
                escape(&weight.label)
            ),
            None => format!("label = \"{}\"", escape(&weight.label)),
        },
    );
    format!("{dot:?}")
}

/// Multi-line label: trace entry (if any), hash, one line per assignment.
fn full_label(node: &MeshNode) -> String {
    let mut label = String::new();
    if let Some(entry) = node.entry() {
        label.push_str(&entry.to_string());
    } else {
        label.push_str("noop");
    }
    label.push('\n');
    label.push_str(&node.hash);
    label.push('\n');
    for assignment in &node.options {
        for (name, value) in assignment.iter() {
            label.push_str(&format!("{name}={value} "));
        }
        label.push('\n');
    }
    label
}

/// A six-hex-digit fill color derived from the hash prefix.
fn hash_color(hash: &str) -> String {
    let mut color: String = hash
        .chars()
        .filter(char::is_ascii_hexdigit)
        .take(6)
        .collect();
    while color.len() < 6 {
        color.push('0');
    }
    color
}

/// Escapes a label for a quoted dot string.
fn escape(label: &str) -> String {
    label
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

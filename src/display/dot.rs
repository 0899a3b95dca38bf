//! dot.rs
//! Graphviz rendering of a dependency graph for inspection.

use crate::graph::{DependencyGraph, NodeId};
use petgraph::dot::Dot;
use petgraph::graph::DiGraph;
use std::path::Path;

/// Renders every node (labelled `name [key]`, plus `#cluster` when clustered)
/// with one edge per dependency, pointing from the dependency to its user.
pub fn render(graph: &DependencyGraph) -> String {
    let mut g: DiGraph<String, &'static str> = DiGraph::with_capacity(graph.node_count(), graph.edge_count());

    let indices: Vec<_> = (0..graph.node_count())
        .map(|i| {
            let node = NodeId::new(i);
            let mut label = format!("{} [{}]", graph.node_name(node), graph.key(node));
            if let Some(c) = graph.cluster(node) {
                label.push_str(&format!(" #{}", c.0));
            }
            g.add_node(label)
        })
        .collect();

    for (i, &user) in indices.iter().enumerate() {
        for (dep, kind) in graph.dependencies(NodeId::new(i)) {
            g.add_edge(indices[dep.index()], user, kind.label());
        }
    }

    format!("{}", Dot::new(&g))
}

pub fn write_dot(graph: &DependencyGraph, path: impl AsRef<Path>) -> std::io::Result<()> {
    std::fs::write(path, render(graph))
}

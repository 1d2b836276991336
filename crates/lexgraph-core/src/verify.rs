//! Nesting checks over a materialized document graph.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::edge::{Edge, EdgeType};
use crate::node::{Node, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A containment edge whose parent is not strictly shallower than its child.
    LevelOrder,
    MultipleParents,
    Cycle,
    DanglingEndpoint,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::LevelOrder => "level_order",
            Self::MultipleParents => "multiple_parents",
            Self::Cycle => "cycle",
            Self::DanglingEndpoint => "dangling_endpoint",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub node: NodeId,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub nodes: usize,
    pub containment_edges: usize,
    pub roots: Vec<NodeId>,
    pub violations: Vec<Violation>,
}

impl VerifyReport {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }
}

impl std::fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} nodes, {} containment edges, {} roots",
            self.nodes,
            self.containment_edges,
            self.roots.len()
        )?;
        if self.is_ok() {
            return writeln!(f, "nesting ok");
        }
        for violation in &self.violations {
            writeln!(f, "  {} {}: {}", violation.kind, violation.node, violation.detail)?;
        }
        Ok(())
    }
}

/// Checks that structural containment forms a forest whose edges always go from a
/// shallower level to a deeper one.
#[must_use]
pub fn verify_nesting(nodes: &[Node], edges: &[Edge]) -> VerifyReport {
    let mut graph: DiGraph<&Node, ()> = DiGraph::new();
    let indices: HashMap<&NodeId, NodeIndex> = nodes
        .iter()
        .map(|node| (&node.id, graph.add_node(node)))
        .collect();

    let mut report = VerifyReport {
        nodes: nodes.len(),
        ..VerifyReport::default()
    };

    for edge in edges.iter().filter(|e| e.edge_type == EdgeType::Contains) {
        report.containment_edges += 1;
        let (Some(&parent), Some(&child)) = (indices.get(&edge.source), indices.get(&edge.target))
        else {
            let missing = if indices.contains_key(&edge.source) {
                &edge.target
            } else {
                &edge.source
            };
            report.violations.push(Violation {
                kind: ViolationKind::DanglingEndpoint,
                node: missing.clone(),
                detail: format!("{} -> {} references a missing node", edge.source, edge.target),
            });
            continue;
        };

        let (parent_level, child_level) = (graph[parent].level(), graph[child].level());
        match (parent_level, child_level) {
            (Some(p), Some(c)) if p < c => {}
            _ => report.violations.push(Violation {
                kind: ViolationKind::LevelOrder,
                node: edge.target.clone(),
                detail: format!(
                    "{} ({}) contains {} ({})",
                    edge.source,
                    graph[parent].label(),
                    edge.target,
                    graph[child].label()
                ),
            }),
        }
        graph.add_edge(parent, child, ());
    }

    for index in graph.node_indices() {
        let node = graph[index];
        if node.level().is_none() {
            continue;
        }
        let parents = graph.neighbors_directed(index, Direction::Incoming).count();
        match parents {
            0 => report.roots.push(node.id.clone()),
            1 => {}
            n => report.violations.push(Violation {
                kind: ViolationKind::MultipleParents,
                node: node.id.clone(),
                detail: format!("{n} containment parents"),
            }),
        }
    }

    if let Err(cycle) = toposort(&graph, None) {
        report.violations.push(Violation {
            kind: ViolationKind::Cycle,
            node: graph[cycle.node_id()].id.clone(),
            detail: "containment cycle".into(),
        });
    }

    report.roots.sort();
    report.violations.sort_by(|a, b| (a.kind, &a.node).cmp(&(b.kind, &b.node)));
    report
}

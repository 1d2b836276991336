use std::collections::HashMap;

use super::extractor::{ExtractedGraph, Rejection};
use crate::edge::{Edge, EdgeType};
use crate::node::{IdentityKey, Node, NodeId};

/// Identity key to canonical id, for one document in one ingestion run.
#[derive(Debug, Default)]
pub struct CanonicalEntityIndex {
    ids: HashMap<IdentityKey, NodeId>,
    counters: HashMap<String, usize>,
}

impl CanonicalEntityIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &IdentityKey) -> Option<&NodeId> {
        self.ids.get(key)
    }

    /// Assigns the next `<label>_<index>` id to `key`, or returns the id it already has.
    pub fn assign(&mut self, key: IdentityKey) -> NodeId {
        if let Some(id) = self.ids.get(&key) {
            return id.clone();
        }
        let counter = self.counters.entry(key.label.clone()).or_default();
        let id = NodeId::new(format!("{}_{counter}", key.label.to_lowercase()));
        *counter += 1;
        self.ids.insert(key, id.clone());
        id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Chunk-local id to canonical id. Lives for exactly one chunk.
#[derive(Debug, Default)]
pub struct ChunkScope {
    local: HashMap<String, NodeId>,
}

impl ChunkScope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, local: impl Into<String>, canonical: NodeId) {
        self.local.insert(local.into(), canonical);
    }

    #[must_use]
    pub fn resolve(&self, local: &str) -> Option<&NodeId> {
        self.local.get(local)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonicalization {
    pub id: NodeId,
    pub created: bool,
    /// A reused node gained a property it did not have.
    pub merged: bool,
}

#[derive(Debug, Default)]
pub struct ChunkOutcome {
    pub nodes: Vec<Canonicalization>,
    pub edges: Vec<Edge>,
    pub rejected: Vec<Rejection>,
}

/// Owns the canonical nodes of one document.
#[derive(Debug, Default)]
pub struct Canonicalizer {
    index: CanonicalEntityIndex,
    nodes: Vec<Node>,
    positions: HashMap<NodeId, usize>,
}

impl Canonicalizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `node` to its canonical id, creating the canonical node on first sight.
    ///
    /// Later occurrences merge into the first: non-empty values already present are
    /// kept. When a scope is given the node's own id is bound in it as a local id.
    pub fn canonicalize(&mut self, node: Node, scope: Option<&mut ChunkScope>) -> Canonicalization {
        let key = node.identity_key();
        let local_id = node.id.clone();

        let outcome = if let Some(id) = self.index.get(&key).cloned() {
            let merged = self
                .get_mut(&id)
                .is_some_and(|existing| existing.merge_from(&node));
            Canonicalization {
                id,
                created: false,
                merged,
            }
        } else {
            let id = self.index.assign(key);
            let mut node = node;
            node.id = id.clone();
            self.positions.insert(id.clone(), self.nodes.len());
            self.nodes.push(node);
            Canonicalization {
                id,
                created: true,
                merged: false,
            }
        };

        if let Some(scope) = scope {
            if !local_id.is_empty() {
                scope.bind(local_id.as_str(), outcome.id.clone());
            }
        }

        outcome
    }

    /// Canonicalizes one chunk of extraction output. Edge endpoints are remapped through
    /// a scope that is dropped when the chunk is done.
    pub fn canonicalize_chunk(&mut self, chunk: ExtractedGraph) -> ChunkOutcome {
        let mut scope = ChunkScope::new();
        let mut outcome = ChunkOutcome::default();

        for extracted in &chunk.nodes {
            let result = self.canonicalize(extracted.to_node(), Some(&mut scope));
            outcome.nodes.push(result);
        }

        for extracted in chunk.edges {
            let item = format!(
                "{}-[{}]->{}",
                extracted.source, extracted.edge_type, extracted.target
            );
            let (Some(source), Some(target)) = (
                scope.resolve(&extracted.source).cloned(),
                scope.resolve(&extracted.target).cloned(),
            ) else {
                outcome.rejected.push(Rejection {
                    item,
                    reason: "endpoint is not a node of this chunk".into(),
                });
                continue;
            };
            let built = extracted
                .edge_type
                .parse::<EdgeType>()
                .and_then(|edge_type| Edge::new(edge_type, source, target));
            match built {
                Ok(edge) if matches!(edge.edge_type, EdgeType::Contains | EdgeType::References) => {
                    outcome.rejected.push(Rejection {
                        item,
                        reason: format!("{} edges are not accepted from an extractor", edge.edge_type),
                    });
                }
                Ok(mut edge) => {
                    edge.properties = extracted.properties;
                    outcome.edges.push(edge);
                }
                Err(e) => outcome.rejected.push(Rejection {
                    item,
                    reason: e.to_string(),
                }),
            }
        }

        outcome
    }

    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.positions.get(id).map(|&position| &self.nodes[position])
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        let position = *self.positions.get(id)?;
        self.nodes.get_mut(position)
    }

    /// Canonical nodes in first-seen order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[must_use]
    pub fn into_nodes(self) -> Vec<Node> {
        self.nodes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

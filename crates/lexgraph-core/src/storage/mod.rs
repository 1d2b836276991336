//! Graph persistence. The writer and the reference pass only see [`GraphStore`].

mod sqlite;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::edge::Edge;
use crate::node::{Node, NodeId};

pub use sqlite::SqliteGraphStore;

/// SQLite result codes worth retrying: BUSY, LOCKED and their extended forms.
const TRANSIENT_CODES: &[&str] = &["5", "6", "261", "262", "517", "773"];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Transient store error: {0}")]
    Transient(String),
    #[error("Store error: {0}")]
    Fatal(String),
    #[error("Edge endpoint not in store: {0}")]
    MissingEndpoint(NodeId),
    #[error("Store connection closed: {0}")]
    Connection(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) => {
                let transient = db
                    .code()
                    .is_some_and(|code| TRANSIENT_CODES.contains(&code.as_ref()));
                if transient {
                    Self::Transient(e.to_string())
                } else {
                    Self::Fatal(e.to_string())
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => {
                Self::Transient(e.to_string())
            }
            sqlx::Error::PoolClosed => Self::Connection(e.to_string()),
            _ => Self::Fatal(e.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertStatus {
    Created,
    /// Existing record gained properties it did not have.
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub status: UpsertStatus,
    /// Id of the stored node. Differs from the submitted id when the identity key
    /// was already stored under another id.
    pub id: NodeId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeQuery {
    pub document_id: Option<String>,
    pub label: Option<String>,
    pub number: Option<String>,
    pub contains: Option<String>,
    pub limit: Option<u32>,
}

impl NodeQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn number(mut self, number: impl Into<String>) -> Self {
        self.number = Some(number.into());
        self
    }

    /// Substring match over title and text.
    #[must_use]
    pub fn contains(mut self, needle: impl Into<String>) -> Self {
        self.contains = Some(needle.into());
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub document_id: String,
    pub node: Node,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub documents: usize,
    pub nodes: usize,
    pub edges: usize,
    pub nodes_by_label: BTreeMap<String, usize>,
    pub edges_by_type: BTreeMap<String, usize>,
}

impl std::fmt::Display for GraphStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} documents, {} nodes, {} edges",
            self.documents, self.nodes, self.edges
        )?;
        for (label, count) in &self.nodes_by_label {
            writeln!(f, "  {label}: {count}")?;
        }
        for (edge_type, count) in &self.edges_by_type {
            writeln!(f, "  -[{edge_type}]-> {count}")?;
        }
        Ok(())
    }
}

/// Idempotent, per-document graph store.
///
/// Nodes are keyed by identity key and edges by `(source, type, target)`, both
/// scoped to a document. Upserting an existing record merges properties with the
/// stored values taking precedence.
#[async_trait::async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_node(&self, document_id: &str, node: &Node) -> StoreResult<UpsertOutcome>;

    /// Both endpoints must already be stored for `document_id`.
    async fn upsert_edge(&self, document_id: &str, edge: &Edge) -> StoreResult<UpsertStatus>;

    async fn query(&self, query: &NodeQuery) -> StoreResult<Vec<NodeRecord>>;

    async fn edges(&self, document_id: Option<&str>) -> StoreResult<Vec<Edge>>;

    async fn documents(&self) -> StoreResult<Vec<String>>;

    async fn stats(&self, document_id: Option<&str>) -> StoreResult<GraphStats>;

    /// Removes every node and edge of a document. Returns the number of nodes removed.
    async fn clear_document(&self, document_id: &str) -> StoreResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(StoreError::from(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!StoreError::from(sqlx::Error::RowNotFound).is_transient());
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolClosed),
            StoreError::Connection(_)
        ));
    }

    #[test]
    fn test_query_builder() {
        let query = NodeQuery::new()
            .document("obc")
            .label("Article")
            .contains("guard")
            .limit(10);
        assert_eq!(query.document_id.as_deref(), Some("obc"));
        assert_eq!(query.label.as_deref(), Some("Article"));
        assert_eq!(query.number, None);
        assert_eq!(query.limit, Some(10));
    }
}

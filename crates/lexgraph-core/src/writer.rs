//! Batched, retrying writes of nodes and edges into a [`GraphStore`].
//!
//! Transient store errors are retried with exponential backoff and optional
//! jitter. Fatal errors fail the item and the batch continues. Cancellation is
//! honored between batches only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::edge::Edge;
use crate::node::{Node, NodeId};
use crate::report::ErrorKind;
use crate::storage::{GraphStore, StoreError, UpsertStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped, then jittered into its upper half.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self
            .base_delay_ms
            .saturating_mul(1 << exponent)
            .min(self.max_delay_ms);
        let delay = if self.jitter && delay > 1 {
            rand::rng().random_range(delay / 2..=delay)
        } else {
            delay
        };
        Duration::from_millis(delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFailure {
    pub item: String,
    pub kind: ErrorKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Items never attempted because the run was cancelled.
    pub skipped: usize,
    pub failed: usize,
    pub retries: usize,
    pub batches: usize,
    pub cancelled: bool,
}

impl WriteReport {
    fn count(&mut self, status: UpsertStatus) {
        match status {
            UpsertStatus::Created => self.created += 1,
            UpsertStatus::Updated => self.updated += 1,
            UpsertStatus::Unchanged => self.unchanged += 1,
        }
    }

    pub fn merge(&mut self, other: &Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.retries += other.retries;
        self.batches += other.batches;
        self.cancelled |= other.cancelled;
    }

    #[must_use]
    pub const fn written(&self) -> usize {
        self.created + self.updated + self.unchanged
    }
}

impl std::fmt::Display for WriteReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} unchanged, {} failed, {} skipped ({} batches, {} retries)",
            self.created,
            self.updated,
            self.unchanged,
            self.failed,
            self.skipped,
            self.batches,
            self.retries
        )
    }
}

#[derive(Debug, Default)]
pub struct WriteOutcome {
    pub report: WriteReport,
    pub failures: Vec<WriteFailure>,
    /// Submitted node id to stored node id.
    pub ids: HashMap<NodeId, NodeId>,
}

impl WriteOutcome {
    fn fail(&mut self, item: String, error: &StoreError) {
        let kind = if error.is_transient() {
            ErrorKind::WriteTransient
        } else {
            ErrorKind::WriteFatal
        };
        tracing::warn!(item = %item, kind = %kind, "write failed: {error}");
        self.report.failed += 1;
        self.failures.push(WriteFailure {
            item,
            kind,
            reason: error.to_string(),
        });
    }
}

enum Item<'a> {
    Node(&'a Node),
    Edge(Edge),
}

impl Item<'_> {
    fn describe(&self) -> String {
        match self {
            Self::Node(node) => format!("{} {}", node.id, node.identity_key()),
            Self::Edge(edge) => format!("{}-[{}]->{}", edge.source, edge.edge_type, edge.target),
        }
    }
}

#[derive(Clone)]
pub struct GraphWriter {
    store: Arc<dyn GraphStore>,
    batch_size: usize,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl GraphWriter {
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            batch_size: 100,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Writes nodes first, then edges with endpoints mapped to stored node ids,
    /// in batches of `batch_size`. Cancellation is checked between batches; a
    /// started batch runs to the end, retries included.
    pub async fn write(&self, document_id: &str, nodes: &[Node], edges: &[Edge]) -> WriteOutcome {
        let mut outcome = WriteOutcome::default();

        let node_items: Vec<Item<'_>> = nodes.iter().map(Item::Node).collect();
        self.write_items(document_id, node_items, &mut outcome).await;

        let edge_items = remapped(edges, &outcome.ids);
        self.write_items(document_id, edge_items, &mut outcome).await;

        tracing::info!(document = document_id, "write finished: {}", outcome.report);
        outcome
    }

    /// Writes everything as a single batch.
    pub async fn write_batch(
        &self,
        document_id: &str,
        nodes: &[Node],
        edges: &[Edge],
    ) -> WriteOutcome {
        let mut outcome = WriteOutcome::default();
        outcome.report.batches = 1;

        let node_items: Vec<Item<'_>> = nodes.iter().map(Item::Node).collect();
        self.write_chunk(document_id, node_items, &mut outcome).await;
        let edge_items = remapped(edges, &outcome.ids);
        self.write_chunk(document_id, edge_items, &mut outcome).await;

        outcome
    }

    async fn write_items(&self, document_id: &str, items: Vec<Item<'_>>, outcome: &mut WriteOutcome) {
        let total = items.len();
        let mut items = items.into_iter();
        let mut done = 0;

        while done < total {
            if self.cancel.is_cancelled() {
                outcome.report.cancelled = true;
                outcome.report.skipped += total - done;
                tracing::info!(document = document_id, skipped = total - done, "write cancelled");
                return;
            }

            let batch: Vec<Item<'_>> = items.by_ref().take(self.batch_size).collect();
            done += batch.len();
            outcome.report.batches += 1;
            self.write_chunk(document_id, batch, outcome).await;
        }
    }

    async fn write_chunk(&self, document_id: &str, batch: Vec<Item<'_>>, outcome: &mut WriteOutcome) {
        let mut batch = batch.into_iter();
        while let Some(item) = batch.next() {
            match self.write_one(document_id, &item, outcome).await {
                Ok(()) => {}
                Err(e) if e.is_transient() => {
                    outcome.fail(item.describe(), &e);
                    for rest in batch.by_ref() {
                        outcome.fail(rest.describe(), &e);
                    }
                }
                Err(e) => outcome.fail(item.describe(), &e),
            }
        }
    }

    async fn write_one(
        &self,
        document_id: &str,
        item: &Item<'_>,
        outcome: &mut WriteOutcome,
    ) -> Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            let result = match item {
                Item::Node(node) => self.store.upsert_node(document_id, node).await.map(|upsert| {
                    if upsert.id != node.id {
                        outcome.ids.insert(node.id.clone(), upsert.id);
                    }
                    upsert.status
                }),
                Item::Edge(edge) => self.store.upsert_edge(document_id, edge).await,
            };

            match result {
                Ok(status) => {
                    outcome.report.count(status);
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::debug!(
                        item = %item.describe(),
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "transient write error, retrying: {e}"
                    );
                    outcome.report.retries += 1;
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn remapped<'a>(edges: &[Edge], ids: &HashMap<NodeId, NodeId>) -> Vec<Item<'a>> {
    edges
        .iter()
        .map(|edge| {
            let mut edge = edge.clone();
            if let Some(id) = ids.get(&edge.source) {
                edge.source = id.clone();
            }
            if let Some(id) = ids.get(&edge.target) {
                edge.target = id.clone();
            }
            Item::Edge(edge)
        })
        .collect()
}

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, QueryBuilder, Sqlite};

use super::{
    GraphStats, GraphStore, NodeQuery, NodeRecord, StoreError, StoreResult, UpsertOutcome,
    UpsertStatus,
};
use crate::edge::Edge;
use crate::node::{Node, NodeId, NodeKind};

const INIT_SQL: &str = r"
CREATE TABLE IF NOT EXISTS nodes (
    document_id TEXT NOT NULL,
    node_id TEXT NOT NULL,
    label TEXT NOT NULL,
    identity_key TEXT NOT NULL,
    number TEXT,
    title TEXT,
    text TEXT,
    properties TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (document_id, label, identity_key)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_id ON nodes(document_id, node_id);
CREATE INDEX IF NOT EXISTS idx_nodes_label ON nodes(label);
CREATE INDEX IF NOT EXISTS idx_nodes_number ON nodes(number);

CREATE TABLE IF NOT EXISTS edges (
    document_id TEXT NOT NULL,
    source_id TEXT NOT NULL,
    edge_type TEXT NOT NULL,
    target_id TEXT NOT NULL,
    properties TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (document_id, source_id, edge_type, target_id)
);

CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(document_id, target_id);
CREATE INDEX IF NOT EXISTS idx_edges_type ON edges(edge_type);
";

const NODE_COLUMNS: &str =
    "document_id, node_id, label, number, title, text, properties, created_at, updated_at";

type NodeRow = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
    String,
);

type StoredNode = (
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
);

pub struct SqliteGraphStore {
    pool: Pool<Sqlite>,
}

impl SqliteGraphStore {
    pub async fn open(path: &Path) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(INIT_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn open_memory() -> StoreResult<Self> {
        // A second connection would open a second, empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        sqlx::raw_sql(INIT_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn node_exists(
        conn: &mut sqlx::SqliteConnection,
        document_id: &str,
        id: &NodeId,
    ) -> StoreResult<bool> {
        let found: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM nodes WHERE document_id = ? AND node_id = ?")
                .bind(document_id)
                .bind(id.as_str())
                .fetch_optional(conn)
                .await?;
        Ok(found.is_some())
    }

    /// The submitted id if it is free, otherwise the next free `<label>_<n>`.
    async fn free_id(
        conn: &mut sqlx::SqliteConnection,
        document_id: &str,
        node: &Node,
    ) -> StoreResult<NodeId> {
        if !node.id.is_empty() && !Self::node_exists(conn, document_id, &node.id).await? {
            return Ok(node.id.clone());
        }
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM nodes WHERE document_id = ? AND label = ?")
                .bind(document_id)
                .bind(node.label())
                .fetch_one(&mut *conn)
                .await?;
        let prefix = node.label().to_lowercase();
        let mut counter = count;
        loop {
            let candidate = NodeId::new(format!("{prefix}_{counter}"));
            if !Self::node_exists(conn, document_id, &candidate).await? {
                return Ok(candidate);
            }
            counter += 1;
        }
    }
}

#[async_trait::async_trait]
impl GraphStore for SqliteGraphStore {
    async fn upsert_node(&self, document_id: &str, node: &Node) -> StoreResult<UpsertOutcome> {
        let key = node.identity_key();
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let existing: Option<StoredNode> = sqlx::query_as(
            r"
            SELECT node_id, number, title, text, properties
            FROM nodes WHERE document_id = ? AND label = ? AND identity_key = ?
            ",
        )
        .bind(document_id)
        .bind(&key.label)
        .bind(&key.value)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = if let Some((node_id, number, title, text, properties)) = existing {
            let mut stored = Node::new(node.kind.clone()).with_id(node_id);
            stored.number = number;
            stored.title = title;
            stored.text = text;
            stored.properties = serde_json::from_str(&properties)?;

            let status = if stored.merge_from(node) {
                sqlx::query(
                    r"
                    UPDATE nodes SET number = ?, title = ?, text = ?, properties = ?, updated_at = ?
                    WHERE document_id = ? AND node_id = ?
                    ",
                )
                .bind(&stored.number)
                .bind(&stored.title)
                .bind(&stored.text)
                .bind(serde_json::to_string(&stored.properties)?)
                .bind(&now)
                .bind(document_id)
                .bind(stored.id.as_str())
                .execute(&mut *tx)
                .await?;
                UpsertStatus::Updated
            } else {
                UpsertStatus::Unchanged
            };
            UpsertOutcome {
                status,
                id: stored.id,
            }
        } else {
            let id = Self::free_id(&mut tx, document_id, node).await?;
            sqlx::query(
                r"
                INSERT INTO nodes (document_id, node_id, label, identity_key, number, title, text,
                                   properties, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(document_id)
            .bind(id.as_str())
            .bind(&key.label)
            .bind(&key.value)
            .bind(&node.number)
            .bind(&node.title)
            .bind(&node.text)
            .bind(serde_json::to_string(&node.properties)?)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            UpsertOutcome {
                status: UpsertStatus::Created,
                id,
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn upsert_edge(&self, document_id: &str, edge: &Edge) -> StoreResult<UpsertStatus> {
        let mut tx = self.pool.begin().await?;

        for endpoint in [&edge.source, &edge.target] {
            if !Self::node_exists(&mut tx, document_id, endpoint).await? {
                return Err(StoreError::MissingEndpoint(endpoint.clone()));
            }
        }

        let existing: Option<(String,)> = sqlx::query_as(
            r"
            SELECT properties FROM edges
            WHERE document_id = ? AND source_id = ? AND edge_type = ? AND target_id = ?
            ",
        )
        .bind(document_id)
        .bind(edge.source.as_str())
        .bind(edge.edge_type.as_str())
        .bind(edge.target.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let status = match existing {
            Some((properties,)) => {
                let mut stored: Map<String, Value> = serde_json::from_str(&properties)?;
                let mut changed = false;
                for (key, value) in &edge.properties {
                    if value.is_null() {
                        continue;
                    }
                    if !stored.get(key).is_some_and(|v| !v.is_null()) {
                        stored.insert(key.clone(), value.clone());
                        changed = true;
                    }
                }
                if changed {
                    sqlx::query(
                        r"
                        UPDATE edges SET properties = ?
                        WHERE document_id = ? AND source_id = ? AND edge_type = ? AND target_id = ?
                        ",
                    )
                    .bind(serde_json::to_string(&stored)?)
                    .bind(document_id)
                    .bind(edge.source.as_str())
                    .bind(edge.edge_type.as_str())
                    .bind(edge.target.as_str())
                    .execute(&mut *tx)
                    .await?;
                    UpsertStatus::Updated
                } else {
                    UpsertStatus::Unchanged
                }
            }
            None => {
                sqlx::query(
                    r"
                    INSERT INTO edges (document_id, source_id, edge_type, target_id, properties, created_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    ",
                )
                .bind(document_id)
                .bind(edge.source.as_str())
                .bind(edge.edge_type.as_str())
                .bind(edge.target.as_str())
                .bind(serde_json::to_string(&edge.properties)?)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
                UpsertStatus::Created
            }
        };

        tx.commit().await?;
        Ok(status)
    }

    async fn query(&self, query: &NodeQuery) -> StoreResult<Vec<NodeRecord>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {NODE_COLUMNS} FROM nodes WHERE 1 = 1"));
        if let Some(document_id) = &query.document_id {
            builder.push(" AND document_id = ").push_bind(document_id);
        }
        if let Some(label) = &query.label {
            builder.push(" AND label = ").push_bind(label);
        }
        if let Some(number) = &query.number {
            builder.push(" AND number = ").push_bind(number);
        }
        if let Some(needle) = &query.contains {
            let pattern = format!("%{needle}%");
            builder
                .push(" AND (title LIKE ")
                .push_bind(pattern.clone())
                .push(" OR text LIKE ")
                .push_bind(pattern)
                .push(")");
        }
        builder.push(" ORDER BY document_id, rowid");
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows: Vec<NodeRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(parse_node_row).collect()
    }

    async fn edges(&self, document_id: Option<&str>) -> StoreResult<Vec<Edge>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            r"
            SELECT source_id, edge_type, target_id, properties FROM edges
            WHERE (?1 IS NULL OR document_id = ?1)
            ORDER BY document_id, rowid
            ",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(parse_edge_row).collect()
    }

    async fn documents(&self) -> StoreResult<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT document_id FROM nodes ORDER BY document_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn stats(&self, document_id: Option<&str>) -> StoreResult<GraphStats> {
        let (documents,): (i64,) = sqlx::query_as(
            "SELECT COUNT(DISTINCT document_id) FROM nodes WHERE (?1 IS NULL OR document_id = ?1)",
        )
        .bind(document_id)
        .fetch_one(&self.pool)
        .await?;

        let labels: Vec<(String, i64)> = sqlx::query_as(
            r"
            SELECT label, COUNT(*) FROM nodes WHERE (?1 IS NULL OR document_id = ?1)
            GROUP BY label
            ",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        let types: Vec<(String, i64)> = sqlx::query_as(
            r"
            SELECT edge_type, COUNT(*) FROM edges WHERE (?1 IS NULL OR document_id = ?1)
            GROUP BY edge_type
            ",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        let nodes_by_label: BTreeMap<String, usize> = labels
            .into_iter()
            .map(|(label, count)| (label, to_count(count)))
            .collect();
        let edges_by_type: BTreeMap<String, usize> = types
            .into_iter()
            .map(|(edge_type, count)| (edge_type, to_count(count)))
            .collect();

        Ok(GraphStats {
            documents: to_count(documents),
            nodes: nodes_by_label.values().sum(),
            edges: edges_by_type.values().sum(),
            nodes_by_label,
            edges_by_type,
        })
    }

    async fn clear_document(&self, document_id: &str) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM edges WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM nodes WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        tracing::info!(document = document_id, removed, "cleared document");
        Ok(removed)
    }
}

fn to_count(n: i64) -> usize {
    usize::try_from(n).unwrap_or_default()
}

fn parse_timestamp(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Fatal(format!("bad timestamp '{value}': {e}")))
}

fn parse_node_row(row: NodeRow) -> StoreResult<NodeRecord> {
    let (document_id, node_id, label, number, title, text, properties, created_at, updated_at) =
        row;

    let mut node = Node::new(NodeKind::from_label(&label)).with_id(node_id);
    node.number = number;
    node.title = title;
    node.text = text;
    node.properties = serde_json::from_str(&properties)?;

    Ok(NodeRecord {
        document_id,
        node,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn parse_edge_row(row: (String, String, String, String)) -> StoreResult<Edge> {
    let (source, edge_type, target, properties) = row;
    let edge_type = edge_type
        .parse()
        .map_err(|e: crate::Error| StoreError::Fatal(e.to_string()))?;
    let mut edge = Edge::new(edge_type, source.into(), target.into())
        .map_err(|e| StoreError::Fatal(e.to_string()))?;
    edge.properties = serde_json::from_str(&properties)?;
    Ok(edge)
}

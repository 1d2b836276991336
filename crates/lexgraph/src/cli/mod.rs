pub mod ingest;
pub mod query;
pub mod resolve;
pub mod schema;
pub mod stats;
pub mod verify;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use lexgraph_core::{GraphStore, IngestConfig, SqliteGraphStore};

#[derive(Parser)]
#[command(
    name = "lexgraph",
    about = "Parse regulatory documents into a hierarchical property graph",
    version
)]
pub struct Cli {
    /// Graph database file (defaults to the platform data directory)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,
    /// Ingestion configuration file (JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest JSON Lines fragment files, one document per file
    Ingest {
        /// Fragment file path(s)
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Write the run reports to this file as JSON
        #[arg(long)]
        report: Option<PathBuf>,
        /// Documents ingested in parallel
        #[arg(short = 'j', long)]
        jobs: Option<usize>,
        /// Clear each document's stored graph before ingesting it
        #[arg(long)]
        replace: bool,
        /// Skip the cross-reference pass
        #[arg(long)]
        skip_references: bool,
        /// Recorded extraction responses used as the extraction backend
        #[arg(long)]
        recorded_extractions: Option<PathBuf>,
    },
    /// Re-run reference resolution over stored documents
    Resolve {
        /// Only this document
        #[arg(long)]
        document: Option<String>,
    },
    /// Show node and edge counts
    Stats {
        #[arg(long)]
        document: Option<String>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search stored nodes
    Query {
        #[arg(long)]
        document: Option<String>,
        /// Node label, e.g. Article
        #[arg(long)]
        label: Option<String>,
        /// Exact node number, e.g. 9.1.1.1
        #[arg(long)]
        number: Option<String>,
        /// Substring of the title or text
        #[arg(long)]
        contains: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Check that stored containment forms a well-nested forest
    Verify {
        #[arg(long)]
        document: Option<String>,
    },
    /// Print the effective schema as JSON
    Schema,
}

/// Options every subcommand shares.
pub struct Context {
    pub db: PathBuf,
    pub config: IngestConfig,
}

impl Context {
    pub fn load(db: Option<PathBuf>, config: Option<&Path>) -> Result<Self> {
        let config = match config {
            Some(path) => IngestConfig::load(path)
                .with_context(|| format!("invalid configuration in {}", path.display()))?,
            None => IngestConfig::default(),
        };
        Ok(Self {
            db: db.unwrap_or_else(default_db_path),
            config,
        })
    }

    pub async fn open_store(&self) -> Result<Arc<SqliteGraphStore>> {
        if let Some(parent) = self.db.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        let store = SqliteGraphStore::open(&self.db)
            .await
            .with_context(|| format!("cannot open graph database {}", self.db.display()))?;
        tracing::debug!(db = %self.db.display(), "opened graph database");
        Ok(Arc::new(store))
    }
}

#[must_use]
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lexgraph")
        .join("graph.db")
}

/// Documents named on the command line, or every stored document.
async fn target_documents(
    store: &SqliteGraphStore,
    document: Option<&str>,
) -> Result<Vec<String>> {
    match document {
        Some(document) => Ok(vec![document.to_string()]),
        None => Ok(store.documents().await?),
    }
}

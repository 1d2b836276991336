use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::grammar::{GrammarConfig, NumberingGrammar};
use crate::ingest::RootSeed;
use crate::reference::{CitationConfig, ReferenceResolver};
use crate::schema::{SchemaConfig, SchemaRegistry};
use crate::storage::GraphStore;
use crate::writer::{GraphWriter, RetryPolicy};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Documents ingested at the same time.
    pub documents: usize,
    pub resolver_workers: usize,
    /// Nodes per resolver task.
    pub resolver_shard_size: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            documents: 4,
            resolver_workers: 4,
            resolver_shard_size: 256,
        }
    }
}

/// Provenance applied to documents that do not set their own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<RootSeed>,
}

/// Ingestion configuration. Every field has a default, so `{}` is a valid file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Merged onto the default regulation schema.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaConfig>,
    /// Replaces the built-in numbering grammar.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grammar: Option<GrammarConfig>,
    /// Replaces the standard citation patterns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<CitationConfig>>,
    pub writer: WriterConfig,
    pub concurrency: ConcurrencyConfig,
    pub document: DocumentDefaults,
}

impl IngestConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.check()?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.writer.batch_size == 0 {
            return Err(Error::Config("writer.batch_size must be at least 1".into()));
        }
        if self.writer.retry.max_attempts == 0 {
            return Err(Error::Config(
                "writer.retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.concurrency.documents == 0 || self.concurrency.resolver_workers == 0 {
            return Err(Error::Config("concurrency limits must be at least 1".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn schema_registry(&self) -> SchemaRegistry {
        let mut registry = SchemaRegistry::default_regulation();
        if let Some(schema) = &self.schema {
            registry.merge_config(schema.clone());
        }
        registry
    }

    pub fn numbering_grammar(&self) -> Result<NumberingGrammar> {
        let grammar = match &self.grammar {
            Some(config) => NumberingGrammar::compile(config)?,
            None => NumberingGrammar::ontario_building_code()?,
        };
        Ok(grammar)
    }

    pub fn reference_resolver(&self) -> Result<ReferenceResolver> {
        let resolver = match &self.citations {
            Some(citations) => ReferenceResolver::new(citations)?,
            None => ReferenceResolver::standard()?,
        };
        Ok(resolver)
    }

    #[must_use]
    pub fn graph_writer(&self, store: Arc<dyn GraphStore>) -> GraphWriter {
        GraphWriter::new(store)
            .with_batch_size(self.writer.batch_size)
            .with_retry(self.writer.retry)
    }
}

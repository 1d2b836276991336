use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::canonical::Canonicalizer;
use super::classifier::{Classification, FragmentClassifier};
use super::extractor::{validate_extraction, Extractor};
use super::fragment::{read_fragments, Fragment};
use super::tracker::run_structural_pass;
use crate::config::{ConcurrencyConfig, DocumentDefaults, IngestConfig};
use crate::edge::Edge;
use crate::grammar::NumberingGrammar;
use crate::node::{Node, NodeId};
use crate::reference::{NodeText, ReferenceError, ReferenceResolver};
use crate::report::{ErrorKind, RunReport};
use crate::schema::SchemaRegistry;
use crate::storage::{GraphStore, NodeQuery, StoreError};
use crate::writer::{GraphWriter, WriteOutcome};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Malformed input at line {line}: {source}")]
    MalformedInput {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Reference error: {0}")]
    Reference(#[from] ReferenceError),
    #[error("Ingestion cancelled")]
    Cancelled,
    #[error("Worker task failed: {0}")]
    Task(String),
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Seeds a Regulation node before the first fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSeed {
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<RootSeed>,
}

impl DocumentMeta {
    #[must_use]
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdiction = Some(jurisdiction.into());
        self
    }

    #[must_use]
    pub fn with_created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = Some(created_by.into());
        self
    }

    #[must_use]
    pub fn with_root(mut self, root: RootSeed) -> Self {
        self.root = Some(root);
        self
    }

    /// Fills fields this document left unset.
    #[must_use]
    pub fn with_defaults(mut self, defaults: &DocumentDefaults) -> Self {
        if self.jurisdiction.is_none() {
            self.jurisdiction.clone_from(&defaults.jurisdiction);
        }
        if self.created_by.is_none() {
            self.created_by.clone_from(&defaults.created_by);
        }
        if self.root.is_none() {
            self.root.clone_from(&defaults.root);
        }
        self
    }

    /// Adds the document provenance properties a node does not already carry.
    pub fn stamp(&self, node: &mut Node) {
        let fields = [
            ("document_id", Some(&self.document_id)),
            ("jurisdiction", self.jurisdiction.as_ref()),
            ("created_by", self.created_by.as_ref()),
        ];
        for (name, value) in fields {
            if let Some(value) = value {
                if !node.has_property(name) {
                    node.properties
                        .insert(name.to_string(), value.clone().into());
                }
            }
        }
    }
}

/// One input document: its fragments in reading order.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub meta: DocumentMeta,
    pub fragments: Vec<Fragment>,
}

impl SourceDocument {
    #[must_use]
    pub fn new(meta: DocumentMeta, fragments: Vec<Fragment>) -> Self {
        Self { meta, fragments }
    }

    /// Loads a JSON Lines fragment file. The document id is the file stem.
    pub async fn load(path: &Path) -> IngestResult<Self> {
        let bytes = tokio::fs::read(path).await?;
        let fragments = read_fragments(bytes.as_slice())?;
        Ok(Self::new(DocumentMeta::new(document_id_for(path)), fragments))
    }
}

#[must_use]
pub fn document_id_for(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map_or_else(|| path.to_string_lossy().to_string(), String::from)
}

#[derive(Clone)]
pub struct IngestPipeline {
    store: Arc<dyn GraphStore>,
    schema: Arc<SchemaRegistry>,
    classifier: FragmentClassifier,
    resolver: Arc<ReferenceResolver>,
    writer: GraphWriter,
    extractor: Option<Arc<dyn Extractor>>,
    cancel: CancellationToken,
    defaults: DocumentDefaults,
    concurrency: ConcurrencyConfig,
    replace: bool,
    resolve_references: bool,
}

impl IngestPipeline {
    /// Default regulation schema, the built-in grammar and the standard citations.
    pub fn new(store: Arc<dyn GraphStore>) -> crate::Result<Self> {
        Self::from_config(store, &IngestConfig::default())
    }

    pub fn from_config(store: Arc<dyn GraphStore>, config: &IngestConfig) -> crate::Result<Self> {
        let grammar: NumberingGrammar = config.numbering_grammar()?;
        let cancel = CancellationToken::new();
        Ok(Self {
            writer: config
                .graph_writer(Arc::clone(&store))
                .with_cancellation(cancel.clone()),
            store,
            schema: Arc::new(config.schema_registry()),
            classifier: FragmentClassifier::new(Arc::new(grammar)),
            resolver: Arc::new(config.reference_resolver()?),
            extractor: None,
            cancel,
            defaults: config.document.clone(),
            concurrency: config.concurrency.clone(),
            replace: false,
            resolve_references: true,
        })
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.writer = self.writer.with_cancellation(cancel.clone());
        self.cancel = cancel;
        self
    }

    /// Clear each document's previous graph before ingesting it.
    #[must_use]
    pub fn with_replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    #[must_use]
    pub fn with_references(mut self, resolve: bool) -> Self {
        self.resolve_references = resolve;
        self
    }

    #[must_use]
    pub fn with_document_concurrency(mut self, documents: usize) -> Self {
        self.concurrency.documents = documents.max(1);
        self
    }

    #[must_use]
    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ingests one document. Always returns a report; document-level failures
    /// are recorded in `aborted`.
    pub async fn ingest_document(&self, document: SourceDocument) -> RunReport {
        let meta = document.meta.with_defaults(&self.defaults);
        let document_id = meta.document_id.clone();
        tracing::info!(
            document = %document_id,
            fragments = document.fragments.len(),
            "ingesting document"
        );

        if let Err(e) = self.prepare(&document_id).await {
            let mut report = RunReport::new(document_id);
            report.abort(e.to_string());
            return report;
        }

        let classified = self.classify_all(document.fragments).await;

        let stamp = meta.clone();
        let cancel = self.cancel.clone();
        let pass =
            tokio::task::spawn_blocking(move || run_structural_pass(meta, classified, &cancel))
                .await;
        let output = match pass {
            Ok(output) => output,
            Err(e) => {
                let mut report = RunReport::new(document_id);
                report.abort(IngestError::Task(e.to_string()).to_string());
                return report;
            }
        };
        let mut report = output.report;
        let mut canonicalizer = output.canonicalizer;
        let mut edges = output.edges;

        if report.cancelled || self.cancel.is_cancelled() {
            report.cancelled = true;
            report.finish();
            return report;
        }

        if let Some(extractor) = &self.extractor {
            let extracted = self
                .extract_entities(extractor.as_ref(), &stamp, &mut canonicalizer, &mut report)
                .await;
            edges.extend(extracted);
            if report.cancelled {
                report.finish();
                return report;
            }
        }

        let (nodes, edges) = self.validate(canonicalizer.into_nodes(), edges, &mut report);
        let outcome = self.writer.write(&document_id, &nodes, &edges).await;
        record_write(&mut report, &outcome);
        report.structure_write = outcome.report;
        if report.structure_write.cancelled {
            report.cancelled = true;
        }

        if self.resolve_references && !report.cancelled {
            if let Err(e) = self.resolve_into(&mut report).await {
                tracing::error!(document = %document_id, "reference pass failed: {e}");
                report.record(ErrorKind::WriteFatal, None, None, e.to_string());
            }
        }

        report.finish();
        tracing::info!(
            document = %document_id,
            nodes_created = report.nodes_created,
            nodes_reused = report.nodes_reused,
            edges_created = report.edges_created,
            references = report.references_resolved,
            failures = report.failures.len(),
            "document ingested"
        );
        report
    }

    /// Ingests documents concurrently, bounded by the configured document limit.
    /// Reports come back in input order.
    pub async fn ingest_documents(&self, documents: Vec<SourceDocument>) -> Vec<RunReport> {
        let ids: Vec<String> = documents
            .iter()
            .map(|d| d.meta.document_id.clone())
            .collect();
        let semaphore = Arc::new(Semaphore::new(self.concurrency.documents.max(1)));
        let mut tasks = JoinSet::new();

        for (index, document) in documents.into_iter().enumerate() {
            let pipeline = self.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    let mut report = RunReport::new(document.meta.document_id);
                    report.abort("document queue closed");
                    return (index, report);
                };
                (index, pipeline.ingest_document(document).await)
            });
        }

        let mut reports: Vec<Option<RunReport>> = ids.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, report)) => reports[index] = Some(report),
                Err(e) => tracing::error!("document task failed: {e}"),
            }
        }

        reports
            .into_iter()
            .zip(ids)
            .map(|(report, id)| {
                report.unwrap_or_else(|| {
                    let mut report = RunReport::new(id);
                    report.abort(IngestError::Task("task panicked".into()).to_string());
                    report
                })
            })
            .collect()
    }

    /// Loads and ingests files. A file that cannot be read or parsed yields an
    /// aborted report and does not stop the others.
    pub async fn ingest_paths(&self, paths: &[PathBuf]) -> Vec<RunReport> {
        let mut reports: Vec<Option<RunReport>> = paths.iter().map(|_| None).collect();
        let mut loaded = Vec::new();
        let mut positions = Vec::new();

        for (index, path) in paths.iter().enumerate() {
            match SourceDocument::load(path).await {
                Ok(document) => {
                    loaded.push(document);
                    positions.push(index);
                }
                Err(e) => {
                    let mut report = RunReport::new(document_id_for(path));
                    report.abort(format!("{}: {e}", path.display()));
                    reports[index] = Some(report);
                }
            }
        }

        for (index, report) in positions.into_iter().zip(self.ingest_documents(loaded).await) {
            reports[index] = Some(report);
        }
        reports.into_iter().flatten().collect()
    }

    /// Runs only the reference pass over a document already in the store.
    pub async fn resolve_document(&self, document_id: &str) -> IngestResult<RunReport> {
        if self.cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        let mut report = RunReport::new(document_id);
        self.resolve_into(&mut report).await?;
        report.finish();
        Ok(report)
    }

    /// Fails when the store is unreachable, before anything is written.
    async fn prepare(&self, document_id: &str) -> IngestResult<()> {
        self.store.stats(Some(document_id)).await?;
        if self.replace {
            let removed = self.store.clear_document(document_id).await?;
            tracing::info!(document = document_id, removed, "replacing document");
        }
        Ok(())
    }

    async fn classify_all(&self, fragments: Vec<Fragment>) -> Vec<(Fragment, Classification)> {
        let mut classified = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let mut classification = self.classifier.classify_detailed(&fragment);
            let fallback = match (&classification, &self.extractor) {
                (Classification::Ambiguous { enabled }, Some(extractor)) => {
                    Some((enabled.clone(), Arc::clone(extractor)))
                }
                _ => None,
            };
            if let Some((enabled, extractor)) = fallback {
                match extractor.classify_fragment(&fragment, &enabled).await {
                    Ok(Some(proposal)) => match self.classifier.accept_proposal(&fragment, proposal) {
                        Ok(accepted) => classification = Classification::Structural(accepted),
                        Err(reason) => tracing::debug!(
                            extractor = extractor.name(),
                            locator = %fragment.locator,
                            "rejected classification proposal: {reason}"
                        ),
                    },
                    Ok(None) => {}
                    Err(e) => tracing::warn!(
                        extractor = extractor.name(),
                        locator = %fragment.locator,
                        "classification fallback failed: {e}"
                    ),
                }
            }
            classified.push((fragment, classification));
        }
        classified
    }

    async fn extract_entities(
        &self,
        extractor: &dyn Extractor,
        meta: &DocumentMeta,
        canonicalizer: &mut Canonicalizer,
        report: &mut RunReport,
    ) -> Vec<Edge> {
        let chunks: Vec<(NodeId, String)> = canonicalizer
            .nodes()
            .iter()
            .filter_map(|node| Some((node.id.clone(), node.text.clone()?)))
            .collect();
        let mut edges = Vec::new();

        for (source, text) in chunks {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let graph = match extractor.extract_entities(&text).await {
                Ok(graph) if graph.is_empty() => continue,
                Ok(graph) => graph,
                Err(e) => {
                    tracing::warn!(source = %source, extractor = extractor.name(), "extraction failed: {e}");
                    continue;
                }
            };

            let (valid, rejections) = validate_extraction(graph, &self.schema);
            for rejection in rejections {
                report.record(
                    ErrorKind::SchemaViolation,
                    None,
                    Some(rejection.item),
                    format!("{} (chunk of {source})", rejection.reason),
                );
            }

            let outcome = canonicalizer.canonicalize_chunk(valid);
            for node in &outcome.nodes {
                report.count_node(None, node.created);
                if node.created {
                    report.entities_extracted += 1;
                    if let Some(entity) = canonicalizer.get_mut(&node.id) {
                        meta.stamp(entity);
                    }
                }
            }
            for rejection in outcome.rejected {
                report.record(
                    ErrorKind::SchemaViolation,
                    None,
                    Some(rejection.item),
                    rejection.reason,
                );
            }
            edges.extend(outcome.edges);
        }

        edges
    }

    /// Drops nodes and edges the schema rejects, and edges left without an endpoint.
    fn validate(
        &self,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        report: &mut RunReport,
    ) -> (Vec<Node>, Vec<Edge>) {
        let mut labels: HashMap<NodeId, String> = HashMap::new();
        let mut rejected: HashSet<NodeId> = HashSet::new();
        let mut valid_nodes = Vec::with_capacity(nodes.len());

        for node in nodes {
            match self.schema.validate_node(&node) {
                Ok(()) => {
                    labels.insert(node.id.clone(), node.label().to_string());
                    valid_nodes.push(node);
                }
                Err(e) => {
                    report.record(
                        ErrorKind::SchemaViolation,
                        None,
                        Some(node.identity_key().to_string()),
                        e.to_string(),
                    );
                    rejected.insert(node.id);
                }
            }
        }

        let mut valid_edges = Vec::with_capacity(edges.len());
        for edge in edges {
            let item = format!("{}-[{}]->{}", edge.source, edge.edge_type, edge.target);
            let (Some(source_label), Some(target_label)) =
                (labels.get(&edge.source), labels.get(&edge.target))
            else {
                let missing = if rejected.contains(&edge.source) || rejected.contains(&edge.target) {
                    "endpoint was rejected"
                } else {
                    "endpoint is not a node of this document"
                };
                report.record(ErrorKind::SchemaViolation, None, Some(item), missing);
                continue;
            };
            match self.schema.validate_edge(&edge, source_label, target_label) {
                Ok(()) => valid_edges.push(edge),
                Err(e) => report.record(ErrorKind::SchemaViolation, None, Some(item), e.to_string()),
            }
        }

        (valid_nodes, valid_edges)
    }

    /// Reads the document back from the store, resolves citations and writes the
    /// reference edges.
    async fn resolve_into(&self, report: &mut RunReport) -> IngestResult<()> {
        let document_id = report.document_id.clone();
        let records = self
            .store
            .query(&NodeQuery::new().document(document_id.as_str()))
            .await?;
        let texts: Vec<NodeText> = records
            .iter()
            .map(|record| NodeText::from_node(&record.node))
            .collect();

        let resolution = self
            .resolver
            .resolve_parallel(
                texts,
                self.concurrency.resolver_workers,
                self.concurrency.resolver_shard_size,
            )
            .await?;

        for unresolved in &resolution.unresolved {
            report.record(
                ErrorKind::UnresolvedReference,
                None,
                Some(unresolved.source.to_string()),
                format!("no target for {}", unresolved.citation),
            );
        }
        report.unresolved_references = resolution.unresolved.len();
        report.unresolved = resolution.unresolved;

        let outcome = self.writer.write(&document_id, &[], &resolution.edges).await;
        record_write(report, &outcome);
        report.references_resolved = outcome.report.written();
        report.reference_write = outcome.report;
        if report.reference_write.cancelled {
            report.cancelled = true;
        }

        tracing::info!(
            document = %document_id,
            citations = resolution.matched,
            resolved = report.references_resolved,
            unresolved = report.unresolved_references,
            "reference pass finished"
        );
        Ok(())
    }
}

fn record_write(report: &mut RunReport, outcome: &WriteOutcome) {
    for failure in &outcome.failures {
        report.failures.push(crate::report::FailureEntry {
            locator: None,
            item: Some(failure.item.clone()),
            kind: failure.kind,
            detail: failure.reason.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::extractor::RecordedExtractor;
    use crate::ingest::classifier::ClassifiedFragment;
    use crate::level::LevelKind;
    use crate::schema::PropertyDef;
    use crate::storage::SqliteGraphStore;
    use crate::writer::tests::FlakyStore;

    async fn pipeline() -> (Arc<SqliteGraphStore>, IngestPipeline) {
        let store = Arc::new(SqliteGraphStore::open_memory().await.unwrap());
        let pipeline = IngestPipeline::new(store.clone()).unwrap();
        (store, pipeline)
    }

    fn document(id: &str, fragments: &[(&str, Option<&str>)]) -> SourceDocument {
        SourceDocument::new(
            DocumentMeta::new(id),
            fragments
                .iter()
                .map(|(text, tag)| {
                    let fragment = Fragment::new(*text);
                    match tag {
                        Some(tag) => fragment.with_tag(*tag),
                        None => fragment,
                    }
                })
                .collect(),
        )
    }

    #[test]
    fn test_stamp_keeps_existing_values() {
        let meta = DocumentMeta::new("obc").with_jurisdiction("Ontario");
        let mut node = Node::structural(LevelKind::Part, "9").with_property("jurisdiction", "Canada");
        meta.stamp(&mut node);
        assert_eq!(node.properties["jurisdiction"], "Canada");
        assert_eq!(node.properties["document_id"], "obc");
        assert!(!node.properties.contains_key("created_by"));
    }

    #[test]
    fn test_document_id_from_file_stem() {
        assert_eq!(document_id_for(Path::new("/data/obc-part9.jsonl")), "obc-part9");
    }

    #[tokio::test]
    async fn test_orphans_and_ambiguity_do_not_abort() {
        let (store, pipeline) = pipeline().await;
        let report = pipeline
            .ingest_document(document(
                "doc",
                &[
                    ("preamble text", None),
                    ("Part 9 Housing", Some("part")),
                    ("not a clause", Some("clause")),
                ],
            ))
            .await;

        assert!(!report.is_aborted());
        assert_eq!(report.count(ErrorKind::OrphanFragment), 1);
        assert_eq!(report.count(ErrorKind::ClassificationAmbiguous), 1);
        assert_eq!(store.stats(Some("doc")).await.unwrap().nodes, 1);
    }

    #[tokio::test]
    async fn test_extractor_fallback_classifies_ambiguous_fragment() {
        let (store, pipeline) = pipeline().await;
        let extractor = RecordedExtractor::new().with_fragment(
            "Application of this Part",
            ClassifiedFragment {
                level: LevelKind::Article,
                number: "9.1.1.1".into(),
                qualifier: None,
                title: Some("Application of this Part".into()),
                text: None,
            },
        );
        let pipeline = pipeline.with_extractor(Arc::new(extractor));

        let report = pipeline
            .ingest_document(document(
                "doc",
                &[
                    ("Part 9 Housing", Some("part")),
                    ("Application of this Part", Some("article")),
                ],
            ))
            .await;

        assert_eq!(report.count(ErrorKind::ClassificationAmbiguous), 0);
        let articles = store
            .query(&NodeQuery::new().label("Article"))
            .await
            .unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].node.number.as_deref(), Some("9.1.1.1"));
    }

    #[tokio::test]
    async fn test_entities_extracted_and_validated() {
        let store = Arc::new(SqliteGraphStore::open_memory().await.unwrap());
        let mut config = IngestConfig::default();
        let mut schema = crate::schema::SchemaConfig::default();
        schema.nodes.push(crate::schema::NodeTypeDef {
            label: "Organization".into(),
            description: String::new(),
            properties: vec![PropertyDef::required("name", crate::schema::PropertyKind::String)],
        });
        config.schema = Some(schema);

        let extractor = RecordedExtractor::new().with_chunk(
            "the owner shall install guards",
            r#"{"nodes": [{"id": "n1", "label": "Organization", "name": "Owner"},
                          {"id": "n2", "label": "Planet", "name": "Mars"}],
                "relationships": []}"#,
        );
        let pipeline = IngestPipeline::from_config(store.clone(), &config)
            .unwrap()
            .with_extractor(Arc::new(extractor));

        let report = pipeline
            .ingest_document(document(
                "doc",
                &[
                    ("9.8.8.1. Guards", Some("article")),
                    ("(1) the owner shall install guards", Some("sentence")),
                ],
            ))
            .await;

        assert_eq!(report.entities_extracted, 1);
        assert_eq!(report.count(ErrorKind::SchemaViolation), 1);
        let owners = store
            .query(&NodeQuery::new().label("Organization"))
            .await
            .unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].node.properties["document_id"], "doc");
    }

    #[tokio::test]
    async fn test_replace_clears_previous_graph() {
        let (store, pipeline) = pipeline().await;
        pipeline
            .ingest_document(document(
                "doc",
                &[("Part 9 Housing", Some("part")), ("9.1. Scope", Some("section"))],
            ))
            .await;

        let pipeline = pipeline.with_replace(true);
        let report = pipeline
            .ingest_document(document("doc", &[("Part 10 Change of Use", Some("part"))]))
            .await;

        assert_eq!(report.structure_write.created, 1);
        let stats = store.stats(Some("doc")).await.unwrap();
        assert_eq!(stats.nodes, 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_writes_nothing() {
        let (store, pipeline) = pipeline().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pipeline = pipeline.with_cancellation(cancel);

        let report = pipeline
            .ingest_document(document("doc", &[("Part 9 Housing", Some("part"))]))
            .await;

        assert!(report.cancelled);
        assert!(report.finished_at.is_some());
        assert_eq!(store.stats(None).await.unwrap().nodes, 0);
        assert!(matches!(
            pipeline.resolve_document("doc").await,
            Err(IngestError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_documents_report_in_input_order() {
        let store = Arc::new(FlakyStore::default());
        let pipeline = IngestPipeline::new(store)
            .unwrap()
            .with_references(false)
            .with_document_concurrency(2);
        let documents = (0..5)
            .map(|i| document(&format!("doc-{i}"), &[("Part 9 Housing", Some("part"))]))
            .collect();

        let reports = pipeline.ingest_documents(documents).await;
        let ids: Vec<&str> = reports.iter().map(|r| r.document_id.as_str()).collect();
        assert_eq!(ids, vec!["doc-0", "doc-1", "doc-2", "doc-3", "doc-4"]);
        assert!(reports.iter().all(|r| r.structure_write.created == 1));
    }

    #[tokio::test]
    async fn test_unreadable_file_aborts_only_itself() {
        let dir = tempfile::TempDir::new().unwrap();
        let good = dir.path().join("good.jsonl");
        let bad = dir.path().join("bad.jsonl");
        std::fs::write(&good, "{\"text\": \"Part 9 Housing\", \"tag\": \"part\"}\n").unwrap();
        std::fs::write(&bad, "{\"text\": \"Part 9\"}\n{not json\n").unwrap();

        let (_store, pipeline) = pipeline().await;
        let reports = pipeline
            .ingest_paths(&[bad.clone(), good.clone(), dir.path().join("missing.jsonl")])
            .await;

        assert_eq!(reports.len(), 3);
        assert!(reports[0].is_aborted());
        assert!(reports[0].aborted.as_deref().unwrap().contains("line 2"));
        assert!(!reports[1].is_aborted());
        assert_eq!(reports[1].document_id, "good");
        assert!(reports[2].is_aborted());
    }
}

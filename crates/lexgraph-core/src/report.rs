use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingest::SourceLocator;
use crate::level::LevelKind;
use crate::node::NodeId;
use crate::reference::UnresolvedReference;
use crate::writer::WriteReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ClassificationAmbiguous,
    OrphanFragment,
    SchemaViolation,
    UnresolvedReference,
    WriteTransient,
    WriteFatal,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ClassificationAmbiguous => "classification_ambiguous",
            Self::OrphanFragment => "orphan_fragment",
            Self::SchemaViolation => "schema_violation",
            Self::UnresolvedReference => "unresolved_reference",
            Self::WriteTransient => "write_transient",
            Self::WriteFatal => "write_fatal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dropped or failed fragment, node or edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<SourceLocator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    pub kind: ErrorKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCounts {
    pub created: usize,
    pub reused: usize,
}

/// A structural node with no open ancestor when it was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootEntry {
    pub id: NodeId,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<SourceLocator>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub document_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub fragments: usize,
    pub nodes_created: usize,
    pub nodes_reused: usize,
    pub edges_created: usize,
    pub edges_reused: usize,
    pub per_level: BTreeMap<LevelKind, LevelCounts>,
    pub entities_extracted: usize,
    pub roots: Vec<RootEntry>,
    pub references_resolved: usize,
    pub unresolved_references: usize,
    pub unresolved: Vec<UnresolvedReference>,
    pub structure_write: WriteReport,
    pub reference_write: WriteReport,
    pub failures: Vec<FailureEntry>,
    pub cancelled: bool,
    /// Set when the document could not be processed at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl RunReport {
    #[must_use]
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            document_id: document_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            fragments: 0,
            nodes_created: 0,
            nodes_reused: 0,
            edges_created: 0,
            edges_reused: 0,
            per_level: BTreeMap::new(),
            entities_extracted: 0,
            roots: Vec::new(),
            references_resolved: 0,
            unresolved_references: 0,
            unresolved: Vec::new(),
            structure_write: WriteReport::default(),
            reference_write: WriteReport::default(),
            failures: Vec::new(),
            cancelled: false,
            aborted: None,
        }
    }

    pub fn record(
        &mut self,
        kind: ErrorKind,
        locator: Option<SourceLocator>,
        item: Option<String>,
        detail: impl Into<String>,
    ) {
        let detail = detail.into();
        tracing::warn!(
            document = %self.document_id,
            kind = %kind,
            item = item.as_deref().unwrap_or_default(),
            "{detail}"
        );
        self.failures.push(FailureEntry {
            locator,
            item,
            kind,
            detail,
        });
    }

    pub fn count_node(&mut self, level: Option<LevelKind>, created: bool) {
        if created {
            self.nodes_created += 1;
        } else {
            self.nodes_reused += 1;
        }
        if let Some(level) = level {
            let counts = self.per_level.entry(level).or_default();
            if created {
                counts.created += 1;
            } else {
                counts.reused += 1;
            }
        }
    }

    pub fn abort(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!(document = %self.document_id, "document aborted: {reason}");
        self.aborted = Some(reason);
        self.finish();
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    #[must_use]
    pub fn count(&self, kind: ErrorKind) -> usize {
        self.failures.iter().filter(|f| f.kind == kind).count()
    }

    #[must_use]
    pub fn failures_by_kind(&self) -> BTreeMap<ErrorKind, usize> {
        let mut counts = BTreeMap::new();
        for failure in &self.failures {
            *counts.entry(failure.kind).or_default() += 1;
        }
        counts
    }

    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Document: {} (run {})", self.document_id, self.run_id)?;
        if let Some(reason) = &self.aborted {
            return writeln!(f, "  aborted: {reason}");
        }
        writeln!(f, "  fragments: {}", self.fragments)?;
        writeln!(
            f,
            "  nodes: {} created, {} reused; containment edges: {} created, {} reused",
            self.nodes_created, self.nodes_reused, self.edges_created, self.edges_reused
        )?;
        for (level, counts) in &self.per_level {
            writeln!(f, "    {level}: {} created, {} reused", counts.created, counts.reused)?;
        }
        if self.entities_extracted > 0 {
            writeln!(f, "  entities extracted: {}", self.entities_extracted)?;
        }
        if !self.roots.is_empty() {
            writeln!(f, "  roots: {}", self.roots.len())?;
        }
        writeln!(
            f,
            "  references: {} resolved, {} unresolved",
            self.references_resolved, self.unresolved_references
        )?;
        writeln!(f, "  structure write: {}", self.structure_write)?;
        writeln!(f, "  reference write: {}", self.reference_write)?;
        for (kind, count) in self.failures_by_kind() {
            writeln!(f, "  {kind}: {count}")?;
        }
        if self.cancelled {
            writeln!(f, "  cancelled before completion")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_count() {
        let mut report = RunReport::new("obc-part9");
        report.record(ErrorKind::OrphanFragment, None, None, "no open node");
        report.record(
            ErrorKind::SchemaViolation,
            Some(SourceLocator::default()),
            Some("Planet:x".into()),
            "Unknown type: Planet",
        );
        report.record(ErrorKind::OrphanFragment, None, None, "no open node");

        assert_eq!(report.count(ErrorKind::OrphanFragment), 2);
        assert_eq!(report.failures_by_kind()[&ErrorKind::SchemaViolation], 1);
    }

    #[test]
    fn test_per_level_counts() {
        let mut report = RunReport::new("doc");
        report.count_node(Some(LevelKind::Part), true);
        report.count_node(Some(LevelKind::Part), false);
        report.count_node(None, true);

        assert_eq!(report.nodes_created, 2);
        assert_eq!(report.nodes_reused, 1);
        assert_eq!(
            report.per_level[&LevelKind::Part],
            LevelCounts {
                created: 1,
                reused: 1
            }
        );
    }

    #[test]
    fn test_report_serializes_error_kinds() {
        let mut report = RunReport::new("doc");
        report.record(ErrorKind::WriteTransient, None, None, "database is locked");
        report.abort("malformed input at line 3");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["failures"][0]["kind"], "write_transient");
        assert_eq!(json["aborted"], "malformed input at line 3");
        assert!(report.to_string().contains("aborted"));
    }
}

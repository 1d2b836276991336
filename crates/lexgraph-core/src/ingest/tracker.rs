//! Stack-based reconstruction of document nesting from a flat fragment stream.

use std::collections::{HashMap, HashSet};

use tokio_util::sync::CancellationToken;

use super::canonical::Canonicalizer;
use super::classifier::{Classification, ClassifiedFragment};
use super::fragment::Fragment;
use super::pipeline::DocumentMeta;
use crate::edge::{Edge, EdgeKey};
use crate::level::LevelKind;
use crate::node::{Node, NodeId};
use crate::report::{ErrorKind, RootEntry, RunReport};

/// The open node at each level. Owned by one structural pass of one document.
#[derive(Debug, Default)]
pub struct ParseContext {
    slots: [Option<NodeId>; LevelKind::COUNT],
}

impl ParseContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Closes every node strictly deeper than `level`.
    pub fn clear_deeper(&mut self, level: LevelKind) {
        for slot in &mut self.slots[level.depth() + 1..] {
            *slot = None;
        }
    }

    pub fn set(&mut self, level: LevelKind, id: NodeId) {
        self.slots[level.depth()] = Some(id);
    }

    #[must_use]
    pub fn get(&self, level: LevelKind) -> Option<&NodeId> {
        self.slots[level.depth()].as_ref()
    }

    /// Nearest open node strictly shallower than `level`.
    #[must_use]
    pub fn nearest_open_above(&self, level: LevelKind) -> Option<&NodeId> {
        level.ancestors().find_map(|ancestor| self.get(ancestor))
    }

    /// The open node at the deepest level.
    #[must_use]
    pub fn deepest_open(&self) -> Option<&NodeId> {
        self.slots.iter().rev().find_map(Option::as_ref)
    }
}

/// Everything the structural pass produced for one document.
#[derive(Debug)]
pub struct StructuralOutput {
    pub canonicalizer: Canonicalizer,
    pub edges: Vec<Edge>,
    pub report: RunReport,
}

pub struct HierarchyTracker {
    context: ParseContext,
    canonicalizer: Canonicalizer,
    meta: DocumentMeta,
    edges: Vec<Edge>,
    edge_keys: HashSet<EdgeKey>,
    parents: HashMap<NodeId, NodeId>,
    report: RunReport,
}

impl HierarchyTracker {
    /// Starts a pass with an empty context. A root seed in `meta` opens the
    /// Regulation slot before the first fragment.
    #[must_use]
    pub fn new(meta: DocumentMeta) -> Self {
        let mut tracker = Self {
            context: ParseContext::new(),
            canonicalizer: Canonicalizer::new(),
            report: RunReport::new(meta.document_id.clone()),
            meta,
            edges: Vec::new(),
            edge_keys: HashSet::new(),
            parents: HashMap::new(),
        };

        if let Some(root) = tracker.meta.root.clone() {
            let node = Node::structural(LevelKind::Regulation, root.number).with_title(root.title);
            tracker.open(node, None);
        }

        tracker
    }

    pub fn accept(&mut self, fragment: &Fragment, classification: Classification) {
        self.report.fragments += 1;
        match classification {
            Classification::Structural(classified) => self.open_classified(fragment, classified),
            Classification::Continuation => self.continue_text(fragment),
            Classification::Ambiguous { enabled } => {
                let levels: Vec<&str> = enabled.iter().map(LevelKind::as_str).collect();
                self.report.record(
                    ErrorKind::ClassificationAmbiguous,
                    Some(fragment.locator.clone()),
                    None,
                    format!(
                        "tag '{}' enables [{}] but no pattern matched '{}'",
                        fragment.tag.as_deref().unwrap_or_default(),
                        levels.join(", "),
                        preview(&fragment.text)
                    ),
                );
                self.continue_text(fragment);
            }
        }
    }

    fn open_classified(&mut self, fragment: &Fragment, classified: ClassifiedFragment) {
        let level = classified.level;
        self.context.clear_deeper(level);

        let number = match &classified.qualifier {
            Some(qualifier) => {
                let parent_number = self
                    .context
                    .nearest_open_above(level)
                    .and_then(|id| self.canonicalizer.get(id))
                    .and_then(|node| node.number.as_deref());
                qualifier.qualify(parent_number, &classified.number)
            }
            None => classified.number,
        };

        let node = Node::structural(level, number)
            .with_title(classified.title)
            .with_text(classified.text);
        self.open(node, Some(fragment));
    }

    fn open(&mut self, mut node: Node, fragment: Option<&Fragment>) {
        let Some(level) = node.level() else {
            return;
        };
        self.meta.stamp(&mut node);

        let outcome = self.canonicalizer.canonicalize(node, None);
        self.report.count_node(Some(level), outcome.created);
        tracing::debug!(
            document = %self.meta.document_id,
            id = %outcome.id,
            level = %level,
            created = outcome.created,
            "structural node"
        );

        match self.context.nearest_open_above(level).cloned() {
            Some(parent) => self.attach(parent, outcome.id.clone(), fragment),
            None if outcome.created => self.report.roots.push(RootEntry {
                id: outcome.id.clone(),
                label: level.label().to_string(),
                locator: fragment.map(|f| f.locator.clone()),
            }),
            None => {}
        }

        self.context.set(level, outcome.id);
    }

    fn attach(&mut self, parent: NodeId, child: NodeId, fragment: Option<&Fragment>) {
        if let Some(existing) = self.parents.get(&child) {
            if *existing == parent {
                self.report.edges_reused += 1;
            } else {
                tracing::debug!(
                    child = %child,
                    kept = %existing,
                    ignored = %parent,
                    "node already has a containment parent"
                );
            }
            return;
        }

        match Edge::contains(parent.clone(), child.clone()) {
            Ok(edge) => {
                if self.edge_keys.insert(edge.key()) {
                    self.parents.insert(child, parent);
                    self.edges.push(edge);
                    self.report.edges_created += 1;
                }
            }
            Err(e) => self.report.record(
                ErrorKind::SchemaViolation,
                fragment.map(|f| f.locator.clone()),
                Some(child.to_string()),
                e.to_string(),
            ),
        }
    }

    fn continue_text(&mut self, fragment: &Fragment) {
        let target = self
            .context
            .deepest_open()
            .cloned()
            .and_then(|id| self.canonicalizer.get_mut(&id));
        match target {
            Some(node) => node.append_text(&fragment.text),
            None => self.report.record(
                ErrorKind::OrphanFragment,
                Some(fragment.locator.clone()),
                None,
                format!("no open node for '{}'", preview(&fragment.text)),
            ),
        }
    }

    #[must_use]
    pub fn finish(self) -> StructuralOutput {
        StructuralOutput {
            canonicalizer: self.canonicalizer,
            edges: self.edges,
            report: self.report,
        }
    }
}

/// Runs the structural pass over an already classified stream, stopping early if
/// `cancel` fires between fragments.
pub fn run_structural_pass(
    meta: DocumentMeta,
    classified: Vec<(Fragment, Classification)>,
    cancel: &CancellationToken,
) -> StructuralOutput {
    let mut tracker = HierarchyTracker::new(meta);
    for (fragment, classification) in classified {
        if cancel.is_cancelled() {
            tracker.report.cancelled = true;
            tracing::info!(
                document = %tracker.meta.document_id,
                processed = tracker.report.fragments,
                "structural pass cancelled"
            );
            break;
        }
        tracker.accept(&fragment, classification);
    }
    tracker.finish()
}

fn preview(text: &str) -> String {
    const MAX: usize = 60;
    let text = text.trim();
    match text.char_indices().nth(MAX) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::grammar::NumberingGrammar;
    use crate::ingest::classifier::FragmentClassifier;
    use crate::ingest::pipeline::RootSeed;

    fn run(fragments: &[(&str, Option<&str>)]) -> StructuralOutput {
        run_with(DocumentMeta::new("test"), fragments)
    }

    fn run_with(meta: DocumentMeta, fragments: &[(&str, Option<&str>)]) -> StructuralOutput {
        let classifier =
            FragmentClassifier::new(Arc::new(NumberingGrammar::ontario_building_code().unwrap()));
        let classified = fragments
            .iter()
            .map(|(text, tag)| {
                let mut fragment = Fragment::new(*text);
                fragment.tag = tag.map(String::from);
                let classification = classifier.classify_detailed(&fragment);
                (fragment, classification)
            })
            .collect();
        run_structural_pass(meta, classified, &CancellationToken::new())
    }

    fn find<'a>(output: &'a StructuralOutput, label: &str, number: &str) -> &'a Node {
        output
            .canonicalizer
            .nodes()
            .iter()
            .find(|n| n.label() == label && n.number.as_deref() == Some(number))
            .unwrap()
    }

    fn has_edge(output: &StructuralOutput, parent: &Node, child: &Node) -> bool {
        output
            .edges
            .iter()
            .any(|e| e.source == parent.id && e.target == child.id)
    }

    #[test]
    fn test_stack_clearing() {
        let output = run(&[
            ("Part 9 Housing", Some("part")),
            ("9.1. Scope", Some("section")),
            ("9.2. Definitions", Some("section")),
        ]);

        let part = find(&output, "Part", "9");
        let first = find(&output, "Section", "9.1");
        let second = find(&output, "Section", "9.2");
        assert!(has_edge(&output, part, first));
        assert!(has_edge(&output, part, second));
        assert!(!has_edge(&output, first, second));
        assert!(!has_edge(&output, second, first));
        assert_eq!(output.edges.len(), 2);
    }

    #[test]
    fn test_continuation_attaches_to_deepest_open_node() {
        let output = run(&[
            ("9.1.1.1. Application", Some("article")),
            ("(1) Foo", Some("sentence")),
            ("Bar", None),
        ]);
        let sentences: Vec<_> = output
            .canonicalizer
            .nodes()
            .iter()
            .filter(|n| n.level() == Some(LevelKind::Sentence))
            .collect();
        assert_eq!(sentences.len(), 1);
        assert_eq!(sentences[0].text.as_deref(), Some("Foo Bar"));
        assert_eq!(sentences[0].number.as_deref(), Some("9.1.1.1.(1)"));
    }

    #[test]
    fn test_relative_numbers_are_fully_qualified() {
        let output = run(&[
            ("9.1.1.1. Application", Some("article")),
            ("(1) This Section applies to", Some("sentence")),
            ("(a) houses", Some("clause")),
            ("(i) detached", Some("subclause")),
            ("(2) Second", Some("sentence")),
            ("(a) other houses", Some("clause")),
        ]);
        find(&output, "Sentence", "9.1.1.1.(1)");
        find(&output, "Clause", "9.1.1.1.(1)(a)");
        find(&output, "Clause", "9.1.1.1.(2)(a)");
        find(&output, "Subclause", "9.1.1.1.(1)(a)(i)");
        let second = find(&output, "Sentence", "9.1.1.1.(2)");
        let article = find(&output, "Article", "9.1.1.1");
        assert!(has_edge(&output, article, second));
    }

    #[test]
    fn test_skipped_levels_attach_to_nearest_ancestor() {
        let output = run(&[
            ("Part 9 Housing", Some("part")),
            ("9.1.1.1. Application", Some("article")),
        ]);
        let part = find(&output, "Part", "9");
        let article = find(&output, "Article", "9.1.1.1");
        assert!(has_edge(&output, part, article));
    }

    #[test]
    fn test_orphan_continuation_is_counted() {
        let output = run(&[("stray text", None), ("Part 9 Housing", Some("part"))]);
        assert_eq!(output.report.count(ErrorKind::OrphanFragment), 1);
        assert_eq!(output.canonicalizer.len(), 1);
        assert_eq!(output.report.roots.len(), 1);
    }

    #[test]
    fn test_orphan_failure_keeps_locator() {
        let stray = Fragment::new("stray text").with_locator(crate::ingest::SourceLocator {
            page: Some(2),
            ..Default::default()
        });
        let output = run_structural_pass(
            DocumentMeta::new("doc"),
            vec![(stray, Classification::Continuation)],
            &CancellationToken::new(),
        );
        let failure = &output.report.failures[0];
        assert_eq!(failure.kind, ErrorKind::OrphanFragment);
        assert_eq!(failure.locator.as_ref().and_then(|l| l.page), Some(2));
    }

    #[test]
    fn test_ambiguous_fragment_recorded_and_appended() {
        let output = run(&[
            ("Part 9 Housing", Some("part")),
            ("and Small Buildings", Some("clause-tag")),
        ]);
        assert_eq!(output.report.count(ErrorKind::ClassificationAmbiguous), 1);
        let part = find(&output, "Part", "9");
        assert_eq!(part.text.as_deref(), Some("and Small Buildings"));
    }

    #[test]
    fn test_revisited_number_reuses_node() {
        let output = run(&[
            ("Part 9 Housing", Some("part")),
            ("9.1. Scope", Some("section")),
            ("Part 9", Some("part")),
            ("9.1. Scope", Some("section")),
        ]);
        assert_eq!(output.canonicalizer.len(), 2);
        assert_eq!(output.edges.len(), 1);
        assert_eq!(output.report.nodes_reused, 2);
        assert_eq!(output.report.edges_reused, 1);
    }

    #[test]
    fn test_no_second_containment_parent() {
        let output = run(&[
            ("Part 9 Housing", Some("part")),
            ("9.1.1.1. Application", Some("article")),
            ("Part 10 Change of Use", Some("part")),
            ("9.1.1.1. Application", Some("article")),
        ]);
        let article = find(&output, "Article", "9.1.1.1");
        let parents = output.edges.iter().filter(|e| e.target == article.id).count();
        assert_eq!(parents, 1);
    }

    #[test]
    fn test_root_seed_and_metadata_stamp() {
        let meta = DocumentMeta::new("obc")
            .with_jurisdiction("Ontario")
            .with_created_by("obc-import")
            .with_root(RootSeed {
                number: "332/12".into(),
                title: Some("Building Code".into()),
            });
        let output = run_with(meta, &[("Part 9 Housing", Some("part"))]);
        let regulation = find(&output, "Regulation", "332/12");
        let part = find(&output, "Part", "9");
        assert!(has_edge(&output, regulation, part));
        assert_eq!(part.properties["jurisdiction"], "Ontario");
        assert_eq!(part.properties["document_id"], "obc");
        assert_eq!(part.properties["created_by"], "obc-import");
        assert_eq!(output.report.roots.len(), 1);
    }

    #[test]
    fn test_cancellation_between_fragments() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let output = run_structural_pass(
            DocumentMeta::new("doc"),
            vec![(Fragment::new("x"), Classification::Continuation)],
            &cancel,
        );
        assert!(output.report.cancelled);
        assert_eq!(output.report.fragments, 0);
    }
}

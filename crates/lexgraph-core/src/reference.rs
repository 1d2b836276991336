//! Citation detection over node text and resolution to `REFERENCES` edges.

use std::collections::{BTreeMap, HashSet};
use std::ops::Range;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::edge::Edge;
use crate::level::LevelKind;
use crate::node::{Node, NodeId};

/// Continuation of a sibling list after a citation: `, (2)`, `and (b)`, `to (4)`.
const SIBLING_PATTERN: &str =
    r"^\s*(?:(?P<range>to|through)\s+|,\s*(?:and\s+|or\s+)?|(?:and|or)\s+)\((?P<token>\d+|[a-z]{1,2})\)";

/// Upper bound on members produced by one `(n) to (m)` range.
const MAX_RANGE: usize = 50;

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("Invalid citation pattern '{name}': {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },
    #[error("Citation pattern '{0}' has no 'number' capture group")]
    MissingNumberGroup(String),
    #[error("Resolver worker failed: {0}")]
    Worker(String),
}

pub type ReferenceResult<T> = Result<T, ReferenceError>;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationConfig {
    pub name: String,
    pub pattern: String,
    /// Level the cited number names. `None` accepts a node of any level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<LevelKind>,
    /// Keyword citations shadow keyword-less ones over the same text.
    #[serde(default = "default_true")]
    pub keyword: bool,
    /// Follow `and (2)`, `, (3)` and `to (5)` after the citation.
    #[serde(default)]
    pub expand_siblings: bool,
}

impl CitationConfig {
    fn keyword(name: &str, pattern: &str, target: LevelKind, expand_siblings: bool) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            target: Some(target),
            keyword: true,
            expand_siblings,
        }
    }

    /// Citation patterns for decimal-numbered building codes.
    #[must_use]
    pub fn standard() -> Vec<Self> {
        vec![
            Self::keyword("part", r"(?i)\bParts?\s+(?P<number>\d+)\b", LevelKind::Part, false),
            Self::keyword(
                "section",
                r"(?i)\bSections?\s+(?P<number>\d+\.\d+)",
                LevelKind::Section,
                false,
            ),
            Self::keyword(
                "subsection",
                r"(?i)\bSubsections?\s+(?P<number>\d+\.\d+\.\d+)",
                LevelKind::Subsection,
                false,
            ),
            Self::keyword(
                "article",
                r"(?i)\bArticles?\s+(?P<number>\d+\.\d+\.\d+\.\d+)",
                LevelKind::Article,
                false,
            ),
            Self::keyword(
                "sentence",
                r"(?i)\bSentences?\s+(?P<number>\d+\.\d+\.\d+\.\d+\.\(\d+\))",
                LevelKind::Sentence,
                true,
            ),
            Self::keyword(
                "clause",
                r"(?i)\bClauses?\s+(?P<number>\d+\.\d+\.\d+\.\d+\.\(\d+\)\([a-z]{1,2}\))",
                LevelKind::Clause,
                true,
            ),
            Self {
                name: "bare".into(),
                pattern: r"\b(?P<number>\d+\.\d+\.\d+\.\d+\.\(\d+\)(?:\([a-z]{1,2}\))?)".into(),
                target: None,
                keyword: false,
                expand_siblings: false,
            },
        ]
    }
}

/// The text of one materialized node, as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeText {
    pub id: NodeId,
    pub label: String,
    pub number: Option<String>,
    pub text: String,
}

impl NodeText {
    /// Title and body, space-joined.
    #[must_use]
    pub fn from_node(node: &Node) -> Self {
        let text = [node.title.as_deref(), node.text.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            id: node.id.clone(),
            label: node.label().to_string(),
            number: node.number.clone(),
            text,
        }
    }
}

/// Numbered structural nodes of one document, by number.
#[derive(Debug, Default)]
pub struct KnownTargets {
    by_number: BTreeMap<String, Vec<(String, NodeId)>>,
}

impl KnownTargets {
    #[must_use]
    pub fn from_nodes(nodes: &[NodeText]) -> Self {
        let mut by_number: BTreeMap<String, Vec<(String, NodeId)>> = BTreeMap::new();
        for node in nodes {
            if LevelKind::from_label(&node.label).is_none() {
                continue;
            }
            if let Some(number) = &node.number {
                by_number
                    .entry(number.clone())
                    .or_default()
                    .push((node.label.clone(), node.id.clone()));
            }
        }
        for candidates in by_number.values_mut() {
            candidates.sort();
        }
        Self { by_number }
    }

    #[must_use]
    pub fn lookup(&self, number: &str, target: Option<LevelKind>) -> Option<&NodeId> {
        let candidates = self.by_number.get(number)?;
        match target {
            Some(level) => candidates
                .iter()
                .find(|(label, _)| label == level.label())
                .map(|(_, id)| id),
            None => candidates.first().map(|(_, id)| id),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnresolvedReference {
    pub source: NodeId,
    pub citation: String,
    pub pattern: String,
}

#[derive(Debug, Default)]
pub struct ResolutionOutput {
    pub edges: Vec<Edge>,
    pub unresolved: Vec<UnresolvedReference>,
    /// Citations found, resolved or not.
    pub matched: usize,
}

impl ResolutionOutput {
    pub fn merge(&mut self, other: Self) {
        self.edges.extend(other.edges);
        self.unresolved.extend(other.unresolved);
        self.matched += other.matched;
    }

    /// Sorts and deduplicates so output does not depend on sharding.
    pub fn finalize(&mut self) {
        self.edges.sort_by_key(Edge::key);
        self.edges.dedup_by(|a, b| a.key() == b.key());
        self.unresolved.sort();
        self.unresolved.dedup();
    }
}

#[derive(Debug)]
struct CompiledCitation {
    name: String,
    regex: Regex,
    target: Option<LevelKind>,
    keyword: bool,
    expand_siblings: bool,
}

struct Citation<'a> {
    pattern: &'a CompiledCitation,
    span: Range<usize>,
    numbers: Vec<String>,
}

#[derive(Debug)]
pub struct ReferenceResolver {
    citations: Vec<CompiledCitation>,
    sibling: Regex,
}

impl ReferenceResolver {
    pub fn new(configs: &[CitationConfig]) -> ReferenceResult<Self> {
        let citations = configs
            .iter()
            .map(|config| {
                let regex =
                    Regex::new(&config.pattern).map_err(|source| ReferenceError::InvalidPattern {
                        name: config.name.clone(),
                        source,
                    })?;
                if !regex.capture_names().any(|name| name == Some("number")) {
                    return Err(ReferenceError::MissingNumberGroup(config.name.clone()));
                }
                Ok(CompiledCitation {
                    name: config.name.clone(),
                    regex,
                    target: config.target,
                    keyword: config.keyword,
                    expand_siblings: config.expand_siblings,
                })
            })
            .collect::<ReferenceResult<Vec<_>>>()?;
        let sibling =
            Regex::new(SIBLING_PATTERN).map_err(|source| ReferenceError::InvalidPattern {
                name: "sibling".into(),
                source,
            })?;
        Ok(Self { citations, sibling })
    }

    pub fn standard() -> ReferenceResult<Self> {
        Self::new(&CitationConfig::standard())
    }

    /// Resolves every node's citations against the numbered nodes in `nodes`.
    #[must_use]
    pub fn resolve(&self, nodes: &[NodeText]) -> ResolutionOutput {
        let known = KnownTargets::from_nodes(nodes);
        let mut output = ResolutionOutput::default();
        for node in nodes {
            output.merge(self.resolve_node(node, &known));
        }
        output.finalize();
        output
    }

    /// Shards `nodes` over blocking tasks, at most `workers` at a time.
    pub async fn resolve_parallel(
        self: &Arc<Self>,
        nodes: Vec<NodeText>,
        workers: usize,
        shard_size: usize,
    ) -> ReferenceResult<ResolutionOutput> {
        let known = Arc::new(KnownTargets::from_nodes(&nodes));
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let mut tasks = JoinSet::new();

        for shard in nodes.chunks(shard_size.max(1)) {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| ReferenceError::Worker(e.to_string()))?;
            let shard = shard.to_vec();
            let resolver = Arc::clone(self);
            let known = Arc::clone(&known);
            tasks.spawn_blocking(move || {
                let _permit = permit;
                let mut output = ResolutionOutput::default();
                for node in &shard {
                    output.merge(resolver.resolve_node(node, &known));
                }
                output
            });
        }

        let mut output = ResolutionOutput::default();
        while let Some(joined) = tasks.join_next().await {
            output.merge(joined.map_err(|e| ReferenceError::Worker(e.to_string()))?);
        }
        output.finalize();

        tracing::debug!(
            nodes = nodes.len(),
            matched = output.matched,
            edges = output.edges.len(),
            unresolved = output.unresolved.len(),
            "resolved references"
        );
        Ok(output)
    }

    #[must_use]
    pub fn resolve_node(&self, node: &NodeText, known: &KnownTargets) -> ResolutionOutput {
        let mut output = ResolutionOutput::default();
        let mut seen = HashSet::new();

        for citation in self.scan(&node.text) {
            output.matched += 1;
            for number in &citation.numbers {
                let label = citation
                    .pattern
                    .target
                    .map_or_else(|| number.clone(), |level| format!("{} {number}", level.label()));
                if !seen.insert(label.clone()) {
                    continue;
                }

                match known.lookup(number, citation.pattern.target) {
                    Some(target) if *target == node.id => {}
                    Some(target) => {
                        if let Ok(edge) = Edge::references(node.id.clone(), target.clone()) {
                            output.edges.push(edge.with_property("citation", label));
                        }
                    }
                    None => {
                        tracing::debug!(source = %node.id, citation = %label, "unresolved reference");
                        output.unresolved.push(UnresolvedReference {
                            source: node.id.clone(),
                            citation: label,
                            pattern: citation.pattern.name.clone(),
                        });
                    }
                }
            }
        }

        output
    }

    fn scan<'a>(&'a self, text: &str) -> Vec<Citation<'a>> {
        let mut keyword_spans: Vec<Range<usize>> = Vec::new();
        let mut found = Vec::new();

        let ordered = self
            .citations
            .iter()
            .filter(|c| c.keyword)
            .chain(self.citations.iter().filter(|c| !c.keyword));

        for pattern in ordered {
            for captures in pattern.regex.captures_iter(text) {
                let (Some(whole), Some(number)) = (captures.get(0), captures.name("number")) else {
                    continue;
                };
                if !at_level_boundary(&text[number.end()..]) {
                    continue;
                }
                if !pattern.keyword
                    && keyword_spans
                        .iter()
                        .any(|span| span.start < whole.end() && whole.start() < span.end)
                {
                    continue;
                }

                let mut numbers = vec![number.as_str().to_string()];
                let mut end = whole.end();
                if pattern.expand_siblings {
                    end += expand_siblings(&self.sibling, &text[end..], &mut numbers);
                }
                let span = whole.start()..end;
                if pattern.keyword {
                    keyword_spans.push(span.clone());
                }
                found.push(Citation {
                    pattern,
                    span,
                    numbers,
                });
            }
        }

        found.sort_by_key(|c| c.span.start);
        found
    }
}

/// A citation may not stop in the middle of a deeper number: `9.1` inside `9.1.1`.
fn at_level_boundary(rest: &str) -> bool {
    let mut chars = rest.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => false,
        Some('.') => !chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => true,
    }
}

/// Appends the siblings listed after a citation to `numbers`, returning the bytes consumed.
fn expand_siblings(sibling: &Regex, rest: &str, numbers: &mut Vec<String>) -> usize {
    let mut consumed = 0;

    while let Some(captures) = sibling.captures(&rest[consumed..]) {
        let (Some(whole), Some(token)) = (captures.get(0), captures.name("token")) else {
            break;
        };
        let Some((base, previous)) = numbers
            .last()
            .and_then(|n| split_last_token(n))
            .map(|(base, previous)| (base.to_string(), previous.to_string()))
        else {
            break;
        };
        let token = token.as_str();

        if captures.name("range").is_some() {
            let Some(members) = range_members(&previous, token) else {
                break;
            };
            numbers.extend(members.into_iter().map(|member| format!("{base}({member})")));
        } else {
            numbers.push(format!("{base}({token})"));
        }
        consumed += whole.end();
    }

    consumed
}

/// `9.5.3.1.(2)` splits into `9.5.3.1.` and `2`.
fn split_last_token(number: &str) -> Option<(&str, &str)> {
    let open = number.rfind('(')?;
    let inner = number[open + 1..].strip_suffix(')')?;
    Some((&number[..open], inner))
}

/// Members after `from` up to and including `to`, for numeric or single-letter tokens.
fn range_members(from: &str, to: &str) -> Option<Vec<String>> {
    if let (Ok(from), Ok(to)) = (from.parse::<usize>(), to.parse::<usize>()) {
        if to <= from || to - from > MAX_RANGE {
            return None;
        }
        return Some((from + 1..=to).map(|n| n.to_string()).collect());
    }

    let (mut from_chars, mut to_chars) = (from.chars(), to.chars());
    match (from_chars.next(), from_chars.next(), to_chars.next(), to_chars.next()) {
        (Some(from), None, Some(to), None)
            if from.is_ascii_lowercase() && to.is_ascii_lowercase() && to > from =>
        {
            Some(
                ((from as u8 + 1)..=(to as u8))
                    .map(|c| char::from(c).to_string())
                    .collect(),
            )
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, label: &str, number: &str, text: &str) -> NodeText {
        NodeText {
            id: id.into(),
            label: label.into(),
            number: Some(number.into()),
            text: text.into(),
        }
    }

    fn targets(output: &ResolutionOutput, source: &str) -> Vec<String> {
        output
            .edges
            .iter()
            .filter(|e| e.source.as_str() == source)
            .map(|e| e.target.to_string())
            .collect()
    }

    fn corpus() -> Vec<NodeText> {
        vec![
            node("part_0", "Part", "9", ""),
            node("section_0", "Section", "9.1", ""),
            node("subsection_0", "Subsection", "9.1.1", ""),
            node("article_0", "Article", "9.1.1.1", ""),
            node("sentence_0", "Sentence", "9.1.1.1.(1)", ""),
            node("sentence_1", "Sentence", "9.1.1.1.(2)", ""),
            node("sentence_2", "Sentence", "9.1.1.1.(3)", ""),
            node("clause_0", "Clause", "9.1.1.1.(1)(a)", ""),
            node("clause_1", "Clause", "9.1.1.1.(1)(b)", ""),
        ]
    }

    #[test]
    fn test_keyword_citations_resolve_to_level() {
        let resolver = ReferenceResolver::standard().unwrap();
        let mut nodes = corpus();
        nodes.push(node(
            "article_1",
            "Article",
            "9.2.1.1",
            "Except as required in Part 9 and Subsection 9.1.1., see Article 9.1.1.1.",
        ));

        let output = resolver.resolve(&nodes);
        assert_eq!(
            targets(&output, "article_1"),
            vec!["article_0", "part_0", "subsection_0"]
        );
        assert!(output.unresolved.is_empty());
    }

    #[test]
    fn test_section_does_not_match_deeper_prefix() {
        let resolver = ReferenceResolver::standard().unwrap();
        let mut nodes = corpus();
        nodes.push(node("article_1", "Article", "9.2.1.1", "Section 9.1.1 applies"));

        let output = resolver.resolve(&nodes);
        assert!(targets(&output, "article_1").is_empty());
        assert!(output.unresolved.is_empty());
    }

    #[test]
    fn test_unresolved_counted_once_per_citation() {
        let resolver = ReferenceResolver::standard().unwrap();
        let mut nodes = corpus();
        nodes.push(node(
            "article_1",
            "Article",
            "9.2.1.1",
            "see Article 9.9.9.9, and again Article 9.9.9.9",
        ));

        let output = resolver.resolve(&nodes);
        assert_eq!(output.unresolved.len(), 1);
        assert_eq!(output.unresolved[0].citation, "Article 9.9.9.9");
        assert!(output.edges.is_empty());
    }

    #[test]
    fn test_sibling_lists_expand() {
        let resolver = ReferenceResolver::standard().unwrap();
        let mut nodes = corpus();
        nodes.push(node(
            "article_1",
            "Article",
            "9.2.1.1",
            "Sentences 9.1.1.1.(1) and (2) apply, as does Clause 9.1.1.1.(1)(a) or (b).",
        ));
        nodes.push(node(
            "article_2",
            "Article",
            "9.2.1.2",
            "Sentences 9.1.1.1.(1) to (3) apply.",
        ));

        let output = resolver.resolve(&nodes);
        assert_eq!(
            targets(&output, "article_1"),
            vec!["clause_0", "clause_1", "sentence_0", "sentence_1"]
        );
        assert_eq!(
            targets(&output, "article_2"),
            vec!["sentence_0", "sentence_1", "sentence_2"]
        );
    }

    #[test]
    fn test_ranges_extend_from_last_member() {
        let sibling = Regex::new(SIBLING_PATTERN).unwrap();
        let mut numbers = vec!["9.1.1.1.(1)".to_string()];
        let consumed = expand_siblings(&sibling, " to (3), (5) and more", &mut numbers);
        assert_eq!(
            numbers,
            vec!["9.1.1.1.(1)", "9.1.1.1.(2)", "9.1.1.1.(3)", "9.1.1.1.(5)"]
        );
        assert_eq!(consumed, " to (3), (5)".len());

        let mut clauses = vec!["9.1.1.1.(1)(a)".to_string()];
        expand_siblings(&sibling, " through (c)", &mut clauses);
        assert_eq!(clauses, vec!["9.1.1.1.(1)(a)", "9.1.1.1.(1)(b)", "9.1.1.1.(1)(c)"]);

        let mut backwards = vec!["9.1.1.1.(4)".to_string()];
        assert_eq!(expand_siblings(&sibling, " to (2)", &mut backwards), 0);
        assert_eq!(backwards.len(), 1);
    }

    #[test]
    fn test_bare_numbers_outside_keyword_citations() {
        let resolver = ReferenceResolver::standard().unwrap();
        let mut nodes = corpus();
        nodes.push(node(
            "article_1",
            "Article",
            "9.2.1.1",
            "Refer to 9.1.1.1.(3) and Sentence 9.1.1.1.(2).",
        ));

        let output = resolver.resolve(&nodes);
        assert_eq!(targets(&output, "article_1"), vec!["sentence_1", "sentence_2"]);
        assert_eq!(output.matched, 2);
    }

    #[test]
    fn test_self_reference_skipped() {
        let resolver = ReferenceResolver::standard().unwrap();
        let nodes = vec![node(
            "article_0",
            "Article",
            "9.1.1.1",
            "This Article 9.1.1.1 applies.",
        )];
        let output = resolver.resolve(&nodes);
        assert!(output.edges.is_empty());
        assert!(output.unresolved.is_empty());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = ReferenceResolver::new(&[CitationConfig {
            name: "broken".into(),
            pattern: r"Article (\d+".into(),
            target: None,
            keyword: true,
            expand_siblings: false,
        }])
        .unwrap_err();
        assert!(matches!(err, ReferenceError::InvalidPattern { .. }));

        let err = ReferenceResolver::new(&[CitationConfig {
            name: "unnamed".into(),
            pattern: r"Article (\d+)".into(),
            target: None,
            keyword: true,
            expand_siblings: false,
        }])
        .unwrap_err();
        assert!(matches!(err, ReferenceError::MissingNumberGroup(_)));
    }

    #[tokio::test]
    async fn test_parallel_matches_sequential() {
        let resolver = Arc::new(ReferenceResolver::standard().unwrap());
        let mut nodes = corpus();
        for i in 0..20 {
            nodes.push(node(
                &format!("article_x{i}"),
                "Article",
                &format!("9.3.1.{i}"),
                "See Sentence 9.1.1.1.(1) and Article 9.9.9.9.",
            ));
        }

        let sequential = resolver.resolve(&nodes);
        let parallel = resolver.resolve_parallel(nodes, 3, 4).await.unwrap();

        assert_eq!(parallel.edges, sequential.edges);
        assert_eq!(parallel.unresolved, sequential.unresolved);
        assert_eq!(parallel.unresolved.len(), 20);
    }
}

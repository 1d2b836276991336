use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::classifier::ClassifiedFragment;
use super::fragment::Fragment;
use crate::edge::{Edge, EdgeType};
use crate::level::LevelKind;
use crate::node::{Node, NodeKind};
use crate::schema::SchemaRegistry;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Extraction failed: {0}")]
    Failed(String),
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("Rate limited")]
    RateLimited,
    #[error("Malformed extraction response: {0}")]
    MalformedResponse(String),
}

pub type ExtractionResult<T> = Result<T, ExtractionError>;

/// A node as proposed by an extraction source, keyed by a chunk-local id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedNode {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl ExtractedNode {
    /// `number`, `title` and `text` become first-class node fields; the rest stay properties.
    #[must_use]
    pub fn to_node(&self) -> Node {
        let mut properties = self.properties.clone();
        let mut take = |name: &str| match properties.remove(name) {
            Some(Value::String(s)) => Some(s),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };
        let number = take("number");
        let title = take("title");
        let text = take("text");

        let mut node = Node::new(NodeKind::from_label(&self.label))
            .with_id(self.id.as_str())
            .with_title(title)
            .with_text(text);
        if let Some(number) = number {
            node = node.with_number(number);
        }
        node.properties = properties;
        node
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEdge {
    #[serde(rename = "type")]
    pub edge_type: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// Untrusted output of one extraction call over one chunk of text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedGraph {
    #[serde(default)]
    pub nodes: Vec<ExtractedNode>,
    #[serde(default)]
    pub edges: Vec<ExtractedEdge>,
}

impl ExtractedGraph {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// An item dropped while validating extraction output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub item: String,
    pub reason: String,
}

/// Optional enrichment source, typically a language model.
///
/// Both operations may fail; their output is validated like any other input.
#[async_trait::async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    /// Proposes a classification for a fragment the grammar could not place.
    async fn classify_fragment(
        &self,
        _fragment: &Fragment,
        _enabled: &[LevelKind],
    ) -> ExtractionResult<Option<ClassifiedFragment>> {
        Ok(None)
    }

    /// Extracts domain entities and relationships from one chunk of node text.
    async fn extract_entities(&self, _chunk: &str) -> ExtractionResult<ExtractedGraph> {
        Ok(ExtractedGraph::default())
    }
}

/// Parses a raw model response into an [`ExtractedGraph`].
///
/// Accepts fenced code blocks, `relationships` or `edges`, `from`/`to` or
/// `source_id`/`target_id` endpoint keys, and flat node properties. Nodes without
/// an id get `<label>_<n>`; edge endpoints given as entity names are mapped to ids.
pub fn parse_extraction_response(raw: &str) -> ExtractionResult<ExtractedGraph> {
    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ExtractionError::MalformedResponse(e.to_string()))?;
    let Value::Object(root) = value else {
        return Err(ExtractionError::MalformedResponse(
            "expected a JSON object".into(),
        ));
    };

    let mut graph = ExtractedGraph::default();
    let mut counters: HashMap<String, usize> = HashMap::new();
    let mut names: HashMap<String, String> = HashMap::new();

    for raw_node in array(&root, &["nodes", "entities"]) {
        let Value::Object(fields) = raw_node else {
            continue;
        };
        let Some(label) = string_field(fields, &["label", "type"]) else {
            continue;
        };
        let id = string_field(fields, &["id"]).unwrap_or_else(|| {
            let count = counters.entry(label.clone()).or_default();
            *count += 1;
            format!("{}_{count}", label.to_lowercase())
        });
        let properties = match fields.get("properties") {
            Some(Value::Object(props)) if !props.is_empty() => props.clone(),
            _ => fields
                .iter()
                .filter(|(key, value)| {
                    !matches!(key.as_str(), "label" | "id" | "type" | "properties")
                        && !value.is_null()
                })
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        };
        for key in ["name", "title", "number"] {
            if let Some(Value::String(name)) = properties.get(key) {
                names.entry(name.to_lowercase()).or_insert_with(|| id.clone());
            }
        }
        graph.nodes.push(ExtractedNode {
            id,
            label,
            properties,
        });
    }

    let resolve = |endpoint: String| {
        if graph.nodes.iter().any(|n| n.id == endpoint) {
            endpoint
        } else {
            names.get(&endpoint.to_lowercase()).cloned().unwrap_or(endpoint)
        }
    };

    let mut edges = Vec::new();
    for raw_edge in array(&root, &["relationships", "edges"]) {
        let Value::Object(fields) = raw_edge else {
            continue;
        };
        let (Some(edge_type), Some(source), Some(target)) = (
            string_field(fields, &["type", "relationship"]),
            string_field(fields, &["source_id", "source", "from"]),
            string_field(fields, &["target_id", "target", "to"]),
        ) else {
            continue;
        };
        let properties = match fields.get("properties") {
            Some(Value::Object(props)) => props.clone(),
            _ => Map::new(),
        };
        edges.push(ExtractedEdge {
            edge_type,
            source: resolve(source),
            target: resolve(target),
            properties,
        });
    }
    graph.edges = edges;

    Ok(graph)
}

/// Drops nodes the schema does not accept and edges whose type is unknown, whose
/// endpoints are missing from the chunk, or whose endpoint labels violate the
/// edge type's constraints.
///
/// Structural levels and `CONTAINS`/`REFERENCES` edges are never taken from an
/// extractor: the hierarchy tracker and the reference resolver own them.
#[must_use]
pub fn validate_extraction(
    graph: ExtractedGraph,
    schema: &SchemaRegistry,
) -> (ExtractedGraph, Vec<Rejection>) {
    let mut rejections = Vec::new();
    let mut labels: HashMap<String, String> = HashMap::new();
    let mut valid = ExtractedGraph::default();

    for node in graph.nodes {
        if LevelKind::from_label(&node.label).is_some() {
            rejections.push(Rejection {
                item: format!("{}:{}", node.label, node.id),
                reason: format!("{} nodes come only from the document structure", node.label),
            });
            continue;
        }
        match schema.validate_node(&node.to_node()) {
            Ok(()) => {
                labels.insert(node.id.clone(), node.label.clone());
                valid.nodes.push(node);
            }
            Err(e) => rejections.push(Rejection {
                item: format!("{}:{}", node.label, node.id),
                reason: e.to_string(),
            }),
        }
    }

    for edge in graph.edges {
        let item = format!("{}-[{}]->{}", edge.source, edge.edge_type, edge.target);
        if let Ok(reserved @ (EdgeType::Contains | EdgeType::References)) =
            edge.edge_type.parse::<EdgeType>()
        {
            rejections.push(Rejection {
                item,
                reason: format!("{reserved} edges are not accepted from an extractor"),
            });
            continue;
        }
        let (Some(source_label), Some(target_label)) =
            (labels.get(&edge.source), labels.get(&edge.target))
        else {
            rejections.push(Rejection {
                item,
                reason: "endpoint not present in chunk".into(),
            });
            continue;
        };
        let checked = edge
            .edge_type
            .parse::<EdgeType>()
            .map_err(|e| e.to_string())
            .and_then(|edge_type| {
                Edge::new(edge_type, edge.source.as_str().into(), edge.target.as_str().into())
                    .map_err(|e| e.to_string())
            })
            .and_then(|candidate| {
                schema
                    .validate_edge(&candidate, source_label, target_label)
                    .map_err(|e| e.to_string())
            });
        match checked {
            Ok(()) => valid.edges.push(edge),
            Err(reason) => rejections.push(Rejection { item, reason }),
        }
    }

    (valid, rejections)
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn array<'a>(root: &'a Map<String, Value>, keys: &[&str]) -> &'a [Value] {
    keys.iter()
        .find_map(|key| root.get(*key).and_then(Value::as_array))
        .map_or(&[], Vec::as_slice)
}

fn string_field(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match fields.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Default, Deserialize)]
struct RecordedFile {
    #[serde(default)]
    fragments: Vec<RecordedFragment>,
    #[serde(default)]
    chunks: Vec<RecordedChunk>,
}

#[derive(Debug, Deserialize)]
struct RecordedFragment {
    text: String,
    classified: ClassifiedFragment,
}

#[derive(Debug, Deserialize)]
struct RecordedChunk {
    text: String,
    response: String,
}

/// Replays previously captured extraction responses, keyed by the exact input text.
#[derive(Debug, Default)]
pub struct RecordedExtractor {
    fragments: HashMap<String, ClassifiedFragment>,
    chunks: HashMap<String, String>,
}

impl RecordedExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: RecordedFile = serde_json::from_str(&content)?;
        let mut extractor = Self::new();
        for recorded in file.fragments {
            extractor.fragments.insert(recorded.text.trim().to_string(), recorded.classified);
        }
        for recorded in file.chunks {
            extractor.chunks.insert(recorded.text.trim().to_string(), recorded.response);
        }
        Ok(extractor)
    }

    #[must_use]
    pub fn with_fragment(mut self, text: &str, classified: ClassifiedFragment) -> Self {
        self.fragments.insert(text.trim().to_string(), classified);
        self
    }

    #[must_use]
    pub fn with_chunk(mut self, text: &str, response: impl Into<String>) -> Self {
        self.chunks.insert(text.trim().to_string(), response.into());
        self
    }
}

#[async_trait::async_trait]
impl Extractor for RecordedExtractor {
    fn name(&self) -> &str {
        "recorded"
    }

    async fn classify_fragment(
        &self,
        fragment: &Fragment,
        _enabled: &[LevelKind],
    ) -> ExtractionResult<Option<ClassifiedFragment>> {
        Ok(self.fragments.get(fragment.text.trim()).cloned())
    }

    async fn extract_entities(&self, chunk: &str) -> ExtractionResult<ExtractedGraph> {
        self.chunks
            .get(chunk.trim())
            .map_or_else(|| Ok(ExtractedGraph::default()), |raw| parse_extraction_response(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PropertyDef, PropertyKind};

    fn schema() -> SchemaRegistry {
        let mut schema = SchemaRegistry::default_regulation();
        schema.register_node_type(
            "Organization",
            vec![PropertyDef::required("name", PropertyKind::String)],
        );
        schema.register_node_type(
            "Obligation",
            vec![PropertyDef::required("description", PropertyKind::String)],
        );
        schema.register_edge_type("OBLIGATED_TO", ["Organization"], ["Obligation"]);
        schema
    }

    #[test]
    fn test_parse_fenced_response_with_aliases() {
        let raw = r#"```json
{
  "nodes": [
    {"label": "Organization", "name": "Owner"},
    {"id": "o1", "label": "Obligation", "properties": {"description": "Provide guards"}}
  ],
  "relationships": [
    {"type": "OBLIGATED_TO", "from": "owner", "to": "o1"}
  ]
}
```"#;
        let graph = parse_extraction_response(raw).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.nodes[0].id, "organization_1");
        assert_eq!(graph.nodes[0].properties["name"], "Owner");
        assert_eq!(graph.edges[0].source, "organization_1");
        assert_eq!(graph.edges[0].target, "o1");
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(matches!(
            parse_extraction_response("[1, 2]"),
            Err(ExtractionError::MalformedResponse(_))
        ));
        assert!(parse_extraction_response("I could not find anything").is_err());
    }

    #[test]
    fn test_validate_drops_untrusted_items() {
        let graph = ExtractedGraph {
            nodes: vec![
                ExtractedNode {
                    id: "a".into(),
                    label: "Organization".into(),
                    properties: serde_json::from_str(r#"{"name": "Owner"}"#).unwrap(),
                },
                ExtractedNode {
                    id: "b".into(),
                    label: "Obligation".into(),
                    properties: Map::new(),
                },
                ExtractedNode {
                    id: "c".into(),
                    label: "Planet".into(),
                    properties: Map::new(),
                },
            ],
            edges: vec![
                ExtractedEdge {
                    edge_type: "OBLIGATED_TO".into(),
                    source: "a".into(),
                    target: "b".into(),
                    properties: Map::new(),
                },
                ExtractedEdge {
                    edge_type: "OBLIGATED_TO".into(),
                    source: "a".into(),
                    target: "a".into(),
                    properties: Map::new(),
                },
            ],
        };

        let (valid, rejections) = validate_extraction(graph, &schema());
        assert_eq!(valid.nodes.len(), 1);
        assert!(valid.edges.is_empty());
        assert_eq!(rejections.len(), 4);
    }

    #[test]
    fn test_validate_rejects_structural_output() {
        let graph = parse_extraction_response(
            r#"{"nodes": [{"id": "p", "label": "Part", "number": "10"},
                          {"id": "o", "label": "Organization", "name": "Owner"},
                          {"id": "q", "label": "Organization", "name": "Builder"}],
                "relationships": [{"type": "CONTAINS", "source": "p", "target": "o"},
                                  {"type": "REFERENCES", "source": "o", "target": "q"}]}"#,
        )
        .unwrap();

        let (valid, rejections) = validate_extraction(graph, &schema());
        assert_eq!(valid.nodes.len(), 2);
        assert!(valid.nodes.iter().all(|n| n.label == "Organization"));
        assert!(valid.edges.is_empty());
        assert_eq!(rejections.len(), 3);
        assert!(rejections[0].reason.contains("document structure"));
        assert!(rejections[2].reason.starts_with("REFERENCES"));
    }

    #[test]
    fn test_to_node_lifts_fields() {
        let node = ExtractedNode {
            id: "s1".into(),
            label: "Sentence".into(),
            properties: serde_json::from_str(r#"{"number": "9.1.1.1.(1)", "text": "Foo", "note": "x"}"#)
                .unwrap(),
        }
        .to_node();
        assert_eq!(node.level(), Some(LevelKind::Sentence));
        assert_eq!(node.number.as_deref(), Some("9.1.1.1.(1)"));
        assert_eq!(node.text.as_deref(), Some("Foo"));
        assert_eq!(node.properties.len(), 1);
    }

    #[tokio::test]
    async fn test_recorded_extractor_replays() {
        let extractor = RecordedExtractor::new().with_chunk(
            "The owner shall provide guards.",
            r#"{"nodes": [{"id": "x", "label": "Organization", "name": "Owner"}]}"#,
        );
        let graph = extractor
            .extract_entities("  The owner shall provide guards. ")
            .await
            .unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert!(extractor.extract_entities("other").await.unwrap().is_empty());
        assert!(extractor
            .classify_fragment(&Fragment::new("x"), &[])
            .await
            .unwrap()
            .is_none());
    }
}

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::edge::{Edge, EdgeType};
use crate::level::LevelKind;
use crate::node::Node;

/// Matches any registered node label in an edge endpoint set.
pub const ANY_LABEL: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unknown type: {0}")]
    UnknownType(String),
    #[error("{label} is missing required property '{property}'")]
    MissingRequiredProperty { label: String, property: String },
    #[error("{edge_type} does not allow {source_label} -> {target_label}")]
    TypeConstraintViolation {
        edge_type: String,
        source_label: String,
        target_label: String,
    },
    #[error("{source_label} cannot contain {target_label}: containment runs from wider to narrower levels")]
    LevelOrder {
        source_label: String,
        target_label: String,
    },
}

pub type ValidationResult<T> = Result<T, ValidationError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    #[default]
    String,
    Int,
    Float,
    Bool,
    List,
    Date,
}

impl PropertyKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::List => "list",
            Self::Date => "date",
        }
    }
}

impl std::fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PropertyKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            "bool" => Ok(Self::Bool),
            "list" => Ok(Self::List),
            "date" => Ok(Self::Date),
            _ => Err(crate::Error::InvalidPropertyKind(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    #[serde(default)]
    pub kind: PropertyKind,
    #[serde(default)]
    pub required: bool,
}

impl PropertyDef {
    #[must_use]
    pub fn optional(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }

    #[must_use]
    pub fn required(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTypeDef {
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeTypeDef {
    #[serde(rename = "type")]
    pub edge_type: String,
    pub sources: BTreeSet<String>,
    pub targets: BTreeSet<String>,
}

impl EdgeTypeDef {
    fn allows(&self, source_label: &str, target_label: &str) -> bool {
        let matches = |set: &BTreeSet<String>, label: &str| {
            set.contains(ANY_LABEL) || set.contains(label)
        };
        matches(&self.sources, source_label) && matches(&self.targets, target_label)
    }
}

/// Declarative schema description, the on-disk and exported form of a registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeTypeDef>,
    #[serde(default)]
    pub edges: Vec<EdgeTypeDef>,
}

#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    name: String,
    nodes: BTreeMap<String, NodeTypeDef>,
    edges: BTreeMap<String, EdgeTypeDef>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
        }
    }

    /// Every structural level with a required number, plus containment and reference edges.
    #[must_use]
    pub fn default_regulation() -> Self {
        let mut registry = Self::new("Regulation");

        for level in LevelKind::ALL {
            registry.register_node_type(
                level.label(),
                vec![
                    PropertyDef::required("number", PropertyKind::String),
                    PropertyDef::optional("title", PropertyKind::String),
                    PropertyDef::optional("text", PropertyKind::String),
                ],
            );
        }

        let labels: Vec<&str> = LevelKind::ALL.iter().map(LevelKind::label).collect();
        registry.register_edge_type(
            EdgeType::Contains.as_str(),
            labels[..labels.len() - 1].iter().copied(),
            labels[1..].iter().copied(),
        );
        registry.register_edge_type(
            EdgeType::References.as_str(),
            labels.iter().copied(),
            labels.iter().copied(),
        );

        registry
    }

    #[must_use]
    pub fn from_config(config: SchemaConfig) -> Self {
        let mut registry = Self::new(config.name.clone().unwrap_or_default());
        registry.merge_config(config);
        registry
    }

    /// Adds node and edge types from `config`; existing definitions are extended, never narrowed.
    pub fn merge_config(&mut self, config: SchemaConfig) {
        if let Some(name) = config.name {
            self.name = name;
        }
        for node in config.nodes {
            let label = node.label.clone();
            self.register_node_type(label.clone(), node.properties);
            if !node.description.is_empty() {
                if let Some(def) = self.nodes.get_mut(&label) {
                    def.description = node.description;
                }
            }
        }
        for edge in config.edges {
            self.register_edge_type(edge.edge_type, edge.sources, edge.targets);
        }
    }

    pub fn register_node_type(&mut self, label: impl Into<String>, properties: Vec<PropertyDef>) {
        let label = label.into();
        let def = self
            .nodes
            .entry(label.clone())
            .or_insert_with(|| NodeTypeDef {
                label,
                description: String::new(),
                properties: Vec::new(),
            });
        for property in properties {
            match def.properties.iter_mut().find(|p| p.name == property.name) {
                Some(existing) => *existing = property,
                None => def.properties.push(property),
            }
        }
    }

    pub fn register_edge_type<S, T>(
        &mut self,
        edge_type: impl Into<String>,
        sources: impl IntoIterator<Item = S>,
        targets: impl IntoIterator<Item = T>,
    ) where
        S: Into<String>,
        T: Into<String>,
    {
        let edge_type = edge_type.into();
        let def = self
            .edges
            .entry(edge_type.clone())
            .or_insert_with(|| EdgeTypeDef {
                edge_type,
                sources: BTreeSet::new(),
                targets: BTreeSet::new(),
            });
        def.sources.extend(sources.into_iter().map(Into::into));
        def.targets.extend(targets.into_iter().map(Into::into));
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn node_type(&self, label: &str) -> Option<&NodeTypeDef> {
        self.nodes.get(label)
    }

    #[must_use]
    pub fn edge_type(&self, edge_type: &str) -> Option<&EdgeTypeDef> {
        self.edges.get(edge_type)
    }

    pub fn node_types(&self) -> impl Iterator<Item = &NodeTypeDef> {
        self.nodes.values()
    }

    pub fn edge_types(&self) -> impl Iterator<Item = &EdgeTypeDef> {
        self.edges.values()
    }

    pub fn validate_node(&self, node: &Node) -> ValidationResult<()> {
        let def = self
            .nodes
            .get(node.label())
            .ok_or_else(|| ValidationError::UnknownType(node.label().to_string()))?;

        if let Some(missing) = def
            .properties
            .iter()
            .find(|p| p.required && !node.has_property(&p.name))
        {
            return Err(ValidationError::MissingRequiredProperty {
                label: def.label.clone(),
                property: missing.name.clone(),
            });
        }

        Ok(())
    }

    pub fn validate_edge(
        &self,
        edge: &Edge,
        source_label: &str,
        target_label: &str,
    ) -> ValidationResult<()> {
        let def = self
            .edges
            .get(edge.edge_type.as_str())
            .ok_or_else(|| ValidationError::UnknownType(edge.edge_type.to_string()))?;

        for label in [source_label, target_label] {
            if !self.nodes.contains_key(label) {
                return Err(ValidationError::UnknownType(label.to_string()));
            }
        }

        if !def.allows(source_label, target_label) {
            return Err(ValidationError::TypeConstraintViolation {
                edge_type: def.edge_type.clone(),
                source_label: source_label.to_string(),
                target_label: target_label.to_string(),
            });
        }

        if edge.edge_type == EdgeType::Contains {
            if let (Some(parent), Some(child)) =
                (LevelKind::from_label(source_label), LevelKind::from_label(target_label))
            {
                if parent >= child {
                    return Err(ValidationError::LevelOrder {
                        source_label: source_label.to_string(),
                        target_label: target_label.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn describe(&self) -> SchemaConfig {
        SchemaConfig {
            name: Some(self.name.clone()),
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.values().cloned().collect(),
        }
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::default_regulation()
    }
}

impl std::fmt::Display for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Schema: {}", self.name)?;
        writeln!(f, "Node types ({}):", self.nodes.len())?;
        for def in self.nodes.values() {
            writeln!(f, "  {}", def.label)?;
            for property in &def.properties {
                let required = if property.required { " [required]" } else { "" };
                writeln!(f, "    - {}: {}{required}", property.name, property.kind)?;
            }
        }
        writeln!(f, "Edge types ({}):", self.edges.len())?;
        for def in self.edges.values() {
            let join = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>().join("|");
            writeln!(
                f,
                "  ({}) -[{}]-> ({})",
                join(&def.sources),
                def.edge_type,
                join(&def.targets)
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;

    #[test]
    fn test_unknown_node_type() {
        let registry = SchemaRegistry::default_regulation();
        let node = Node::entity("Obligation").with_title(Some("Pay".into()));
        assert_eq!(
            registry.validate_node(&node),
            Err(ValidationError::UnknownType("Obligation".into()))
        );
    }

    #[test]
    fn test_missing_required_property() {
        let mut registry = SchemaRegistry::default_regulation();
        registry.register_node_type(
            "Organization",
            vec![PropertyDef::required("name", PropertyKind::String)],
        );
        let node = Node::entity("Organization").with_property("role", "owner");
        assert!(matches!(
            registry.validate_node(&node),
            Err(ValidationError::MissingRequiredProperty { property, .. }) if property == "name"
        ));

        let node = node.with_property("name", "Ministry").with_property("extra", 3);
        assert!(registry.validate_node(&node).is_ok());
    }

    #[test]
    fn test_structural_number_required() {
        let registry = SchemaRegistry::default_regulation();
        let mut node = Node::structural(LevelKind::Sentence, "9.1.1.1.(1)");
        assert!(registry.validate_node(&node).is_ok());
        node.number = None;
        assert!(registry.validate_node(&node).is_err());
    }

    #[test]
    fn test_edge_type_constraints() {
        let registry = SchemaRegistry::default_regulation();
        let edge = Edge::contains("part_0".into(), "section_0".into()).unwrap();
        assert!(registry.validate_edge(&edge, "Part", "Section").is_ok());
        assert!(matches!(
            registry.validate_edge(&edge, "Item", "Section"),
            Err(ValidationError::TypeConstraintViolation { .. })
        ));
        assert!(matches!(
            registry.validate_edge(&edge, "Article", "Part"),
            Err(ValidationError::LevelOrder { .. })
        ));
        assert!(matches!(
            registry.validate_edge(&edge, "Section", "Section"),
            Err(ValidationError::LevelOrder { .. })
        ));
        assert!(registry.validate_edge(&edge, "Part", "Article").is_ok());

        let domain: Edge = Edge::new("HAS_TABLE".parse().unwrap(), "a".into(), "b".into()).unwrap();
        assert_eq!(
            registry.validate_edge(&domain, "Sentence", "Article"),
            Err(ValidationError::UnknownType("HAS_TABLE".into()))
        );
    }

    #[test]
    fn test_register_edge_type_unions_endpoints() {
        let mut registry = SchemaRegistry::new("legal");
        registry.register_node_type("Clause", vec![]);
        registry.register_node_type("Item", vec![]);
        registry.register_node_type("Agreement", vec![]);
        registry.register_edge_type("REFERENCES", ["Clause"], ["Clause"]);
        registry.register_edge_type("REFERENCES", ["Clause"], ["Item"]);

        let def = registry.edge_type("REFERENCES").unwrap();
        assert_eq!(def.targets.len(), 2);

        registry.register_edge_type("MENTIONS", [ANY_LABEL], ["Agreement"]);
        let edge = Edge::new("MENTIONS".parse().unwrap(), "a".into(), "b".into()).unwrap();
        assert!(registry.validate_edge(&edge, "Item", "Agreement").is_ok());
    }

    #[test]
    fn test_config_merges_onto_default() {
        let config: SchemaConfig = serde_json::from_str(
            r#"{
                "nodes": [{"label": "Organization", "description": "Legal entity",
                           "properties": [{"name": "name", "required": true}]}],
                "edges": [{"type": "ISSUED_BY", "sources": ["Regulation"], "targets": ["Organization"]}]
            }"#,
        )
        .unwrap();

        let mut registry = SchemaRegistry::default_regulation();
        registry.merge_config(config);

        assert_eq!(registry.node_type("Organization").unwrap().description, "Legal entity");
        assert!(registry.node_type("Part").is_some());

        let exported = registry.describe();
        let reloaded = SchemaRegistry::from_config(exported.clone());
        assert_eq!(reloaded.describe(), exported);
    }

    #[test]
    fn test_display_lists_types() {
        let summary = SchemaRegistry::default_regulation().to_string();
        assert!(summary.contains("Schema: Regulation"));
        assert!(summary.contains("number: string [required]"));
        assert!(summary.contains("-[CONTAINS]->"));
    }
}

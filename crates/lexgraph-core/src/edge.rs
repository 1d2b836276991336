use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::node::NodeId;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum EdgeType {
    Contains,
    References,
    Domain(String),
}

impl EdgeType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Contains => "CONTAINS",
            Self::References => "REFERENCES",
            Self::Domain(name) => name,
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EdgeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s {
            "" => Err(Error::InvalidEdgeType(s.to_string())),
            "CONTAINS" => Ok(Self::Contains),
            "REFERENCES" => Ok(Self::References),
            _ if s.chars().any(char::is_whitespace) => Err(Error::InvalidEdgeType(s.to_string())),
            _ => Ok(Self::Domain(s.to_string())),
        }
    }
}

impl From<EdgeType> for String {
    fn from(edge_type: EdgeType) -> Self {
        edge_type.as_str().to_string()
    }
}

impl TryFrom<String> for EdgeType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Upsert key of an edge: `(source, type, target)`.
pub type EdgeKey = (NodeId, EdgeType, NodeId);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub edge_type: EdgeType,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

impl Edge {
    pub fn new(edge_type: EdgeType, source: NodeId, target: NodeId) -> Result<Self> {
        if source == target {
            return Err(Error::SelfReference);
        }
        Ok(Self {
            edge_type,
            source,
            target,
            properties: Map::new(),
        })
    }

    pub fn contains(parent: NodeId, child: NodeId) -> Result<Self> {
        Self::new(EdgeType::Contains, parent, child)
    }

    pub fn references(source: NodeId, target: NodeId) -> Result<Self> {
        Self::new(EdgeType::References, source, target)
    }

    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn key(&self) -> EdgeKey {
        (
            self.source.clone(),
            self.edge_type.clone(),
            self.target.clone(),
        )
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::level::LevelKind;

/// Canonical node identifier, unique within one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum NodeKind {
    Level(LevelKind),
    Entity(String),
}

impl NodeKind {
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Level(level) => level.label(),
            Self::Entity(label) => label,
        }
    }

    #[must_use]
    pub const fn level(&self) -> Option<LevelKind> {
        match self {
            Self::Level(level) => Some(*level),
            Self::Entity(_) => None,
        }
    }

    /// Structural labels map back to their level; anything else is a domain entity.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        LevelKind::from_label(label).map_or_else(|| Self::Entity(label.to_string()), Self::Level)
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

impl Node {
    #[must_use]
    pub fn new(kind: NodeKind) -> Self {
        Self {
            id: NodeId::default(),
            kind,
            number: None,
            title: None,
            text: None,
            properties: Map::new(),
        }
    }

    #[must_use]
    pub fn structural(level: LevelKind, number: impl Into<String>) -> Self {
        Self::new(NodeKind::Level(level)).with_number(number)
    }

    #[must_use]
    pub fn entity(label: impl Into<String>) -> Self {
        Self::new(NodeKind::Entity(label.into()))
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.number = non_empty(Some(number.into()));
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = non_empty(title);
        self
    }

    #[must_use]
    pub fn with_text(mut self, text: Option<String>) -> Self {
        self.text = non_empty(text);
        self
    }

    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn label(&self) -> &str {
        self.kind.label()
    }

    #[must_use]
    pub const fn level(&self) -> Option<LevelKind> {
        self.kind.level()
    }

    /// Looks up a property by name, first-class fields included. Nulls count as absent.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<Value> {
        let field = match name {
            "number" => self.number.as_ref(),
            "title" => self.title.as_ref(),
            "text" => self.text.as_ref(),
            _ => None,
        };
        if let Some(value) = field {
            return Some(Value::String(value.clone()));
        }
        self.properties
            .get(name)
            .filter(|value| !value.is_null())
            .cloned()
    }

    #[must_use]
    pub fn has_property(&self, name: &str) -> bool {
        self.property(name).is_some()
    }

    /// Extends the body with a continuation fragment, space-joined.
    pub fn append_text(&mut self, extra: &str) {
        let extra = extra.trim();
        if extra.is_empty() {
            return;
        }
        self.text = Some(match self.text.take() {
            Some(text) => format!("{text} {extra}"),
            None => extra.to_string(),
        });
    }

    /// Merges `other` into `self`; existing non-empty values are never overwritten.
    /// Returns whether anything changed.
    pub fn merge_from(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (mine, theirs) in [
            (&mut self.number, &other.number),
            (&mut self.title, &other.title),
            (&mut self.text, &other.text),
        ] {
            if mine.is_none() && theirs.is_some() {
                mine.clone_from(theirs);
                changed = true;
            }
        }
        for (key, value) in &other.properties {
            if is_blank(value) {
                continue;
            }
            let slot = self.properties.entry(key.clone()).or_insert(Value::Null);
            if is_blank(slot) {
                *slot = value.clone();
                changed = true;
            }
        }
        changed
    }
}

/// Deduplication key: node label plus its primary property value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    pub label: String,
    pub value: String,
}

impl IdentityKey {
    /// Structural nodes are identified by number; entities by name, then title, then number.
    /// An entity with none of these falls back to its serialized properties.
    #[must_use]
    pub fn of(node: &Node) -> Self {
        let primary: &[&str] = match node.kind {
            NodeKind::Level(_) => &["number"],
            NodeKind::Entity(_) => &["name", "title", "number"],
        };
        let value = primary
            .iter()
            .filter_map(|name| node.property(name))
            .find(|value| !is_blank(value))
            .map_or_else(
                || Value::Object(node.properties.clone()).to_string(),
                |value| match value {
                    Value::String(s) => s.trim().to_string(),
                    other => other.to_string(),
                },
            );
        Self {
            label: node.label().to_string(),
            value,
        }
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.label, self.value)
    }
}

impl Node {
    #[must_use]
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::of(self)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

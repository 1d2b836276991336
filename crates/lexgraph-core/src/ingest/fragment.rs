use std::io::BufRead;

use serde::{Deserialize, Serialize};

use super::pipeline::{IngestError, IngestResult};

/// Where a fragment came from in the source document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocator {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl std::fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(page) = self.page {
            parts.push(format!("page {page}"));
        }
        if let Some(offset) = self.offset {
            parts.push(format!("offset {offset}"));
        }
        if let Some(line) = self.line {
            parts.push(format!("line {line}"));
        }
        if parts.is_empty() {
            f.write_str("unknown")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

/// One unit of text from the upstream layout reader, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub text: String,
    /// Structural tag: a layout class or role name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default)]
    pub locator: SourceLocator,
}

impl Fragment {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tag: None,
            locator: SourceLocator::default(),
        }
    }

    #[must_use]
    pub fn tagged(text: impl Into<String>, tag: impl Into<String>) -> Self {
        Self::new(text).with_tag(tag)
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    #[must_use]
    pub fn with_locator(mut self, locator: SourceLocator) -> Self {
        self.locator = locator;
        self
    }
}

/// Reads JSON Lines fragments. Blank lines are skipped; any other line that is not a
/// fragment object makes the whole stream malformed.
pub fn read_fragments(reader: impl BufRead) -> IngestResult<Vec<Fragment>> {
    let mut fragments = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let line_number = index + 1;
        let mut fragment: Fragment =
            serde_json::from_str(&line).map_err(|source| IngestError::MalformedInput {
                line: line_number,
                source,
            })?;
        if fragment.locator.line.is_none() {
            fragment.locator.line = Some(line_number);
        }
        fragments.push(fragment);
    }
    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_fragments_assigns_lines() {
        let input = r#"{"text": "Part 9 Housing", "tag": "part", "locator": {"page": 3}}

{"text": "continuation"}
"#;
        let fragments = read_fragments(input.as_bytes()).unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].tag.as_deref(), Some("part"));
        assert_eq!(fragments[0].locator.page, Some(3));
        assert_eq!(fragments[0].locator.line, Some(1));
        assert_eq!(fragments[1].locator.line, Some(3));
        assert!(fragments[1].tag.is_none());
    }

    #[test]
    fn test_malformed_line_aborts() {
        let input = "{\"text\": \"ok\"}\nnot json\n";
        let err = read_fragments(input.as_bytes()).unwrap_err();
        assert!(matches!(err, IngestError::MalformedInput { line: 2, .. }));
    }

    #[test]
    fn test_locator_display() {
        let locator = SourceLocator {
            page: Some(4),
            offset: None,
            line: Some(12),
        };
        assert_eq!(locator.to_string(), "page 4, line 12");
        assert_eq!(SourceLocator::default().to_string(), "unknown");
    }
}

//! Numbering grammar: per-level numbering patterns and the structural tag table.
//!
//! Grammars are data. The built-in [`GrammarConfig::ontario_building_code`] grammar
//! covers the e-Laws layout; other document families load their own JSON config.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::level::LevelKind;

#[derive(Debug, Error)]
pub enum GrammarError {
    #[error("Invalid {level} pattern '{pattern}': {source}")]
    InvalidPattern {
        level: LevelKind,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("{level} pattern '{pattern}' has no 'number' capture group")]
    MissingNumberGroup { level: LevelKind, pattern: String },
}

pub type GrammarResult<T> = Result<T, GrammarError>;

/// Turns a relative numbering token into a fully-qualified number.
///
/// `9.1.1.1` with separator `.` and parentheses yields `9.1.1.1.(1)` for token `1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qualifier {
    #[serde(default)]
    pub separator: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
}

impl Qualifier {
    #[must_use]
    pub fn parenthesized(separator: &str) -> Self {
        Self {
            separator: separator.to_string(),
            prefix: "(".into(),
            suffix: ")".into(),
        }
    }

    #[must_use]
    pub fn qualify(&self, parent: Option<&str>, token: &str) -> String {
        let wrapped = format!("{}{token}{}", self.prefix, self.suffix);
        match parent {
            Some(parent) if !parent.is_empty() => format!("{parent}{}{wrapped}", self.separator),
            _ => wrapped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternConfig {
    pub regex: String,
    /// Present for relative numbering tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualify: Option<Qualifier>,
}

impl PatternConfig {
    fn absolute(regex: &str) -> Self {
        Self {
            regex: regex.to_string(),
            qualify: None,
        }
    }

    fn relative(regex: &str, qualifier: Qualifier) -> Self {
        Self {
            regex: regex.to_string(),
            qualify: Some(qualifier),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrammarConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Ordered patterns per level; first match wins within a level.
    #[serde(default)]
    pub levels: BTreeMap<LevelKind, Vec<PatternConfig>>,
    /// Structural tag to the levels it enables.
    #[serde(default)]
    pub tags: BTreeMap<String, Vec<LevelKind>>,
}

impl GrammarConfig {
    #[must_use]
    pub fn ontario_building_code() -> Self {
        use LevelKind::{
            Article, Clause, Division, Item, Part, Regulation, Section, Sentence, Subclause,
            Subsection,
        };

        let levels = BTreeMap::from([
            (
                Regulation,
                vec![PatternConfig::absolute(
                    r"^(?:Ontario\s+)?(?i:Regulation)\s+(?P<number>\d+/\d+)\s*(?P<title>.*)$",
                )],
            ),
            (
                Division,
                vec![PatternConfig::absolute(
                    r"^(?i:Division)\s+(?P<number>[A-Z])\b\.?\s*(?P<title>.*)$",
                )],
            ),
            (
                Part,
                vec![PatternConfig::absolute(
                    r"^(?i:Part)\s+(?P<number>\d+)\b\.?\s*(?P<title>.*)$",
                )],
            ),
            (
                Section,
                vec![PatternConfig::absolute(
                    r"^(?:(?i:Section)\s+)?(?P<number>\d+\.\d+)\.?(?:\s+(?P<title>.*))?$",
                )],
            ),
            (
                Subsection,
                vec![PatternConfig::absolute(
                    r"^(?:(?i:Subsection)\s+)?(?P<number>\d+\.\d+\.\d+)\.?(?:\s+(?P<title>.*))?$",
                )],
            ),
            (
                Article,
                vec![PatternConfig::absolute(
                    r"^(?:(?i:Article)\s+)?(?P<number>\d+\.\d+\.\d+\.\d+)\.?(?:\s+(?P<title>.*))?$",
                )],
            ),
            (
                Sentence,
                vec![PatternConfig::relative(
                    r"^\((?P<number>\d+(?:\.\d+)?)\)\s*(?P<text>.*)$",
                    Qualifier::parenthesized("."),
                )],
            ),
            (
                Clause,
                vec![PatternConfig::relative(
                    r"^\((?P<number>[a-z]{1,2}(?:\.\d+)?)\)\s*(?P<text>.*)$",
                    Qualifier::parenthesized(""),
                )],
            ),
            (
                Subclause,
                vec![PatternConfig::relative(
                    r"^\((?P<number>[ivxlc]+)\)\s*(?P<text>.*)$",
                    Qualifier::parenthesized(""),
                )],
            ),
            (
                Item,
                vec![PatternConfig::relative(
                    r"^\((?P<number>[A-Z])\)\s*(?P<text>.*)$",
                    Qualifier::parenthesized(""),
                )],
            ),
        ]);

        let mut tags = BTreeMap::new();
        let mut alias = |names: &[&str], enabled: &[LevelKind]| {
            for name in names {
                tags.insert((*name).to_string(), enabled.to_vec());
            }
        };
        alias(&["regulation", "regulation-tag", "regnumber-e"], &[Regulation]);
        alias(&["division", "division-tag"], &[Division]);
        alias(&["part", "part-tag", "partnum-e"], &[Part]);
        alias(&["section", "section-tag", "ruleb-e"], &[Section, Subsection]);
        alias(&["subsection", "subsection-tag", "Pheading2-e"], &[Subsection]);
        alias(&["article", "article-tag"], &[Subsection, Article]);
        alias(
            &["sentence", "sentence-tag", "subsection-e", "Ssubsection-e"],
            &[Sentence],
        );
        alias(&["clause", "clause-tag", "clause-e", "Sclause-e"], &[Clause]);
        alias(&["subclause", "subclause-tag", "subclause-e"], &[Subclause]);
        alias(&["item", "item-tag"], &[Item]);

        Self {
            name: Some("Ontario Building Code".into()),
            levels,
            tags,
        }
    }
}

#[derive(Debug)]
struct CompiledPattern {
    regex: Regex,
    qualify: Option<Qualifier>,
}

/// Result of matching one fragment against one level's patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelMatch {
    pub number: String,
    pub title: Option<String>,
    pub text: Option<String>,
    pub qualifier: Option<Qualifier>,
}

#[derive(Debug)]
pub struct NumberingGrammar {
    name: String,
    levels: BTreeMap<LevelKind, Vec<CompiledPattern>>,
    tags: HashMap<String, Vec<LevelKind>>,
}

impl NumberingGrammar {
    pub fn compile(config: &GrammarConfig) -> GrammarResult<Self> {
        let mut levels = BTreeMap::new();
        for (level, patterns) in &config.levels {
            let mut compiled = Vec::with_capacity(patterns.len());
            for pattern in patterns {
                let regex =
                    Regex::new(&pattern.regex).map_err(|source| GrammarError::InvalidPattern {
                        level: *level,
                        pattern: pattern.regex.clone(),
                        source,
                    })?;
                if !regex.capture_names().any(|name| name == Some("number")) {
                    return Err(GrammarError::MissingNumberGroup {
                        level: *level,
                        pattern: pattern.regex.clone(),
                    });
                }
                compiled.push(CompiledPattern {
                    regex,
                    qualify: pattern.qualify.clone(),
                });
            }
            levels.insert(*level, compiled);
        }

        Ok(Self {
            name: config.name.clone().unwrap_or_default(),
            levels,
            tags: config
                .tags
                .iter()
                .map(|(tag, enabled)| (tag.clone(), enabled.clone()))
                .collect(),
        })
    }

    pub fn ontario_building_code() -> GrammarResult<Self> {
        Self::compile(&GrammarConfig::ontario_building_code())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Levels enabled by a structural tag, narrowest first.
    ///
    /// A tag may carry several whitespace-separated classes; their levels are unioned.
    /// Absent or unknown tags enable nothing.
    #[must_use]
    pub fn enabled_levels(&self, tag: Option<&str>) -> Vec<LevelKind> {
        let Some(tag) = tag else {
            return Vec::new();
        };
        let enabled: BTreeSet<LevelKind> = tag
            .split_whitespace()
            .filter_map(|class| self.tags.get(class))
            .flatten()
            .copied()
            .filter(|level| self.levels.contains_key(level))
            .collect();
        enabled.into_iter().rev().collect()
    }

    /// Qualifier of the level's first pattern; `None` if the grammar has no patterns for it.
    #[must_use]
    pub fn default_qualifier(&self, level: LevelKind) -> Option<Option<Qualifier>> {
        self.levels
            .get(&level)
            .and_then(|patterns| patterns.first())
            .map(|pattern| pattern.qualify.clone())
    }

    #[must_use]
    pub fn match_level(&self, level: LevelKind, text: &str) -> Option<LevelMatch> {
        let text = text.trim();
        self.levels.get(&level)?.iter().find_map(|pattern| {
            let captures = pattern.regex.captures(text)?;
            let number = captures.name("number")?.as_str().trim().to_string();
            if number.is_empty() {
                return None;
            }
            let group = |name: &str| {
                captures
                    .name(name)
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|s| !s.is_empty())
            };
            Some(LevelMatch {
                number,
                title: group("title"),
                text: group("text"),
                qualifier: pattern.qualify.clone(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grammar() -> NumberingGrammar {
        NumberingGrammar::ontario_building_code().unwrap()
    }

    #[test]
    fn test_qualifier() {
        let sentence = Qualifier::parenthesized(".");
        assert_eq!(sentence.qualify(Some("9.1.1.1"), "1"), "9.1.1.1.(1)");
        assert_eq!(sentence.qualify(None, "1"), "(1)");
        let clause = Qualifier::parenthesized("");
        assert_eq!(clause.qualify(Some("9.1.1.1.(1)"), "a"), "9.1.1.1.(1)(a)");
    }

    #[test]
    fn test_enabled_levels_narrowest_first() {
        let grammar = grammar();
        assert_eq!(
            grammar.enabled_levels(Some("article-tag")),
            vec![LevelKind::Article, LevelKind::Subsection]
        );
        assert_eq!(
            grammar.enabled_levels(Some("partnum-e ruleb-e")),
            vec![LevelKind::Subsection, LevelKind::Section, LevelKind::Part]
        );
        assert!(grammar.enabled_levels(None).is_empty());
        assert!(grammar.enabled_levels(Some("Normal-e")).is_empty());
    }

    #[test]
    fn test_heading_patterns() {
        let grammar = grammar();
        let part = grammar.match_level(LevelKind::Part, "Part 9 Housing").unwrap();
        assert_eq!(part.number, "9");
        assert_eq!(part.title.as_deref(), Some("Housing"));

        let section = grammar.match_level(LevelKind::Section, "9.1. Scope").unwrap();
        assert_eq!(section.number, "9.1");
        assert_eq!(section.title.as_deref(), Some("Scope"));

        assert!(grammar
            .match_level(LevelKind::Section, "9.1.1. Application")
            .is_none());
        assert!(grammar
            .match_level(LevelKind::Subsection, "9.1.1.1. Definitions")
            .is_none());

        let article = grammar
            .match_level(LevelKind::Article, "9.1.1.1. Definitions")
            .unwrap();
        assert_eq!(article.number, "9.1.1.1");
        assert!(article.qualifier.is_none());
    }

    #[test]
    fn test_relative_patterns() {
        let grammar = grammar();
        let sentence = grammar
            .match_level(LevelKind::Sentence, "(1) This Section applies")
            .unwrap();
        assert_eq!(sentence.number, "1");
        assert_eq!(sentence.text.as_deref(), Some("This Section applies"));
        assert!(sentence.qualifier.is_some());

        let clause = grammar.match_level(LevelKind::Clause, "(a) houses").unwrap();
        assert_eq!(clause.number, "a");

        assert!(grammar.match_level(LevelKind::Clause, "(1) houses").is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = GrammarConfig::default();
        config
            .levels
            .insert(LevelKind::Part, vec![PatternConfig::absolute(r"^Part (\d+")]);
        assert!(matches!(
            NumberingGrammar::compile(&config),
            Err(GrammarError::InvalidPattern { .. })
        ));

        config
            .levels
            .insert(LevelKind::Part, vec![PatternConfig::absolute(r"^Part (\d+)")]);
        assert!(matches!(
            NumberingGrammar::compile(&config),
            Err(GrammarError::MissingNumberGroup { .. })
        ));
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        let config = GrammarConfig::ontario_building_code();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: GrammarConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}

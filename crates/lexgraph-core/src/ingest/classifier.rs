use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::fragment::Fragment;
use crate::grammar::{NumberingGrammar, Qualifier};
use crate::level::LevelKind;

/// A fragment recognized as the start of a structural node.
///
/// `number` is the token as written; relative tokens carry the qualifier the
/// hierarchy tracker uses to make them fully qualified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedFragment {
    pub level: LevelKind,
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<Qualifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Structural(ClassifiedFragment),
    /// Text extending the currently open node.
    Continuation,
    /// The tag enabled these levels but none of their patterns matched.
    Ambiguous { enabled: Vec<LevelKind> },
}

impl Classification {
    #[must_use]
    pub const fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Ambiguous { .. })
    }
}

#[derive(Debug, Clone)]
pub struct FragmentClassifier {
    grammar: Arc<NumberingGrammar>,
}

impl FragmentClassifier {
    #[must_use]
    pub const fn new(grammar: Arc<NumberingGrammar>) -> Self {
        Self { grammar }
    }

    #[must_use]
    pub fn grammar(&self) -> &NumberingGrammar {
        &self.grammar
    }

    /// `None` means continuation text. A fragment without a structural tag is never
    /// classified from content alone.
    #[must_use]
    pub fn classify(&self, fragment: &Fragment) -> Option<ClassifiedFragment> {
        match self.classify_detailed(fragment) {
            Classification::Structural(classified) => Some(classified),
            Classification::Continuation | Classification::Ambiguous { .. } => None,
        }
    }

    #[must_use]
    pub fn classify_detailed(&self, fragment: &Fragment) -> Classification {
        let enabled = self.grammar.enabled_levels(fragment.tag.as_deref());
        if enabled.is_empty() {
            return Classification::Continuation;
        }

        for level in &enabled {
            if let Some(found) = self.grammar.match_level(*level, &fragment.text) {
                return Classification::Structural(ClassifiedFragment {
                    level: *level,
                    number: found.number,
                    qualifier: found.qualifier,
                    title: found.title,
                    text: found.text,
                });
            }
        }

        Classification::Ambiguous { enabled }
    }

    /// Checks a classification proposed by an extraction collaborator against the
    /// grammar: the level must be one the fragment's tag enables (when it enables
    /// any) and the level must exist in the grammar.
    pub fn accept_proposal(
        &self,
        fragment: &Fragment,
        mut proposal: ClassifiedFragment,
    ) -> Result<ClassifiedFragment, String> {
        proposal.number = proposal.number.trim().to_string();
        if proposal.number.is_empty() || proposal.number.contains(char::is_whitespace) {
            return Err(format!("invalid number '{}'", proposal.number));
        }

        let enabled = self.grammar.enabled_levels(fragment.tag.as_deref());
        if !enabled.is_empty() && !enabled.contains(&proposal.level) {
            return Err(format!(
                "level {} is not enabled by tag '{}'",
                proposal.level,
                fragment.tag.as_deref().unwrap_or_default()
            ));
        }

        if proposal.qualifier.is_none() {
            proposal.qualifier = self
                .grammar
                .default_qualifier(proposal.level)
                .ok_or_else(|| format!("level {} has no numbering patterns", proposal.level))?;
        }

        Ok(proposal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> FragmentClassifier {
        FragmentClassifier::new(Arc::new(NumberingGrammar::ontario_building_code().unwrap()))
    }

    #[test]
    fn test_classify_with_tags() {
        let classifier = classifier();

        let part = classifier
            .classify(&Fragment::tagged("Part 9 Housing", "part-tag"))
            .unwrap();
        assert_eq!(part.level, LevelKind::Part);
        assert_eq!(part.number, "9");

        let subsection = classifier
            .classify(&Fragment::tagged("9.1.1. Application", "article-tag"))
            .unwrap();
        assert_eq!(subsection.level, LevelKind::Subsection);

        let article = classifier
            .classify(&Fragment::tagged("9.1.1.1. Definitions", "article-tag"))
            .unwrap();
        assert_eq!(article.level, LevelKind::Article);
        assert_eq!(article.title.as_deref(), Some("Definitions"));
    }

    #[test]
    fn test_missing_tag_fails_closed() {
        let classifier = classifier();
        assert_eq!(
            classifier.classify_detailed(&Fragment::new("9.1. Scope")),
            Classification::Continuation
        );
        assert!(classifier.classify(&Fragment::new("(1) Sentence text")).is_none());
    }

    #[test]
    fn test_tag_without_match_is_ambiguous() {
        let classifier = classifier();
        let outcome = classifier.classify_detailed(&Fragment::tagged("houses only", "clause-tag"));
        assert_eq!(
            outcome,
            Classification::Ambiguous {
                enabled: vec![LevelKind::Clause]
            }
        );
        assert!(outcome.is_ambiguous());
    }

    #[test]
    fn test_unknown_tag_is_continuation() {
        let classifier = classifier();
        assert_eq!(
            classifier.classify_detailed(&Fragment::tagged("Part 9", "Normal-e")),
            Classification::Continuation
        );
    }

    #[test]
    fn test_accept_proposal() {
        let classifier = classifier();
        let fragment = Fragment::tagged("a) houses", "clause-tag");
        let proposal = ClassifiedFragment {
            level: LevelKind::Clause,
            number: " a ".into(),
            qualifier: None,
            title: None,
            text: Some("houses".into()),
        };
        let accepted = classifier.accept_proposal(&fragment, proposal.clone()).unwrap();
        assert_eq!(accepted.number, "a");
        assert_eq!(accepted.qualifier, Some(Qualifier::parenthesized("")));

        let wrong_level = ClassifiedFragment {
            level: LevelKind::Part,
            ..proposal
        };
        assert!(classifier.accept_proposal(&fragment, wrong_level).is_err());
    }
}

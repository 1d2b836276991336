use serde::{Deserialize, Serialize};

/// Structural nesting level of a regulatory document, ordered widest to narrowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelKind {
    Regulation,
    Division,
    Part,
    Section,
    Subsection,
    Article,
    Sentence,
    Clause,
    Subclause,
    Item,
}

impl LevelKind {
    pub const ALL: [Self; 10] = [
        Self::Regulation,
        Self::Division,
        Self::Part,
        Self::Section,
        Self::Subsection,
        Self::Article,
        Self::Sentence,
        Self::Clause,
        Self::Subclause,
        Self::Item,
    ];

    pub const COUNT: usize = Self::ALL.len();

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Regulation => "regulation",
            Self::Division => "division",
            Self::Part => "part",
            Self::Section => "section",
            Self::Subsection => "subsection",
            Self::Article => "article",
            Self::Sentence => "sentence",
            Self::Clause => "clause",
            Self::Subclause => "subclause",
            Self::Item => "item",
        }
    }

    /// Node label used in the graph and the schema registry.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Regulation => "Regulation",
            Self::Division => "Division",
            Self::Part => "Part",
            Self::Section => "Section",
            Self::Subsection => "Subsection",
            Self::Article => "Article",
            Self::Sentence => "Sentence",
            Self::Clause => "Clause",
            Self::Subclause => "Subclause",
            Self::Item => "Item",
        }
    }

    /// Position in the nesting order, 0 for the widest level.
    #[must_use]
    pub const fn depth(&self) -> usize {
        *self as usize
    }

    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.label() == label)
    }

    /// Levels strictly wider than this one, nearest first.
    pub fn ancestors(self) -> impl Iterator<Item = Self> {
        (0..self.depth()).rev().map(|depth| Self::ALL[depth])
    }
}

impl std::fmt::Display for LevelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LevelKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == s || level.label() == s)
            .ok_or_else(|| crate::Error::InvalidLevel(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        assert!(LevelKind::Regulation < LevelKind::Division);
        assert!(LevelKind::Part < LevelKind::Section);
        assert!(LevelKind::Article < LevelKind::Sentence);
        assert!(LevelKind::Subclause < LevelKind::Item);
        assert_eq!(LevelKind::Item.depth(), LevelKind::COUNT - 1);
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let ancestors: Vec<_> = LevelKind::Subsection.ancestors().collect();
        assert_eq!(
            ancestors,
            vec![
                LevelKind::Section,
                LevelKind::Part,
                LevelKind::Division,
                LevelKind::Regulation
            ]
        );
        assert_eq!(LevelKind::Regulation.ancestors().count(), 0);
    }

    #[test]
    fn test_parse_level_names_and_labels() {
        assert_eq!("clause".parse::<LevelKind>().unwrap(), LevelKind::Clause);
        assert_eq!("Article".parse::<LevelKind>().unwrap(), LevelKind::Article);
        assert!("chapter".parse::<LevelKind>().is_err());
        assert_eq!(LevelKind::from_label("Part"), Some(LevelKind::Part));
    }
}

//! Target Texts
//!
//! The word list a room races on and the categories texts are drawn from.

use std::fmt;
use serde::{Serialize, Deserialize};

/// Category a target text is drawn from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TextCategory {
    /// Common short words.
    #[serde(rename = "dictionary easy")]
    DictionaryEasy,
    /// Long, rarer words.
    #[serde(rename = "dictionary hard")]
    DictionaryHard,
    /// Short quotes.
    #[serde(rename = "quote easy")]
    QuoteEasy,
    /// Long quotes with punctuation.
    #[serde(rename = "quote hard")]
    QuoteHard,
}

impl TextCategory {
    /// Every category, in a fixed order.
    pub const ALL: [TextCategory; 4] = [
        TextCategory::DictionaryEasy,
        TextCategory::DictionaryHard,
        TextCategory::QuoteEasy,
        TextCategory::QuoteHard,
    ];

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            TextCategory::DictionaryEasy => "dictionary easy",
            TextCategory::DictionaryHard => "dictionary hard",
            TextCategory::QuoteEasy => "quote easy",
            TextCategory::QuoteHard => "quote hard",
        }
    }

    /// Parse a wire name.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl fmt::Display for TextCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The text participants race to type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetText {
    words: Vec<String>,
    category: TextCategory,
    source: String,
}

impl TargetText {
    /// Build from a word list. Returns `None` for an empty list or a list
    /// containing empty or whitespace-bearing words.
    pub fn from_words(
        words: Vec<String>,
        category: TextCategory,
        source: impl Into<String>,
    ) -> Option<Self> {
        let valid = !words.is_empty()
            && words.iter().all(|w| !w.is_empty() && !w.chars().any(char::is_whitespace));
        valid.then(|| Self {
            words,
            category,
            source: source.into(),
        })
    }

    /// Build from a space-separated string.
    pub fn from_text(text: &str, category: TextCategory, source: impl Into<String>) -> Option<Self> {
        let words = text.split_whitespace().map(String::from).collect();
        Self::from_words(words, category, source)
    }

    /// Ordered words.
    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Category the text was drawn from.
    pub fn category(&self) -> TextCategory {
        self.category
    }

    /// Attribution.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Length in chars of the words joined by single spaces.
    pub fn char_len(&self) -> usize {
        let letters: usize = self.words.iter().map(|w| w.chars().count()).sum();
        letters + self.words.len().saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_wire_names() {
        for category in TextCategory::ALL {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{}\"", category.as_str()));
            assert_eq!(TextCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(TextCategory::parse("poetry"), None);
    }

    #[test]
    fn test_target_text_rejects_empty() {
        assert!(TargetText::from_text("   ", TextCategory::QuoteEasy, "x").is_none());
        assert!(TargetText::from_words(vec!["a b".into()], TextCategory::QuoteEasy, "x").is_none());
        assert!(TargetText::from_words(vec![String::new()], TextCategory::QuoteEasy, "x").is_none());
    }

    #[test]
    fn test_char_len() {
        let text = TargetText::from_text("ab  cd", TextCategory::QuoteEasy, "x").unwrap();
        assert_eq!(text.words(), ["ab", "cd"]);
        assert_eq!(text.char_len(), 5);
    }
}

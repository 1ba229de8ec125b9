//! Text Provider
//!
//! Picks the text for a category. The builtin provider serves embedded
//! quotes and samples dictionary texts from embedded word lists.

use std::sync::Mutex;
use async_trait::async_trait;

use crate::core::rng::DeterministicRng;
use crate::game::text::{TargetText, TextCategory};

/// Words in a dictionary text.
pub const DICTIONARY_LENGTH: usize = 30;

/// Source of target texts.
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// A text from `category`, `None` if none is available.
    async fn get_text(&self, category: TextCategory) -> Option<TargetText>;
}

const EASY_QUOTES: &[(&str, &str)] = &[
    ("Well begun is half done.", "Aristotle"),
    ("Fortune favors the bold.", "Virgil"),
    ("The journey of a thousand miles begins with one step.", "Lao Tzu"),
    ("Knowledge is power.", "Francis Bacon"),
    ("Brevity is the soul of wit.", "William Shakespeare"),
    ("Little strokes fell great oaks.", "Benjamin Franklin"),
    ("Simplicity is the ultimate sophistication.", "Leonardo da Vinci"),
    ("Time is the wisest counsellor of all.", "Pericles"),
    ("What we think, we become.", "Buddha"),
    ("He who has a why to live can bear almost any how.", "Friedrich Nietzsche"),
];

const HARD_QUOTES: &[(&str, &str)] = &[
    (
        "It is not the critic who counts; not the man who points out how the strong man stumbles, or where the doer of deeds could have done them better.",
        "Theodore Roosevelt",
    ),
    (
        "I went to the woods because I wished to live deliberately, to front only the essential facts of life, and see if I could not learn what it had to teach.",
        "Henry David Thoreau",
    ),
    (
        "We hold these truths to be self-evident, that all men are created equal, that they are endowed by their Creator with certain unalienable Rights.",
        "Declaration of Independence",
    ),
    (
        "Whether 'tis nobler in the mind to suffer the slings and arrows of outrageous fortune, or to take arms against a sea of troubles.",
        "William Shakespeare",
    ),
    (
        "Four score and seven years ago our fathers brought forth on this continent, a new nation, conceived in Liberty, and dedicated to the proposition that all men are created equal.",
        "Abraham Lincoln",
    ),
];

const EASY_WORDS: &[&str] = &[
    "the", "be", "of", "and", "a", "to", "in", "he", "have", "it", "that", "for", "they", "with",
    "as", "not", "on", "she", "at", "by", "this", "we", "you", "do", "but", "from", "or", "which",
    "one", "would", "all", "will", "there", "say", "who", "make", "when", "can", "more", "if",
    "no", "man", "out", "other", "so", "what", "time", "up", "go", "about", "than", "into",
    "could", "state", "only", "new", "year", "some", "take", "come", "these", "know", "see",
    "use", "get", "like", "then", "first", "any", "work", "now", "may", "such", "give", "over",
    "think", "most", "even", "find", "day", "also", "after", "way", "many", "must", "look",
    "before", "great", "back", "through", "long", "where", "much", "should", "well", "people",
    "down", "own", "just", "because", "good", "each", "those", "feel", "seem", "how", "high",
    "too", "place", "little", "world", "very", "still", "nation", "hand", "old", "life", "tell",
];

const HARD_WORDS: &[&str] = &[
    "acquiesce", "belligerent", "cacophony", "deleterious", "ebullient", "fastidious",
    "gregarious", "harbinger", "idiosyncrasy", "juxtaposition", "kaleidoscope", "lackadaisical",
    "magnanimous", "nefarious", "obfuscate", "parsimonious", "quintessential", "recalcitrant",
    "sycophant", "tenacious", "ubiquitous", "vicissitude", "whimsical", "xenophobia",
    "zealous", "anachronism", "benevolent", "conscientious", "disparate", "ephemeral",
    "fortuitous", "garrulous", "hegemony", "impetuous", "laconic", "mellifluous",
    "nonchalant", "ostentatious", "perfunctory", "querulous", "rhetorical", "serendipity",
    "transient", "unequivocal", "vociferous", "wistful", "yearning", "zephyr",
    "accommodate", "bureaucracy", "conscience", "exhilarate", "guarantee", "inoculate",
    "millennium", "occurrence", "perseverance", "questionnaire", "rhythm", "threshold",
];

/// Texts compiled into the binary.
#[derive(Debug)]
pub struct BuiltinTextProvider {
    rng: Mutex<DeterministicRng>,
}

impl BuiltinTextProvider {
    /// Provider drawing from a seeded RNG.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(DeterministicRng::new(seed)),
        }
    }

    fn pick(&self, category: TextCategory) -> Option<TargetText> {
        let mut rng = self.rng.lock().ok()?;
        match category {
            TextCategory::QuoteEasy | TextCategory::QuoteHard => {
                let quotes = if category == TextCategory::QuoteEasy {
                    EASY_QUOTES
                } else {
                    HARD_QUOTES
                };
                let (text, source) = rng.choose(quotes)?;
                TargetText::from_text(text, category, *source)
            }
            TextCategory::DictionaryEasy | TextCategory::DictionaryHard => {
                let words = if category == TextCategory::DictionaryEasy {
                    EASY_WORDS
                } else {
                    HARD_WORDS
                };
                let text: Vec<String> = (0..DICTIONARY_LENGTH)
                    .filter_map(|_| rng.choose(words).map(|w| w.to_string()))
                    .collect();
                TargetText::from_words(text, category, "dictionary")
            }
        }
    }
}

impl Default for BuiltinTextProvider {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl TextProvider for BuiltinTextProvider {
    async fn get_text(&self, category: TextCategory) -> Option<TargetText> {
        self.pick(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_category_has_text() {
        let provider = BuiltinTextProvider::new(42);
        for category in TextCategory::ALL {
            let text = provider.get_text(category).await.unwrap();
            assert_eq!(text.category(), category);
            assert!(!text.words().is_empty());
        }
    }

    #[tokio::test]
    async fn test_dictionary_length() {
        let provider = BuiltinTextProvider::new(1);
        let text = provider.get_text(TextCategory::DictionaryHard).await.unwrap();
        assert_eq!(text.words().len(), DICTIONARY_LENGTH);
        assert!(text.words().iter().all(|w| HARD_WORDS.contains(&w.as_str())));
    }

    #[tokio::test]
    async fn test_same_seed_same_texts() {
        let a = BuiltinTextProvider::new(7);
        let b = BuiltinTextProvider::new(7);
        for _ in 0..5 {
            assert_eq!(
                a.get_text(TextCategory::DictionaryEasy).await,
                b.get_text(TextCategory::DictionaryEasy).await
            );
        }
    }

    #[test]
    fn test_corpus_has_no_blank_words() {
        for (text, _) in EASY_QUOTES.iter().chain(HARD_QUOTES) {
            assert!(TargetText::from_text(text, TextCategory::QuoteEasy, "x").is_some());
        }
        for word in EASY_WORDS.iter().chain(HARD_WORDS) {
            assert!(!word.is_empty() && !word.contains(' '));
        }
    }
}

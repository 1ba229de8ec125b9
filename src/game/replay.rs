//! Replays and Text Reconstruction
//!
//! A replay is the ordered log of one participant's edit events and the only
//! record of what they typed and when. [`reconstruct`] folds a replay into
//! the words it produces, committing a word only when it exactly matches the
//! next expected target word.

use std::iter;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::clock::Timestamp;

/// A single edit made by a participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EditEvent {
    /// A character typed at the caret.
    CharacterInsert {
        letter: char,
        timestamp: Timestamp,
    },
    /// Removal of `[start, end)` from the current word.
    RangeDelete {
        start: usize,
        end: usize,
        timestamp: Timestamp,
    },
    /// Caret placement, or a selection when `start != end`.
    CaretMove {
        start: usize,
        end: usize,
        timestamp: Timestamp,
    },
}

impl EditEvent {
    /// When the event happened on the client.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            EditEvent::CharacterInsert { timestamp, .. }
            | EditEvent::RangeDelete { timestamp, .. }
            | EditEvent::CaretMove { timestamp, .. } => *timestamp,
        }
    }

    /// Shorthand for a typed character.
    pub fn insert(letter: char, timestamp: Timestamp) -> Self {
        EditEvent::CharacterInsert { letter, timestamp }
    }
}

/// Replay errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    /// Event timestamps must strictly increase.
    #[error("event at {got} does not follow previous event at {previous}")]
    NonMonotonic {
        /// Timestamp of the preceding event.
        previous: Timestamp,
        /// Offending timestamp.
        got: Timestamp,
    },
}

/// Ordered edit-event log of one participant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replay {
    events: Vec<EditEvent>,
}

impl Replay {
    /// Empty replay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a replay from events, validating their order.
    pub fn from_events(events: Vec<EditEvent>) -> Result<Self, ReplayError> {
        let mut replay = Self::new();
        replay.append(&events)?;
        Ok(replay)
    }

    /// Append a batch. The whole batch is rejected if any timestamp fails to
    /// increase.
    pub fn append(&mut self, batch: &[EditEvent]) -> Result<(), ReplayError> {
        let mut previous = self.last_timestamp();
        for event in batch {
            let got = event.timestamp();
            if let Some(prev) = previous {
                if got <= prev {
                    return Err(ReplayError::NonMonotonic { previous: prev, got });
                }
            }
            previous = Some(got);
        }
        self.events.extend_from_slice(batch);
        Ok(())
    }

    /// Drop every event (round reset).
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing has been typed.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events in order.
    pub fn events(&self) -> &[EditEvent] {
        &self.events
    }

    /// Timestamp of the first event.
    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.events.first().map(EditEvent::timestamp)
    }

    /// Timestamp of the latest event.
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.events.last().map(EditEvent::timestamp)
    }

    /// Count of typed characters, correct or not.
    pub fn typed_chars(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, EditEvent::CharacterInsert { .. }))
            .count()
    }
}

// =============================================================================
// RECONSTRUCTION
// =============================================================================

/// Words produced by a replay.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reconstruction {
    /// Words committed against the target text.
    pub completed: Vec<String>,
    /// The word currently being typed (may be empty).
    pub in_progress: String,
}

impl Reconstruction {
    /// Completed words followed by the in-progress buffer.
    pub fn words(&self) -> Vec<&str> {
        self.completed
            .iter()
            .map(String::as_str)
            .chain(iter::once(self.in_progress.as_str()))
            .collect()
    }
}

/// Incremental fold of edit events against a target text.
#[derive(Debug)]
pub struct TextReconstructor<'a> {
    target: &'a [String],
    completed: Vec<String>,
    buffer: Vec<char>,
    cursor: usize,
}

impl<'a> TextReconstructor<'a> {
    /// Start folding against `target`.
    pub fn new(target: &'a [String]) -> Self {
        Self {
            target,
            completed: Vec::new(),
            buffer: Vec::new(),
            cursor: 0,
        }
    }

    /// Apply one event.
    pub fn apply(&mut self, event: &EditEvent) {
        match event {
            EditEvent::CharacterInsert { letter, .. } => {
                if *letter == ' ' && self.cursor == self.buffer.len() && self.buffer_is_expected_word() {
                    let word: String = self.buffer.drain(..).collect();
                    self.completed.push(word);
                    self.cursor = 0;
                } else {
                    self.buffer.insert(self.cursor, *letter);
                    self.cursor += 1;
                }
            }
            EditEvent::RangeDelete { start, end, .. } => {
                let len = self.buffer.len();
                let start = (*start).min(len);
                let end = (*end).min(len);
                if start < end {
                    self.buffer.drain(start..end);
                    if self.cursor >= end {
                        self.cursor -= end - start;
                    } else if self.cursor > start {
                        self.cursor = start;
                    }
                }
            }
            EditEvent::CaretMove { start, end, .. } => {
                // Selections leave the caret where it was
                if start == end {
                    self.cursor = (*start).min(self.buffer.len());
                }
            }
        }
    }

    /// Finish the fold.
    pub fn finish(self) -> Reconstruction {
        Reconstruction {
            completed: self.completed,
            in_progress: self.buffer.into_iter().collect(),
        }
    }

    fn buffer_is_expected_word(&self) -> bool {
        match self.target.get(self.completed.len()) {
            Some(word) => self.buffer.iter().copied().eq(word.chars()),
            None => false,
        }
    }
}

/// Fold a full event list against `target`.
pub fn reconstruct(events: &[EditEvent], target: &[String]) -> Reconstruction {
    let mut reconstructor = TextReconstructor::new(target);
    for event in events {
        reconstructor.apply(event);
    }
    reconstructor.finish()
}

/// Events that type `text` one character per millisecond from `start`.
#[cfg(test)]
pub(crate) fn typed(text: &str, start: Timestamp) -> Vec<EditEvent> {
    text.chars()
        .enumerate()
        .map(|(i, c)| EditEvent::insert(c, start + i as Timestamp))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn words(text: &str) -> Vec<String> {
        text.split(' ').map(String::from).collect()
    }

    #[test]
    fn test_exact_typing_commits_words() {
        let target = words("ab cd");
        let result = reconstruct(&typed("ab cd", 0), &target);
        assert_eq!(result.completed, vec!["ab"]);
        assert_eq!(result.in_progress, "cd");
        assert_eq!(result.words(), vec!["ab", "cd"]);
    }

    #[test]
    fn test_space_after_wrong_word_stays_in_buffer() {
        let target = words("ab cd");
        let result = reconstruct(&typed("ax c", 0), &target);
        assert!(result.completed.is_empty());
        assert_eq!(result.in_progress, "ax c");
    }

    #[test]
    fn test_delete_then_retype() {
        let target = words("ab cd");
        let mut events = typed("ax", 0);
        events.push(EditEvent::RangeDelete { start: 1, end: 2, timestamp: 10 });
        events.extend(typed("b c", 11));
        let result = reconstruct(&events, &target);
        assert_eq!(result.completed, vec!["ab"]);
        assert_eq!(result.in_progress, "c");
    }

    #[test]
    fn test_caret_move_inserts_mid_word() {
        let target = words("abc");
        let mut events = typed("ac", 0);
        events.push(EditEvent::CaretMove { start: 1, end: 1, timestamp: 5 });
        events.push(EditEvent::insert('b', 6));
        let result = reconstruct(&events, &target);
        assert_eq!(result.in_progress, "abc");
    }

    #[test]
    fn test_selection_does_not_move_caret() {
        let target = words("abc");
        let mut events = typed("ab", 0);
        events.push(EditEvent::CaretMove { start: 0, end: 2, timestamp: 5 });
        events.push(EditEvent::insert('c', 6));
        let result = reconstruct(&events, &target);
        assert_eq!(result.in_progress, "abc");
    }

    #[test]
    fn test_delete_out_of_range_is_clamped() {
        let target = words("ab");
        let mut events = typed("ab", 0);
        events.push(EditEvent::RangeDelete { start: 1, end: 50, timestamp: 5 });
        events.push(EditEvent::RangeDelete { start: 9, end: 3, timestamp: 6 });
        let result = reconstruct(&events, &target);
        assert_eq!(result.in_progress, "a");
    }

    #[test]
    fn test_space_mid_word_does_not_commit() {
        let target = words("ab cd");
        let mut events = typed("ab", 0);
        events.push(EditEvent::CaretMove { start: 1, end: 1, timestamp: 5 });
        events.push(EditEvent::insert(' ', 6));
        let result = reconstruct(&events, &target);
        assert!(result.completed.is_empty());
        assert_eq!(result.in_progress, "a b");
    }

    #[test]
    fn test_append_rejects_non_monotonic_batch() {
        let mut replay = Replay::from_events(typed("ab", 100)).unwrap();
        let err = replay.append(&[EditEvent::insert('c', 101)]).unwrap_err();
        assert_eq!(err, ReplayError::NonMonotonic { previous: 101, got: 101 });
        assert_eq!(replay.len(), 2);

        let batch = [EditEvent::insert('c', 110), EditEvent::insert('d', 105)];
        assert!(replay.append(&batch).is_err());
        assert_eq!(replay.len(), 2);
    }

    #[test]
    fn test_replay_accessors() {
        let mut replay = Replay::from_events(typed("abc", 50)).unwrap();
        replay.append(&[EditEvent::RangeDelete { start: 0, end: 1, timestamp: 60 }]).unwrap();
        assert_eq!(replay.first_timestamp(), Some(50));
        assert_eq!(replay.last_timestamp(), Some(60));
        assert_eq!(replay.typed_chars(), 3);
        replay.clear();
        assert!(replay.is_empty());
        assert_eq!(replay.first_timestamp(), None);
    }

    #[test]
    fn test_edit_event_wire_format() {
        let json = r#"{"type":"character_insert","letter":"a","timestamp":5}"#;
        let event: EditEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, EditEvent::insert('a', 5));

        let json = r#"{"type":"range_delete","start":0,"end":2,"timestamp":9}"#;
        let event: EditEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.timestamp(), 9);
    }

    fn arb_event() -> impl Strategy<Value = EditEvent> {
        prop_oneof![
            prop::sample::select(vec!['a', 'b', 'c', ' ']).prop_map(|c| EditEvent::insert(c, 0)),
            (0usize..6, 0usize..6).prop_map(|(s, e)| EditEvent::RangeDelete { start: s, end: e, timestamp: 0 }),
            (0usize..6, 0usize..6).prop_map(|(s, e)| EditEvent::CaretMove { start: s, end: e, timestamp: 0 }),
        ]
    }

    proptest! {
        #[test]
        fn prop_reconstruction_is_deterministic(events in prop::collection::vec(arb_event(), 0..60)) {
            let target = words("ab ba cab");
            let first = reconstruct(&events, &target);
            let second = reconstruct(&events, &target);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_completed_words_are_target_prefix(events in prop::collection::vec(arb_event(), 0..60)) {
            let target = words("ab ba cab");
            let result = reconstruct(&events, &target);
            prop_assert!(result.completed.len() <= target.len());
            for (word, expected) in result.completed.iter().zip(&target) {
                prop_assert_eq!(word, expected);
            }
        }
    }
}

//! Progress Scoring
//!
//! Compares reconstructed words with the target text and derives the numbers
//! every completion decision is made from: completed length, incorrect
//! characters, WPM and accuracy.

use crate::core::clock::Timestamp;
use crate::game::replay::{reconstruct, Replay};
use crate::game::text::TargetText;

/// Characters per "word" in WPM.
pub const CHARS_PER_WORD: f64 = 5.0;

/// Progress of one participant against the target text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    /// Characters of the target typed correctly, including separating spaces.
    pub completed_length: usize,
    /// Characters typed beyond the correct prefix.
    pub incorrect_chars: usize,
    /// Whether the whole target has been typed.
    pub is_finished: bool,
}

/// Score reconstructed `words` against `target`.
///
/// Walks the target in order. A word counts as completed only if it matches
/// and is not the last reconstructed word; the first mismatch contributes
/// its longest common prefix and stops the walk.
pub fn score_words(words: &[&str], target: &[String]) -> Progress {
    let mut correct: Vec<String> = Vec::new();

    for (i, expected) in target.iter().enumerate() {
        let Some(typed) = words.get(i) else {
            break;
        };

        if *typed == expected.as_str() && i + 1 < words.len() {
            correct.push(expected.clone());
            continue;
        }

        let prefix: String = expected
            .chars()
            .zip(typed.chars())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a)
            .collect();
        correct.push(prefix);
        break;
    }

    let completed_length = joined_len(correct.iter().map(String::as_str));
    let typed_length = joined_len(words.iter().copied());
    let target_length = joined_len(target.iter().map(String::as_str));

    Progress {
        completed_length,
        incorrect_chars: typed_length.saturating_sub(completed_length),
        is_finished: completed_length == target_length,
    }
}

/// Reconstruct `replay` and score it against `target`.
pub fn evaluate(replay: &Replay, target: &TargetText) -> Progress {
    let reconstruction = reconstruct(replay.events(), target.words());
    score_words(&reconstruction.words(), target.words())
}

/// Words per minute for `correct_chars` typed between `start` and `end`.
///
/// Zero or negative elapsed time yields 0.
pub fn wpm(end: Timestamp, start: Timestamp, correct_chars: usize) -> u32 {
    let elapsed_ms = end - start;
    if elapsed_ms <= 0 {
        return 0;
    }
    let minutes = elapsed_ms as f64 / 60_000.0;
    (correct_chars as f64 / CHARS_PER_WORD / minutes).round() as u32
}

/// Start time used for a participant's WPM.
///
/// The first keystroke counts, but never later than the room start plus
/// leniency, so a late first keystroke cannot shrink the elapsed time.
pub fn effective_start(
    first_event: Option<Timestamp>,
    room_start: Timestamp,
    leniency_ms: i64,
) -> Timestamp {
    let ceiling = room_start + leniency_ms;
    match first_event {
        Some(first) => first.min(ceiling),
        None => ceiling,
    }
}

/// Percentage of correct characters among everything typed.
pub fn accuracy(correct_chars: usize, incorrect_chars: usize) -> u32 {
    let total = correct_chars + incorrect_chars;
    if total == 0 {
        return 0;
    }
    ((correct_chars as f64 / total as f64) * 100.0).round() as u32
}

/// WPM and accuracy summary for one participant's round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundStats {
    /// Progress against the target.
    pub progress: Progress,
    /// Words per minute.
    pub wpm: u32,
    /// Accuracy percentage over every typed character.
    pub accuracy: u32,
}

/// Compute round statistics.
///
/// Finished participants are measured to their last keystroke; everyone else
/// to `now`.
pub fn round_stats(
    replay: &Replay,
    target: &TargetText,
    room_start: Timestamp,
    leniency_ms: i64,
    now: Timestamp,
) -> RoundStats {
    let progress = evaluate(replay, target);
    let start = effective_start(replay.first_timestamp(), room_start, leniency_ms);
    let end = if progress.is_finished {
        replay.last_timestamp().unwrap_or(now)
    } else {
        now
    };
    let correct = progress.completed_length;
    let incorrect = replay.typed_chars().saturating_sub(correct);

    RoundStats {
        progress,
        wpm: wpm(end, start, correct),
        accuracy: accuracy(correct, incorrect),
    }
}

fn joined_len<'a>(words: impl Iterator<Item = &'a str>) -> usize {
    let mut count: usize = 0;
    let mut total = 0;
    for word in words {
        total += word.chars().count();
        count += 1;
    }
    total + count.saturating_sub(1)
}

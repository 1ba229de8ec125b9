//! Completion Evaluation
//!
//! Pure decisions over a room's participants: whether a round is over, who
//! won it, and the final placement order. The room applies the outcome.

use std::cmp::Ordering;

use crate::core::clock::Timestamp;
use crate::game::events::RoundEnd;
use crate::game::participant::{Participant, PlayerId};
use crate::game::scoring::{round_stats, Progress, RoundStats};
use crate::game::text::TargetText;

/// A participant with their measured round.
#[derive(Clone, Copy, Debug)]
pub struct Entry<'a> {
    /// The participant.
    pub participant: &'a Participant,
    /// Their statistics for the current round.
    pub stats: RoundStats,
}

impl<'a> Entry<'a> {
    /// Measure `participant` at `now`. Rounds without a text or start time
    /// measure as zero.
    pub fn measure(
        participant: &'a Participant,
        target: Option<&TargetText>,
        start: Option<Timestamp>,
        leniency_ms: i64,
        now: Timestamp,
    ) -> Self {
        let stats = match (target, start) {
            (Some(target), Some(start)) => {
                round_stats(&participant.replay, target, start, leniency_ms, now)
            }
            _ => RoundStats {
                progress: Progress::default(),
                wpm: 0,
                accuracy: 0,
            },
        };
        Self { participant, stats }
    }

    /// Player id.
    pub fn id(&self) -> PlayerId {
        self.participant.id
    }

    fn finished(&self) -> bool {
        self.stats.progress.is_finished
    }

    fn last_event(&self) -> Option<Timestamp> {
        self.participant.replay.last_timestamp()
    }
}

/// Casual rounds end once every connected participant has finished.
pub fn casual_round_over(entries: &[Entry<'_>], force: bool) -> bool {
    force
        || entries
            .iter()
            .filter(|e| e.participant.connected)
            .all(Entry::finished)
}

/// Free-for-all rounds end once all but one participant are done.
/// Disconnected participants count as done.
pub fn free_for_all_over(entries: &[Entry<'_>], force: bool) -> bool {
    let done = entries
        .iter()
        .filter(|e| e.finished() || !e.participant.connected)
        .count();
    force || done + 1 >= entries.len()
}

/// Decide a head-to-head round.
///
/// A disconnect hands the round to the opponent. Otherwise both must have
/// finished, unless `force` is set, in which case the longer correct prefix
/// wins.
pub fn decide_head_to_head(
    a: &Entry<'_>,
    b: &Entry<'_>,
    force: bool,
) -> Option<(PlayerId, RoundEnd)> {
    match (a.participant.connected, b.participant.connected) {
        (true, false) => return Some((a.id(), RoundEnd::Forfeit)),
        (false, true) => return Some((b.id(), RoundEnd::Forfeit)),
        _ => {}
    }

    if a.finished() && b.finished() {
        let winner = if faster(a, b) == Ordering::Less { a } else { b };
        return Some((winner.id(), RoundEnd::Finished));
    }

    if !force {
        return None;
    }

    let winner = match further(a, b) {
        Ordering::Less => a,
        _ => b,
    };
    Some((winner.id(), RoundEnd::TimedOut))
}

/// Placement order, best first.
///
/// Connected participants rank ahead of disconnected ones, then by WPM.
pub fn placement_order<'a>(entries: &[Entry<'a>]) -> Vec<Entry<'a>> {
    let mut ranked = entries.to_vec();
    ranked.sort_by(|a, b| {
        b.participant
            .connected
            .cmp(&a.participant.connected)
            .then_with(|| faster(a, b))
    });
    ranked
}

/// Higher WPM first, then the earlier last keystroke, then the smaller id.
fn faster(a: &Entry<'_>, b: &Entry<'_>) -> Ordering {
    b.stats
        .wpm
        .cmp(&a.stats.wpm)
        .then_with(|| earlier(a.last_event(), b.last_event()))
        .then_with(|| a.id().cmp(&b.id()))
}

/// Longer correct prefix first, then the same tie-breaks as [`faster`].
fn further(a: &Entry<'_>, b: &Entry<'_>) -> Ordering {
    b.stats
        .progress
        .completed_length
        .cmp(&a.stats.progress.completed_length)
        .then_with(|| faster(a, b))
}

/// Present timestamps before absent ones, earlier before later.
fn earlier(a: Option<Timestamp>, b: Option<Timestamp>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::participant::Profile;
    use crate::game::replay::{typed, EditEvent, Replay};
    use crate::game::text::TextCategory;

    const START: Timestamp = 10_000;
    const LENIENCY: i64 = 2_000;

    fn participant(n: u8, replay: Vec<EditEvent>) -> Participant {
        let mut p = Participant::from_profile(&Profile {
            id: PlayerId::new([n; 16]),
            name: format!("p{n}"),
            rating: 600,
            avatar: None,
        });
        p.replay = Replay::from_events(replay).unwrap();
        p
    }

    /// Types `text` with `gap` ms between keystrokes.
    fn paced(text: &str, gap: i64) -> Vec<EditEvent> {
        text.chars()
            .enumerate()
            .map(|(i, c)| EditEvent::insert(c, START + 1 + i as i64 * gap))
            .collect()
    }

    fn target() -> TargetText {
        TargetText::from_text("ab cd", TextCategory::QuoteEasy, "test").unwrap()
    }

    fn entry<'a>(p: &'a Participant, target: &TargetText, now: Timestamp) -> Entry<'a> {
        Entry::measure(p, Some(target), Some(START), LENIENCY, now)
    }

    #[test]
    fn test_disconnect_forfeits_round() {
        let target = target();
        let a = participant(1, vec![]);
        let mut b = participant(2, paced("ab cd", 100));
        b.connected = false;

        let verdict = decide_head_to_head(&entry(&a, &target, START), &entry(&b, &target, START), false);
        assert_eq!(verdict, Some((a.id, RoundEnd::Forfeit)));
    }

    #[test]
    fn test_faster_finisher_wins() {
        let target = target();
        let a = participant(1, paced("ab cd", 300));
        let b = participant(2, paced("ab cd", 100));
        let now = START + 5_000;

        let verdict = decide_head_to_head(&entry(&a, &target, now), &entry(&b, &target, now), false);
        assert_eq!(verdict, Some((b.id, RoundEnd::Finished)));
    }

    #[test]
    fn test_one_finisher_waits_unless_forced() {
        let target = target();
        let a = participant(1, paced("ab cd", 100));
        let b = participant(2, paced("ab c", 100));
        let now = START + 5_000;
        let (ea, eb) = (entry(&a, &target, now), entry(&b, &target, now));

        assert_eq!(decide_head_to_head(&ea, &eb, false), None);
        assert_eq!(decide_head_to_head(&ea, &eb, true), Some((a.id, RoundEnd::TimedOut)));
    }

    #[test]
    fn test_forced_round_uses_completed_length() {
        let target = target();
        let a = participant(1, paced("ab", 100));
        let b = participant(2, paced("ab c", 500));
        let now = START + 5_000;

        let verdict = decide_head_to_head(&entry(&a, &target, now), &entry(&b, &target, now), true);
        assert_eq!(verdict, Some((b.id, RoundEnd::TimedOut)));
    }

    #[test]
    fn test_wpm_tie_broken_by_earlier_finish_then_id() {
        let target = TargetText::from_text("abcde", TextCategory::QuoteEasy, "test").unwrap();
        // Same elapsed time, so same WPM
        let a = participant(2, typed("abcde", START));
        let b = participant(1, typed("abcde", START));
        let now = START + 1_000;

        let verdict = decide_head_to_head(&entry(&a, &target, now), &entry(&b, &target, now), false);
        assert_eq!(verdict, Some((b.id, RoundEnd::Finished)));
    }

    #[test]
    fn test_casual_round_ignores_disconnected() {
        let target = target();
        let a = participant(1, paced("ab cd", 100));
        let mut b = participant(2, vec![]);
        b.connected = false;
        let now = START + 5_000;

        assert!(casual_round_over(&[entry(&a, &target, now), entry(&b, &target, now)], false));
        b.connected = true;
        assert!(!casual_round_over(&[entry(&a, &target, now), entry(&b, &target, now)], false));
    }

    #[test]
    fn test_free_for_all_over_with_one_left() {
        let target = target();
        let a = participant(1, paced("ab cd", 100));
        let mut b = participant(2, vec![]);
        let c = participant(3, paced("ab", 100));
        let now = START + 5_000;

        let entries = [entry(&a, &target, now), entry(&b, &target, now), entry(&c, &target, now)];
        assert!(!free_for_all_over(&entries, false));

        b.connected = false;
        let entries = [entry(&a, &target, now), entry(&b, &target, now), entry(&c, &target, now)];
        assert!(free_for_all_over(&entries, false));

        let order: Vec<_> = placement_order(&entries).iter().map(Entry::id).collect();
        assert_eq!(order, vec![a.id, c.id, b.id]);
    }
}

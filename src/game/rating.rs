//! ELO Rating Updates
//!
//! Pairwise ELO with a fixed K factor. Head-to-head matches update the two
//! players once; free-for-all placements update each rank-adjacent pair and
//! sum the deltas per player.

use serde::{Serialize, Deserialize};

use crate::game::participant::PlayerId;

/// ELO K factor.
pub const K_FACTOR: f64 = 32.0;

/// Probability that a player rated `rating` beats one rated `opponent`.
pub fn expected_score(rating: i32, opponent: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - rating) as f64 / 400.0))
}

/// Unrounded rating delta for a single pairing.
///
/// `won` is the actual score (1 for a win, 0 for a loss).
pub fn rating_delta(rating: i32, opponent: i32, won: bool, k_factor: f64) -> f64 {
    let actual = if won { 1.0 } else { 0.0 };
    k_factor * (actual - expected_score(rating, opponent))
}

/// Rating after a single pairing.
pub fn new_rating(rating: i32, opponent: i32, won: bool, k_factor: f64) -> i32 {
    (rating as f64 + rating_delta(rating, opponent, won, k_factor)).round() as i32
}

/// Outcome of a rating update for one player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingChange {
    /// Player identifier.
    pub id: PlayerId,
    /// Rating before the match.
    pub old_rating: i32,
    /// Rating after the match.
    pub new_rating: i32,
}

impl RatingChange {
    /// Signed change.
    pub fn delta(&self) -> i32 {
        self.new_rating - self.old_rating
    }
}

/// Update both sides of a decided head-to-head match.
pub fn head_to_head(
    winner: (PlayerId, i32),
    loser: (PlayerId, i32),
    k_factor: f64,
) -> [RatingChange; 2] {
    let (winner_id, winner_rating) = winner;
    let (loser_id, loser_rating) = loser;
    [
        RatingChange {
            id: winner_id,
            old_rating: winner_rating,
            new_rating: new_rating(winner_rating, loser_rating, true, k_factor),
        },
        RatingChange {
            id: loser_id,
            old_rating: loser_rating,
            new_rating: new_rating(loser_rating, winner_rating, false, k_factor),
        },
    ]
}

/// Update every player of a free-for-all from its final placement order
/// (best first).
///
/// Each rank-adjacent pair is scored as a win for the higher placement.
/// Deltas are computed from pre-match ratings, summed per player and rounded
/// once.
pub fn adjacent_pairs(placements: &[(PlayerId, i32)], k_factor: f64) -> Vec<RatingChange> {
    let mut deltas = vec![0.0f64; placements.len()];

    for (i, pair) in placements.windows(2).enumerate() {
        let (_, upper) = pair[0];
        let (_, lower) = pair[1];
        deltas[i] += rating_delta(upper, lower, true, k_factor);
        deltas[i + 1] += rating_delta(lower, upper, false, k_factor);
    }

    placements
        .iter()
        .zip(deltas)
        .map(|(&(id, rating), delta)| RatingChange {
            id,
            old_rating: rating,
            new_rating: (rating as f64 + delta).round() as i32,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(n: u8) -> PlayerId {
        PlayerId::new([n; 16])
    }

    #[test]
    fn test_equal_ratings() {
        assert!((expected_score(1000, 1000) - 0.5).abs() < 1e-12);
        let [w, l] = head_to_head((id(1), 1000), (id(2), 1000), K_FACTOR);
        assert_eq!(w.new_rating, 1016);
        assert_eq!(l.new_rating, 984);
    }

    #[test]
    fn test_underdog_gains_more() {
        let [upset_winner, _] = head_to_head((id(1), 800), (id(2), 1200), K_FACTOR);
        let [favourite_winner, _] = head_to_head((id(2), 1200), (id(1), 800), K_FACTOR);
        assert!(upset_winner.delta() > favourite_winner.delta());
        assert_eq!(upset_winner.delta(), 29);
        assert_eq!(favourite_winner.delta(), 3);
    }

    #[test]
    fn test_adjacent_pairs_three_players() {
        let changes = adjacent_pairs(&[(id(1), 1000), (id(2), 1000), (id(3), 1000)], K_FACTOR);
        assert_eq!(changes[0].new_rating, 1016);
        // Middle player wins one and loses one
        assert_eq!(changes[1].new_rating, 1000);
        assert_eq!(changes[2].new_rating, 984);
    }

    #[test]
    fn test_adjacent_pairs_two_players_matches_head_to_head() {
        let ffa = adjacent_pairs(&[(id(1), 900), (id(2), 1100)], K_FACTOR);
        let [w, l] = head_to_head((id(1), 900), (id(2), 1100), K_FACTOR);
        assert_eq!(ffa, vec![w, l]);
    }

    #[test]
    fn test_adjacent_pairs_empty_and_single() {
        assert!(adjacent_pairs(&[], K_FACTOR).is_empty());
        let single = adjacent_pairs(&[(id(1), 700)], K_FACTOR);
        assert_eq!(single[0].new_rating, 700);
    }

    proptest! {
        #[test]
        fn prop_expected_scores_sum_to_one(a in 0i32..3000, b in 0i32..3000) {
            let sum = expected_score(a, b) + expected_score(b, a);
            prop_assert!((sum - 1.0).abs() < 1e-9);
        }

        #[test]
        fn prop_winner_gain_mirrors_loser_loss(a in 0i32..3000, b in 0i32..3000) {
            let gain = rating_delta(a, b, true, K_FACTOR);
            let loss = rating_delta(b, a, false, K_FACTOR);
            prop_assert!((gain + loss).abs() < 1e-9);
            prop_assert!(gain >= 0.0);
        }
    }
}

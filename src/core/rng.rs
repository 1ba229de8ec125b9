//! Deterministic Random Number Generator
//!
//! Xorshift128+ seeded through SplitMix64. Every room owns one, seeded from
//! its id and participants, so automatic pick/ban choices are reproducible
//! from the room's identity alone.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

/// Deterministic PRNG using Xorshift128+ algorithm.
///
/// # Example
///
/// ```
/// use typerace::core::rng::DeterministicRng;
///
/// let mut a = DeterministicRng::new(12345);
/// let mut b = DeterministicRng::new(12345);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Xorshift must never start from the all-zero state
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Create the RNG for a room from its id and participant ids.
    pub fn for_room(room_id: &[u8; 16], participant_ids: &[[u8; 16]]) -> Self {
        Self::new(derive_room_seed(room_id, participant_ids))
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        // Modulo bias is negligible for the small ranges used here
        (self.next_u64() % max as u64) as u32
    }

    /// Select a random element from a slice.
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            let idx = self.next_int(slice.len() as u32) as usize;
            Some(&slice[idx])
        }
    }
}

/// SplitMix64 for seed initialization.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive a room seed from its id and participants.
///
/// `participant_ids` is sorted before hashing so join order does not matter.
pub fn derive_room_seed(room_id: &[u8; 16], participant_ids: &[[u8; 16]]) -> u64 {
    let mut sorted = participant_ids.to_vec();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(b"TYPERACE_ROOM_SEED_V1");
    hasher.update(room_id);
    for pid in &sorted {
        hasher.update(pid);
    }
    let hash = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = DeterministicRng::new(42);
        let mut b = DeterministicRng::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn test_different_seeds_diverge() {
        let mut a = DeterministicRng::new(1);
        let mut b = DeterministicRng::new(2);
        let same = (0..32).filter(|_| a.next_u64() == b.next_u64()).count();
        assert!(same < 32);
    }

    #[test]
    fn test_next_int_bounds() {
        let mut rng = DeterministicRng::new(7);
        for _ in 0..1000 {
            assert!(rng.next_int(4) < 4);
        }
        assert_eq!(rng.next_int(0), 0);
    }

    #[test]
    fn test_choose_empty_and_single() {
        let mut rng = DeterministicRng::new(7);
        let empty: [u8; 0] = [];
        assert!(rng.choose(&empty).is_none());
        assert_eq!(rng.choose(&[9]), Some(&9));
    }

    #[test]
    fn test_choose_covers_every_element() {
        let mut rng = DeterministicRng::new(99);
        let items = [0usize, 1, 2, 3];
        let mut seen = [false; 4];
        for _ in 0..200 {
            seen[*rng.choose(&items).unwrap()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_room_seed_ignores_participant_order() {
        let room = [3u8; 16];
        let a = derive_room_seed(&room, &[[1; 16], [2; 16]]);
        let b = derive_room_seed(&room, &[[2; 16], [1; 16]]);
        assert_eq!(a, b);
        assert_ne!(a, derive_room_seed(&[4u8; 16], &[[1; 16], [2; 16]]));
    }
}

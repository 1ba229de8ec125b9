//! Match Clock
//!
//! Wall-clock milliseconds anchored to a tokio `Instant`. Client edit events
//! carry epoch-millisecond timestamps, so rooms reason in the same unit, while
//! timers still run on tokio's clock (and follow `tokio::time::pause` in tests).

use std::time::Duration;
use tokio::time::Instant;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Clock shared by every room and timer of one service.
#[derive(Debug, Clone, Copy)]
pub struct MatchClock {
    origin_ms: Timestamp,
    origin: Instant,
}

impl MatchClock {
    /// Clock anchored to the current system time.
    pub fn system() -> Self {
        Self::starting_at(chrono::Utc::now().timestamp_millis())
    }

    /// Clock whose current reading is `origin_ms`.
    pub fn starting_at(origin_ms: Timestamp) -> Self {
        Self {
            origin_ms,
            origin: Instant::now(),
        }
    }

    /// Current time in epoch milliseconds.
    pub fn now_ms(&self) -> Timestamp {
        let elapsed = self.origin.elapsed().as_millis() as Timestamp;
        self.origin_ms + elapsed
    }

    /// Tokio instant at which the clock will read `at`.
    ///
    /// Timestamps already in the past map to "now".
    pub fn instant_at(&self, at: Timestamp) -> Instant {
        let now = self.now_ms();
        let wait = at.saturating_sub(now).max(0) as u64;
        Instant::now() + Duration::from_millis(wait)
    }
}

impl Default for MatchClock {
    fn default() -> Self {
        Self::system()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_tokio_time() {
        let clock = MatchClock::starting_at(1_000);
        assert_eq!(clock.now_ms(), 1_000);

        tokio::time::advance(Duration::from_millis(2_500)).await;
        assert_eq!(clock.now_ms(), 3_500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_instant_at_past_is_now() {
        let clock = MatchClock::starting_at(10_000);
        let past = clock.instant_at(5_000);
        assert!(past <= Instant::now());

        let future = clock.instant_at(12_000);
        assert_eq!(future - Instant::now(), Duration::from_millis(2_000));
    }
}

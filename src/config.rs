//! Game Configuration
//!
//! Room sizes, timings, matchmaking bands and admission limits. Defaults are
//! the production values; every field can be overridden from `TYPERACE_*`
//! environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::game::room::RoomRules;
use crate::game::text::TextCategory;

/// Casual lobby settings.
#[derive(Clone, Debug, PartialEq)]
pub struct CasualConfig {
    /// Seats per room.
    pub max_room_size: usize,
    /// Room creation to start, in ms.
    pub countdown_ms: i64,
    /// Joins close when the start is this close, in ms.
    pub min_join_lead_ms: i64,
    /// Category casual texts are drawn from.
    pub text_category: TextCategory,
}

impl Default for CasualConfig {
    fn default() -> Self {
        Self {
            max_room_size: 5,
            countdown_ms: 7_000,
            min_join_lead_ms: 3_000,
            text_category: TextCategory::QuoteEasy,
        }
    }
}

/// How ranked players are grouped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RankedFormat {
    /// 1v1 best-of-N with category pick/ban.
    HeadToHead,
    /// One round among `group_size` players.
    FreeForAll {
        /// Players per room.
        group_size: usize,
    },
}

impl RankedFormat {
    /// Players per ranked room.
    pub fn group_size(&self) -> usize {
        match self {
            RankedFormat::HeadToHead => 2,
            RankedFormat::FreeForAll { group_size } => (*group_size).max(2),
        }
    }
}

/// Ranked match settings.
#[derive(Clone, Debug, PartialEq)]
pub struct RankedConfig {
    /// Rounds per head-to-head series.
    pub best_of: u32,
    /// Text assignment to start, in ms.
    pub countdown_ms: i64,
    /// Pick/ban decision window, in ms.
    pub decision_ms: i64,
    /// ELO K factor.
    pub k_factor: f64,
    /// Room format.
    pub format: RankedFormat,
}

impl Default for RankedConfig {
    fn default() -> Self {
        Self {
            best_of: 3,
            countdown_ms: 6_000,
            decision_ms: 20_000,
            k_factor: 32.0,
            format: RankedFormat::HeadToHead,
        }
    }
}

/// Ranked queue settings.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchmakingConfig {
    /// Band radius a ticket starts with.
    pub initial_radius: i32,
    /// Radius added per widening.
    pub band_step: i32,
    /// Seconds before the first widening.
    pub base_step_secs: f64,
    /// Growth factor of the widening interval.
    pub step_multiplier: f64,
    /// Pairing scan interval.
    pub tick: Duration,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            initial_radius: 0,
            band_step: 100,
            base_step_secs: 1.0,
            step_multiplier: 1.5,
            tick: Duration::from_secs(1),
        }
    }
}

/// Per-address connection throttling.
#[derive(Clone, Debug, PartialEq)]
pub struct RateLimitConfig {
    /// Sliding window length.
    pub window: Duration,
    /// Admissions allowed per window and address.
    pub max_attempts: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
            max_attempts: 10,
        }
    }
}

/// Everything the match service needs to know.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct GameConfig {
    /// Casual lobbies.
    pub casual: CasualConfig,
    /// Ranked matches.
    pub ranked: RankedConfig,
    /// Ranked queue.
    pub matchmaking: MatchmakingConfig,
    /// Admission throttling.
    pub rate_limit: RateLimitConfig,
    /// Timing rules shared by every room.
    pub timing: TimingConfig,
}

/// Timings shared by both modes.
#[derive(Clone, Debug, PartialEq)]
pub struct TimingConfig {
    /// Latest a first keystroke may lag the start for WPM, in ms.
    pub start_leniency_ms: i64,
    /// Rounds are forced to end this long after the start, in ms.
    pub max_match_duration_ms: i64,
    /// Stale room sweep interval.
    pub sweep_interval: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            start_leniency_ms: 2_000,
            max_match_duration_ms: 120_000,
            sweep_interval: Duration::from_secs(5),
        }
    }
}

impl GameConfig {
    /// Defaults overridden by `TYPERACE_*` environment variables.
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        let casual = &mut config.casual;
        override_from_env("TYPERACE_CASUAL_MAX_ROOM_SIZE", &mut casual.max_room_size);
        override_from_env("TYPERACE_CASUAL_COUNTDOWN_MS", &mut casual.countdown_ms);
        override_from_env("TYPERACE_CASUAL_MIN_JOIN_LEAD_MS", &mut casual.min_join_lead_ms);
        if let Some(category) = env_var("TYPERACE_CASUAL_TEXT_CATEGORY").and_then(|v| TextCategory::parse(&v)) {
            casual.text_category = category;
        }

        let ranked = &mut config.ranked;
        override_from_env("TYPERACE_RANKED_BEST_OF", &mut ranked.best_of);
        override_from_env("TYPERACE_RANKED_COUNTDOWN_MS", &mut ranked.countdown_ms);
        override_from_env("TYPERACE_RANKED_DECISION_MS", &mut ranked.decision_ms);
        override_from_env("TYPERACE_RANKED_K_FACTOR", &mut ranked.k_factor);
        if env_var("TYPERACE_RANKED_FORMAT").as_deref() == Some("free_for_all") {
            let group_size = env_var("TYPERACE_RANKED_GROUP_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(4);
            ranked.format = RankedFormat::FreeForAll { group_size };
        }

        let matchmaking = &mut config.matchmaking;
        override_from_env("TYPERACE_MATCHMAKING_INITIAL_RADIUS", &mut matchmaking.initial_radius);
        override_from_env("TYPERACE_MATCHMAKING_BAND_STEP", &mut matchmaking.band_step);
        override_from_env("TYPERACE_MATCHMAKING_BASE_STEP_SECS", &mut matchmaking.base_step_secs);
        override_from_env("TYPERACE_MATCHMAKING_STEP_MULTIPLIER", &mut matchmaking.step_multiplier);
        override_millis_from_env("TYPERACE_MATCHMAKING_TICK_MS", &mut matchmaking.tick);

        let rate_limit = &mut config.rate_limit;
        override_millis_from_env("TYPERACE_RATE_LIMIT_WINDOW_MS", &mut rate_limit.window);
        override_from_env("TYPERACE_RATE_LIMIT_MAX_ATTEMPTS", &mut rate_limit.max_attempts);

        let timing = &mut config.timing;
        override_from_env("TYPERACE_START_LENIENCY_MS", &mut timing.start_leniency_ms);
        override_from_env("TYPERACE_MAX_MATCH_DURATION_MS", &mut timing.max_match_duration_ms);
        override_millis_from_env("TYPERACE_SWEEP_INTERVAL_MS", &mut timing.sweep_interval);

        config
    }

    /// Rules for a casual room.
    pub fn casual_rules(&self) -> RoomRules {
        RoomRules {
            max_participants: self.casual.max_room_size,
            countdown_ms: self.casual.countdown_ms,
            min_join_lead_ms: self.casual.min_join_lead_ms,
            start_leniency_ms: self.timing.start_leniency_ms,
            max_match_duration_ms: self.timing.max_match_duration_ms,
            decision_ms: self.ranked.decision_ms,
            best_of: 1,
            k_factor: self.ranked.k_factor,
        }
    }

    /// Rules for a ranked room.
    pub fn ranked_rules(&self) -> RoomRules {
        RoomRules {
            max_participants: self.ranked.format.group_size(),
            countdown_ms: self.ranked.countdown_ms,
            min_join_lead_ms: self.casual.min_join_lead_ms,
            start_leniency_ms: self.timing.start_leniency_ms,
            max_match_duration_ms: self.timing.max_match_duration_ms,
            decision_ms: self.ranked.decision_ms,
            best_of: self.ranked.best_of.max(1),
            k_factor: self.ranked.k_factor,
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn override_from_env<T: FromStr>(key: &str, field: &mut T) {
    if let Some(value) = env_var(key).and_then(|v| v.parse().ok()) {
        *field = value;
    }
}

fn override_millis_from_env(key: &str, field: &mut Duration) {
    if let Some(ms) = env_var(key).and_then(|v| v.parse::<u64>().ok()) {
        *field = Duration::from_millis(ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GameConfig::default();
        assert_eq!(config.casual.max_room_size, 5);
        assert_eq!(config.casual.countdown_ms, 7_000);
        assert_eq!(config.ranked.countdown_ms, 6_000);
        assert_eq!(config.ranked.best_of, 3);
        assert_eq!(config.ranked.decision_ms, 20_000);
        assert_eq!(config.matchmaking.band_step, 100);
        assert_eq!(config.timing.max_match_duration_ms, 120_000);
        assert_eq!(config.timing.sweep_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_rules_per_mode() {
        let config = GameConfig::default();
        let casual = config.casual_rules();
        assert_eq!(casual.max_participants, 5);
        assert_eq!(casual.countdown_ms, 7_000);

        let ranked = config.ranked_rules();
        assert_eq!(ranked.max_participants, 2);
        assert_eq!(ranked.countdown_ms, 6_000);
        assert_eq!(ranked.best_of, 3);
    }

    #[test]
    fn test_free_for_all_group_size_floor() {
        assert_eq!(RankedFormat::FreeForAll { group_size: 1 }.group_size(), 2);
        assert_eq!(RankedFormat::FreeForAll { group_size: 4 }.group_size(), 4);
        assert_eq!(RankedFormat::HeadToHead.group_size(), 2);
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("TYPERACE_CASUAL_MAX_ROOM_SIZE", "8");
        std::env::set_var("TYPERACE_RANKED_K_FACTOR", "not-a-number");
        let config = GameConfig::from_env();
        std::env::remove_var("TYPERACE_CASUAL_MAX_ROOM_SIZE");
        std::env::remove_var("TYPERACE_RANKED_K_FACTOR");

        assert_eq!(config.casual.max_room_size, 8);
        assert_eq!(config.ranked.k_factor, 32.0);
    }
}

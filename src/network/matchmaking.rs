//! Ranked Matchmaking Queue
//!
//! Waiting pool for ranked players. Each ticket searches a rating band
//! centred on its own rating that widens on a geometric schedule. Two
//! tickets pair only when each rating lies inside the other's band.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::MatchmakingConfig;
use crate::game::participant::{PlayerId, Profile};

/// Matchmaking errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchmakingError {
    /// Player already has a ticket.
    #[error("player {0} is already queued")]
    AlreadyQueued(PlayerId),
}

/// A queued ranked player.
#[derive(Debug, Clone)]
pub struct WaitingTicket {
    /// Profile snapshot at enqueue time.
    pub profile: Profile,
    /// When the ticket was created.
    pub enqueued_at: Instant,
    /// Current band half-width.
    pub band_radius: i32,
    /// Current widening interval, in seconds.
    pub step_secs: f64,
    /// Elapsed seconds at which the next widening happens.
    widen_at: f64,
}

impl WaitingTicket {
    /// New ticket with the initial band.
    pub fn new(profile: Profile, now: Instant, config: &MatchmakingConfig) -> Self {
        Self {
            profile,
            enqueued_at: now,
            band_radius: config.initial_radius.max(0),
            step_secs: config.base_step_secs,
            widen_at: config.base_step_secs,
        }
    }

    /// Player id.
    pub fn id(&self) -> PlayerId {
        self.profile.id
    }

    /// Inclusive rating band. The lower bound never drops below zero.
    pub fn band(&self) -> (i32, i32) {
        let rating = self.profile.rating;
        ((rating - self.band_radius).max(0), rating + self.band_radius)
    }

    /// Whether `rating` is inside the band.
    pub fn includes(&self, rating: i32) -> bool {
        let (min, max) = self.band();
        (min..=max).contains(&rating)
    }

    /// Widen once if the current interval has elapsed.
    ///
    /// Returns whether the band changed. At most one step per call.
    pub fn widen(&mut self, now: Instant, config: &MatchmakingConfig) -> bool {
        let elapsed = now.saturating_duration_since(self.enqueued_at).as_secs_f64();
        if elapsed < self.widen_at {
            return false;
        }
        self.band_radius = self.band_radius.saturating_add(config.band_step.max(0));
        self.step_secs *= config.step_multiplier.max(1.0);
        self.widen_at += self.step_secs;
        true
    }

    fn accepts(&self, other: &WaitingTicket) -> bool {
        self.includes(other.profile.rating) && other.includes(self.profile.rating)
    }
}

/// Result of one matchmaking tick.
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// Groups to seat together, each in enqueue order.
    pub groups: Vec<Vec<Profile>>,
    /// Band of every ticket still waiting.
    pub waiting: Vec<(PlayerId, (i32, i32))>,
}

/// The ranked waiting pool.
#[derive(Debug)]
pub struct MatchmakingQueue {
    config: MatchmakingConfig,
    group_size: usize,
    tickets: Mutex<Vec<WaitingTicket>>,
}

impl MatchmakingQueue {
    /// Queue forming groups of `group_size` (at least 2).
    pub fn new(config: MatchmakingConfig, group_size: usize) -> Self {
        Self {
            config,
            group_size: group_size.max(2),
            tickets: Mutex::new(Vec::new()),
        }
    }

    /// Add a ticket. Returns its initial band.
    pub async fn enqueue(&self, profile: Profile, now: Instant) -> Result<(i32, i32), MatchmakingError> {
        let mut tickets = self.tickets.lock().await;
        if tickets.iter().any(|t| t.id() == profile.id) {
            return Err(MatchmakingError::AlreadyQueued(profile.id));
        }
        let ticket = WaitingTicket::new(profile, now, &self.config);
        let band = ticket.band();
        tickets.push(ticket);
        Ok(band)
    }

    /// Drop `id`'s ticket. Returns whether one existed.
    pub async fn remove(&self, id: PlayerId) -> bool {
        let mut tickets = self.tickets.lock().await;
        let before = tickets.len();
        tickets.retain(|t| t.id() != id);
        tickets.len() != before
    }

    /// Whether `id` is queued.
    pub async fn contains(&self, id: PlayerId) -> bool {
        self.tickets.lock().await.iter().any(|t| t.id() == id)
    }

    /// Number of queued tickets.
    pub async fn len(&self) -> usize {
        self.tickets.lock().await.len()
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.tickets.lock().await.is_empty()
    }

    /// Tick interval.
    pub fn tick_interval(&self) -> Duration {
        self.config.tick
    }

    /// Widen every band, then pair.
    ///
    /// Matched tickets leave the queue inside the same critical section, so
    /// no ticket is handed out twice.
    pub async fn tick(&self, now: Instant) -> TickOutcome {
        let mut tickets = self.tickets.lock().await;
        for ticket in tickets.iter_mut() {
            ticket.widen(now, &self.config);
        }

        let mut outcome = TickOutcome::default();
        let mut matched = vec![false; tickets.len()];
        for i in 0..tickets.len() {
            if matched[i] {
                continue;
            }
            let mut group = vec![i];
            for j in (i + 1)..tickets.len() {
                if group.len() == self.group_size {
                    break;
                }
                if !matched[j] && group.iter().all(|&g| tickets[g].accepts(&tickets[j])) {
                    group.push(j);
                }
            }
            if group.len() == self.group_size {
                for &g in &group {
                    matched[g] = true;
                }
                outcome
                    .groups
                    .push(group.iter().map(|&g| tickets[g].profile.clone()).collect());
            }
        }

        let mut index = 0;
        tickets.retain(|_| {
            let keep = !matched[index];
            index += 1;
            keep
        });
        outcome.waiting = tickets.iter().map(|t| (t.id(), t.band())).collect();
        outcome
    }
}

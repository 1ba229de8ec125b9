//! Match Service
//!
//! Owns the room registry, the ranked queue, the delivery directory and the
//! admission gate, and drives rooms from client messages and timers.
//!
//! Every room operation runs under that room's lock, and the events it
//! returns are dispatched before the lock is released: messages go out
//! through the directory, decision timers are armed, texts are fetched and
//! ratings are persisted in the background.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{GameConfig, RankedFormat};
use crate::core::clock::MatchClock;
use crate::core::rng::DeterministicRng;
use crate::external::profiles::ProfileStore;
use crate::external::texts::TextProvider;
use crate::game::events::RoomEvent;
use crate::game::participant::{PlayerId, Profile};
use crate::game::pickban::Deadline;
use crate::game::room::{Room, RoomError, RoomId, RoomMode};
use crate::game::text::TextCategory;
use crate::network::admission::{AdmissionError, Identity, SessionAdmission};
use crate::network::auth::AuthConfig;
use crate::network::directory::{ConnectionDirectory, Outbound};
use crate::network::matchmaking::MatchmakingQueue;
use crate::network::protocol::{
    AuthRequest, ClientMessage, EditRequest, ErrorCode, ParticipantView, RatingEntry,
    RoomSnapshot, ServerError, ServerMessage,
};
use crate::network::registry::RoomRegistry;

/// What the connection should do after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading.
    Continue,
    /// Close the connection.
    Disconnect,
}

/// The match orchestration service.
pub struct MatchService {
    config: GameConfig,
    clock: MatchClock,
    registry: RoomRegistry,
    queue: MatchmakingQueue,
    directory: ConnectionDirectory,
    admission: SessionAdmission,
    profiles: Arc<dyn ProfileStore>,
    texts: Arc<dyn TextProvider>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MatchService {
    /// Create the service. Background loops start with [`MatchService::start`].
    pub fn new(
        config: GameConfig,
        auth: AuthConfig,
        profiles: Arc<dyn ProfileStore>,
        texts: Arc<dyn TextProvider>,
        clock: MatchClock,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            queue: MatchmakingQueue::new(config.matchmaking.clone(), config.ranked.format.group_size()),
            admission: SessionAdmission::new(auth, config.rate_limit.clone()),
            config,
            clock,
            registry: RoomRegistry::new(),
            directory: ConnectionDirectory::new(),
            profiles,
            texts,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the matchmaking and stale-room sweep loops.
    pub async fn start(self: &Arc<Self>) {
        let matchmaking = {
            let service = Arc::clone(self);
            tokio::spawn(async move { service.run_matchmaking_loop().await })
        };
        let sweep = {
            let service = Arc::clone(self);
            tokio::spawn(async move { service.run_sweep_loop().await })
        };
        self.tasks.lock().await.extend([matchmaking, sweep]);
        info!("Match service started");
    }

    /// Stop the background loops, signal connections and drop every room.
    pub async fn drain(&self) {
        let _ = self.shutdown_tx.send(());
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        let rooms = self.registry.handles().await;
        let count = rooms.len();
        for (id, _) in rooms {
            self.registry.remove(&id).await;
        }
        info!("Match service drained ({} rooms dropped)", count);
    }

    /// Receiver that fires when the service drains.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Game configuration.
    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Service clock.
    pub fn clock(&self) -> &MatchClock {
        &self.clock
    }

    /// Live rooms.
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Ranked queue.
    pub fn queue(&self) -> &MatchmakingQueue {
        &self.queue
    }

    // =========================================================================
    // CONNECTIONS
    // =========================================================================

    /// Admit a connection and open its outbox.
    pub async fn admit(
        &self,
        request: &AuthRequest,
        addr: IpAddr,
    ) -> Result<(Identity, mpsc::Receiver<Outbound>), AdmissionError> {
        let identity = self.admission.admit(request, addr, self.profiles.as_ref()).await?;
        let outbox = self.directory.register(identity.id()).await;
        info!(player = %identity.id().short(), name = %identity.profile.name, "Player admitted");
        Ok((identity, outbox))
    }

    /// Handle one message from an admitted connection.
    pub async fn handle(self: &Arc<Self>, identity: &Identity, message: ClientMessage) -> Flow {
        let id = identity.id();
        match message {
            ClientMessage::Auth(_) => {
                self.send_error(id, ErrorCode::InvalidMessage, "already authenticated").await;
                Flow::Continue
            }
            ClientMessage::Ping { timestamp } => {
                let pong = ServerMessage::Pong {
                    timestamp,
                    server_time: self.clock.now_ms(),
                };
                self.directory.send(id, pong).await;
                Flow::Continue
            }
            ClientMessage::Join { mode } => {
                self.handle_join(identity, mode).await;
                Flow::Continue
            }
            ClientMessage::Edit(edit) => self.handle_edit(id, edit).await,
            ClientMessage::CategoryBan { category } => {
                self.handle_pick_ban(id, category, Room::ban).await
            }
            ClientMessage::CategorySelect { category } => {
                self.handle_pick_ban(id, category, Room::select).await
            }
            ClientMessage::Leave => Flow::Disconnect,
        }
    }

    /// Tear down everything a closed connection held.
    ///
    /// The outbox goes first. Seating inserts the room before checking for
    /// an outbox, so either the seat forfeits the player or the room lookup
    /// below finds it. Admission is released last so a new session cannot
    /// register an outbox mid-teardown.
    pub async fn disconnect(self: &Arc<Self>, id: PlayerId) {
        self.directory.unregister(id).await;
        if self.queue.remove(id).await {
            debug!(player = %id.short(), "Removed from ranked queue");
        }
        if let Some(room_id) = self.registry.room_of(&id).await {
            if let Some(handle) = self.registry.get(&room_id).await {
                let mut room = handle.lock().await;
                let events = room.disconnect(id, self.clock.now_ms());
                self.dispatch(&mut room, events).await;
            }
            self.registry.release(id, room_id).await;
        }
        self.admission.release(id).await;
        info!(player = %id.short(), "Player disconnected");
    }

    /// Queue a message for `id`.
    pub async fn send_to(&self, id: PlayerId, message: ServerMessage) -> bool {
        self.directory.send(id, message).await
    }

    /// Ask `id`'s writer to close the socket once its outbox is flushed.
    pub async fn close(&self, id: PlayerId) -> bool {
        self.directory.close(id).await
    }

    async fn handle_join(self: &Arc<Self>, identity: &Identity, mode: RoomMode) {
        let id = identity.id();
        if self.registry.room_of(&id).await.is_some() || self.queue.contains(id).await {
            self.send_error(id, ErrorCode::AlreadyInRoom, "already in a room or queue").await;
            return;
        }
        match mode {
            RoomMode::Casual => self.join_casual(&identity.profile).await,
            RoomMode::Ranked if identity.guest => {
                self.send_error(id, ErrorCode::GuestNotAllowed, "sign in to play ranked").await;
            }
            RoomMode::Ranked => {
                let profile = self.current_profile(identity).await;
                let rating = profile.rating;
                match self.queue.enqueue(profile, Instant::now()).await {
                    Ok((band_min, band_max)) => {
                        info!(player = %id.short(), rating, "Queued for ranked");
                        self.directory
                            .send(id, ServerMessage::WaitingStatus { band_min, band_max })
                            .await;
                    }
                    Err(e) => self.send_error(id, ErrorCode::AlreadyInRoom, e.to_string()).await,
                }
            }
        }
    }

    /// Stored profile for `identity`. Ratings earned since admission live
    /// only in the store.
    async fn current_profile(&self, identity: &Identity) -> Profile {
        if identity.guest {
            return identity.profile.clone();
        }
        match self.profiles.get_profile(identity.id()).await {
            Ok(Some(profile)) => profile,
            Ok(None) => identity.profile.clone(),
            Err(e) => {
                warn!(player = %identity.id().short(), "Profile lookup failed, using admission snapshot: {}", e);
                identity.profile.clone()
            }
        }
    }

    async fn join_casual(self: &Arc<Self>, profile: &Profile) {
        let now = self.clock.now_ms();

        for handle in self.registry.casual_rooms().await {
            let mut room = handle.lock().await;
            if let Ok(events) = room.join(profile, now) {
                self.registry.assign(profile.id, room.id()).await;
                debug!(player = %profile.id.short(), room = %room.id().short(), "Joined casual room");
                self.dispatch(&mut room, events).await;
                return;
            }
        }

        let category = self.config.casual.text_category;
        let Some(text) = self.texts.get_text(category).await else {
            warn!(%category, "No text for a new casual room");
            self.send_error(profile.id, ErrorCode::MissingText, format!("no text available for {category}"))
                .await;
            return;
        };

        let mut room = Room::casual(RoomId::random(), self.config.casual_rules(), text, now);
        let events = match room.join(profile, now) {
            Ok(events) => events,
            Err(e) => {
                error!("Fresh casual room refused a join: {}", e);
                self.send_error(profile.id, ErrorCode::InternalError, e.to_string()).await;
                return;
            }
        };
        info!(room = %room.id().short(), "Created casual room");
        let handle = self.registry.insert(room).await;
        let mut room = handle.lock().await;
        self.dispatch(&mut room, events).await;
    }

    async fn handle_edit(self: &Arc<Self>, id: PlayerId, edit: EditRequest) -> Flow {
        if edit.participant_id != id {
            warn!(player = %id.short(), claimed = %edit.participant_id.short(), "Edit for another participant");
            self.send_error(id, ErrorCode::ProtocolViolation, "edits must be your own").await;
            return Flow::Disconnect;
        }
        let Some(handle) = self.room_handle(id).await else {
            return self.outside_room(id, "edit").await;
        };

        let mut room = handle.lock().await;
        match room.edit(id, edit.events, self.clock.now_ms()) {
            Ok(events) => {
                self.dispatch(&mut room, events).await;
                Flow::Continue
            }
            Err(e) => self.reject(id, &e).await,
        }
    }

    async fn handle_pick_ban(
        self: &Arc<Self>,
        id: PlayerId,
        category: TextCategory,
        action: fn(&mut Room, PlayerId, TextCategory, i64) -> Result<Vec<RoomEvent>, RoomError>,
    ) -> Flow {
        let Some(handle) = self.room_handle(id).await else {
            return self.outside_room(id, "pick/ban").await;
        };

        let mut room = handle.lock().await;
        match action(&mut room, id, category, self.clock.now_ms()) {
            Ok(events) => {
                self.dispatch(&mut room, events).await;
                Flow::Continue
            }
            Err(e) => self.reject(id, &e).await,
        }
    }

    /// Report a room error; fatal ones end the connection.
    async fn reject(&self, id: PlayerId, err: &RoomError) -> Flow {
        self.directory.send(id, ServerMessage::Error(ServerError::from(err))).await;
        if err.is_fatal() {
            warn!(player = %id.short(), "Protocol violation: {}", err);
            Flow::Disconnect
        } else {
            debug!(player = %id.short(), "Rejected: {}", err);
            Flow::Continue
        }
    }

    /// Room traffic from a player with no room is a protocol violation.
    async fn outside_room(&self, id: PlayerId, what: &str) -> Flow {
        warn!(player = %id.short(), "Protocol violation: {} outside a room", what);
        self.send_error(id, ErrorCode::ProtocolViolation, format!("{what} sent outside a room"))
            .await;
        Flow::Disconnect
    }

    async fn room_handle(&self, id: PlayerId) -> Option<Arc<Mutex<Room>>> {
        let room_id = self.registry.room_of(&id).await?;
        self.registry.get(&room_id).await
    }

    async fn send_error(&self, id: PlayerId, code: ErrorCode, message: impl Into<String>) {
        self.directory.send(id, ServerMessage::error(code, message)).await;
    }

    // =========================================================================
    // EVENT DISPATCH
    // =========================================================================

    /// Carry out the events a room operation produced. Runs under the room lock.
    async fn dispatch(self: &Arc<Self>, room: &mut Room, events: Vec<RoomEvent>) {
        let mut pending: VecDeque<RoomEvent> = events.into();

        while let Some(event) = pending.pop_front() {
            match event {
                RoomEvent::ParticipantJoined(joined) => {
                    let now = self.clock.now_ms();
                    let snapshot = ServerMessage::RoomSnapshot(RoomSnapshot::capture(room, now));
                    self.directory.send(joined, snapshot).await;
                    if let Some(p) = room.participant(&joined) {
                        let view = ServerMessage::NewParticipant(ParticipantView::new(p, room.mode()));
                        self.directory.broadcast(&others(room, joined), &view).await;
                    }
                }
                RoomEvent::ParticipantEdited { participant, events } => {
                    let msg = ServerMessage::ParticipantEdit {
                        participant_id: participant,
                        events,
                    };
                    self.directory.broadcast(&others(room, participant), &msg).await;
                }
                RoomEvent::ParticipantLeft(left) => {
                    self.registry.release(left, room.id()).await;
                    let msg = ServerMessage::ParticipantDisconnected { participant_id: left };
                    self.directory.broadcast(&room.connected_ids(), &msg).await;
                }
                RoomEvent::StateChanged => {
                    let now = self.clock.now_ms();
                    let snapshot = ServerMessage::RoomSnapshot(RoomSnapshot::capture(room, now));
                    self.directory.broadcast(&room.connected_ids(), &snapshot).await;
                }
                RoomEvent::DeadlineScheduled(deadline) => self.schedule_deadline(room.id(), deadline),
                RoomEvent::TextRequested(category) => {
                    let text = self.texts.get_text(category).await;
                    if text.is_none() {
                        warn!(room = %room.id().short(), %category, "Text provider returned nothing");
                    }
                    pending.extend(room.assign_text(text, self.clock.now_ms()));
                }
                RoomEvent::TextUnavailable(category) => {
                    let msg = ServerMessage::error(
                        ErrorCode::MissingText,
                        format!("no text available for {category}, pick again"),
                    );
                    self.directory.broadcast(&room.participant_ids(), &msg).await;
                }
                RoomEvent::RoundDecided { round, winner, reason } => {
                    info!(room = %room.id().short(), round, winner = %winner.short(), ?reason, "Round decided");
                }
                RoomEvent::MatchEnded(summary) => {
                    info!(
                        room = %room.id().short(),
                        winner = ?summary.winner.map(|w| w.short()),
                        "Match ended"
                    );
                    self.directory
                        .broadcast_final(&room.connected_ids(), &ServerMessage::MatchEnded(summary))
                        .await;
                }
                RoomEvent::RatingsChanged(changes) => {
                    for change in &changes {
                        self.persist_rating(change.id, change.new_rating);
                    }
                    let msg = ServerMessage::RatingUpdate {
                        ratings: changes.iter().map(RatingEntry::from).collect(),
                    };
                    self.directory.broadcast_final(&room.connected_ids(), &msg).await;
                }
                RoomEvent::Closed => {
                    // Results are already queued ahead of the close
                    for id in room.connected_ids() {
                        self.directory.close(id).await;
                    }
                    if self.registry.remove(&room.id()).await.is_some() {
                        info!(room = %room.id().short(), "Room closed");
                    }
                }
            }
        }
    }

    /// Arm a pick/ban decision timer. Stale versions are ignored by the room.
    fn schedule_deadline(self: &Arc<Self>, room_id: RoomId, deadline: Deadline) {
        let service = Arc::clone(self);
        let at = self.clock.instant_at(deadline.at);
        tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            service.fire_deadline(room_id, deadline).await;
        });
    }

    async fn fire_deadline(self: &Arc<Self>, room_id: RoomId, deadline: Deadline) {
        let Some(handle) = self.registry.get(&room_id).await else {
            return;
        };
        let mut room = handle.lock().await;
        // Never act before the deadline because of clock rounding
        let now = self.clock.now_ms().max(deadline.at);
        let events = room.on_deadline(deadline.version, now);
        if !events.is_empty() {
            debug!(room = %room_id.short(), version = deadline.version, "Decision deadline fired");
        }
        self.dispatch(&mut room, events).await;
    }

    /// Best-effort rating write. Failures are logged and never retried.
    fn persist_rating(&self, id: PlayerId, rating: i32) {
        let profiles = Arc::clone(&self.profiles);
        tokio::spawn(async move {
            if let Err(e) = profiles.update_rating(id, rating).await {
                warn!(player = %id.short(), rating, "Failed to persist rating: {}", e);
            }
        });
    }

    // =========================================================================
    // BACKGROUND LOOPS
    // =========================================================================

    async fn run_matchmaking_loop(self: Arc<Self>) {
        let mut ticker = interval(self.queue.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let outcome = self.queue.tick(Instant::now()).await;

            for (id, (band_min, band_max)) in outcome.waiting {
                self.directory
                    .send(id, ServerMessage::WaitingStatus { band_min, band_max })
                    .await;
            }
            for group in outcome.groups {
                self.create_ranked_room(group).await;
            }
        }
    }

    async fn run_sweep_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config.timing.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    /// Force-end every round that outlived the match duration limit.
    pub async fn sweep(self: &Arc<Self>) {
        for (_, handle) in self.registry.handles().await {
            let mut room = handle.lock().await;
            let events = room.sweep(self.clock.now_ms());
            if !events.is_empty() {
                info!(room = %room.id().short(), "Swept overdue round");
                self.dispatch(&mut room, events).await;
            }
        }
    }

    /// Seat a group the queue paired.
    pub async fn create_ranked_room(self: &Arc<Self>, group: Vec<Profile>) {
        let now = self.clock.now_ms();
        let id = RoomId::random();
        let rules = self.config.ranked_rules();

        let (room, events) = match (self.config.ranked.format, group.as_slice()) {
            (RankedFormat::HeadToHead, [first, second]) => Room::head_to_head(id, rules, first, second, now),
            (RankedFormat::FreeForAll { .. }, profiles) => {
                let mut rng = DeterministicRng::for_room(&id.0, &[]);
                let category = rng.choose(&TextCategory::ALL).copied().unwrap_or(TextCategory::QuoteEasy);
                let Some(text) = self.texts.get_text(category).await else {
                    warn!(%category, "No text for a free-for-all room, requeueing");
                    for profile in profiles {
                        if !self.directory.contains(profile.id).await {
                            continue;
                        }
                        self.send_error(profile.id, ErrorCode::MissingText, "no text available, still searching")
                            .await;
                        if let Err(e) = self.queue.enqueue(profile.clone(), Instant::now()).await {
                            warn!(player = %profile.id.short(), "Requeue failed: {}", e);
                            self.send_error(profile.id, ErrorCode::AlreadyInRoom, e.to_string()).await;
                        }
                    }
                    return;
                };
                let refs: Vec<&Profile> = profiles.iter().collect();
                (Room::free_for_all(id, rules, &refs, text, now), vec![RoomEvent::StateChanged])
            }
            (RankedFormat::HeadToHead, _) => {
                error!("Head-to-head pairing with {} players", group.len());
                return;
            }
        };

        let names: Vec<String> = group.iter().map(|p| p.id.short()).collect();
        info!(room = %id.short(), players = ?names, "Created ranked room");

        let handle = self.registry.insert(room).await;
        let mut room = handle.lock().await;
        let mut events = events;
        // Players who left between pairing and seating forfeit right away
        for profile in &group {
            if !self.directory.contains(profile.id).await {
                events.extend(room.disconnect(profile.id, now));
            }
        }
        self.dispatch(&mut room, events).await;
    }
}

/// Connected participants other than `id`.
fn others(room: &Room, id: PlayerId) -> Vec<PlayerId> {
    room.connected_ids().into_iter().filter(|p| *p != id).collect()
}

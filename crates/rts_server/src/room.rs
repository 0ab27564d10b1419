//! Rooms: one match, its seat table, and the task that drives it.
//!
//! [`Room`] is a plain state machine. Every mutation goes through its
//! methods, which take the current time where deadlines matter, so it can be
//! tested without a runtime. [`run_room`] is the task wrapped around it: it
//! owns the room, receives [`RoomEvent`]s from the lobby and connections, and
//! fires the tick, countdown and grace timers.
//!
//! # Lifecycle
//!
//! ```text
//! WAITING --start (host, >= 2 seats)--> COUNTDOWN --0--> RUNNING --> ENDED
//!    ^                                      |
//!    +-------- seat vacated ----------------+
//! ```
//!
//! Inbound commands are queued and applied only inside [`Room::tick`], in
//! arrival order, before the scripted opponents decide and before the engine
//! advances. Nothing else writes to the engine.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use rts_core::ai::{Difficulty, ScriptedOpponent};
use rts_core::commands::{apply_command, Command};
use rts_core::components::TeamId;
use rts_core::math::{ratio, Fixed};
use rts_core::simulation::{Engine, EngineConfig};
use rts_core::snapshot::EngineSnapshot;

use crate::network::Connection;
use crate::protocol::{CloseReason, ConnectionId, Identity, RoomStatus, SeatView, ServerMessage};
use crate::{RoomConfig, MAX_SEATS};

/// Length of a rejoin secret.
const SECRET_LEN: usize = 16;

// ============================================================================
// Errors
// ============================================================================

/// A refused room action. Each maps to the notice the requester receives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    /// No empty seat.
    #[error("room is full")]
    RoomFull,
    /// Seat composition is frozen once the countdown starts.
    #[error("room has already started")]
    AlreadyStarted,
    /// Seat index or secret did not match.
    #[error("rejoin rejected")]
    RejoinRejected,
    /// Privileged action from a non-host seat.
    #[error("only the host may do that")]
    NotHost,
    /// Start refused.
    #[error("cannot start: {0}")]
    CannotStart(String),
    /// Load with an empty save slot.
    #[error("nothing saved")]
    NothingSaved,
    /// The connection holds no seat here.
    #[error("not in this room")]
    NotInRoom,
    /// Match-only action outside a running match.
    #[error("no match is running")]
    NotRunning,
    /// AI assignment to a seat that cannot take it.
    #[error("seat {0} is not available")]
    SeatUnavailable(usize),
    /// The save slot held a snapshot the engine refused.
    #[error("saved game could not be restored: {0}")]
    Restore(String),
}

impl RoomError {
    /// The typed notice for this refusal.
    pub fn notice(&self) -> ServerMessage {
        match self {
            Self::RoomFull => ServerMessage::RoomFull,
            Self::AlreadyStarted => ServerMessage::AlreadyStarted,
            Self::RejoinRejected => ServerMessage::RejoinRejected,
            Self::NotHost => ServerMessage::NotHost,
            Self::CannotStart(reason) => ServerMessage::CannotStart {
                reason: reason.clone(),
            },
            Self::NothingSaved => ServerMessage::NothingSaved,
            Self::NotInRoom => ServerMessage::NotInRoom,
            Self::NotRunning | Self::SeatUnavailable(_) | Self::Restore(_) => ServerMessage::error(self.to_string()),
        }
    }
}

// ============================================================================
// Seats
// ============================================================================

/// A player's seat.
#[derive(Debug, Clone)]
pub struct HumanSeat {
    /// Display identity.
    pub identity: Identity,
    secret: String,
    connection: Connection,
    connected: bool,
    disconnect_deadline: Option<Instant>,
}

impl HumanSeat {
    fn new(identity: Identity, connection: Connection) -> Self {
        Self {
            identity,
            secret: new_secret(),
            connection,
            connected: true,
            disconnect_deadline: None,
        }
    }

    /// Whether the seat's connection is live.
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// When the seat is vacated (or the match ended) if nobody rejoins.
    pub const fn disconnect_deadline(&self) -> Option<Instant> {
        self.disconnect_deadline
    }
}

/// One slot of the seat table.
#[derive(Debug, Clone, Default)]
pub enum Seat {
    /// Free.
    #[default]
    Empty,
    /// Held by a player.
    Human(HumanSeat),
    /// Played by a scripted opponent.
    Ai {
        /// Preset.
        difficulty: Difficulty,
    },
}

impl Seat {
    /// Whether the seat takes part in a match.
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Empty)
    }

    fn view(&self) -> SeatView {
        match self {
            Self::Empty => SeatView::Empty,
            Self::Human(human) => SeatView::Human {
                name: human.identity.name.clone(),
                icon: human.identity.icon.clone(),
                connected: human.connected,
            },
            Self::Ai { difficulty } => SeatView::Ai {
                difficulty: *difficulty,
            },
        }
    }
}

fn new_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect()
}

/// Seat held by `connection`, live or not.
fn seat_by_connection(seats: &[Seat], connection: ConnectionId) -> Option<usize> {
    seats
        .iter()
        .position(|seat| matches!(seat, Seat::Human(human) if human.connection.id() == connection))
}

/// Team a seat plays as.
pub fn team_for_seat(seat: usize) -> TeamId {
    TeamId(seat as u8)
}

// ============================================================================
// Events
// ============================================================================

/// Host-only or seat-scoped requests that are not commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomRequest {
    /// Begin the countdown.
    Start,
    /// Suspend ticking.
    Pause,
    /// Resume ticking.
    Resume,
    /// Fill the save slot.
    Save,
    /// Restore from the save slot.
    Load,
    /// Change the sender's identity.
    UpdateIdentity {
        /// New name.
        name: Option<String>,
        /// New icon.
        icon: Option<String>,
    },
    /// Seat a scripted opponent.
    AssignAi {
        /// Seat index.
        seat: usize,
        /// Preset.
        difficulty: Difficulty,
    },
    /// Free an AI seat.
    RemoveAi {
        /// Seat index.
        seat: usize,
    },
}

impl RoomRequest {
    const fn requires_host(&self) -> bool {
        !matches!(self, Self::UpdateIdentity { .. })
    }
}

/// Everything a room task reacts to besides its own timers.
#[derive(Debug)]
pub enum RoomEvent {
    /// Take the first free seat.
    Join {
        /// Joining connection.
        connection: Connection,
        /// Requested identity.
        identity: Identity,
        /// Seat taken, or why not.
        reply: oneshot::Sender<Result<usize, RoomError>>,
    },
    /// Reclaim a seat with its secret.
    Rejoin {
        /// New connection.
        connection: Connection,
        /// Seat index.
        seat: usize,
        /// Rejoin secret.
        secret: String,
        /// Seat reclaimed, or why not.
        reply: oneshot::Sender<Result<usize, RoomError>>,
    },
    /// Give up the seat.
    Leave {
        /// Leaving connection.
        connection: ConnectionId,
    },
    /// The socket closed.
    Disconnected {
        /// Closed connection.
        connection: ConnectionId,
    },
    /// A non-command request.
    Request {
        /// Requesting connection.
        connection: Connection,
        /// The request.
        request: RoomRequest,
    },
    /// Intent for the sender's team, applied at the next tick.
    Command {
        /// Sending connection.
        connection: ConnectionId,
        /// The command.
        command: Command,
    },
    /// Server shutdown.
    Close,
}

// ============================================================================
// Room
// ============================================================================

/// State that only exists while a match runs.
#[derive(Debug)]
struct LiveMatch {
    engine: Engine,
    opponents: Vec<ScriptedOpponent>,
    paused: bool,
    /// Map version included in the last broadcast, if any.
    broadcast_version: Option<u64>,
}

/// One isolated match and its seat table.
#[derive(Debug)]
pub struct Room {
    code: String,
    config: RoomConfig,
    dt: Fixed,
    status: RoomStatus,
    seats: Vec<Seat>,
    countdown_remaining: u32,
    live: Option<LiveMatch>,
    saved_snapshot: Option<EngineSnapshot>,
    inbox: VecDeque<(ConnectionId, Command)>,
}

impl Room {
    /// An empty room.
    pub fn new(code: impl Into<String>, config: RoomConfig) -> Self {
        let seats = vec![Seat::Empty; config.seats.clamp(2, MAX_SEATS)];
        Self {
            code: code.into(),
            dt: ratio(1, config.tick_rate.max(1) as i32),
            config,
            status: RoomStatus::Waiting,
            seats,
            countdown_remaining: 0,
            live: None,
            saved_snapshot: None,
            inbox: VecDeque::new(),
        }
    }

    /// Open a room with its creator in seat 0.
    pub fn open(code: impl Into<String>, config: RoomConfig, connection: &Connection, identity: Identity) -> Self {
        let mut room = Self::new(code, config);
        room.seats[0] = Seat::Human(HumanSeat::new(identity, connection.clone()));
        info!(room = %room.code, connection = connection.id(), "Room created");

        if let Seat::Human(human) = &room.seats[0] {
            connection.send(&ServerMessage::RoomCreated {
                code: room.code.clone(),
                seat: 0,
                secret: human.secret.clone(),
                seats: room.seat_views(),
                status: room.status,
            });
        }
        room
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Join code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Lifecycle state.
    pub const fn status(&self) -> RoomStatus {
        self.status
    }

    /// Whether the room is finished.
    pub fn is_ended(&self) -> bool {
        self.status == RoomStatus::Ended
    }

    /// Whether a running match is paused.
    pub fn is_paused(&self) -> bool {
        self.live.as_ref().is_some_and(|live| live.paused)
    }

    /// Whether the tick timer should fire.
    pub fn is_ticking(&self) -> bool {
        self.status == RoomStatus::Running && !self.is_paused()
    }

    /// The seat table.
    pub fn seats(&self) -> &[Seat] {
        &self.seats
    }

    /// Lowest seat held by a player.
    pub fn host(&self) -> Option<usize> {
        self.seats.iter().position(|seat| matches!(seat, Seat::Human(_)))
    }

    /// Seats that will play when the match starts.
    pub fn active_seats(&self) -> usize {
        self.seats.iter().filter(|seat| seat.is_active()).count()
    }

    /// Seat of a live connection.
    pub fn seat_of(&self, connection: ConnectionId) -> Option<usize> {
        seat_by_connection(&self.seats, connection)
            .filter(|&seat| matches!(&self.seats[seat], Seat::Human(human) if human.connected))
    }

    /// The running engine.
    pub fn engine(&self) -> Option<&Engine> {
        self.live.as_ref().map(|live| &live.engine)
    }

    /// Whether the save slot is filled.
    pub fn has_save(&self) -> bool {
        self.saved_snapshot.is_some()
    }

    /// Earliest pending grace deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.seats
            .iter()
            .filter_map(|seat| match seat {
                Seat::Human(human) => human.disconnect_deadline,
                _ => None,
            })
            .min()
    }

    fn seat_views(&self) -> Vec<SeatView> {
        self.seats.iter().map(Seat::view).collect()
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    /// Send to every connected player. Encodes once.
    fn broadcast(&self, message: &ServerMessage) {
        let Some(text) = message.encode() else {
            return;
        };
        for seat in &self.seats {
            if let Seat::Human(human) = seat {
                if human.connected {
                    human.connection.send_encoded(text.clone());
                }
            }
        }
    }

    fn broadcast_update(&self) {
        self.broadcast(&ServerMessage::RoomUpdate {
            seats: self.seat_views(),
            status: self.status,
            host: self.host(),
        });
    }

    /// Broadcast the engine, leaving tiles out when the map version was
    /// already sent.
    fn broadcast_state(&mut self) {
        let Some(live) = self.live.as_mut() else {
            return;
        };
        let version = live.engine.map().version();
        let skip_tiles = live.broadcast_version == Some(version);
        live.broadcast_version = Some(version);
        let message = ServerMessage::State {
            snapshot: Box::new(live.engine.get_snapshot(skip_tiles)),
        };
        self.broadcast(&message);
    }

    // ------------------------------------------------------------------------
    // Seat management
    // ------------------------------------------------------------------------

    /// Seat a new player in the first empty seat.
    pub fn join(&mut self, connection: &Connection, identity: Identity) -> Result<usize, RoomError> {
        if self.status != RoomStatus::Waiting {
            return Err(RoomError::AlreadyStarted);
        }
        let seat = self
            .seats
            .iter()
            .position(|seat| matches!(seat, Seat::Empty))
            .ok_or(RoomError::RoomFull)?;

        let human = HumanSeat::new(identity, connection.clone());
        let secret = human.secret.clone();
        self.seats[seat] = Seat::Human(human);
        info!(room = %self.code, seat, connection = connection.id(), "Seat taken");

        connection.send(&ServerMessage::RoomJoined {
            code: self.code.clone(),
            seat,
            secret,
            seats: self.seat_views(),
            status: self.status,
        });
        self.broadcast_update();
        Ok(seat)
    }

    /// Re-attach a seat to a new connection.
    pub fn rejoin(&mut self, connection: &Connection, seat: usize, secret: &str) -> Result<usize, RoomError> {
        if self.is_ended() {
            return Err(RoomError::RejoinRejected);
        }
        let Some(Seat::Human(human)) = self.seats.get_mut(seat) else {
            return Err(RoomError::RejoinRejected);
        };
        if human.secret != secret {
            return Err(RoomError::RejoinRejected);
        }

        if human.connected && human.connection.id() != connection.id() {
            info!(room = %self.code, seat, displaced = human.connection.id(), "Seat taken over");
            human
                .connection
                .send(&ServerMessage::error("seat taken over by another connection"));
        }
        human.connection = connection.clone();
        human.connected = true;
        human.disconnect_deadline = None;
        let secret = human.secret.clone();
        info!(room = %self.code, seat, connection = connection.id(), "Seat rejoined");

        connection.send(&ServerMessage::RoomRejoined {
            code: self.code.clone(),
            seat,
            secret,
            seats: self.seat_views(),
            status: self.status,
        });
        connection.send(&ServerMessage::Resync {
            seat,
            status: self.status,
        });
        if self.status == RoomStatus::Running {
            if let Some(live) = &self.live {
                connection.send(&ServerMessage::State {
                    snapshot: Box::new(live.engine.get_snapshot(false)),
                });
            }
        }
        self.broadcast_update();
        Ok(seat)
    }

    /// A seat gives up. Ends a running match.
    pub fn leave(&mut self, connection: ConnectionId) -> Result<(), RoomError> {
        let seat = seat_by_connection(&self.seats, connection).ok_or(RoomError::NotInRoom)?;
        info!(room = %self.code, seat, status = %self.status, "Seat left");

        match self.status {
            RoomStatus::Waiting | RoomStatus::Countdown => self.vacate(seat),
            RoomStatus::Running => {
                self.seats[seat] = Seat::Empty;
                self.end(CloseReason::PlayerDisconnected);
            }
            RoomStatus::Ended => {}
        }
        Ok(())
    }

    /// The seat's socket closed: start its grace period.
    pub fn disconnect(&mut self, connection: ConnectionId, now: Instant) {
        if self.is_ended() {
            return;
        }
        let Some(seat) = self.seat_of(connection) else {
            return;
        };
        let grace = self.config.grace();
        if let Seat::Human(human) = &mut self.seats[seat] {
            human.connected = false;
            human.disconnect_deadline = Some(now + grace);
        }
        info!(room = %self.code, seat, grace_secs = grace.as_secs(), "Seat disconnected");
        self.broadcast_update();
    }

    /// Act on every grace period that ran out by `now`.
    pub fn expire_deadlines(&mut self, now: Instant) {
        let expired: Vec<usize> = self
            .seats
            .iter()
            .enumerate()
            .filter_map(|(index, seat)| match seat {
                Seat::Human(human) if human.disconnect_deadline.is_some_and(|deadline| deadline <= now) => Some(index),
                _ => None,
            })
            .collect();

        for seat in expired {
            if self.is_ended() {
                break;
            }
            info!(room = %self.code, seat, status = %self.status, "Grace period expired");
            match self.status {
                RoomStatus::Running => self.end(CloseReason::PlayerDisconnected),
                _ => self.vacate(seat),
            }
        }
    }

    /// Free a seat before the match. Aborts a countdown, and closes the room
    /// when no player is left.
    fn vacate(&mut self, seat: usize) {
        self.seats[seat] = Seat::Empty;
        if self.status == RoomStatus::Countdown {
            self.status = RoomStatus::Waiting;
            info!(room = %self.code, "Countdown aborted");
        }
        if self.host().is_none() {
            self.end(CloseReason::RoomEmpty);
            return;
        }
        self.broadcast_update();
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Apply a request from a seated connection.
    pub fn handle_request(&mut self, connection: ConnectionId, request: RoomRequest) -> Result<(), RoomError> {
        let seat = self.seat_of(connection).ok_or(RoomError::NotInRoom)?;
        if request.requires_host() && self.host() != Some(seat) {
            return Err(RoomError::NotHost);
        }

        match request {
            RoomRequest::Start => self.start(),
            RoomRequest::Pause => self.set_paused(true),
            RoomRequest::Resume => self.set_paused(false),
            RoomRequest::Save => self.save(),
            RoomRequest::Load => self.load(),
            RoomRequest::UpdateIdentity { name, icon } => {
                self.update_identity(seat, name.as_deref(), icon.as_deref());
                Ok(())
            }
            RoomRequest::AssignAi { seat, difficulty } => self.assign_ai(seat, difficulty),
            RoomRequest::RemoveAi { seat } => self.remove_ai(seat),
        }
    }

    /// WAITING → COUNTDOWN.
    fn start(&mut self) -> Result<(), RoomError> {
        if self.status != RoomStatus::Waiting {
            return Err(RoomError::AlreadyStarted);
        }
        let active = self.active_seats();
        if active < 2 {
            return Err(RoomError::CannotStart(format!(
                "need at least 2 occupied seats, have {active}"
            )));
        }

        self.status = RoomStatus::Countdown;
        self.countdown_remaining = self.config.countdown_secs;
        info!(room = %self.code, seats = active, "Countdown started");
        self.broadcast_update();

        if self.countdown_remaining == 0 {
            self.begin_match();
        } else {
            self.broadcast(&ServerMessage::Countdown {
                seconds: self.countdown_remaining,
            });
        }
        Ok(())
    }

    /// One second of countdown.
    pub fn countdown_step(&mut self) {
        if self.status != RoomStatus::Countdown {
            return;
        }
        self.countdown_remaining = self.countdown_remaining.saturating_sub(1);
        if self.countdown_remaining == 0 {
            self.begin_match();
        } else {
            self.broadcast(&ServerMessage::Countdown {
                seconds: self.countdown_remaining,
            });
        }
    }

    /// COUNTDOWN → RUNNING with a fresh engine for the active seats.
    fn begin_match(&mut self) {
        let teams: Vec<TeamId> = self
            .seats
            .iter()
            .enumerate()
            .filter(|(_, seat)| seat.is_active())
            .map(|(index, _)| team_for_seat(index))
            .collect();
        let config = EngineConfig::default()
            .with_teams(teams.clone())
            .with_seed(rand::random());
        let mut engine = Engine::new(&config);

        let mut opponents = Vec::new();
        for (index, seat) in self.seats.iter().enumerate() {
            if let Seat::Ai { difficulty } = seat {
                let mut opponent = ScriptedOpponent::with_difficulty(team_for_seat(index), *difficulty);
                opponent.apply_starting_bonus(&mut engine);
                opponents.push(opponent);
            }
        }

        self.status = RoomStatus::Running;
        self.inbox.clear();
        self.saved_snapshot = None;
        self.live = Some(LiveMatch {
            engine,
            opponents,
            paused: false,
            broadcast_version: None,
        });
        info!(room = %self.code, teams = teams.len(), seed = config.map.seed, "Match started");

        for (index, seat) in self.seats.iter().enumerate() {
            if let Seat::Human(human) = seat {
                if human.connected {
                    human.connection.send(&ServerMessage::GameStarted {
                        team: team_for_seat(index),
                    });
                }
            }
        }
        self.broadcast_update();
        self.broadcast_state();
    }

    fn live_mut(&mut self) -> Result<&mut LiveMatch, RoomError> {
        if self.status != RoomStatus::Running {
            return Err(RoomError::NotRunning);
        }
        self.live.as_mut().ok_or(RoomError::NotRunning)
    }

    fn set_paused(&mut self, paused: bool) -> Result<(), RoomError> {
        let live = self.live_mut()?;
        if live.paused == paused {
            return Ok(());
        }
        live.paused = paused;
        info!(room = %self.code, paused, "Pause toggled");
        let message = if paused {
            ServerMessage::Paused
        } else {
            ServerMessage::Resumed
        };
        self.broadcast(&message);
        Ok(())
    }

    /// Fill the single save slot, replacing what was there.
    fn save(&mut self) -> Result<(), RoomError> {
        let snapshot = self.live_mut()?.engine.get_snapshot(false);
        let tick = snapshot.tick;
        self.saved_snapshot = Some(snapshot);
        info!(room = %self.code, tick, "Game saved");
        self.broadcast(&ServerMessage::Saved { tick });
        Ok(())
    }

    /// Replace the engine with the saved one. Consumes the slot and clears
    /// pause; the next state carries tiles.
    fn load(&mut self) -> Result<(), RoomError> {
        self.live_mut()?;
        let snapshot = self.saved_snapshot.as_ref().ok_or(RoomError::NothingSaved)?;
        let engine = Engine::from_snapshot(snapshot).map_err(|err| RoomError::Restore(err.to_string()))?;
        self.saved_snapshot = None;
        self.inbox.clear();

        let tick = engine.tick();
        let live = self.live_mut()?;
        live.engine = engine;
        live.paused = false;
        live.broadcast_version = None;
        info!(room = %self.code, tick, "Game loaded");

        self.broadcast(&ServerMessage::Loaded { tick });
        self.broadcast_state();
        Ok(())
    }

    fn update_identity(&mut self, seat: usize, name: Option<&str>, icon: Option<&str>) {
        let Seat::Human(human) = &mut self.seats[seat] else {
            return;
        };
        let current = human.identity.clone();
        human.identity = Identity::new(name.unwrap_or(&current.name), icon.unwrap_or(&current.icon));
        self.broadcast_update();
    }

    fn assign_ai(&mut self, seat: usize, difficulty: Difficulty) -> Result<(), RoomError> {
        if self.status != RoomStatus::Waiting {
            return Err(RoomError::AlreadyStarted);
        }
        match self.seats.get(seat) {
            Some(Seat::Empty | Seat::Ai { .. }) => {}
            _ => return Err(RoomError::SeatUnavailable(seat)),
        }
        self.seats[seat] = Seat::Ai { difficulty };
        info!(room = %self.code, seat, ?difficulty, "AI seated");
        self.broadcast_update();
        Ok(())
    }

    fn remove_ai(&mut self, seat: usize) -> Result<(), RoomError> {
        if self.status != RoomStatus::Waiting {
            return Err(RoomError::AlreadyStarted);
        }
        if !matches!(self.seats.get(seat), Some(Seat::Ai { .. })) {
            return Err(RoomError::SeatUnavailable(seat));
        }
        self.seats[seat] = Seat::Empty;
        info!(room = %self.code, seat, "AI removed");
        self.broadcast_update();
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Match loop
    // ------------------------------------------------------------------------

    /// Queue a command for the next tick. Dropped unless a match is running
    /// and unpaused.
    pub fn enqueue_command(&mut self, connection: ConnectionId, command: Command) {
        if !self.is_ticking() || self.seat_of(connection).is_none() {
            debug!(room = %self.code, connection, kind = command.kind(), "Command dropped outside a running match");
            return;
        }
        self.inbox.push_back((connection, command));
    }

    /// One fixed step: inbox, scripted opponents, engine, broadcast.
    pub fn tick(&mut self) {
        if !self.is_ticking() {
            return;
        }
        let dt = self.dt;
        let Self {
            code,
            seats,
            live,
            inbox,
            ..
        } = self;
        let Some(live) = live.as_mut() else {
            return;
        };

        // 1. Player commands, oldest first
        for (connection, command) in inbox.drain(..) {
            let Some(seat) = seat_by_connection(seats, connection) else {
                continue;
            };
            if let Err(err) = apply_command(&mut live.engine, team_for_seat(seat), &command) {
                debug!(room = %code, seat, kind = command.kind(), error = %err, "Command rejected");
            }
        }

        // 2. Scripted opponents, each isolated from the others' faults
        for opponent in &mut live.opponents {
            let engine = &live.engine;
            let decided = catch_unwind(AssertUnwindSafe(|| opponent.decide(engine, dt)));
            match decided {
                Ok(commands) => {
                    for command in &commands {
                        if let Err(err) = apply_command(&mut live.engine, opponent.team(), command) {
                            debug!(room = %code, team = %opponent.team(), kind = command.kind(), error = %err, "AI command rejected");
                        }
                    }
                }
                Err(_) => {
                    warn!(room = %code, team = %opponent.team(), "Scripted opponent failed, skipping its turn");
                }
            }
        }

        // 3. Physics, production, win condition
        live.engine.update(dt);
        let ended = live.engine.is_ended();
        let winner = live.engine.winner();

        // 4. Snapshot after everything above
        self.broadcast_state();

        if ended {
            info!(room = %self.code, winner = ?winner, "Match decided");
            self.end(CloseReason::GameEnded);
        }
    }

    /// Enter ENDED: notify every connected seat once and release the seats.
    pub fn end(&mut self, reason: CloseReason) {
        if self.is_ended() {
            return;
        }
        self.status = RoomStatus::Ended;
        info!(room = %self.code, %reason, "Room closed");
        self.broadcast(&ServerMessage::RoomClosed { reason });

        self.live = None;
        self.saved_snapshot = None;
        self.inbox.clear();
        for seat in &mut self.seats {
            *seat = Seat::Empty;
        }
    }

    /// Route one event. Refusals are answered with their notice.
    pub fn handle_event(&mut self, event: RoomEvent, now: Instant) {
        match event {
            RoomEvent::Join {
                connection,
                identity,
                reply,
            } => {
                let result = self.join(&connection, identity);
                if let Err(err) = &result {
                    connection.send(&err.notice());
                }
                let _ = reply.send(result);
            }
            RoomEvent::Rejoin {
                connection,
                seat,
                secret,
                reply,
            } => {
                let result = self.rejoin(&connection, seat, &secret);
                if let Err(err) = &result {
                    connection.send(&err.notice());
                }
                let _ = reply.send(result);
            }
            RoomEvent::Leave { connection } => {
                let _ = self.leave(connection);
            }
            RoomEvent::Disconnected { connection } => self.disconnect(connection, now),
            RoomEvent::Request { connection, request } => {
                if let Err(err) = self.handle_request(connection.id(), request) {
                    debug!(room = %self.code, connection = connection.id(), error = %err, "Request refused");
                    connection.send(&err.notice());
                }
            }
            RoomEvent::Command { connection, command } => self.enqueue_command(connection, command),
            RoomEvent::Close => self.end(CloseReason::RoomClosed),
        }
    }
}

// ============================================================================
// Room Task
// ============================================================================

/// Drive `room` until it ends.
///
/// The tick timer runs only while the match is live and unpaused, and is
/// re-armed whenever ticking (re)starts, so a resume never replays missed
/// ticks. The countdown timer likewise restarts on each countdown.
pub async fn run_room(mut room: Room, mut events: mpsc::Receiver<RoomEvent>) {
    let mut ticker = time::interval(room.config.tick_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut countdown = time::interval(Duration::from_secs(1));
    countdown.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut phase = (room.status(), room.is_paused());
    while !room.is_ended() {
        let deadline = room.next_deadline();
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => room.handle_event(event, Instant::now()),
                None => room.end(CloseReason::RoomClosed),
            },
            _ = ticker.tick(), if room.is_ticking() => room.tick(),
            _ = countdown.tick(), if room.status() == RoomStatus::Countdown => room.countdown_step(),
            () = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                room.expire_deadlines(Instant::now());
            }
        }

        let next = (room.status(), room.is_paused());
        if next != phase {
            if next.0 == RoomStatus::Countdown {
                countdown.reset();
            }
            if room.is_ticking() {
                ticker.reset();
            }
            phase = next;
        }
    }
    debug!(room = %room.code(), "Room task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rts_core::data::UnitType;
    use std::sync::Arc;

    type Inbox = mpsc::Receiver<Arc<str>>;

    fn client(id: ConnectionId) -> (Connection, Inbox) {
        Connection::channel(id, 512)
    }

    fn drain(rx: &mut Inbox) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(text) = rx.try_recv() {
            messages.push(serde_json::from_str(&text).unwrap());
        }
        messages
    }

    fn config() -> RoomConfig {
        RoomConfig::default().with_countdown_secs(0)
    }

    fn secret_of(room: &Room, seat: usize) -> String {
        match &room.seats()[seat] {
            Seat::Human(human) => human.secret.clone(),
            other => panic!("seat {seat} is {other:?}"),
        }
    }

    /// Host in seat 0, a second player in seat 1, match running.
    fn running_pair() -> (Room, Inbox, Inbox) {
        let (host, mut host_rx) = client(1);
        let (guest, mut guest_rx) = client(2);
        let mut room = Room::open("ABCD", config(), &host, Identity::new("Ada", "fox"));
        room.join(&guest, Identity::new("Bo", "owl")).unwrap();
        room.handle_request(1, RoomRequest::Start).unwrap();
        assert_eq!(room.status(), RoomStatus::Running);
        drain(&mut host_rx);
        drain(&mut guest_rx);
        (room, host_rx, guest_rx)
    }

    fn closed_notices(messages: &[ServerMessage]) -> Vec<CloseReason> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::RoomClosed { reason } => Some(*reason),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_open_seats_creator_as_host() {
        let (host, mut rx) = client(1);
        let room = Room::open("ABCD", config(), &host, Identity::new("Ada", "fox"));

        assert_eq!(room.host(), Some(0));
        assert_eq!(room.status(), RoomStatus::Waiting);
        match drain(&mut rx).as_slice() {
            [ServerMessage::RoomCreated { code, seat, secret, seats, .. }] => {
                assert_eq!(code, "ABCD");
                assert_eq!(*seat, 0);
                assert_eq!(secret.len(), SECRET_LEN);
                assert_eq!(seats.len(), 4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_join_until_full() {
        let (host, _host_rx) = client(1);
        let mut room = Room::open("ABCD", config(), &host, Identity::default());
        for id in 2..=4 {
            let (guest, _rx) = client(id);
            assert_eq!(room.join(&guest, Identity::default()), Ok(id as usize - 1));
        }
        let (late, _rx) = client(5);
        assert_eq!(room.join(&late, Identity::default()), Err(RoomError::RoomFull));
    }

    #[test]
    fn test_single_seat_start_rejected() {
        let (host, mut rx) = client(1);
        let mut room = Room::open("ABCD", config(), &host, Identity::default());
        drain(&mut rx);

        let result = room.handle_request(1, RoomRequest::Start);

        assert!(matches!(result, Err(RoomError::CannotStart(_))));
        assert_eq!(room.status(), RoomStatus::Waiting);
        assert!(room.engine().is_none());
    }

    #[test]
    fn test_non_host_cannot_start() {
        let (host, _host_rx) = client(1);
        let (guest, _guest_rx) = client(2);
        let mut room = Room::open("ABCD", config(), &host, Identity::default());
        room.join(&guest, Identity::default()).unwrap();

        assert_eq!(room.handle_request(2, RoomRequest::Start), Err(RoomError::NotHost));
        assert_eq!(room.status(), RoomStatus::Waiting);
    }

    #[test]
    fn test_start_with_ai_opponent() {
        let (host, mut rx) = client(1);
        let mut room = Room::open("ABCD", config(), &host, Identity::default());
        room.handle_request(1, RoomRequest::AssignAi { seat: 2, difficulty: Difficulty::Hard })
            .unwrap();
        drain(&mut rx);

        room.handle_request(1, RoomRequest::Start).unwrap();

        let messages = drain(&mut rx);
        assert!(messages.contains(&ServerMessage::GameStarted { team: TeamId(0) }));
        let state = messages.iter().find_map(|m| match m {
            ServerMessage::State { snapshot } => Some(snapshot),
            _ => None,
        });
        let snapshot = state.expect("no initial state");
        assert!(snapshot.has_tiles());
        assert_eq!(snapshot.teams, vec![TeamId(0), TeamId(2)]);

        // Hard preset bonus on top of the starting balance.
        let engine = room.engine().unwrap();
        assert!(engine.resources(TeamId(2)).minerals > engine.resources(TeamId(0)).minerals);
    }

    #[test]
    fn test_countdown_counts_to_running() {
        let (host, mut rx) = client(1);
        let mut room = Room::open("ABCD", RoomConfig::default(), &host, Identity::default());
        room.handle_request(1, RoomRequest::AssignAi { seat: 1, difficulty: Difficulty::Easy })
            .unwrap();
        drain(&mut rx);

        room.handle_request(1, RoomRequest::Start).unwrap();
        assert_eq!(room.status(), RoomStatus::Countdown);
        room.countdown_step();
        room.countdown_step();
        assert_eq!(room.status(), RoomStatus::Countdown);
        room.countdown_step();
        assert_eq!(room.status(), RoomStatus::Running);

        let seconds: Vec<u32> = drain(&mut rx)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::Countdown { seconds } => Some(seconds),
                _ => None,
            })
            .collect();
        assert_eq!(seconds, vec![3, 2, 1]);
    }

    #[test]
    fn test_leave_during_countdown_aborts() {
        let (host, _host_rx) = client(1);
        let (guest, _guest_rx) = client(2);
        let mut room = Room::open("ABCD", RoomConfig::default(), &host, Identity::default());
        room.join(&guest, Identity::default()).unwrap();
        room.handle_request(1, RoomRequest::Start).unwrap();

        room.leave(2).unwrap();

        assert_eq!(room.status(), RoomStatus::Waiting);
        assert!(matches!(room.seats()[1], Seat::Empty));
    }

    #[test]
    fn test_ai_seats_only_while_waiting() {
        let (host, _rx) = client(1);
        let mut room = Room::open("ABCD", config(), &host, Identity::default());

        assert_eq!(
            room.handle_request(1, RoomRequest::AssignAi { seat: 0, difficulty: Difficulty::Easy }),
            Err(RoomError::SeatUnavailable(0))
        );
        assert_eq!(
            room.handle_request(1, RoomRequest::RemoveAi { seat: 1 }),
            Err(RoomError::SeatUnavailable(1))
        );
        room.handle_request(1, RoomRequest::AssignAi { seat: 1, difficulty: Difficulty::Easy })
            .unwrap();
        room.handle_request(1, RoomRequest::Start).unwrap();

        assert_eq!(
            room.handle_request(1, RoomRequest::RemoveAi { seat: 1 }),
            Err(RoomError::AlreadyStarted)
        );
    }

    #[test]
    fn test_tick_omits_unchanged_tiles() {
        let (mut room, mut host_rx, _guest_rx) = running_pair();

        room.tick();
        room.tick();

        let states: Vec<_> = drain(&mut host_rx)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::State { snapshot } => Some(snapshot),
                _ => None,
            })
            .collect();
        assert_eq!(states.len(), 2);
        assert!(!states[1].has_tiles());
        assert_eq!(states[1].tick, 2);
    }

    #[test]
    fn test_commands_apply_at_tick_for_senders_team() {
        let (mut room, _host_rx, _guest_rx) = running_pair();
        let engine = room.engine().unwrap();
        let base = engine.buildings_of(TeamId(1)).next().unwrap().id;
        let before = engine.resources(TeamId(1));

        room.enqueue_command(
            2,
            Command::Train {
                building_id: base,
                unit_type: UnitType::Worker,
            },
        );
        assert_eq!(room.engine().unwrap().resources(TeamId(1)), before);

        room.tick();
        let after = room.engine().unwrap().resources(TeamId(1));
        assert_eq!(after.minerals, before.minerals - UnitType::Worker.stats().cost.minerals);
    }

    #[test]
    fn test_foreign_command_rejected_at_tick() {
        let (mut room, _host_rx, _guest_rx) = running_pair();
        let engine = room.engine().unwrap();
        let base = engine.buildings_of(TeamId(1)).next().unwrap().id;
        let before = engine.resources(TeamId(1));

        room.enqueue_command(
            1,
            Command::Train {
                building_id: base,
                unit_type: UnitType::Worker,
            },
        );
        room.tick();

        assert_eq!(room.engine().unwrap().resources(TeamId(1)), before);
    }

    #[test]
    fn test_pause_stops_ticks_and_drops_commands() {
        let (mut room, mut host_rx, _guest_rx) = running_pair();
        room.handle_request(1, RoomRequest::Pause).unwrap();
        assert!(!room.is_ticking());

        room.enqueue_command(1, Command::Stop { unit_ids: vec![] });
        room.tick();
        assert_eq!(room.engine().unwrap().tick(), 0);
        assert!(room.inbox.is_empty());

        room.handle_request(1, RoomRequest::Resume).unwrap();
        room.tick();
        assert_eq!(room.engine().unwrap().tick(), 1);

        let messages = drain(&mut host_rx);
        assert!(messages.contains(&ServerMessage::Paused));
        assert!(messages.contains(&ServerMessage::Resumed));
    }

    #[test]
    fn test_guest_cannot_pause() {
        let (mut room, _host_rx, _guest_rx) = running_pair();
        assert_eq!(room.handle_request(2, RoomRequest::Pause), Err(RoomError::NotHost));
        assert!(room.is_ticking());
    }

    #[test]
    fn test_save_then_load_restores_tick_and_consumes_slot() {
        let (mut room, mut host_rx, _guest_rx) = running_pair();
        for _ in 0..5 {
            room.tick();
        }
        room.handle_request(1, RoomRequest::Save).unwrap();
        let saved = room.engine().unwrap().clone();
        for _ in 0..7 {
            room.tick();
        }
        room.handle_request(1, RoomRequest::Pause).unwrap();
        drain(&mut host_rx);

        room.handle_request(1, RoomRequest::Load).unwrap();

        assert_eq!(room.engine().unwrap(), &saved);
        assert!(!room.is_paused());
        assert!(!room.has_save());
        let messages = drain(&mut host_rx);
        assert!(messages.contains(&ServerMessage::Loaded { tick: 5 }));
        assert!(messages.iter().any(|m| matches!(m, ServerMessage::State { snapshot } if snapshot.has_tiles())));

        assert_eq!(room.handle_request(1, RoomRequest::Load), Err(RoomError::NothingSaved));
    }

    #[test]
    fn test_save_requires_running_match() {
        let (host, _rx) = client(1);
        let mut room = Room::open("ABCD", config(), &host, Identity::default());
        assert_eq!(room.handle_request(1, RoomRequest::Save), Err(RoomError::NotRunning));
    }

    #[test]
    fn test_identity_update_is_capped() {
        let (host, mut rx) = client(1);
        let mut room = Room::open("ABCD", config(), &host, Identity::default());
        drain(&mut rx);

        room.handle_request(
            1,
            RoomRequest::UpdateIdentity {
                name: Some("x".repeat(30)),
                icon: None,
            },
        )
        .unwrap();

        match &room.seats()[0] {
            Seat::Human(human) => assert_eq!(human.identity.name.len(), 24),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(drain(&mut rx).as_slice(), [ServerMessage::RoomUpdate { .. }]));
    }

    #[test]
    fn test_reconnect_within_grace_keeps_running() {
        let (mut room, mut host_rx, _old_guest_rx) = running_pair();
        let secret = secret_of(&room, 1);
        let now = Instant::now();

        room.disconnect(2, now);
        room.tick();
        room.expire_deadlines(now + Duration::from_secs(10));
        assert_eq!(room.status(), RoomStatus::Running);

        let (rejoined, mut rejoin_rx) = client(9);
        assert_eq!(room.rejoin(&rejoined, 1, &secret), Ok(1));
        room.expire_deadlines(now + Duration::from_secs(60));

        assert_eq!(room.status(), RoomStatus::Running);
        assert_eq!(room.next_deadline(), None);
        assert_eq!(room.seat_of(9), Some(1));

        let messages = drain(&mut rejoin_rx);
        assert!(matches!(messages[0], ServerMessage::RoomRejoined { seat: 1, .. }));
        assert_eq!(
            messages[1],
            ServerMessage::Resync {
                seat: 1,
                status: RoomStatus::Running
            }
        );
        assert!(matches!(&messages[2], ServerMessage::State { snapshot } if snapshot.has_tiles()));
        assert!(closed_notices(&drain(&mut host_rx)).is_empty());
    }

    #[test]
    fn test_rejoin_over_live_connection_notifies_old_socket() {
        let (mut room, _host_rx, mut old_rx) = running_pair();
        let secret = secret_of(&room, 1);

        let (replacement, mut new_rx) = client(9);
        assert_eq!(room.rejoin(&replacement, 1, &secret), Ok(1));

        assert!(matches!(drain(&mut old_rx).as_slice(), [ServerMessage::Error { .. }]));
        assert!(matches!(drain(&mut new_rx)[0], ServerMessage::RoomRejoined { seat: 1, .. }));
        assert_eq!(room.seat_of(2), None);
        assert_eq!(room.seat_of(9), Some(1));

        // The old socket closing later leaves the new one seated.
        room.disconnect(2, Instant::now());
        assert_eq!(room.next_deadline(), None);
        assert_eq!(room.seat_of(9), Some(1));
    }

    #[test]
    fn test_rejoin_with_wrong_secret_rejected() {
        let (mut room, _host_rx, _guest_rx) = running_pair();
        room.disconnect(2, Instant::now());

        let (impostor, _rx) = client(9);
        assert_eq!(room.rejoin(&impostor, 1, "not-the-secret"), Err(RoomError::RejoinRejected));
        assert_eq!(room.rejoin(&impostor, 3, "whatever"), Err(RoomError::RejoinRejected));
        assert_eq!(room.seat_of(9), None);
    }

    #[test]
    fn test_grace_expiry_while_running_ends_room_once() {
        let (host, mut host_rx) = client(1);
        let (guest, mut guest_rx) = client(2);
        let (third, mut third_rx) = client(3);
        let mut room = Room::open("ABCD", config(), &host, Identity::default());
        room.join(&guest, Identity::default()).unwrap();
        room.join(&third, Identity::default()).unwrap();
        room.handle_request(1, RoomRequest::Start).unwrap();
        let now = Instant::now();

        room.disconnect(2, now);
        drain(&mut host_rx);
        drain(&mut guest_rx);
        drain(&mut third_rx);

        room.expire_deadlines(now + Duration::from_secs(31));
        room.expire_deadlines(now + Duration::from_secs(40));
        room.end(CloseReason::RoomClosed);

        assert_eq!(room.status(), RoomStatus::Ended);
        assert_eq!(closed_notices(&drain(&mut host_rx)), vec![CloseReason::PlayerDisconnected]);
        assert_eq!(closed_notices(&drain(&mut third_rx)), vec![CloseReason::PlayerDisconnected]);
        assert!(drain(&mut guest_rx).is_empty());
        assert!(room.seats().iter().all(|seat| !seat.is_active()));
    }

    #[test]
    fn test_grace_expiry_while_waiting_vacates_seat() {
        let (host, mut host_rx) = client(1);
        let (guest, _guest_rx) = client(2);
        let mut room = Room::open("ABCD", config(), &host, Identity::default());
        room.join(&guest, Identity::default()).unwrap();
        let now = Instant::now();

        room.disconnect(1, now);
        room.expire_deadlines(now + Duration::from_secs(31));

        assert_eq!(room.status(), RoomStatus::Waiting);
        assert!(matches!(room.seats()[0], Seat::Empty));
        assert_eq!(room.host(), Some(1));
        assert!(closed_notices(&drain(&mut host_rx)).is_empty());
    }

    #[test]
    fn test_last_player_expiry_empties_room() {
        let (host, _rx) = client(1);
        let mut room = Room::open("ABCD", config(), &host, Identity::default());
        room.handle_request(1, RoomRequest::AssignAi { seat: 1, difficulty: Difficulty::Easy })
            .unwrap();
        let now = Instant::now();

        room.disconnect(1, now);
        room.expire_deadlines(now + Duration::from_secs(29));
        assert_eq!(room.status(), RoomStatus::Waiting);
        room.expire_deadlines(now + Duration::from_secs(30));

        assert!(room.is_ended());
    }

    #[test]
    fn test_leave_while_running_ends_room() {
        let (mut room, mut host_rx, _guest_rx) = running_pair();
        room.leave(2).unwrap();

        assert!(room.is_ended());
        assert_eq!(closed_notices(&drain(&mut host_rx)), vec![CloseReason::PlayerDisconnected]);
        assert_eq!(room.leave(2), Err(RoomError::NotInRoom));
    }

    #[test]
    fn test_winner_ends_room_with_game_ended() {
        let (mut room, mut host_rx, mut guest_rx) = running_pair();
        let live = room.live.as_mut().unwrap();
        let doomed_units: Vec<_> = live.engine.units_of(TeamId(1)).map(|u| u.id).collect();
        let doomed_buildings: Vec<_> = live.engine.buildings_of(TeamId(1)).map(|b| b.id).collect();
        for id in doomed_units {
            live.engine.unit_mut(id).unwrap().health = 0;
        }
        for id in doomed_buildings {
            live.engine.building_mut(id).unwrap().health = 0;
        }

        room.tick();

        assert!(room.is_ended());
        assert_eq!(closed_notices(&drain(&mut host_rx)), vec![CloseReason::GameEnded]);
        assert_eq!(closed_notices(&drain(&mut guest_rx)), vec![CloseReason::GameEnded]);
    }

    #[test]
    fn test_request_event_answers_with_notice() {
        let (host, _host_rx) = client(1);
        let (guest, mut guest_rx) = client(2);
        let mut room = Room::open("ABCD", config(), &host, Identity::default());
        room.join(&guest, Identity::default()).unwrap();
        drain(&mut guest_rx);

        room.handle_event(
            RoomEvent::Request {
                connection: guest,
                request: RoomRequest::Save,
            },
            Instant::now(),
        );

        assert_eq!(drain(&mut guest_rx), vec![ServerMessage::NotHost]);
    }
}

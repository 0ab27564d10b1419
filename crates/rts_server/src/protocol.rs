//! JSON wire protocol between clients and the server.
//!
//! Every WebSocket text frame carries one object tagged by `type`:
//!
//! ```text
//! -> {"type":"CREATE_ROOM","name":"Ada","icon":"fox"}
//! <- {"type":"ROOM_CREATED","code":"K7QX","seat":0,"secret":"...","seats":[...],"status":"WAITING"}
//! -> {"type":"START_GAME"}
//! <- {"type":"COUNTDOWN","seconds":3}
//! <- {"type":"GAME_STARTED","team":0}
//! <- {"type":"STATE","snapshot":{...}}
//! -> {"type":"COMMAND","command":{"type":"MOVE","unitIds":[4],"x":10,"y":12}}
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::error;

use rts_core::ai::Difficulty;
use rts_core::commands::Command;
use rts_core::components::TeamId;
use rts_core::snapshot::EngineSnapshot;

/// Longest display name kept, in characters.
pub const MAX_NAME_CHARS: usize = 24;

/// Longest icon id kept, in characters.
pub const MAX_ICON_CHARS: usize = 16;

/// Server-assigned id of one WebSocket connection.
pub type ConnectionId = u64;

// ============================================================================
// Shared Types
// ============================================================================

/// A seat's display identity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Identity {
    /// Display name.
    pub name: String,
    /// Icon id.
    pub icon: String,
}

impl Identity {
    /// Build an identity, truncating both fields to their caps.
    pub fn new(name: &str, icon: &str) -> Self {
        Self {
            name: cap(name.trim(), MAX_NAME_CHARS),
            icon: cap(icon.trim(), MAX_ICON_CHARS),
        }
    }
}

fn cap(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

/// Room lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    /// Seats are being filled.
    Waiting,
    /// Start accepted, counting down.
    Countdown,
    /// Match in progress.
    Running,
    /// Terminal.
    Ended,
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Waiting => "WAITING",
            Self::Countdown => "COUNTDOWN",
            Self::Running => "RUNNING",
            Self::Ended => "ENDED",
        };
        f.write_str(label)
    }
}

/// Why a room closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseReason {
    /// A seat left or failed to rejoin in time during a match.
    PlayerDisconnected,
    /// The match has a winner, or nobody survived.
    GameEnded,
    /// No human seat remains.
    RoomEmpty,
    /// The server is shutting down.
    RoomClosed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::PlayerDisconnected => "player-disconnected",
            Self::GameEnded => "game-ended",
            Self::RoomEmpty => "room-empty",
            Self::RoomClosed => "room-closed",
        };
        f.write_str(label)
    }
}

/// Public view of one seat. Secrets never leave the room except to the
/// seat's own connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SeatView {
    /// Free.
    Empty,
    /// Held by a player.
    Human {
        /// Display name.
        name: String,
        /// Icon id.
        icon: String,
        /// Whether the player's connection is currently live.
        connected: bool,
    },
    /// Played by a scripted opponent.
    Ai {
        /// Preset.
        difficulty: Difficulty,
    },
}

// ============================================================================
// Inbound Messages (client -> server)
// ============================================================================

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Open a new room and take seat 0.
    CreateRoom {
        /// Display name.
        #[serde(default)]
        name: String,
        /// Icon id.
        #[serde(default)]
        icon: String,
    },
    /// Take the first free seat of an existing room.
    JoinRoom {
        /// Join code.
        code: String,
        /// Display name.
        #[serde(default)]
        name: String,
        /// Icon id.
        #[serde(default)]
        icon: String,
    },
    /// Reclaim a seat after a lost connection.
    RejoinRoom {
        /// Join code.
        code: String,
        /// Seat index.
        seat: usize,
        /// Secret handed out when the seat was taken.
        secret: String,
    },
    /// Give up the seat.
    LeaveRoom,
    /// Host: begin the countdown.
    StartGame,
    /// Host: suspend ticking.
    PauseGame,
    /// Host: resume ticking.
    ResumeGame,
    /// Host: store the engine in the room's save slot.
    SaveGame,
    /// Host: restore the engine from the save slot.
    LoadGame,
    /// Intent for the sender's team.
    Command {
        /// The command.
        command: Command,
    },
    /// Change the sender's display identity.
    UpdateIdentity {
        /// New name, if changing.
        #[serde(default)]
        name: Option<String>,
        /// New icon, if changing.
        #[serde(default)]
        icon: Option<String>,
    },
    /// Host: seat a scripted opponent.
    AssignAi {
        /// Seat index.
        seat: usize,
        /// Preset.
        #[serde(default)]
        difficulty: Difficulty,
    },
    /// Host: free an AI seat.
    RemoveAi {
        /// Seat index.
        seat: usize,
    },
}

// ============================================================================
// Outbound Messages (server -> client)
// ============================================================================

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Greeting sent once per connection.
    Welcome {
        /// The connection's id.
        connection_id: ConnectionId,
    },
    /// Reply to `CREATE_ROOM`.
    RoomCreated {
        /// Join code.
        code: String,
        /// Seat taken.
        seat: usize,
        /// Secret for rejoining.
        secret: String,
        /// Seat table.
        seats: Vec<SeatView>,
        /// Room status.
        status: RoomStatus,
    },
    /// Reply to `JOIN_ROOM`.
    RoomJoined {
        /// Join code.
        code: String,
        /// Seat taken.
        seat: usize,
        /// Secret for rejoining.
        secret: String,
        /// Seat table.
        seats: Vec<SeatView>,
        /// Room status.
        status: RoomStatus,
    },
    /// Reply to `REJOIN_ROOM`.
    RoomRejoined {
        /// Join code.
        code: String,
        /// Seat reclaimed.
        seat: usize,
        /// Secret, unchanged.
        secret: String,
        /// Seat table.
        seats: Vec<SeatView>,
        /// Room status.
        status: RoomStatus,
    },
    /// Seat table changed.
    RoomUpdate {
        /// Seat table.
        seats: Vec<SeatView>,
        /// Room status.
        status: RoomStatus,
        /// Host seat, if any human is seated.
        host: Option<usize>,
    },
    /// Seconds left before the match starts.
    Countdown {
        /// Seconds remaining.
        seconds: u32,
    },
    /// The match began; the receiver plays `team`.
    GameStarted {
        /// Receiver's team.
        team: TeamId,
    },
    /// Engine state after a tick.
    State {
        /// The snapshot. Tiles are omitted when unchanged since the last
        /// broadcast.
        snapshot: Box<EngineSnapshot>,
    },
    /// Sent to a rejoining seat before its first state.
    Resync {
        /// Seat reclaimed.
        seat: usize,
        /// Room status.
        status: RoomStatus,
    },
    /// Ticking suspended.
    Paused,
    /// Ticking resumed.
    Resumed,
    /// Engine stored in the save slot.
    Saved {
        /// Tick saved at.
        tick: u64,
    },
    /// Engine restored from the save slot.
    Loaded {
        /// Tick restored to.
        tick: u64,
    },
    /// No free seat.
    RoomFull,
    /// Unknown join code.
    RoomNotFound,
    /// The room no longer accepts this.
    AlreadyStarted,
    /// Seat or secret did not match.
    RejoinRejected,
    /// Only the host may do this.
    NotHost,
    /// Start refused.
    CannotStart {
        /// Why.
        reason: String,
    },
    /// Load requested with an empty slot.
    NothingSaved,
    /// The connection holds no seat.
    NotInRoom,
    /// Anything else.
    Error {
        /// Human-readable message.
        message: String,
    },
    /// The room is gone.
    RoomClosed {
        /// Why.
        reason: CloseReason,
    },
}

impl ServerMessage {
    /// Shorthand for [`ServerMessage::Error`].
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Encode once for fan-out to many connections.
    pub fn encode(&self) -> Option<Arc<str>> {
        match serde_json::to_string(self) {
            Ok(text) => Some(Arc::from(text)),
            Err(err) => {
                error!(error = %err, "failed to encode server message");
                None
            }
        }
    }
}

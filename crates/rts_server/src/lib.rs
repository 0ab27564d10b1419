//! # RTS Match Server
//!
//! Hosts many independent matches over WebSocket connections.
//!
//! Each room owns one [`rts_core::simulation::Engine`] and is driven by its
//! own task on a fixed-rate timer. Connections only ever talk to rooms
//! through channels, so a room's engine has exactly one writer.
//!
//! ## Module Overview
//!
//! - [`protocol`]: JSON messages exchanged with clients
//! - [`room`]: seat table, match lifecycle and the room task
//! - [`lobby`]: join codes, room lookup and request routing
//! - [`network`]: TCP listener and per-connection WebSocket tasks

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod error;
pub mod lobby;
pub mod network;
pub mod protocol;
pub mod room;

pub use error::ServerError;

/// Most seats a room may have; generated maps carry four spawn points.
pub const MAX_SEATS: usize = 4;

/// Per-room settings shared by every room the server opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomConfig {
    /// Seat table size.
    pub seats: usize,
    /// Simulation ticks per second.
    pub tick_rate: u32,
    /// Seconds counted down between start and the first tick.
    pub countdown_secs: u32,
    /// How long a disconnected seat may take to rejoin.
    pub grace_secs: u64,
    /// Outbound messages buffered per connection before drops.
    pub outbound_buffer: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            seats: 4,
            tick_rate: rts_core::simulation::TICK_RATE,
            countdown_secs: 3,
            grace_secs: 30,
            outbound_buffer: 256,
        }
    }
}

impl RoomConfig {
    /// Set the seat count, clamped to `2..=MAX_SEATS`.
    pub fn with_seats(mut self, seats: usize) -> Self {
        self.seats = seats.clamp(2, MAX_SEATS);
        self
    }

    /// Set the tick rate (at least 1 Hz).
    pub fn with_tick_rate(mut self, tick_rate: u32) -> Self {
        self.tick_rate = tick_rate.max(1);
        self
    }

    /// Set the countdown length.
    pub fn with_countdown_secs(mut self, secs: u32) -> Self {
        self.countdown_secs = secs;
        self
    }

    /// Set the reconnection grace period.
    pub fn with_grace_secs(mut self, secs: u64) -> Self {
        self.grace_secs = secs;
        self
    }

    /// Wall-clock time between ticks.
    #[must_use]
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate.max(1)
    }

    /// Reconnection grace period.
    #[must_use]
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Settings for every room.
    pub room: RoomConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7777,
            room: RoomConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Set the bind interface.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the room settings.
    pub fn with_room(mut self, room: RoomConfig) -> Self {
        self.room = room;
        self
    }

    /// `host:port` for binding.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

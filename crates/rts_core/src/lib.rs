//! # RTS Core
//!
//! Deterministic match simulation for the Skirmish RTS server.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No IO
//! - No system randomness
//! - No floating-point math (uses fixed-point)
//!
//! This separation enables:
//! - One authoritative engine per room, driven by the server's tick loop
//! - Exact save/load through [`snapshot`]
//! - Determinism testing
//!
//! ## Crate Structure
//!
//! - [`map`] / [`map_generation`] - Tile grid, deposits and seeded terrain
//! - [`data`] - Immutable unit and building stat tables
//! - [`pathfinding`] - Budgeted A* over the tile grid
//! - [`units`] / [`buildings`] - Entity state machines
//! - [`simulation`] - The [`Engine`](simulation::Engine) and its tick order
//! - [`snapshot`] - Acyclic serializable engine state
//! - [`commands`] - Validation of untrusted player intent
//! - [`ai`] - Scripted opponents
//! - [`math`] - Fixed-point math utilities

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod ai;
pub mod buildings;
pub mod commands;
pub mod components;
pub mod data;
pub mod economy;
pub mod error;
pub mod map;
pub mod map_generation;
pub mod math;
pub mod pathfinding;
pub mod production;
pub mod simulation;
pub mod snapshot;
pub mod units;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::ai::{AiConfig, Difficulty, ScriptedOpponent};
    pub use crate::buildings::{Building, PlacementResult};
    pub use crate::commands::{apply_command, parse_command_batch, Command, CommandError};
    pub use crate::components::{BuildingId, TeamId, TilePos, UnitId};
    pub use crate::data::{BuildingType, UnitType};
    pub use crate::economy::{ResourceKind, Resources};
    pub use crate::error::{GameError, Result};
    pub use crate::map::{GameMap, TileKind};
    pub use crate::map_generation::MapConfig;
    pub use crate::math::{Fixed, Vec2Fixed};
    pub use crate::pathfinding::Traversal;
    pub use crate::simulation::{Engine, EngineConfig, TickEvents, TICK_DT, TICK_RATE};
    pub use crate::snapshot::EngineSnapshot;
    pub use crate::units::{Order, Unit};
}

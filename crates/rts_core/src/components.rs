//! Identifiers and small value types shared by every simulation module.
//!
//! Entities never hold references to each other; they hold these ids and
//! resolve them through the engine's id → instance maps each time.

use serde::{Deserialize, Serialize};

use crate::math::{Fixed, Vec2Fixed};

/// Unique identifier for a unit, monotonic for the lifetime of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub u32);

/// Unique identifier for a building, monotonic for the lifetime of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildingId(pub u32);

/// A team. Rooms use the seat index as the team id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(pub u8);

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "u{}", self.0)
    }
}

impl std::fmt::Display for BuildingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b{}", self.0)
    }
}

impl std::fmt::Display for TeamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "team{}", self.0)
    }
}

/// Engine-owned id counter.
///
/// Each engine owns its own counters so concurrent rooms never share or
/// collide on identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdGenerator {
    next: u32,
}

impl IdGenerator {
    /// Counter starting at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 1 }
    }

    /// Counter that will hand out ids strictly greater than `max_seen`.
    #[must_use]
    pub const fn after(max_seen: u32) -> Self {
        Self { next: max_seen + 1 }
    }

    /// Take the next id.
    pub fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Peek at the id that will be handed out next.
    #[must_use]
    pub const fn peek(&self) -> u32 {
        self.next
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Integer tile coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TilePos {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl TilePos {
    /// Create a tile coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Tile containing a continuous position.
    #[must_use]
    pub fn from_position(pos: Vec2Fixed) -> Self {
        let (x, y) = pos.tile();
        Self { x, y }
    }

    /// Centre of this tile in continuous coordinates.
    #[must_use]
    pub fn center(self) -> Vec2Fixed {
        Vec2Fixed::tile_center(self.x, self.y)
    }

    /// Offset by a delta.
    #[must_use]
    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    /// Chebyshev (king-move) distance.
    #[must_use]
    pub fn chebyshev(self, other: Self) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }

    /// True for the eight surrounding tiles (not the tile itself).
    #[must_use]
    pub fn is_adjacent(self, other: Self) -> bool {
        self.chebyshev(other) == 1
    }
}

/// Presentation record of the last shot a unit or tower fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastShot {
    /// Tick on which the shot was fired.
    pub tick: u64,
    /// Muzzle position.
    pub from: Vec2Fixed,
    /// Impact position.
    pub to: Vec2Fixed,
}

/// Combat damage with the minimum-one floor.
///
/// Even overwhelming armor cannot reduce a hit below 1 damage.
#[must_use]
pub fn damage_after_armor(damage: i32, armor: i32) -> i32 {
    (damage - armor).max(1)
}

/// Squared-range check in tile units.
#[must_use]
pub fn within_range(a: Vec2Fixed, b: Vec2Fixed, range: Fixed) -> bool {
    a.distance_squared(b) <= range * range
}

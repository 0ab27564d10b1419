//! The tile grid a match is played on.
//!
//! The grid is immutable after generation except for two things: resource
//! depletion, and the tile downgrade (`tree`/`mineral` → `dirt`) that
//! happens when a deposit runs out. Every such downgrade bumps
//! [`GameMap::version`] so rooms can skip resending unchanged tiles.
//!
//! Building footprints live in a separate occupancy overlay. The overlay is
//! never serialized; it is rebuilt from the building list on restore.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::components::TilePos;
use crate::economy::ResourceKind;
use crate::error::{GameError, Result};
use crate::pathfinding::Traversal;

/// Terrain classification of a single tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileKind {
    /// Open ground.
    Grass,
    /// Impassable for land units, the only terrain ships can use.
    Water,
    /// Open ground, also what depleted resource tiles turn into.
    Dirt,
    /// Wood deposit, blocks movement.
    Tree,
    /// Mineral deposit, blocks movement.
    Mineral,
    /// Impassable.
    Rock,
}

impl TileKind {
    /// Wire code used in snapshots.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            TileKind::Grass => 0,
            TileKind::Water => 1,
            TileKind::Dirt => 2,
            TileKind::Tree => 3,
            TileKind::Mineral => 4,
            TileKind::Rock => 5,
        }
    }

    /// Decode a wire code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TileKind::Grass),
            1 => Some(TileKind::Water),
            2 => Some(TileKind::Dirt),
            3 => Some(TileKind::Tree),
            4 => Some(TileKind::Mineral),
            5 => Some(TileKind::Rock),
            _ => None,
        }
    }

    /// Land units can stand here.
    #[must_use]
    pub const fn is_open_ground(self) -> bool {
        matches!(self, TileKind::Grass | TileKind::Dirt)
    }

    /// Resource this tile yields, if any.
    #[must_use]
    pub const fn resource(self) -> Option<ResourceKind> {
        match self {
            TileKind::Tree => Some(ResourceKind::Wood),
            TileKind::Mineral => Some(ResourceKind::Minerals),
            _ => None,
        }
    }
}

/// A resource deposit as it appears in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
    /// Remaining amount.
    pub amount: i32,
}

/// Tile grid plus depletable resource maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameMap {
    width: i32,
    height: i32,
    tiles: Vec<TileKind>,
    minerals: BTreeMap<TilePos, i32>,
    wood: BTreeMap<TilePos, i32>,
    version: u64,
    structures: Vec<bool>,
}

impl GameMap {
    /// Create a map filled with one tile kind.
    ///
    /// # Panics
    ///
    /// Panics if `width` or `height` is not positive.
    #[must_use]
    pub fn filled(width: i32, height: i32, kind: TileKind) -> Self {
        assert!(width > 0, "GameMap width must be positive");
        assert!(height > 0, "GameMap height must be positive");
        assert!(kind.resource().is_none(), "fill kind must not be a resource");

        let count = (width as usize) * (height as usize);
        Self {
            width,
            height,
            tiles: vec![kind; count],
            minerals: BTreeMap::new(),
            wood: BTreeMap::new(),
            version: 0,
            structures: vec![false; count],
        }
    }

    /// Rebuild a map from snapshot parts, validating the resource invariant.
    pub fn from_parts(
        width: i32,
        height: i32,
        version: u64,
        tile_codes: &[u8],
        minerals: &[Deposit],
        wood: &[Deposit],
    ) -> Result<Self> {
        if width <= 0 || height <= 0 {
            return Err(GameError::MalformedSnapshot(format!(
                "map dimensions {width}x{height}"
            )));
        }
        let count = (width as usize) * (height as usize);
        if tile_codes.len() != count {
            return Err(GameError::MalformedSnapshot(format!(
                "expected {count} tiles, got {}",
                tile_codes.len()
            )));
        }

        let tiles = tile_codes
            .iter()
            .map(|&code| {
                TileKind::from_code(code)
                    .ok_or_else(|| GameError::MalformedSnapshot(format!("tile code {code}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let collect = |deposits: &[Deposit]| -> BTreeMap<TilePos, i32> {
            deposits
                .iter()
                .map(|d| (TilePos::new(d.x, d.y), d.amount))
                .collect()
        };

        let map = Self {
            width,
            height,
            tiles,
            minerals: collect(minerals),
            wood: collect(wood),
            version,
            structures: vec![false; count],
        };
        map.check_resource_invariant()?;
        Ok(map)
    }

    /// Grid width in tiles.
    #[must_use]
    pub const fn width(&self) -> i32 {
        self.width
    }

    /// Grid height in tiles.
    #[must_use]
    pub const fn height(&self) -> i32 {
        self.height
    }

    /// Bumped on every tile downgrade.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    fn index(&self, pos: TilePos) -> usize {
        (pos.y as usize) * (self.width as usize) + (pos.x as usize)
    }

    /// Check if coordinates are within grid bounds.
    #[must_use]
    pub fn in_bounds(&self, pos: TilePos) -> bool {
        pos.x >= 0 && pos.y >= 0 && pos.x < self.width && pos.y < self.height
    }

    /// Clamp a coordinate into the grid.
    #[must_use]
    pub fn clamp(&self, pos: TilePos) -> TilePos {
        TilePos::new(pos.x.clamp(0, self.width - 1), pos.y.clamp(0, self.height - 1))
    }

    /// Tile kind at a coordinate, `None` when out of bounds.
    #[must_use]
    pub fn tile(&self, pos: TilePos) -> Option<TileKind> {
        self.in_bounds(pos).then(|| self.tiles[self.index(pos)])
    }

    /// Overwrite a tile with a non-resource kind. Any deposit there is removed.
    /// Returns `false` if out of bounds.
    pub fn set_tile(&mut self, pos: TilePos, kind: TileKind) -> bool {
        if !self.in_bounds(pos) {
            return false;
        }
        debug_assert!(kind.resource().is_none(), "use place_resource for deposits");
        let index = self.index(pos);
        self.tiles[index] = kind;
        self.minerals.remove(&pos);
        self.wood.remove(&pos);
        true
    }

    /// Turn a tile into a resource deposit holding `amount`.
    /// Returns `false` if out of bounds or `amount` is not positive.
    pub fn place_resource(&mut self, pos: TilePos, kind: ResourceKind, amount: i32) -> bool {
        if !self.in_bounds(pos) || amount <= 0 {
            return false;
        }
        let index = self.index(pos);
        self.minerals.remove(&pos);
        self.wood.remove(&pos);
        match kind {
            ResourceKind::Minerals => {
                self.tiles[index] = TileKind::Mineral;
                self.minerals.insert(pos, amount);
            }
            ResourceKind::Wood => {
                self.tiles[index] = TileKind::Tree;
                self.wood.insert(pos, amount);
            }
        }
        true
    }

    /// Remaining deposit at a tile, if it is a resource tile.
    #[must_use]
    pub fn resource_at(&self, pos: TilePos) -> Option<(ResourceKind, i32)> {
        let kind = self.tile(pos)?.resource()?;
        let amount = match kind {
            ResourceKind::Minerals => self.minerals.get(&pos),
            ResourceKind::Wood => self.wood.get(&pos),
        }?;
        Some((kind, *amount))
    }

    /// Take up to `max` from a deposit. Exhausting it converts the tile to
    /// dirt, removes the entry and bumps the map version.
    pub fn harvest(&mut self, pos: TilePos, max: i32) -> Option<(ResourceKind, i32)> {
        let (kind, remaining) = self.resource_at(pos)?;
        let taken = max.min(remaining).max(0);
        let left = remaining - taken;

        let deposits = match kind {
            ResourceKind::Minerals => &mut self.minerals,
            ResourceKind::Wood => &mut self.wood,
        };

        if left <= 0 {
            deposits.remove(&pos);
            let index = self.index(pos);
            self.tiles[index] = TileKind::Dirt;
            self.version += 1;
            tracing::trace!(x = pos.x, y = pos.y, ?kind, "Deposit exhausted");
        } else {
            deposits.insert(pos, left);
        }

        Some((kind, taken))
    }

    /// Land units may stand here.
    #[must_use]
    pub fn is_walkable(&self, pos: TilePos) -> bool {
        self.in_bounds(pos)
            && self.tiles[self.index(pos)].is_open_ground()
            && !self.structures[self.index(pos)]
    }

    /// Naval units may float here.
    #[must_use]
    pub fn is_swimmable(&self, pos: TilePos) -> bool {
        self.in_bounds(pos)
            && self.tiles[self.index(pos)] == TileKind::Water
            && !self.structures[self.index(pos)]
    }

    /// Traversability for a movement domain.
    #[must_use]
    pub fn is_traversable(&self, pos: TilePos, traversal: Traversal) -> bool {
        match traversal {
            Traversal::Land => self.is_walkable(pos),
            Traversal::Naval => self.is_swimmable(pos),
            Traversal::Air => self.in_bounds(pos),
        }
    }

    /// True if a building footprint covers the tile.
    #[must_use]
    pub fn has_structure(&self, pos: TilePos) -> bool {
        self.in_bounds(pos) && self.structures[self.index(pos)]
    }

    /// Mark or clear a square footprint in the occupancy overlay.
    pub fn set_structure(&mut self, anchor: TilePos, size: i32, occupied: bool) {
        for dy in 0..size {
            for dx in 0..size {
                let pos = anchor.offset(dx, dy);
                if self.in_bounds(pos) {
                    let index = self.index(pos);
                    self.structures[index] = occupied;
                }
            }
        }
    }

    /// Tiles in row-major order.
    #[must_use]
    pub fn tiles(&self) -> &[TileKind] {
        &self.tiles
    }

    /// Tile codes in row-major order.
    #[must_use]
    pub fn tile_codes(&self) -> Vec<u8> {
        self.tiles.iter().map(|t| t.code()).collect()
    }

    /// Mineral deposits in coordinate order.
    pub fn minerals(&self) -> impl Iterator<Item = (TilePos, i32)> + '_ {
        self.minerals.iter().map(|(p, a)| (*p, *a))
    }

    /// Wood deposits in coordinate order.
    pub fn wood(&self) -> impl Iterator<Item = (TilePos, i32)> + '_ {
        self.wood.iter().map(|(p, a)| (*p, *a))
    }

    /// Deposits of one kind in coordinate order.
    pub fn deposits(&self, kind: ResourceKind) -> impl Iterator<Item = (TilePos, i32)> + '_ {
        let source = match kind {
            ResourceKind::Minerals => &self.minerals,
            ResourceKind::Wood => &self.wood,
        };
        source.iter().map(|(p, a)| (*p, *a))
    }

    /// Verify that resource tiles and resource maps agree.
    pub fn check_resource_invariant(&self) -> Result<()> {
        for y in 0..self.height {
            for x in 0..self.width {
                let pos = TilePos::new(x, y);
                let tile = self.tiles[self.index(pos)];
                let (entry, other) = match tile {
                    TileKind::Mineral => (self.minerals.get(&pos), self.wood.get(&pos)),
                    TileKind::Tree => (self.wood.get(&pos), self.minerals.get(&pos)),
                    _ => {
                        if self.minerals.contains_key(&pos) || self.wood.contains_key(&pos) {
                            return Err(GameError::MalformedSnapshot(format!(
                                "deposit on non-resource tile ({x}, {y})"
                            )));
                        }
                        continue;
                    }
                };
                if !entry.is_some_and(|a| *a > 0) || other.is_some() {
                    return Err(GameError::MalformedSnapshot(format!(
                        "resource tile ({x}, {y}) has no positive deposit"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(x: i32, y: i32) -> TilePos {
        TilePos::new(x, y)
    }

    #[test]
    fn test_tile_codes_roundtrip() {
        for code in 0..6u8 {
            let kind = TileKind::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert_eq!(TileKind::from_code(6), None);
    }

    #[test]
    fn test_harvest_partial_and_exhaust() {
        let mut map = GameMap::filled(8, 8, TileKind::Grass);
        map.place_resource(pos(3, 3), ResourceKind::Minerals, 15);

        assert_eq!(map.harvest(pos(3, 3), 10), Some((ResourceKind::Minerals, 10)));
        assert_eq!(map.resource_at(pos(3, 3)), Some((ResourceKind::Minerals, 5)));
        assert_eq!(map.version(), 0);

        assert_eq!(map.harvest(pos(3, 3), 10), Some((ResourceKind::Minerals, 5)));
        assert_eq!(map.tile(pos(3, 3)), Some(TileKind::Dirt));
        assert_eq!(map.resource_at(pos(3, 3)), None);
        assert_eq!(map.version(), 1);
        assert!(map.check_resource_invariant().is_ok());
    }

    #[test]
    fn test_harvest_non_resource_tile() {
        let mut map = GameMap::filled(4, 4, TileKind::Grass);
        assert_eq!(map.harvest(pos(1, 1), 10), None);
        assert_eq!(map.harvest(pos(-1, 1), 10), None);
    }

    #[test]
    fn test_walkable_and_swimmable() {
        let mut map = GameMap::filled(6, 6, TileKind::Grass);
        map.set_tile(pos(0, 0), TileKind::Water);
        map.set_tile(pos(1, 0), TileKind::Rock);
        map.place_resource(pos(2, 0), ResourceKind::Wood, 50);

        assert!(!map.is_walkable(pos(0, 0)));
        assert!(map.is_swimmable(pos(0, 0)));
        assert!(!map.is_walkable(pos(1, 0)));
        assert!(!map.is_walkable(pos(2, 0)));
        assert!(map.is_walkable(pos(3, 0)));
        assert!(!map.is_walkable(pos(6, 0)));
        assert!(map.is_traversable(pos(1, 0), Traversal::Air));
    }

    #[test]
    fn test_structure_overlay_blocks_walking() {
        let mut map = GameMap::filled(6, 6, TileKind::Grass);
        map.set_structure(pos(2, 2), 2, true);
        assert!(!map.is_walkable(pos(3, 3)));
        assert!(map.is_walkable(pos(4, 4)));
        map.set_structure(pos(2, 2), 2, false);
        assert!(map.is_walkable(pos(3, 3)));
    }

    #[test]
    fn test_from_parts_rejects_broken_invariant() {
        let tiles = vec![TileKind::Mineral.code(), 0, 0, 0];
        let err = GameMap::from_parts(2, 2, 0, &tiles, &[], &[]);
        assert!(err.is_err());

        let ok = GameMap::from_parts(
            2,
            2,
            3,
            &tiles,
            &[Deposit {
                x: 0,
                y: 0,
                amount: 12,
            }],
            &[],
        )
        .unwrap();
        assert_eq!(ok.resource_at(pos(0, 0)), Some((ResourceKind::Minerals, 12)));
        assert_eq!(ok.version(), 3);
    }
}

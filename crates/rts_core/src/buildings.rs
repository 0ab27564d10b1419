//! Building placement, construction and per-tick behaviour.
//!
//! Handles placement validation, construction progress, defensive fire and
//! unit production for buildings in the game world.
//!
//! All calculations use fixed-point math for deterministic simulation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::components::{
    damage_after_armor, within_range, BuildingId, LastShot, TeamId, TilePos, UnitId,
};
use crate::data::{BuildingStats, BuildingType, UnitType};
use crate::economy::Resources;
use crate::map::{GameMap, TileKind};
use crate::math::{fixed_serde, Fixed, Vec2Fixed};
use crate::production::{ProductionError, ProductionQueue};
use crate::units::Unit;

// ============================================================================
// Placement
// ============================================================================

/// Result of a placement validation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementResult {
    /// Placement is valid.
    Valid,
    /// Part of the footprint lies outside the map.
    OutOfBounds,
    /// Some footprint tiles are not open ground or are already built on.
    Blocked {
        /// The offending tiles.
        tiles: Vec<TilePos>,
    },
    /// A dock needs water orthogonally next to its footprint.
    NoWaterEdge,
}

impl PlacementResult {
    /// Check if placement is valid.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, PlacementResult::Valid)
    }
}

/// Check if a building of `building_type` can be placed with its top-left
/// corner at `anchor`.
///
/// This validates:
/// - every footprint tile is within bounds
/// - every footprint tile is walkable and free of structures
/// - docks have at least one water tile orthogonally adjacent to the footprint
#[must_use]
pub fn can_place_building(map: &GameMap, building_type: BuildingType, anchor: TilePos) -> PlacementResult {
    let size = building_type.stats().size;
    if !map.in_bounds(anchor) || !map.in_bounds(anchor.offset(size - 1, size - 1)) {
        return PlacementResult::OutOfBounds;
    }

    let blocked: Vec<TilePos> = footprint(anchor, size)
        .filter(|tile| !map.is_walkable(*tile))
        .collect();
    if !blocked.is_empty() {
        return PlacementResult::Blocked { tiles: blocked };
    }

    if building_type.requires_water_edge() && !has_water_edge(map, anchor, size) {
        return PlacementResult::NoWaterEdge;
    }

    PlacementResult::Valid
}

fn has_water_edge(map: &GameMap, anchor: TilePos, size: i32) -> bool {
    (0..size).any(|i| {
        [
            anchor.offset(-1, i),
            anchor.offset(size, i),
            anchor.offset(i, -1),
            anchor.offset(i, size),
        ]
        .into_iter()
        .any(|tile| map.tile(tile) == Some(TileKind::Water))
    })
}

/// Tiles covered by a square footprint, row-major.
pub fn footprint(anchor: TilePos, size: i32) -> impl Iterator<Item = TilePos> {
    (0..size).flat_map(move |dy| (0..size).map(move |dx| anchor.offset(dx, dy)))
}

// ============================================================================
// Building
// ============================================================================

/// A unit produced this tick, waiting for a spawn tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Producing building.
    pub building: BuildingId,
    /// Type to spawn.
    pub unit_type: UnitType,
    /// Owning team.
    pub team: TeamId,
    /// Door tile: search for a free tile starts here.
    pub origin: TilePos,
    /// Where the new unit should walk to, if anywhere.
    pub rally: Option<TilePos>,
}

/// A static structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Building {
    /// Unique id.
    pub id: BuildingId,
    /// Catalog type.
    #[serde(rename = "type")]
    pub building_type: BuildingType,
    /// Owning team.
    pub team: TeamId,
    /// Top-left footprint tile.
    pub anchor: TilePos,
    /// Current health.
    pub health: i32,
    /// Maximum health.
    pub max_health: i32,
    /// Builder-seconds of construction so far.
    #[serde(with = "fixed_serde")]
    pub progress: Fixed,
    /// Construction finished.
    pub built: bool,
    /// Units being trained.
    pub queue: ProductionQueue,
    /// Where produced units walk to.
    pub rally: Option<TilePos>,
    /// Defensive target.
    pub target: Option<UnitId>,
    /// Seconds until the defensive weapon is ready.
    #[serde(with = "fixed_serde")]
    pub cooldown: Fixed,
    /// Last shot fired, for presentation.
    pub last_shot: Option<LastShot>,
}

impl Building {
    /// Create a building at full health. Unbuilt buildings start with zero
    /// progress and only act as placement reservations.
    #[must_use]
    pub fn new(id: BuildingId, building_type: BuildingType, team: TeamId, anchor: TilePos, built: bool) -> Self {
        let stats = building_type.stats();
        Self {
            id,
            building_type,
            team,
            anchor,
            health: stats.max_health,
            max_health: stats.max_health,
            progress: if built { stats.build_time } else { Fixed::ZERO },
            built,
            queue: ProductionQueue::new(),
            rally: None,
            target: None,
            cooldown: Fixed::ZERO,
            last_shot: None,
        }
    }

    /// Catalog stats.
    #[must_use]
    pub fn stats(&self) -> &'static BuildingStats {
        self.building_type.stats()
    }

    /// Footprint edge length.
    #[must_use]
    pub fn size(&self) -> i32 {
        self.stats().size
    }

    /// Still standing.
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.health > 0
    }

    /// Centre of the footprint in continuous coordinates.
    #[must_use]
    pub fn center(&self) -> Vec2Fixed {
        let half = Fixed::from_num(self.size()) / 2;
        Vec2Fixed::new(
            Fixed::from_num(self.anchor.x) + half,
            Fixed::from_num(self.anchor.y) + half,
        )
    }

    /// Point of the footprint closest to `from`.
    #[must_use]
    pub fn closest_point(&self, from: Vec2Fixed) -> Vec2Fixed {
        let min_x = Fixed::from_num(self.anchor.x);
        let min_y = Fixed::from_num(self.anchor.y);
        let size = Fixed::from_num(self.size());
        Vec2Fixed::new(
            from.x.clamp(min_x, min_x + size),
            from.y.clamp(min_y, min_y + size),
        )
    }

    /// True if the tile is covered by this building.
    #[must_use]
    pub fn covers(&self, tile: TilePos) -> bool {
        let size = self.size();
        tile.x >= self.anchor.x
            && tile.y >= self.anchor.y
            && tile.x < self.anchor.x + size
            && tile.y < self.anchor.y + size
    }

    /// Tile just below the middle of the footprint, where units leave.
    #[must_use]
    pub fn door(&self) -> TilePos {
        let size = self.size();
        self.anchor.offset(size / 2, size)
    }

    /// Mark the footprint in the map's structure overlay.
    pub fn occupy(&self, map: &mut GameMap) {
        map.set_structure(self.anchor, self.size(), true);
    }

    /// Clear the footprint from the map's structure overlay.
    pub fn vacate(&self, map: &mut GameMap) {
        map.set_structure(self.anchor, self.size(), false);
    }

    /// Apply damage after armor, with the one-point floor.
    pub fn take_damage(&mut self, damage: i32) {
        self.health -= damage_after_armor(damage, self.stats().armor);
    }

    /// Add builder-seconds. Returns true on the call that completes it.
    pub fn add_progress(&mut self, dt: Fixed) -> bool {
        if self.built {
            return false;
        }
        let build_time = self.stats().build_time;
        self.progress = (self.progress + dt).min(build_time);
        if self.progress >= build_time {
            self.built = true;
            return true;
        }
        false
    }

    /// Check whether this building can queue `unit_type` right now.
    pub fn can_train(&self, unit_type: UnitType, resources: Resources) -> Result<(), ProductionError> {
        if !self.built {
            return Err(ProductionError::BuildingNotConstructed);
        }
        if !self.building_type.can_produce(unit_type) {
            return Err(ProductionError::CannotProduceUnit);
        }
        if !resources.can_afford(unit_type.stats().cost) {
            return Err(ProductionError::InsufficientResources);
        }
        if self.queue.is_full() {
            return Err(ProductionError::QueueFull);
        }
        Ok(())
    }

    /// Queue a unit. Returns its cost; the caller spends it.
    pub fn train(&mut self, unit_type: UnitType) -> Result<Resources, ProductionError> {
        if !self.built {
            return Err(ProductionError::BuildingNotConstructed);
        }
        if !self.building_type.can_produce(unit_type) {
            return Err(ProductionError::CannotProduceUnit);
        }
        self.queue.add(unit_type)?;
        Ok(unit_type.stats().cost)
    }

    /// Advance one tick. Enemy units are the entries of `units` on other
    /// teams. Returns at most one finished unit.
    pub fn update(&mut self, dt: Fixed, tick: u64, units: &mut BTreeMap<UnitId, Unit>) -> Option<SpawnRequest> {
        if !self.built || !self.is_alive() {
            return None;
        }

        if let Some(weapon) = self.stats().weapon {
            self.cooldown = (self.cooldown - dt).max(Fixed::ZERO);
            let center = self.center();

            let keep = self.target.and_then(|id| units.get(&id)).is_some_and(|u| {
                u.is_alive() && u.team != self.team && within_range(center, u.position, weapon.range)
            });
            if !keep {
                self.target = self.nearest_enemy(center, weapon.range, units);
            }

            if let Some(enemy) = self.target.and_then(|id| units.get_mut(&id)) {
                if self.cooldown <= Fixed::ZERO {
                    enemy.health -= damage_after_armor(weapon.damage, enemy.stats().armor);
                    self.cooldown = weapon.cooldown;
                    self.last_shot = Some(LastShot {
                        tick,
                        from: center,
                        to: enemy.position,
                    });
                }
            }
        }

        let unit_type = self.queue.advance(dt)?;
        Some(SpawnRequest {
            building: self.id,
            unit_type,
            team: self.team,
            origin: self.door(),
            rally: self.rally,
        })
    }

    fn nearest_enemy(&self, center: Vec2Fixed, range: Fixed, units: &BTreeMap<UnitId, Unit>) -> Option<UnitId> {
        let mut nearest: Option<(Fixed, UnitId)> = None;
        for unit in units.values() {
            if unit.team == self.team || !unit.is_alive() || !within_range(center, unit.position, range) {
                continue;
            }
            let dist = center.distance_squared(unit.position);
            if nearest.map_or(true, |(best, _)| dist < best) {
                nearest = Some((dist, unit.id));
            }
        }
        nearest.map(|(_, id)| id)
    }
}

//! Unit state machine.
//!
//! A unit carries exactly one [`Order`]. Issuing any order goes through
//! [`Unit::issue`], which drops the path and every timer of the previous
//! order, so no state can keep a stale target around.
//!
//! Targets are ids. Every tick they are resolved through the engine's
//! maps; a missing or dead target is "target lost" and the unit goes idle.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::buildings::Building;
use crate::components::{damage_after_armor, within_range, BuildingId, LastShot, TeamId, TilePos, UnitId};
use crate::data::{BuildingType, UnitStats, UnitType};
use crate::economy::Carry;
use crate::map::GameMap;
use crate::math::{fixed_serde, Fixed, Vec2Fixed};
use crate::pathfinding::{find_path, find_path_adjacent, touches_footprint, Traversal};

/// Radius in tiles within which idle combat units pick a fight.
pub const AGGRO_RADIUS: Fixed = Fixed::const_from_int(6);

/// Seconds between path recomputations while chasing a target.
pub const REPATH_INTERVAL: Fixed = crate::data::fx(1, 2);

/// Seconds a worker spends at a deposit per trip.
pub const GATHER_TIME: Fixed = Fixed::ONE;

/// Resources a worker carries per trip.
pub const CARRY_CAPACITY: i32 = 10;

/// Movement domain of a unit type.
#[must_use]
pub fn traversal_for(unit_type: UnitType) -> Traversal {
    let stats = unit_type.stats();
    if stats.flying {
        Traversal::Air
    } else if stats.naval {
        Traversal::Naval
    } else {
        Traversal::Land
    }
}

/// What a unit is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum Order {
    /// Standing still. Combat units auto-aggro from here.
    #[default]
    Idle,
    /// Walking to a destination.
    Moving {
        /// Final tile.
        destination: TilePos,
    },
    /// Attacking an enemy unit.
    Attacking {
        /// Target unit.
        target: UnitId,
    },
    /// Attacking an enemy building.
    AttackingBuilding {
        /// Target building.
        target: BuildingId,
    },
    /// Harvesting a resource tile.
    Gathering {
        /// Resource tile.
        node: TilePos,
    },
    /// Carrying resources back to a base.
    Returning {
        /// Resource tile to go back to afterwards.
        node: TilePos,
    },
    /// Constructing a building.
    Building {
        /// Building under construction.
        target: BuildingId,
    },
}

/// Mutable view of the world a unit acts on during its update.
///
/// The updating unit itself is not in `units`.
pub struct World<'a> {
    /// The tile grid.
    pub map: &'a mut GameMap,
    /// Every other unit.
    pub units: &'a mut BTreeMap<UnitId, Unit>,
    /// Every building.
    pub buildings: &'a mut BTreeMap<BuildingId, Building>,
    /// Current tick, for presentation records.
    pub tick: u64,
}

/// A mobile entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    /// Unique id.
    pub id: UnitId,
    /// Catalog type.
    #[serde(rename = "type")]
    pub unit_type: UnitType,
    /// Owning team.
    pub team: TeamId,
    /// Continuous position in tile units.
    pub position: Vec2Fixed,
    /// Current health.
    pub health: i32,
    /// Maximum health.
    pub max_health: i32,
    /// Current order.
    pub order: Order,
    /// Remaining tile waypoints.
    pub path: VecDeque<TilePos>,
    /// Seconds until the next allowed repath.
    #[serde(with = "fixed_serde")]
    pub repath_timer: Fixed,
    /// Seconds spent at the current deposit.
    #[serde(with = "fixed_serde")]
    pub gather_timer: Fixed,
    /// Seconds until the weapon is ready.
    #[serde(with = "fixed_serde")]
    pub cooldown: Fixed,
    /// Resources being carried.
    pub carry: Carry,
    /// Set on arrival at a base; the engine credits the carry at end of tick.
    pub deposit_pending: bool,
    /// Last shot fired, for presentation.
    pub last_shot: Option<LastShot>,
}

impl Unit {
    /// Create a unit at full health, idle.
    #[must_use]
    pub fn new(id: UnitId, unit_type: UnitType, team: TeamId, position: Vec2Fixed) -> Self {
        let stats = unit_type.stats();
        Self {
            id,
            unit_type,
            team,
            position,
            health: stats.max_health,
            max_health: stats.max_health,
            order: Order::Idle,
            path: VecDeque::new(),
            repath_timer: Fixed::ZERO,
            gather_timer: Fixed::ZERO,
            cooldown: Fixed::ZERO,
            carry: Carry::EMPTY,
            deposit_pending: false,
            last_shot: None,
        }
    }

    /// Catalog stats.
    #[must_use]
    pub fn stats(&self) -> &'static UnitStats {
        self.unit_type.stats()
    }

    /// Tile containing the unit.
    #[must_use]
    pub fn tile(&self) -> TilePos {
        TilePos::from_position(self.position)
    }

    /// Still in play.
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.health > 0
    }

    /// Movement domain.
    #[must_use]
    pub fn traversal(&self) -> Traversal {
        traversal_for(self.unit_type)
    }

    /// Idle with nothing queued.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.order == Order::Idle
    }

    /// Apply damage after armor, with the one-point floor.
    pub fn take_damage(&mut self, damage: i32) {
        self.health -= damage_after_armor(damage, self.stats().armor);
    }

    /// Replace the current order, resetting path and per-order timers.
    pub fn issue(&mut self, order: Order) {
        self.order = order;
        self.path.clear();
        self.repath_timer = Fixed::ZERO;
        self.gather_timer = Fixed::ZERO;
    }

    /// Order a move and compute the path immediately. Goes idle when no
    /// step toward the destination is possible.
    pub fn order_move(&mut self, map: &GameMap, destination: TilePos) {
        let destination = map.clamp(destination);
        self.issue(Order::Moving { destination });
        self.path = find_path(map, self.tile(), destination, self.traversal()).into();
        if self.path.is_empty() {
            self.issue(Order::Idle);
        }
    }

    /// Advance this unit by one tick.
    pub fn update(&mut self, dt: Fixed, world: &mut World<'_>) {
        if !self.is_alive() {
            return;
        }
        self.cooldown = (self.cooldown - dt).max(Fixed::ZERO);

        match self.order {
            Order::Idle => self.update_idle(world),
            Order::Moving { .. } => {
                self.follow_path(dt);
                if self.path.is_empty() {
                    self.issue(Order::Idle);
                }
            }
            Order::Attacking { target } => self.update_attack_unit(dt, target, world),
            Order::AttackingBuilding { target } => self.update_attack_building(dt, target, world),
            Order::Gathering { node } => self.update_gather(dt, node, world),
            Order::Returning { node } => self.update_return(dt, node, world),
            Order::Building { target } => self.update_build(dt, target, world),
        }
    }

    fn update_idle(&mut self, world: &World<'_>) {
        if self.unit_type.is_worker() {
            return;
        }

        let radius_sq = AGGRO_RADIUS * AGGRO_RADIUS;
        let mut nearest: Option<(Fixed, UnitId)> = None;
        for other in world.units.values() {
            if other.team == self.team || !other.is_alive() {
                continue;
            }
            let dist = self.position.distance_squared(other.position);
            if dist <= radius_sq && nearest.map_or(true, |(best, _)| dist < best) {
                nearest = Some((dist, other.id));
            }
        }

        if let Some((_, target)) = nearest {
            trace!(unit = %self.id, %target, "Auto-aggro");
            self.issue(Order::Attacking { target });
        }
    }

    fn update_attack_unit(&mut self, dt: Fixed, target: UnitId, world: &mut World<'_>) {
        let Some(enemy) = world.units.get_mut(&target).filter(|u| u.is_alive()) else {
            self.issue(Order::Idle);
            return;
        };

        let stats = self.stats();
        if within_range(self.position, enemy.position, stats.range) {
            self.path.clear();
            if self.cooldown <= Fixed::ZERO {
                enemy.take_damage(stats.damage);
                self.fire(enemy.position, world.tick);
            }
            return;
        }

        let goal = enemy.tile();
        if !self.chase(dt, world.map, |map, from, traversal| {
            find_path(map, from, goal, traversal)
        }) {
            self.issue(Order::Idle);
        }
    }

    fn update_attack_building(&mut self, dt: Fixed, target: BuildingId, world: &mut World<'_>) {
        let Some(building) = world.buildings.get_mut(&target).filter(|b| b.is_alive()) else {
            self.issue(Order::Idle);
            return;
        };

        let stats = self.stats();
        let aim = building.closest_point(self.position);
        if within_range(self.position, aim, stats.range) {
            self.path.clear();
            if self.cooldown <= Fixed::ZERO {
                building.take_damage(stats.damage);
                self.fire(aim, world.tick);
            }
            return;
        }

        let (anchor, size) = (building.anchor, building.size());
        if !self.chase(dt, world.map, |map, from, traversal| {
            find_path_adjacent(map, from, anchor, size, traversal)
        }) {
            self.issue(Order::Idle);
        }
    }

    fn update_gather(&mut self, dt: Fixed, node: TilePos, world: &mut World<'_>) {
        if !self.unit_type.is_worker() {
            self.issue(Order::Idle);
            return;
        }

        let Some((kind, _)) = world.map.resource_at(node) else {
            let next = if self.carry.is_empty() {
                Order::Idle
            } else {
                Order::Returning { node }
            };
            self.issue(next);
            return;
        };

        let wrong_kind = !self.carry.is_empty() && self.carry.kind != Some(kind);
        if wrong_kind || self.carry.amount >= CARRY_CAPACITY {
            self.issue(Order::Returning { node });
            return;
        }

        if !touches_footprint(self.tile(), node, 1) {
            if !self.chase(dt, world.map, |map, from, traversal| {
                find_path_adjacent(map, from, node, 1, traversal)
            }) {
                self.issue(Order::Idle);
            }
            return;
        }

        self.path.clear();
        self.gather_timer += dt;
        if self.gather_timer < GATHER_TIME {
            return;
        }

        let room = CARRY_CAPACITY - self.carry.amount;
        if let Some((kind, taken)) = world.map.harvest(node, room) {
            self.carry.kind = Some(kind);
            self.carry.amount += taken;
            trace!(unit = %self.id, ?kind, taken, "Gathered");
        }
        self.issue(Order::Returning { node });
    }

    fn update_return(&mut self, dt: Fixed, node: TilePos, world: &mut World<'_>) {
        let Some((anchor, size)) = self.nearest_base(world.buildings) else {
            self.issue(Order::Idle);
            return;
        };

        if touches_footprint(self.tile(), anchor, size) {
            self.path.clear();
            if !self.carry.is_empty() {
                self.deposit_pending = true;
            }
            let next = if world.map.resource_at(node).is_some() {
                Order::Gathering { node }
            } else {
                Order::Idle
            };
            self.issue(next);
            return;
        }

        if !self.chase(dt, world.map, |map, from, traversal| {
            find_path_adjacent(map, from, anchor, size, traversal)
        }) {
            self.issue(Order::Idle);
        }
    }

    fn update_build(&mut self, dt: Fixed, target: BuildingId, world: &mut World<'_>) {
        let Some(site) = world
            .buildings
            .get_mut(&target)
            .filter(|b| b.is_alive() && b.team == self.team && !b.built)
        else {
            self.issue(Order::Idle);
            return;
        };

        if touches_footprint(self.tile(), site.anchor, site.size()) {
            self.path.clear();
            if site.add_progress(dt) {
                tracing::debug!(unit = %self.id, building = %site.id, kind = ?site.building_type, "Construction complete");
                self.issue(Order::Idle);
            }
            return;
        }

        let (anchor, size) = (site.anchor, site.size());
        if !self.chase(dt, world.map, |map, from, traversal| {
            find_path_adjacent(map, from, anchor, size, traversal)
        }) {
            self.issue(Order::Idle);
        }
    }

    /// Nearest built friendly base, ties broken by id.
    fn nearest_base(&self, buildings: &BTreeMap<BuildingId, Building>) -> Option<(TilePos, i32)> {
        let mut nearest: Option<(Fixed, &Building)> = None;
        for building in buildings.values() {
            if building.team != self.team
                || building.building_type != BuildingType::Base
                || !building.built
                || !building.is_alive()
            {
                continue;
            }
            let dist = self.position.distance_squared(building.center());
            if nearest.map_or(true, |(best, _)| dist < best) {
                nearest = Some((dist, building));
            }
        }
        nearest.map(|(_, b)| (b.anchor, b.size()))
    }

    fn fire(&mut self, at: Vec2Fixed, tick: u64) {
        self.cooldown = self.stats().attack_cooldown;
        self.last_shot = Some(LastShot {
            tick,
            from: self.position,
            to: at,
        });
    }

    /// Recompute the path when due, then keep walking. Returns false when
    /// no route exists.
    fn chase(
        &mut self,
        dt: Fixed,
        map: &GameMap,
        plan: impl FnOnce(&GameMap, TilePos, Traversal) -> Vec<TilePos>,
    ) -> bool {
        self.repath_timer -= dt;
        if self.path.is_empty() || self.repath_timer <= Fixed::ZERO {
            self.path = plan(map, self.tile(), self.traversal()).into();
            self.repath_timer = REPATH_INTERVAL;
            if self.path.is_empty() {
                return false;
            }
        }
        self.follow_path(dt);
        true
    }

    /// Walk along the waypoints at the unit's speed.
    fn follow_path(&mut self, dt: Fixed) {
        let mut budget = self.stats().speed * dt;
        while let Some(&next) = self.path.front() {
            let (position, arrived) = self.position.step_toward(next.center(), budget);
            let travelled = self.position.distance(position);
            self.position = position;
            if !arrived {
                break;
            }
            self.path.pop_front();
            budget -= travelled;
            if budget <= Fixed::ZERO {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::economy::ResourceKind;
    use crate::map::TileKind;

    const DT: Fixed = crate::data::fx(1, 10);

    struct Fixture {
        map: GameMap,
        units: BTreeMap<UnitId, Unit>,
        buildings: BTreeMap<BuildingId, Building>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                map: GameMap::filled(20, 20, TileKind::Grass),
                units: BTreeMap::new(),
                buildings: BTreeMap::new(),
            }
        }

        fn step(&mut self, unit: &mut Unit, ticks: usize) {
            self.step_until(unit, ticks, |_| false);
        }

        fn step_until(&mut self, unit: &mut Unit, max_ticks: usize, done: impl Fn(&Unit) -> bool) -> bool {
            for tick in 0..max_ticks {
                let mut world = World {
                    map: &mut self.map,
                    units: &mut self.units,
                    buildings: &mut self.buildings,
                    tick: tick as u64,
                };
                unit.update(DT, &mut world);
                if done(unit) {
                    return true;
                }
            }
            false
        }
    }

    fn unit(id: u32, unit_type: UnitType, team: u8, x: i32, y: i32) -> Unit {
        Unit::new(UnitId(id), unit_type, TeamId(team), TilePos::new(x, y).center())
    }

    #[test]
    fn test_issue_resets_path_and_targets() {
        let mut fixture = Fixture::new();
        let mut soldier = unit(1, UnitType::Soldier, 0, 2, 2);
        soldier.order_move(&fixture.map, TilePos::new(10, 2));
        assert!(!soldier.path.is_empty());

        soldier.gather_timer = Fixed::ONE;
        soldier.issue(Order::Attacking { target: UnitId(9) });
        assert!(soldier.path.is_empty());
        assert_eq!(soldier.gather_timer, Fixed::ZERO);

        // Target does not exist: target lost.
        fixture.step(&mut soldier, 1);
        assert_eq!(soldier.order, Order::Idle);
    }

    #[test]
    fn test_move_arrives_and_idles() {
        let mut fixture = Fixture::new();
        let mut worker = unit(1, UnitType::Worker, 0, 1, 1);
        worker.order_move(&fixture.map, TilePos::new(4, 1));

        fixture.step(&mut worker, 30);
        assert_eq!(worker.tile(), TilePos::new(4, 1));
        assert_eq!(worker.order, Order::Idle);
    }

    #[test]
    fn test_move_to_own_tile_is_idle() {
        let fixture = Fixture::new();
        let mut worker = unit(1, UnitType::Worker, 0, 1, 1);
        worker.order_move(&fixture.map, TilePos::new(1, 1));
        assert_eq!(worker.order, Order::Idle);
    }

    #[test]
    fn test_idle_army_aggroes_but_worker_does_not() {
        let mut fixture = Fixture::new();
        fixture.units.insert(UnitId(5), unit(5, UnitType::Soldier, 1, 8, 5));
        fixture.units.insert(UnitId(6), unit(6, UnitType::Soldier, 1, 15, 15));

        let mut soldier = unit(1, UnitType::Soldier, 0, 4, 5);
        fixture.step(&mut soldier, 1);
        assert_eq!(soldier.order, Order::Attacking { target: UnitId(5) });

        let mut worker = unit(2, UnitType::Worker, 0, 4, 5);
        fixture.step(&mut worker, 1);
        assert_eq!(worker.order, Order::Idle);
    }

    #[test]
    fn test_attack_damage_floor() {
        let mut fixture = Fixture::new();
        fixture.units.insert(UnitId(5), unit(5, UnitType::Tank, 1, 5, 5));

        let mut worker = unit(1, UnitType::Worker, 0, 4, 5);
        worker.issue(Order::Attacking { target: UnitId(5) });
        fixture.step(&mut worker, 1);

        let tank = &fixture.units[&UnitId(5)];
        // Worker damage 4 against armor 4 still lands one point.
        assert_eq!(tank.health, tank.max_health - 1);
        assert!(worker.last_shot.is_some());
        assert_eq!(worker.cooldown, UnitType::Worker.stats().attack_cooldown);
    }

    #[test]
    fn test_attack_out_of_range_closes_in() {
        let mut fixture = Fixture::new();
        fixture.units.insert(UnitId(5), unit(5, UnitType::Worker, 1, 12, 5));

        let mut soldier = unit(1, UnitType::Soldier, 0, 2, 5);
        soldier.issue(Order::Attacking { target: UnitId(5) });
        fixture.step(&mut soldier, 60);

        assert!(fixture.units[&UnitId(5)].health < UnitType::Worker.stats().max_health);
    }

    #[test]
    fn test_gather_four_minerals_then_return() {
        let mut fixture = Fixture::new();
        let node = TilePos::new(6, 5);
        fixture.map.place_resource(node, ResourceKind::Minerals, 4);

        let mut worker = unit(1, UnitType::Worker, 0, 5, 5);
        worker.issue(Order::Gathering { node });
        assert!(fixture.step_until(&mut worker, 20, |u| u.order != Order::Gathering { node }));

        assert_eq!(worker.carry.amount, 4);
        assert_eq!(worker.carry.kind, Some(ResourceKind::Minerals));
        assert_eq!(fixture.map.tile(node), Some(TileKind::Dirt));
        assert_eq!(fixture.map.resource_at(node), None);
        assert_eq!(worker.order, Order::Returning { node });
    }

    #[test]
    fn test_gather_on_empty_tile_goes_idle() {
        let mut fixture = Fixture::new();
        let mut worker = unit(1, UnitType::Worker, 0, 5, 5);
        worker.issue(Order::Gathering {
            node: TilePos::new(6, 5),
        });
        fixture.step(&mut worker, 1);
        assert_eq!(worker.order, Order::Idle);
    }

    #[test]
    fn test_return_deposits_and_resumes() {
        let mut fixture = Fixture::new();
        let node = TilePos::new(12, 5);
        fixture.map.place_resource(node, ResourceKind::Wood, 50);
        let mut base = Building::new(BuildingId(1), BuildingType::Base, TeamId(0), TilePos::new(2, 4), true);
        base.occupy(&mut fixture.map);
        fixture.buildings.insert(base.id, base);

        let mut worker = unit(1, UnitType::Worker, 0, 8, 5);
        worker.carry = Carry {
            amount: 10,
            kind: Some(ResourceKind::Wood),
        };
        worker.issue(Order::Returning { node });
        assert!(fixture.step_until(&mut worker, 40, |u| u.deposit_pending));

        assert!(worker.deposit_pending);
        assert_eq!(worker.order, Order::Gathering { node });
    }

    #[test]
    fn test_return_without_base_goes_idle() {
        let mut fixture = Fixture::new();
        let mut worker = unit(1, UnitType::Worker, 0, 8, 5);
        worker.carry = Carry {
            amount: 3,
            kind: Some(ResourceKind::Minerals),
        };
        worker.issue(Order::Returning {
            node: TilePos::new(1, 1),
        });
        fixture.step(&mut worker, 1);
        assert_eq!(worker.order, Order::Idle);
        assert_eq!(worker.carry.amount, 3);
    }

    #[test]
    fn test_builder_completes_structure() {
        let mut fixture = Fixture::new();
        let mut site = Building::new(BuildingId(3), BuildingType::Tower, TeamId(0), TilePos::new(6, 5), false);
        site.occupy(&mut fixture.map);
        fixture.buildings.insert(site.id, site);

        let mut worker = unit(1, UnitType::Worker, 0, 5, 5);
        worker.issue(Order::Building { target: BuildingId(3) });
        // 15 builder-seconds at 10 ticks per second, plus slack.
        fixture.step(&mut worker, 160);

        assert!(fixture.buildings[&BuildingId(3)].built);
        assert_eq!(worker.order, Order::Idle);
    }

    #[test]
    fn test_unreachable_target_abandons() {
        let mut fixture = Fixture::new();
        for (dx, dy) in [(-1, -1), (0, -1), (1, -1), (-1, 0), (1, 0), (-1, 1), (0, 1), (1, 1)] {
            fixture.map.set_tile(TilePos::new(5 + dx, 5 + dy), TileKind::Rock);
        }
        fixture.units.insert(UnitId(5), unit(5, UnitType::Worker, 1, 15, 15));

        let mut soldier = unit(1, UnitType::Soldier, 0, 5, 5);
        soldier.issue(Order::Attacking { target: UnitId(5) });
        fixture.step(&mut soldier, 1);
        assert_eq!(soldier.order, Order::Idle);
    }

    #[test]
    fn test_order_serializes_with_state_tag() {
        let json = serde_json::to_value(Order::AttackingBuilding {
            target: BuildingId(7),
        })
        .unwrap();
        assert_eq!(json["state"], "attackingBuilding");
        assert_eq!(json["target"], 7);
    }
}

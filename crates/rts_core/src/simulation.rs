//! Core simulation loop.
//!
//! The engine runs at a fixed tick rate and processes all match logic
//! deterministically. It owns the map, every unit and building, and the
//! per-team resource counters.
//!
//! # Determinism
//!
//! All operations in this module are fully deterministic:
//! - No floating-point math (uses fixed-point via [`Fixed`])
//! - No system randomness (the map generator is seeded)
//! - Consistent iteration order (entities live in id-ordered maps)
//! - Same inputs always produce same outputs
//!
//! # Example
//!
//! ```
//! use rts_core::simulation::{Engine, EngineConfig, TICK_DT};
//!
//! let mut engine = Engine::new(&EngineConfig::default());
//! let events = engine.update(TICK_DT);
//! assert_eq!(engine.tick(), 1);
//! assert!(!events.game_over);
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::buildings::{can_place_building, Building, PlacementResult, SpawnRequest};
use crate::components::{BuildingId, IdGenerator, TeamId, TilePos, UnitId};
use crate::data::{fx, BuildingType, UnitType};
use crate::economy::{Carry, Resources};
use crate::map::GameMap;
use crate::map_generation::{generate_map, MapConfig};
use crate::math::{Fixed, Vec2Fixed, HALF};
use crate::pathfinding::{nearest_matching, Traversal};
use crate::units::{traversal_for, Unit, World};

/// Ticks per second for the simulation.
pub const TICK_RATE: u32 = 10;

/// Duration of one tick in milliseconds.
pub const TICK_DURATION_MS: u32 = 1000 / TICK_RATE;

/// Duration of one tick in seconds.
pub const TICK_DT: Fixed = fx(1, TICK_RATE as i64);

/// Per-team unit cap, counting living units and queued production.
pub const UNIT_CAP: usize = 50;

/// Units closer than this push each other apart.
pub const SEPARATION_RADIUS: Fixed = HALF;

/// How far from a building's door to look for a free spawn tile.
pub const SPAWN_SEARCH_RADIUS: i32 = 8;

/// Engine construction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Map generation settings.
    pub map: MapConfig,
    /// Participating teams, in spawn order.
    pub teams: Vec<TeamId>,
    /// Resources each team starts with.
    pub starting_resources: Resources,
    /// Workers each team starts with.
    pub starting_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            map: MapConfig::default(),
            teams: vec![TeamId(0), TeamId(1)],
            starting_resources: Resources::new(200, 100),
            starting_workers: 3,
        }
    }
}

impl EngineConfig {
    /// Set the participating teams.
    #[must_use]
    pub fn with_teams(mut self, teams: Vec<TeamId>) -> Self {
        self.teams = teams;
        self
    }

    /// Set the map configuration.
    #[must_use]
    pub fn with_map(mut self, map: MapConfig) -> Self {
        self.map = map;
        self
    }

    /// Set the map seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.map.seed = seed;
        self
    }
}

/// Events produced during a single tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickEvents {
    /// Units spawned by production this tick.
    pub spawned: Vec<UnitId>,
    /// Units removed at the start of this tick.
    pub deaths: Vec<UnitId>,
    /// Buildings destroyed this tick.
    pub destroyed_buildings: Vec<BuildingId>,
    /// The match ended on this tick.
    pub game_over: bool,
}

/// The authoritative match simulation.
///
/// # Update Order
///
/// Each tick runs, in this order:
/// 1. Purge units with health ≤ 0
/// 2. Advance every unit state machine, ascending id
/// 3. Separation push
/// 4. Flush deposit-pending carries into team resources
/// 5. Advance buildings (defensive fire, production)
/// 6. Purge buildings with health ≤ 0
/// 7. Spawn produced units
/// 8. Increment tick
/// 9. Win condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Engine {
    pub(crate) tick: u64,
    pub(crate) teams: Vec<TeamId>,
    pub(crate) map: GameMap,
    pub(crate) units: BTreeMap<UnitId, Unit>,
    pub(crate) buildings: BTreeMap<BuildingId, Building>,
    pub(crate) resources: BTreeMap<TeamId, Resources>,
    pub(crate) unit_ids: IdGenerator,
    pub(crate) building_ids: IdGenerator,
    pub(crate) ended: bool,
    pub(crate) winner: Option<TeamId>,
}

impl Engine {
    /// Generate a map and set up every team with a built base, its starting
    /// workers and starting resources.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        let generated = generate_map(&config.map);
        let mut engine = Self::with_map(generated.map, config.teams.clone());

        for (index, team) in config.teams.iter().copied().enumerate() {
            let spawn = generated.spawn_points[index % generated.spawn_points.len()];
            engine.credit(team, config.starting_resources);

            let base = engine.place_building(BuildingType::Base, team, spawn.offset(-1, -1), true);
            let door = engine.buildings[&base].door();
            for _ in 0..config.starting_workers {
                if engine.spawn_unit_near(UnitType::Worker, team, door).is_none() {
                    warn!(%team, "No room for starting worker");
                }
            }
        }

        info!(
            teams = config.teams.len(),
            seed = config.map.seed,
            units = engine.units.len(),
            "Engine created"
        );
        engine
    }

    /// An engine on a prepared map with no entities and empty balances.
    #[must_use]
    pub fn with_map(map: GameMap, teams: Vec<TeamId>) -> Self {
        let resources = teams.iter().map(|team| (*team, Resources::ZERO)).collect();
        Self {
            tick: 0,
            teams,
            map,
            units: BTreeMap::new(),
            buildings: BTreeMap::new(),
            resources,
            unit_ids: IdGenerator::new(),
            building_ids: IdGenerator::new(),
            ended: false,
            winner: None,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Current tick number.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Participating teams.
    #[must_use]
    pub fn teams(&self) -> &[TeamId] {
        &self.teams
    }

    /// The tile grid.
    #[must_use]
    pub const fn map(&self) -> &GameMap {
        &self.map
    }

    /// The match is over and the engine is frozen.
    #[must_use]
    pub const fn is_ended(&self) -> bool {
        self.ended
    }

    /// Sole surviving team, if the match ended with one.
    #[must_use]
    pub const fn winner(&self) -> Option<TeamId> {
        self.winner
    }

    /// Look up a unit.
    #[must_use]
    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(&id)
    }

    /// Look up a unit mutably.
    pub fn unit_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        self.units.get_mut(&id)
    }

    /// Look up a building.
    #[must_use]
    pub fn building(&self, id: BuildingId) -> Option<&Building> {
        self.buildings.get(&id)
    }

    /// Look up a building mutably.
    pub fn building_mut(&mut self, id: BuildingId) -> Option<&mut Building> {
        self.buildings.get_mut(&id)
    }

    /// All units in id order.
    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }

    /// All buildings in id order.
    pub fn buildings(&self) -> impl Iterator<Item = &Building> {
        self.buildings.values()
    }

    /// Living units of one team, in id order.
    pub fn units_of(&self, team: TeamId) -> impl Iterator<Item = &Unit> {
        self.units
            .values()
            .filter(move |u| u.team == team && u.is_alive())
    }

    /// Standing buildings of one team, in id order.
    pub fn buildings_of(&self, team: TeamId) -> impl Iterator<Item = &Building> {
        self.buildings
            .values()
            .filter(move |b| b.team == team && b.is_alive())
    }

    /// Living units plus queued production, compared against [`UNIT_CAP`].
    #[must_use]
    pub fn team_unit_count(&self, team: TeamId) -> usize {
        let queued: usize = self.buildings_of(team).map(|b| b.queue.len()).sum();
        self.units_of(team).count() + queued
    }

    /// Check a building placement against terrain and existing structures.
    #[must_use]
    pub fn can_place(&self, building_type: BuildingType, anchor: TilePos) -> PlacementResult {
        can_place_building(&self.map, building_type, anchor)
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    /// Current balance of a team (zero for unknown teams).
    #[must_use]
    pub fn resources(&self, team: TeamId) -> Resources {
        self.resources.get(&team).copied().unwrap_or_default()
    }

    /// Pure affordability check.
    #[must_use]
    pub fn can_afford(&self, team: TeamId, cost: Resources) -> bool {
        self.resources(team).can_afford(cost)
    }

    /// Check and spend as one step. Returns false and changes nothing when
    /// the team cannot afford `cost`.
    pub fn try_spend(&mut self, team: TeamId, cost: Resources) -> bool {
        self.resources
            .get_mut(&team)
            .is_some_and(|balance| balance.try_spend(cost))
    }

    /// Add resources to a team. No ceiling.
    pub fn credit(&mut self, team: TeamId, amount: Resources) {
        self.resources.entry(team).or_default().credit(amount);
    }

    // ------------------------------------------------------------------
    // Entity creation
    // ------------------------------------------------------------------

    /// Place a building and reserve its footprint. Callers validate
    /// placement first.
    pub fn place_building(&mut self, building_type: BuildingType, team: TeamId, anchor: TilePos, built: bool) -> BuildingId {
        let id = BuildingId(self.building_ids.next_id());
        let building = Building::new(id, building_type, team, anchor, built);
        building.occupy(&mut self.map);
        self.buildings.insert(id, building);
        id
    }

    /// Create a unit at the centre of a tile.
    pub fn spawn_unit(&mut self, unit_type: UnitType, team: TeamId, tile: TilePos) -> UnitId {
        let id = UnitId(self.unit_ids.next_id());
        self.units.insert(id, Unit::new(id, unit_type, team, tile.center()));
        id
    }

    /// Create a unit on the nearest free tile around `origin` that its
    /// movement domain allows. Returns `None` if the area is full.
    pub fn spawn_unit_near(&mut self, unit_type: UnitType, team: TeamId, origin: TilePos) -> Option<UnitId> {
        let traversal = traversal_for(unit_type);
        let tile = self.find_spawn_tile(origin, traversal)?;
        Some(self.spawn_unit(unit_type, team, tile))
    }

    fn find_spawn_tile(&self, origin: TilePos, traversal: Traversal) -> Option<TilePos> {
        nearest_matching(&self.map, origin, SPAWN_SEARCH_RADIUS, |tile| {
            self.map.is_traversable(tile, traversal)
                && !self.map.has_structure(tile)
                && !self
                    .units
                    .values()
                    .any(|u| u.is_alive() && u.tile() == tile && u.traversal() == traversal)
        })
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Advance the simulation by one step of `dt` seconds. A no-op once
    /// the match has ended.
    pub fn update(&mut self, dt: Fixed) -> TickEvents {
        let mut events = TickEvents::default();
        if self.ended {
            return events;
        }

        // 1. Purge dead units
        self.units.retain(|id, unit| {
            let alive = unit.is_alive();
            if !alive {
                events.deaths.push(*id);
            }
            alive
        });

        // 2. Unit state machines
        let ids: Vec<UnitId> = self.units.keys().copied().collect();
        for id in ids {
            let Some(mut unit) = self.units.remove(&id) else {
                continue;
            };
            let mut world = World {
                map: &mut self.map,
                units: &mut self.units,
                buildings: &mut self.buildings,
                tick: self.tick,
            };
            unit.update(dt, &mut world);
            self.units.insert(id, unit);
        }

        // 3. Separation
        self.separate_units();

        // 4. Deposits
        self.flush_deposits();

        // 5. Buildings
        let mut requests: Vec<SpawnRequest> = Vec::new();
        for building in self.buildings.values_mut() {
            if let Some(request) = building.update(dt, self.tick, &mut self.units) {
                requests.push(request);
            }
        }

        // 6. Purge destroyed buildings
        let destroyed: Vec<BuildingId> = self
            .buildings
            .values()
            .filter(|b| !b.is_alive())
            .map(|b| b.id)
            .collect();
        for id in destroyed {
            if let Some(building) = self.buildings.remove(&id) {
                building.vacate(&mut self.map);
                debug!(building = %id, team = %building.team, kind = ?building.building_type, "Building destroyed");
                events.destroyed_buildings.push(id);
            }
        }

        // 7. Spawn produced units
        for request in requests {
            match self.spawn_unit_near(request.unit_type, request.team, request.origin) {
                Some(id) => {
                    if let Some(rally) = request.rally {
                        let map = &self.map;
                        if let Some(unit) = self.units.get_mut(&id) {
                            unit.order_move(map, rally);
                        }
                    }
                    events.spawned.push(id);
                }
                None => warn!(
                    building = %request.building,
                    team = %request.team,
                    kind = ?request.unit_type,
                    "No free tile for produced unit, dropping it"
                ),
            }
        }

        // 8. Tick
        self.tick += 1;

        // 9. Win condition
        events.game_over = self.check_win_condition();

        #[cfg(debug_assertions)]
        {
            let hash = self.state_hash();
            debug!(tick = self.tick, state_hash = hash, "Simulation state hash");
        }

        events
    }

    /// Soft collision: overlapping units in the same movement domain push
    /// each other apart. Pushes that would leave traversable ground are
    /// skipped.
    fn separate_units(&mut self) {
        let bodies: Vec<(UnitId, Vec2Fixed, Traversal)> = self
            .units
            .values()
            .filter(|u| u.is_alive())
            .map(|u| (u.id, u.position, u.traversal()))
            .collect();

        let radius_sq = SEPARATION_RADIUS * SEPARATION_RADIUS;
        let mut pushes: BTreeMap<UnitId, Vec2Fixed> = BTreeMap::new();

        for (i, &(id_a, pos_a, domain_a)) in bodies.iter().enumerate() {
            for &(id_b, pos_b, domain_b) in &bodies[i + 1..] {
                if (domain_a == Traversal::Air) != (domain_b == Traversal::Air) {
                    continue;
                }
                let dist_sq = pos_a.distance_squared(pos_b);
                if dist_sq >= radius_sq {
                    continue;
                }

                let dist = pos_a.distance(pos_b);
                let half_overlap = (SEPARATION_RADIUS - dist) / 2;
                let dir = if dist == Fixed::ZERO {
                    // Stacked exactly: split along x, lower id to the left.
                    Vec2Fixed::new(Fixed::ONE, Fixed::ZERO)
                } else {
                    (pos_b - pos_a).normalize()
                };
                let push = dir.scale(half_overlap);

                let a = pushes.entry(id_a).or_default();
                *a = *a - push;
                let b = pushes.entry(id_b).or_default();
                *b = *b + push;
            }
        }

        for (id, push) in pushes {
            let Some(unit) = self.units.get_mut(&id) else {
                continue;
            };
            let moved = unit.position + push;
            let tile = TilePos::from_position(moved);
            if self.map.is_traversable(tile, unit.traversal()) || tile == unit.tile() {
                unit.position = moved;
            }
        }
    }

    fn flush_deposits(&mut self) {
        for unit in self.units.values_mut() {
            if !unit.deposit_pending {
                continue;
            }
            unit.deposit_pending = false;
            if unit.carry.is_empty() {
                continue;
            }
            let amount = unit.carry.as_resources();
            self.resources.entry(unit.team).or_default().credit(amount);
            unit.carry = Carry::EMPTY;
        }
    }

    /// A team is alive while it has a living unit or a standing building.
    fn is_team_alive(&self, team: TeamId) -> bool {
        self.units_of(team).next().is_some() || self.buildings_of(team).next().is_some()
    }

    fn check_win_condition(&mut self) -> bool {
        let alive: Vec<TeamId> = self
            .teams
            .iter()
            .copied()
            .filter(|team| self.is_team_alive(*team))
            .collect();

        if alive.len() > 1 {
            return false;
        }

        self.ended = true;
        self.winner = alive.first().copied();
        info!(tick = self.tick, winner = ?self.winner, "Match ended");
        true
    }

    /// Calculate a hash of the current simulation state.
    ///
    /// Two engines with identical state produce identical hashes.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        self.tick.hash(&mut hasher);
        self.teams.hash(&mut hasher);
        self.ended.hash(&mut hasher);
        self.winner.hash(&mut hasher);
        self.map.version().hash(&mut hasher);
        self.map.minerals().for_each(|entry| entry.hash(&mut hasher));
        self.map.wood().for_each(|entry| entry.hash(&mut hasher));
        self.resources.hash(&mut hasher);

        self.units.len().hash(&mut hasher);
        for unit in self.units.values() {
            unit.id.hash(&mut hasher);
            unit.unit_type.hash(&mut hasher);
            unit.team.hash(&mut hasher);
            unit.position.x.to_bits().hash(&mut hasher);
            unit.position.y.to_bits().hash(&mut hasher);
            unit.health.hash(&mut hasher);
            unit.order.hash(&mut hasher);
            unit.path.hash(&mut hasher);
            unit.cooldown.to_bits().hash(&mut hasher);
            unit.carry.amount.hash(&mut hasher);
        }

        self.buildings.len().hash(&mut hasher);
        for building in self.buildings.values() {
            building.id.hash(&mut hasher);
            building.health.hash(&mut hasher);
            building.progress.to_bits().hash(&mut hasher);
            building.built.hash(&mut hasher);
            building.queue.len().hash(&mut hasher);
            building.target.hash(&mut hasher);
        }

        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::TileKind;

    fn open_engine() -> Engine {
        Engine::with_map(GameMap::filled(24, 24, TileKind::Grass), vec![TeamId(0), TeamId(1)])
    }

    #[test]
    fn test_engine_new_sets_up_teams() {
        let engine = Engine::new(&EngineConfig::default());

        for team in [TeamId(0), TeamId(1)] {
            assert_eq!(engine.resources(team), Resources::new(200, 100));
            assert_eq!(engine.units_of(team).count(), 3);
            let bases: Vec<_> = engine.buildings_of(team).collect();
            assert_eq!(bases.len(), 1);
            assert!(bases[0].built);
            assert_eq!(bases[0].building_type, BuildingType::Base);
        }
        assert_eq!(engine.tick(), 0);
        assert!(!engine.is_ended());
    }

    #[test]
    fn test_tick_increments() {
        let mut engine = Engine::new(&EngineConfig::default());
        engine.update(TICK_DT);
        engine.update(TICK_DT);
        assert_eq!(engine.tick(), 2);
    }

    #[test]
    fn test_try_spend_never_goes_negative() {
        let mut engine = open_engine();
        engine.credit(TeamId(0), Resources::new(100, 0));

        assert!(!engine.try_spend(TeamId(0), Resources::new(100, 1)));
        assert_eq!(engine.resources(TeamId(0)), Resources::new(100, 0));
        assert!(engine.try_spend(TeamId(0), Resources::new(100, 0)));
        assert_eq!(engine.resources(TeamId(0)), Resources::ZERO);
        assert!(!engine.try_spend(TeamId(7), Resources::new(1, 0)));
    }

    #[test]
    fn test_wipe_out_ends_match() {
        let mut engine = open_engine();
        engine.spawn_unit(UnitType::Soldier, TeamId(1), TilePos::new(10, 10));

        let events = engine.update(TICK_DT);

        assert!(events.game_over);
        assert!(engine.is_ended());
        assert_eq!(engine.winner(), Some(TeamId(1)));

        // Frozen afterwards.
        let hash = engine.state_hash();
        engine.update(TICK_DT);
        assert_eq!(engine.tick(), 1);
        assert_eq!(engine.state_hash(), hash);
    }

    #[test]
    fn test_mutual_wipe_has_no_winner() {
        let mut engine = open_engine();
        engine.update(TICK_DT);
        assert!(engine.is_ended());
        assert_eq!(engine.winner(), None);
    }

    #[test]
    fn test_dead_units_are_purged_first() {
        let mut engine = open_engine();
        let victim = engine.spawn_unit(UnitType::Worker, TeamId(0), TilePos::new(2, 2));
        engine.spawn_unit(UnitType::Worker, TeamId(0), TilePos::new(4, 4));
        engine.spawn_unit(UnitType::Worker, TeamId(1), TilePos::new(20, 20));
        engine.unit_mut(victim).unwrap().health = 0;

        let events = engine.update(TICK_DT);
        assert_eq!(events.deaths, vec![victim]);
        assert!(engine.unit(victim).is_none());
        assert!(!engine.is_ended());
    }

    #[test]
    fn test_destroyed_building_frees_footprint() {
        let mut engine = open_engine();
        let barracks = engine.place_building(BuildingType::Barracks, TeamId(0), TilePos::new(5, 5), true);
        engine.spawn_unit(UnitType::Worker, TeamId(0), TilePos::new(1, 1));
        engine.spawn_unit(UnitType::Worker, TeamId(1), TilePos::new(20, 20));
        assert!(engine.map().has_structure(TilePos::new(6, 6)));

        engine.building_mut(barracks).unwrap().health = 0;
        let events = engine.update(TICK_DT);

        assert_eq!(events.destroyed_buildings, vec![barracks]);
        assert!(!engine.map().has_structure(TilePos::new(6, 6)));
    }

    #[test]
    fn test_production_spawns_at_door_and_rallies() {
        let mut engine = open_engine();
        let base = engine.place_building(BuildingType::Base, TeamId(0), TilePos::new(4, 4), true);
        engine.spawn_unit(UnitType::Worker, TeamId(1), TilePos::new(20, 20));
        {
            let building = engine.building_mut(base).unwrap();
            building.rally = Some(TilePos::new(12, 12));
            building.train(UnitType::Worker).unwrap();
        }

        let mut spawned = Vec::new();
        for _ in 0..80 {
            spawned = engine.update(TICK_DT).spawned;
            if !spawned.is_empty() {
                break;
            }
        }

        assert_eq!(spawned.len(), 1);
        assert!(engine.building(base).unwrap().queue.is_empty());
        let worker = engine.unit(spawned[0]).unwrap();
        assert_eq!(worker.team, TeamId(0));
        assert!(matches!(worker.order, crate::units::Order::Moving { .. }));
    }

    #[test]
    fn test_separation_pushes_stacked_units_apart() {
        let mut engine = open_engine();
        let a = engine.spawn_unit(UnitType::Soldier, TeamId(0), TilePos::new(10, 10));
        let b = engine.spawn_unit(UnitType::Soldier, TeamId(0), TilePos::new(10, 10));
        engine.spawn_unit(UnitType::Worker, TeamId(1), TilePos::new(22, 22));

        engine.update(TICK_DT);

        let pa = engine.unit(a).unwrap().position;
        let pb = engine.unit(b).unwrap().position;
        assert!(pa.x < pb.x);
        assert_eq!(pa.y, pb.y);
    }

    #[test]
    fn test_deterministic_hash() {
        let mut a = Engine::new(&EngineConfig::default().with_seed(9));
        let mut b = Engine::new(&EngineConfig::default().with_seed(9));
        for _ in 0..20 {
            a.update(TICK_DT);
            b.update(TICK_DT);
        }
        assert_eq!(a.state_hash(), b.state_hash());
        assert_eq!(a, b);
    }
}

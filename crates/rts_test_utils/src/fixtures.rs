//! Test fixtures and helpers.
//!
//! Pre-built maps and engine states for consistent testing. Everything here
//! is hand-placed on open grass so tests do not depend on map generation.

use fixed::types::I32F32;
use rts_core::components::{BuildingId, TeamId, TilePos, UnitId};
use rts_core::data::{BuildingType, UnitType};
use rts_core::economy::{ResourceKind, Resources};
use rts_core::map::{GameMap, TileKind};
use rts_core::simulation::{Engine, TICK_DT};

/// First team in two-team fixtures.
pub const RED: TeamId = TeamId(0);

/// Second team in two-team fixtures.
pub const BLUE: TeamId = TeamId(1);

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// Create a fixed-point number from a float (for tests only).
///
/// Note: In real simulation code, never use floats.
/// This is only for convenient test setup.
#[must_use]
pub fn fixed_f(n: f64) -> I32F32 {
    I32F32::from_num(n)
}

/// All-grass map.
#[must_use]
pub fn open_map(width: i32, height: i32) -> GameMap {
    GameMap::filled(width, height, TileKind::Grass)
}

/// 24×24 map whose right half (x ≥ 12) is water.
#[must_use]
pub fn shore_map() -> GameMap {
    let mut map = open_map(24, 24);
    for y in 0..24 {
        for x in 12..24 {
            map.set_tile(TilePos::new(x, y), TileKind::Water);
        }
    }
    map
}

/// 20×20 map with a rock box around (15..=17, 15..=17) whose centre tile
/// (16, 16) is grass and unreachable.
#[must_use]
pub fn walled_map() -> GameMap {
    let mut map = open_map(20, 20);
    for y in 14..=18 {
        for x in 14..=18 {
            let ring = x == 14 || x == 18 || y == 14 || y == 18;
            if ring {
                map.set_tile(TilePos::new(x, y), TileKind::Rock);
            }
        }
    }
    map
}

/// Two teams on an open 32×32 map.
///
/// RED has a built base at (2, 2) and a worker; BLUE has a built base at
/// (27, 27) and a worker. Both start with 500 minerals and 500 wood.
#[derive(Debug, Clone)]
pub struct TwoTeams {
    /// The engine.
    pub engine: Engine,
    /// RED's base.
    pub red_base: BuildingId,
    /// BLUE's base.
    pub blue_base: BuildingId,
    /// RED's worker.
    pub red_worker: UnitId,
    /// BLUE's worker.
    pub blue_worker: UnitId,
}

/// Build the [`TwoTeams`] fixture.
#[must_use]
pub fn two_teams() -> TwoTeams {
    let mut engine = Engine::with_map(open_map(32, 32), vec![RED, BLUE]);
    engine.credit(RED, Resources::new(500, 500));
    engine.credit(BLUE, Resources::new(500, 500));

    let red_base = engine.place_building(BuildingType::Base, RED, TilePos::new(2, 2), true);
    let blue_base = engine.place_building(BuildingType::Base, BLUE, TilePos::new(27, 27), true);
    let red_worker = engine.spawn_unit(UnitType::Worker, RED, TilePos::new(6, 6));
    let blue_worker = engine.spawn_unit(UnitType::Worker, BLUE, TilePos::new(25, 25));

    TwoTeams {
        engine,
        red_base,
        blue_base,
        red_worker,
        blue_worker,
    }
}

/// A RED worker next to a mineral tile holding `amount`, with a built RED
/// base a few tiles away. BLUE has a distant worker so the match stays
/// live.
#[must_use]
pub fn gather_scenario(amount: i32) -> (Engine, UnitId, TilePos) {
    let mut map = open_map(20, 20);
    let node = TilePos::new(9, 3);
    map.place_resource(node, ResourceKind::Minerals, amount);

    let mut engine = Engine::with_map(map, vec![RED, BLUE]);
    engine.place_building(BuildingType::Base, RED, TilePos::new(2, 2), true);
    let worker = engine.spawn_unit(UnitType::Worker, RED, TilePos::new(8, 3));
    engine.spawn_unit(UnitType::Worker, BLUE, TilePos::new(18, 18));
    (engine, worker, node)
}

/// RED soldier and BLUE soldier facing each other six tiles apart.
#[must_use]
pub fn duel() -> (Engine, UnitId, UnitId) {
    let mut engine = Engine::with_map(open_map(24, 24), vec![RED, BLUE]);
    let red = engine.spawn_unit(UnitType::Soldier, RED, TilePos::new(6, 10));
    let blue = engine.spawn_unit(UnitType::Soldier, BLUE, TilePos::new(12, 10));
    (engine, red, blue)
}

/// Advance `n` ticks.
pub fn run_ticks(engine: &mut Engine, n: u64) {
    for _ in 0..n {
        engine.update(TICK_DT);
    }
}

/// Tick until `done` holds, at most `max` ticks. Returns whether it held.
pub fn run_until(engine: &mut Engine, max: u64, mut done: impl FnMut(&Engine) -> bool) -> bool {
    for _ in 0..max {
        if done(engine) {
            return true;
        }
        engine.update(TICK_DT);
    }
    done(engine)
}

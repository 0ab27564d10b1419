//! Procedural map generation with terrain, resources, and obstacles.
//!
//! Generates playable maps with:
//! - Up to four corner spawn points with a grass safe zone around each
//! - A mineral cluster and a grove next to every spawn
//! - A contested mineral field in the centre
//! - Lakes, rock clusters, forests and dirt patches elsewhere
//!
//! Generation is fully deterministic in the seed.

use serde::{Deserialize, Serialize};

use crate::components::TilePos;
use crate::economy::ResourceKind;
use crate::map::{GameMap, TileKind};

/// Radius of the all-grass zone around each spawn point.
pub const SPAWN_SAFE_RADIUS: i32 = 5;

/// Mineral tiles placed next to every spawn.
pub const SPAWN_MINERAL_TILES: usize = 6;
/// Amount held by each spawn mineral tile.
pub const SPAWN_MINERAL_AMOUNT: i32 = 500;
/// Trees placed next to every spawn.
pub const SPAWN_TREE_TILES: usize = 8;
/// Wood held by each tree.
pub const TREE_AMOUNT: i32 = 100;
/// Amount held by each contested centre mineral tile.
pub const CENTER_MINERAL_AMOUNT: i32 = 750;

/// Map configuration for procedural generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapConfig {
    /// Map width in tiles.
    pub width: i32,
    /// Map height in tiles.
    pub height: i32,
    /// Random seed for deterministic generation.
    pub seed: u64,
    /// Number of lakes.
    pub lakes: u32,
    /// Number of rock clusters.
    pub rock_clusters: u32,
    /// Number of forests outside the spawn zones.
    pub forests: u32,
    /// Number of dirt patches.
    pub dirt_patches: u32,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            seed: 12345,
            lakes: 3,
            rock_clusters: 10,
            forests: 6,
            dirt_patches: 8,
        }
    }
}

impl MapConfig {
    /// A featureless map of the given size: spawn resources only.
    #[must_use]
    pub fn open(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            lakes: 0,
            rock_clusters: 0,
            forests: 0,
            dirt_patches: 0,
            ..Default::default()
        }
    }

    /// Set the random seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set map dimensions.
    #[must_use]
    pub const fn with_size(mut self, width: i32, height: i32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the number of lakes.
    #[must_use]
    pub const fn with_lakes(mut self, lakes: u32) -> Self {
        self.lakes = lakes;
        self
    }
}

/// Generated map data.
#[derive(Debug, Clone)]
pub struct GeneratedMap {
    /// Tile grid with deposits.
    pub map: GameMap,
    /// Spawn points, ordered so that the first two face each other.
    pub spawn_points: Vec<TilePos>,
}

/// Simple deterministic RNG for map generation.
struct MapRng {
    state: u64,
}

impl MapRng {
    fn new(seed: u64) -> Self {
        Self {
            state: seed.wrapping_add(0x9E37_79B9_7F4A_7C15),
        }
    }

    fn next(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(0x5_DEEC_E66D).wrapping_add(11);
        // Low bits of an LCG cycle quickly; use the high half.
        self.state >> 16
    }

    fn next_range(&mut self, min: i32, max: i32) -> i32 {
        let range = (max - min) as u64;
        if max <= min || range == 0 {
            return min;
        }
        min + (self.next() % range) as i32
    }

    fn next_step(&mut self) -> (i32, i32) {
        match self.next() % 4 {
            0 => (1, 0),
            1 => (-1, 0),
            2 => (0, 1),
            _ => (0, -1),
        }
    }
}

/// Generate a map with the given configuration.
#[must_use]
pub fn generate_map(config: &MapConfig) -> GeneratedMap {
    let mut rng = MapRng::new(config.seed);
    let mut map = GameMap::filled(config.width, config.height, TileKind::Grass);
    let spawn_points = spawn_points(config);

    for _ in 0..config.lakes {
        let size = rng.next_range(12, 30) as usize;
        random_walk(&mut map, &mut rng, size, |map, pos| {
            map.set_tile(pos, TileKind::Water);
        });
    }

    for _ in 0..config.rock_clusters {
        let x = rng.next_range(1, config.width - 1);
        let y = rng.next_range(1, config.height - 1);
        let size = rng.next_range(1, 3);
        for dy in 0..size {
            for dx in 0..size {
                map.set_tile(TilePos::new(x + dx, y + dy), TileKind::Rock);
            }
        }
    }

    for _ in 0..config.forests {
        let size = rng.next_range(6, 16) as usize;
        random_walk(&mut map, &mut rng, size, |map, pos| {
            if map.tile(pos) == Some(TileKind::Grass) {
                map.place_resource(pos, ResourceKind::Wood, TREE_AMOUNT);
            }
        });
    }

    for _ in 0..config.dirt_patches {
        let size = rng.next_range(4, 10) as usize;
        random_walk(&mut map, &mut rng, size, |map, pos| {
            if map.tile(pos) == Some(TileKind::Grass) {
                map.set_tile(pos, TileKind::Dirt);
            }
        });
    }

    for spawn in &spawn_points {
        for dy in -SPAWN_SAFE_RADIUS..=SPAWN_SAFE_RADIUS {
            for dx in -SPAWN_SAFE_RADIUS..=SPAWN_SAFE_RADIUS {
                map.set_tile(spawn.offset(dx, dy), TileKind::Grass);
            }
        }
        place_spawn_resources(&mut map, config, *spawn);
    }

    place_center_minerals(&mut map, config);

    debug_assert!(map.check_resource_invariant().is_ok());
    tracing::debug!(
        width = config.width,
        height = config.height,
        seed = config.seed,
        spawns = spawn_points.len(),
        "Generated map"
    );

    GeneratedMap { map, spawn_points }
}

fn spawn_points(config: &MapConfig) -> Vec<TilePos> {
    let inset = (config.width.min(config.height) / 8).max(SPAWN_SAFE_RADIUS + 2);
    let far_x = config.width - 1 - inset;
    let far_y = config.height - 1 - inset;
    vec![
        TilePos::new(inset, inset),
        TilePos::new(far_x, far_y),
        TilePos::new(far_x, inset),
        TilePos::new(inset, far_y),
    ]
}

/// Sign of the direction from a spawn toward the map centre, per axis.
fn toward_center(config: &MapConfig, spawn: TilePos) -> (i32, i32) {
    let dir_x = if spawn.x * 2 < config.width { 1 } else { -1 };
    let dir_y = if spawn.y * 2 < config.height { 1 } else { -1 };
    (dir_x, dir_y)
}

fn place_spawn_resources(map: &mut GameMap, config: &MapConfig, spawn: TilePos) {
    let (dir_x, dir_y) = toward_center(config, spawn);

    // Two columns of three minerals beside the base.
    for column in [4, 5] {
        for row in -1..=1 {
            map.place_resource(
                spawn.offset(column * dir_x, row),
                ResourceKind::Minerals,
                SPAWN_MINERAL_AMOUNT,
            );
        }
    }

    // Two rows of four trees on the other side.
    for row in [4, 5] {
        for column in -2..=1 {
            map.place_resource(
                spawn.offset(column * dir_x, row * dir_y),
                ResourceKind::Wood,
                TREE_AMOUNT,
            );
        }
    }
}

fn place_center_minerals(map: &mut GameMap, config: &MapConfig) {
    let center = TilePos::new(config.width / 2, config.height / 2);
    for dy in -2..=2 {
        for dx in -2..=2 {
            let pos = center.offset(dx, dy);
            let ring = dx.abs().max(dy.abs());
            if ring == 2 && (dx + dy) % 2 == 0 {
                map.place_resource(pos, ResourceKind::Minerals, CENTER_MINERAL_AMOUNT);
            } else {
                map.set_tile(pos, TileKind::Grass);
            }
        }
    }
}

fn random_walk(
    map: &mut GameMap,
    rng: &mut MapRng,
    steps: usize,
    mut paint: impl FnMut(&mut GameMap, TilePos),
) {
    let mut pos = TilePos::new(
        rng.next_range(2, map.width() - 2),
        rng.next_range(2, map.height() - 2),
    );
    for _ in 0..steps {
        paint(map, pos);
        let (dx, dy) = rng.next_step();
        pos = map.clamp(pos.offset(dx, dy));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MapConfig::default();
        assert_eq!(config.width, 64);
        assert_eq!(config.height, 64);
    }

    #[test]
    fn test_generate_default_map() {
        let generated = generate_map(&MapConfig::default());
        assert_eq!(generated.map.tiles().len(), 64 * 64);
        assert_eq!(generated.spawn_points.len(), 4);
        assert!(generated.map.check_resource_invariant().is_ok());
    }

    #[test]
    fn test_first_two_spawns_are_opposite() {
        let generated = generate_map(&MapConfig::default());
        let a = generated.spawn_points[0];
        let b = generated.spawn_points[1];
        assert_eq!(a.x + b.x, 63);
        assert_eq!(a.y + b.y, 63);
    }

    #[test]
    fn test_spawn_zone_is_clear() {
        let generated = generate_map(&MapConfig::default().with_seed(777));
        for spawn in &generated.spawn_points {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    assert_eq!(
                        generated.map.tile(spawn.offset(dx, dy)),
                        Some(TileKind::Grass),
                        "base footprint at {spawn:?} must be grass"
                    );
                }
            }
        }
    }

    #[test]
    fn test_resources_near_spawns() {
        let generated = generate_map(&MapConfig::default().with_seed(42));
        for spawn in &generated.spawn_points {
            let near = |kind: ResourceKind| {
                generated
                    .map
                    .deposits(kind)
                    .filter(|(pos, _)| pos.chebyshev(*spawn) <= SPAWN_SAFE_RADIUS)
                    .collect::<Vec<_>>()
            };
            let minerals = near(ResourceKind::Minerals);
            let wood = near(ResourceKind::Wood);
            assert_eq!(minerals.len(), SPAWN_MINERAL_TILES);
            assert!(minerals.iter().all(|(_, a)| *a == SPAWN_MINERAL_AMOUNT));
            assert_eq!(wood.len(), SPAWN_TREE_TILES);
        }
    }

    #[test]
    fn test_contested_center_resources() {
        let generated = generate_map(&MapConfig::default());
        let center = TilePos::new(32, 32);
        let count = generated
            .map
            .minerals()
            .filter(|(pos, amount)| pos.chebyshev(center) <= 2 && *amount == CENTER_MINERAL_AMOUNT)
            .count();
        assert_eq!(count, 8);
    }

    #[test]
    fn test_determinism() {
        let a = generate_map(&MapConfig::default().with_seed(42));
        let b = generate_map(&MapConfig::default().with_seed(42));
        assert_eq!(a.map, b.map);
        assert_eq!(a.spawn_points, b.spawn_points);
    }

    #[test]
    fn test_different_seeds() {
        let a = generate_map(&MapConfig::default().with_seed(1));
        let b = generate_map(&MapConfig::default().with_seed(2));
        assert_ne!(a.map.tiles(), b.map.tiles());
    }

    #[test]
    fn test_open_map_has_no_water() {
        let generated = generate_map(&MapConfig::open(32, 32));
        assert!(generated
            .map
            .tiles()
            .iter()
            .all(|t| *t != TileKind::Water && *t != TileKind::Rock));
    }
}

//! Serializable engine state.
//!
//! A snapshot is acyclic: every back-reference (attack target, build target,
//! tower target) is a plain id. Restoring rebuilds the id maps and the
//! structure overlay, then drops any reference whose entity no longer
//! exists.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::buildings::Building;
use crate::components::{BuildingId, IdGenerator, TeamId, TilePos, UnitId};
use crate::economy::Resources;
use crate::error::{GameError, Result};
use crate::map::{Deposit, GameMap};
use crate::simulation::Engine;
use crate::units::{Order, Unit};

/// Map section of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapSnapshot {
    /// Width in tiles.
    pub width: i32,
    /// Height in tiles.
    pub height: i32,
    /// Bumped on every tile change; clients cache tiles per version.
    pub version: u64,
    /// Row-major tile codes. Omitted when the receiver already has this
    /// version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiles: Option<Vec<u8>>,
    /// Remaining mineral deposits.
    pub minerals: Vec<Deposit>,
    /// Remaining wood deposits.
    pub wood: Vec<Deposit>,
}

/// One team's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamResources {
    /// Owning team.
    pub team: TeamId,
    /// Mineral balance.
    pub minerals: i32,
    /// Wood balance.
    pub wood: i32,
}

/// Complete engine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    /// Tick counter.
    pub tick: u64,
    /// Participating teams.
    pub teams: Vec<TeamId>,
    /// Match over.
    pub ended: bool,
    /// Sole survivor, if any.
    pub winner: Option<TeamId>,
    /// Tile grid and deposits.
    pub map: MapSnapshot,
    /// Per-team balances.
    pub resources: Vec<TeamResources>,
    /// Every unit, id order.
    pub units: Vec<Unit>,
    /// Every building, id order.
    pub buildings: Vec<Building>,
    /// Next unit id the engine would hand out.
    #[serde(default)]
    pub next_unit_id: u32,
    /// Next building id the engine would hand out.
    #[serde(default)]
    pub next_building_id: u32,
}

impl EngineSnapshot {
    /// Encode as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Does this snapshot carry the tile array?
    #[must_use]
    pub fn has_tiles(&self) -> bool {
        self.map.tiles.is_some()
    }
}

impl Engine {
    /// Capture the full state. With `skip_map_tiles` the tile array is left
    /// out; deposits and the map version are always included.
    #[must_use]
    pub fn get_snapshot(&self, skip_map_tiles: bool) -> EngineSnapshot {
        EngineSnapshot {
            tick: self.tick,
            teams: self.teams.clone(),
            ended: self.ended,
            winner: self.winner,
            map: MapSnapshot {
                width: self.map.width(),
                height: self.map.height(),
                version: self.map.version(),
                tiles: (!skip_map_tiles).then(|| self.map.tile_codes()),
                minerals: to_deposits(self.map.minerals()),
                wood: to_deposits(self.map.wood()),
            },
            resources: self
                .resources
                .iter()
                .map(|(team, balance)| TeamResources {
                    team: *team,
                    minerals: balance.minerals,
                    wood: balance.wood,
                })
                .collect(),
            units: self.units.values().cloned().collect(),
            buildings: self.buildings.values().cloned().collect(),
            next_unit_id: self.unit_ids.peek(),
            next_building_id: self.building_ids.peek(),
        }
    }

    /// Rebuild an engine from a snapshot.
    ///
    /// # Errors
    ///
    /// Fails if the tile array is missing, the map is inconsistent, or two
    /// entities share an id.
    pub fn from_snapshot(snapshot: &EngineSnapshot) -> Result<Self> {
        let tiles = snapshot
            .map
            .tiles
            .as_deref()
            .ok_or_else(|| GameError::MalformedSnapshot("map tiles missing".to_string()))?;
        let mut map = GameMap::from_parts(
            snapshot.map.width,
            snapshot.map.height,
            snapshot.map.version,
            tiles,
            &snapshot.map.minerals,
            &snapshot.map.wood,
        )?;

        let mut resources = BTreeMap::new();
        for entry in &snapshot.resources {
            if entry.minerals < 0 || entry.wood < 0 {
                error!(team = %entry.team, "Negative balance in snapshot");
                debug_assert!(false, "negative balance for team {}", entry.team);
                return Err(GameError::InvalidState(format!(
                    "negative balance for team {}",
                    entry.team
                )));
            }
            resources.insert(entry.team, Resources::new(entry.minerals, entry.wood));
        }
        for team in &snapshot.teams {
            resources.entry(*team).or_insert(Resources::ZERO);
        }

        let mut units: BTreeMap<UnitId, Unit> = BTreeMap::new();
        for unit in &snapshot.units {
            if units.insert(unit.id, unit.clone()).is_some() {
                error!(unit = %unit.id, "Unit id collision in snapshot");
                debug_assert!(false, "unit id collision: {}", unit.id);
                return Err(GameError::InvalidUnitId(unit.id.0));
            }
        }

        let mut buildings: BTreeMap<BuildingId, Building> = BTreeMap::new();
        for building in &snapshot.buildings {
            building.occupy(&mut map);
            if buildings.insert(building.id, building.clone()).is_some() {
                error!(building = %building.id, "Building id collision in snapshot");
                debug_assert!(false, "building id collision: {}", building.id);
                return Err(GameError::InvalidBuildingId(building.id.0));
            }
        }

        relink(&mut units, &mut buildings);

        let max_unit = units.keys().map(|id| id.0).max().unwrap_or(0);
        let max_building = buildings.keys().map(|id| id.0).max().unwrap_or(0);

        debug!(
            tick = snapshot.tick,
            units = units.len(),
            buildings = buildings.len(),
            "Engine restored from snapshot"
        );

        Ok(Self {
            tick: snapshot.tick,
            teams: snapshot.teams.clone(),
            map,
            units,
            buildings,
            resources,
            unit_ids: IdGenerator::after(max_unit.max(snapshot.next_unit_id.saturating_sub(1))),
            building_ids: IdGenerator::after(max_building.max(snapshot.next_building_id.saturating_sub(1))),
            ended: snapshot.ended,
            winner: snapshot.winner,
        })
    }
}

fn to_deposits(entries: impl Iterator<Item = (TilePos, i32)>) -> Vec<Deposit> {
    entries
        .map(|(pos, amount)| Deposit {
            x: pos.x,
            y: pos.y,
            amount,
        })
        .collect()
}

/// Resolve every id reference against the restored maps. Orders pointing
/// at missing entities fall back to idle; tower targets are cleared.
fn relink(units: &mut BTreeMap<UnitId, Unit>, buildings: &mut BTreeMap<BuildingId, Building>) {
    let unit_ids: Vec<UnitId> = units.keys().copied().collect();

    for unit in units.values_mut() {
        let resolved = match unit.order {
            Order::Attacking { target } => unit_ids.binary_search(&target).is_ok(),
            Order::AttackingBuilding { target } | Order::Building { target } => {
                buildings.contains_key(&target)
            }
            Order::Idle | Order::Moving { .. } | Order::Gathering { .. } | Order::Returning { .. } => true,
        };
        if !resolved {
            debug!(unit = %unit.id, order = ?unit.order, "Dropping dangling target");
            unit.issue(Order::Idle);
        }
    }

    for building in buildings.values_mut() {
        if building.target.is_some_and(|id| unit_ids.binary_search(&id).is_err()) {
            building.target = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{BuildingType, UnitType};
    use crate::map::TileKind;
    use crate::simulation::{EngineConfig, TICK_DT};

    fn skirmish() -> (Engine, UnitId, UnitId) {
        let mut engine = Engine::with_map(GameMap::filled(20, 20, TileKind::Grass), vec![TeamId(0), TeamId(1)]);
        let soldier = engine.spawn_unit(UnitType::Soldier, TeamId(0), TilePos::new(5, 5));
        let enemy = engine.spawn_unit(UnitType::Worker, TeamId(1), TilePos::new(9, 5));
        engine.unit_mut(soldier).unwrap().issue(Order::Attacking { target: enemy });
        (engine, soldier, enemy)
    }

    #[test]
    fn test_snapshot_without_tiles_cannot_restore() {
        let engine = Engine::new(&EngineConfig::default());
        let snapshot = engine.get_snapshot(true);
        assert!(!snapshot.has_tiles());
        assert!(matches!(
            Engine::from_snapshot(&snapshot),
            Err(GameError::MalformedSnapshot(_))
        ));
    }

    #[test]
    fn test_round_trip_restores_equal_engine() {
        let mut engine = Engine::new(&EngineConfig::default());
        for _ in 0..15 {
            engine.update(TICK_DT);
        }

        let restored = Engine::from_snapshot(&engine.get_snapshot(false)).unwrap();
        assert_eq!(restored, engine);
    }

    #[test]
    fn test_round_trip_through_json() {
        let (engine, _, _) = skirmish();
        let json = engine.get_snapshot(false).to_json().unwrap();
        let decoded = EngineSnapshot::from_json(&json).unwrap();
        let restored = Engine::from_snapshot(&decoded).unwrap();
        assert_eq!(restored.get_snapshot(false), engine.get_snapshot(false));
    }

    #[test]
    fn test_attack_target_relinked() {
        let (mut engine, soldier, enemy) = skirmish();
        let mut restored = Engine::from_snapshot(&engine.get_snapshot(false)).unwrap();

        engine.update(TICK_DT);
        restored.update(TICK_DT);

        assert_eq!(
            restored.unit(soldier).unwrap().order,
            Order::Attacking { target: enemy }
        );
        assert_eq!(restored.get_snapshot(false), engine.get_snapshot(false));
    }

    #[test]
    fn test_dangling_target_goes_idle() {
        let (engine, soldier, enemy) = skirmish();
        let mut snapshot = engine.get_snapshot(false);
        snapshot.units.retain(|u| u.id != enemy);

        let restored = Engine::from_snapshot(&snapshot).unwrap();
        assert_eq!(restored.unit(soldier).unwrap().order, Order::Idle);
    }

    #[test]
    fn test_restored_ids_never_collide() {
        let (engine, soldier, enemy) = skirmish();
        let mut snapshot = engine.get_snapshot(false);
        snapshot.next_unit_id = 0;

        let mut restored = Engine::from_snapshot(&snapshot).unwrap();
        let fresh = restored.spawn_unit(UnitType::Worker, TeamId(0), TilePos::new(1, 1));
        assert!(fresh > soldier && fresh > enemy);
    }

    #[test]
    fn test_restore_reoccupies_footprints() {
        let mut engine = Engine::with_map(GameMap::filled(16, 16, TileKind::Grass), vec![TeamId(0)]);
        engine.place_building(BuildingType::Barracks, TeamId(0), TilePos::new(4, 4), false);

        let restored = Engine::from_snapshot(&engine.get_snapshot(false)).unwrap();
        assert!(restored.map().has_structure(TilePos::new(5, 5)));
        assert!(!restored.can_place(BuildingType::Tower, TilePos::new(5, 5)).is_valid());
    }
}

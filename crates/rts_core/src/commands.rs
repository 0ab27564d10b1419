//! Player command validation and application.
//!
//! Commands arrive as untrusted client intent. [`apply_command`] validates
//! every reference (existence, liveness, ownership) and every precondition
//! before touching the engine, so a command is either applied in full or
//! rejected with no side effect. Replaying a rejected command rejects again
//! and still changes nothing.
//!
//! # Wire format
//!
//! ```text
//! {"type":"MOVE","unitIds":[4,5],"x":20,"y":11}
//! {"type":"ATTACK","unitIds":[4],"targetBuildingId":9}
//! {"type":"BUILD","unitId":3,"buildingType":"barracks","x":12,"y":8}
//! {"type":"TRAIN","buildingId":1,"unitType":"worker"}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::buildings::PlacementResult;
use crate::components::{BuildingId, TeamId, TilePos, UnitId};
use crate::data::{BuildingType, UnitType};
use crate::production::ProductionError;
use crate::simulation::{Engine, UNIT_CAP};
use crate::units::Order;

// ============================================================================
// Commands
// ============================================================================

/// A command issued by a player or scripted opponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Command {
    /// Walk to a tile. The destination is clamped into the map.
    Move {
        /// Selected units.
        unit_ids: Vec<UnitId>,
        /// Destination column.
        x: i32,
        /// Destination row.
        y: i32,
    },

    /// Attack one enemy unit or one enemy building.
    Attack {
        /// Selected units.
        unit_ids: Vec<UnitId>,
        /// Enemy unit to attack.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_unit_id: Option<UnitId>,
        /// Enemy building to attack.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_building_id: Option<BuildingId>,
    },

    /// Gather from a resource tile. Only workers in the selection act.
    Harvest {
        /// Selected units.
        unit_ids: Vec<UnitId>,
        /// Resource column.
        x: i32,
        /// Resource row.
        y: i32,
    },

    /// Place a new structure and assign a worker to it.
    Build {
        /// The builder.
        unit_id: UnitId,
        /// Structure to place.
        building_type: BuildingType,
        /// Anchor column.
        x: i32,
        /// Anchor row.
        y: i32,
    },

    /// Send a worker back to an unfinished structure.
    BuildResume {
        /// The builder.
        unit_id: UnitId,
        /// Structure under construction.
        building_id: BuildingId,
    },

    /// Queue a unit at a production building.
    Train {
        /// Producing building.
        building_id: BuildingId,
        /// Unit to queue.
        unit_type: UnitType,
    },

    /// Clear all orders.
    Stop {
        /// Selected units.
        unit_ids: Vec<UnitId>,
    },
}

impl Command {
    /// Short label for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Move { .. } => "MOVE",
            Self::Attack { .. } => "ATTACK",
            Self::Harvest { .. } => "HARVEST",
            Self::Build { .. } => "BUILD",
            Self::BuildResume { .. } => "BUILD_RESUME",
            Self::Train { .. } => "TRAIN",
            Self::Stop { .. } => "STOP",
        }
    }
}

/// Why a command was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The match is over.
    #[error("match has ended")]
    MatchEnded,
    /// No units selected.
    #[error("no units selected")]
    EmptySelection,
    /// Unit does not exist or is dead.
    #[error("unknown unit {0}")]
    UnknownUnit(UnitId),
    /// Unit belongs to another team.
    #[error("unit {0} is not yours")]
    ForeignUnit(UnitId),
    /// Building does not exist or is destroyed.
    #[error("unknown building {0}")]
    UnknownBuilding(BuildingId),
    /// Building belongs to another team.
    #[error("building {0} is not yours")]
    ForeignBuilding(BuildingId),
    /// ATTACK needs exactly one of a unit or building target.
    #[error("attack needs exactly one target")]
    AmbiguousTarget,
    /// Attack target is on the acting team.
    #[error("cannot attack your own team")]
    FriendlyTarget,
    /// HARVEST tile holds no resource.
    #[error("no resource at ({x}, {y})")]
    NotAResource {
        /// Column.
        x: i32,
        /// Row.
        y: i32,
    },
    /// The actor is not a worker.
    #[error("unit {0} is not a worker")]
    NotAWorker(UnitId),
    /// No worker in the selection.
    #[error("selection has no workers")]
    NoWorkers,
    /// Builder must be idle or gathering.
    #[error("worker {0} is busy")]
    WorkerBusy(UnitId),
    /// Footprint is illegal.
    #[error("cannot place here: {0:?}")]
    InvalidPlacement(PlacementResult),
    /// Team cannot pay.
    #[error("insufficient resources")]
    InsufficientResources,
    /// BUILD_RESUME on a finished structure.
    #[error("building {0} is already built")]
    AlreadyBuilt(BuildingId),
    /// Living plus queued units at the cap.
    #[error("unit cap reached")]
    UnitCap,
    /// Building refused the production order.
    #[error("production rejected: {0}")]
    Production(#[from] ProductionError),
}

// ============================================================================
// Application
// ============================================================================

/// Validate `command` for `team` and apply it.
///
/// Either the full effect happens or nothing does.
pub fn apply_command(engine: &mut Engine, team: TeamId, command: &Command) -> Result<(), CommandError> {
    if engine.is_ended() {
        return Err(CommandError::MatchEnded);
    }

    let result = match command {
        Command::Move { unit_ids, x, y } => apply_move(engine, team, unit_ids, TilePos::new(*x, *y)),
        Command::Attack {
            unit_ids,
            target_unit_id,
            target_building_id,
        } => apply_attack(engine, team, unit_ids, *target_unit_id, *target_building_id),
        Command::Harvest { unit_ids, x, y } => apply_harvest(engine, team, unit_ids, TilePos::new(*x, *y)),
        Command::Build {
            unit_id,
            building_type,
            x,
            y,
        } => apply_build(engine, team, *unit_id, *building_type, TilePos::new(*x, *y)),
        Command::BuildResume { unit_id, building_id } => apply_build_resume(engine, team, *unit_id, *building_id),
        Command::Train { building_id, unit_type } => apply_train(engine, team, *building_id, *unit_type),
        Command::Stop { unit_ids } => apply_stop(engine, team, unit_ids),
    };

    match &result {
        Ok(()) => trace!(%team, kind = command.kind(), "Command applied"),
        Err(err) => debug!(%team, kind = command.kind(), error = %err, "Command rejected"),
    }
    result
}

/// Resolve a selection to living units of `team`, without duplicates.
fn own_units(engine: &Engine, team: TeamId, unit_ids: &[UnitId]) -> Result<Vec<UnitId>, CommandError> {
    if unit_ids.is_empty() {
        return Err(CommandError::EmptySelection);
    }
    let mut selected = Vec::with_capacity(unit_ids.len());
    for &id in unit_ids {
        own_unit(engine, team, id)?;
        if !selected.contains(&id) {
            selected.push(id);
        }
    }
    Ok(selected)
}

fn own_unit(engine: &Engine, team: TeamId, id: UnitId) -> Result<(), CommandError> {
    let unit = engine
        .unit(id)
        .filter(|u| u.is_alive())
        .ok_or(CommandError::UnknownUnit(id))?;
    if unit.team != team {
        return Err(CommandError::ForeignUnit(id));
    }
    Ok(())
}

fn own_worker(engine: &Engine, team: TeamId, id: UnitId) -> Result<(), CommandError> {
    own_unit(engine, team, id)?;
    if engine.unit(id).is_some_and(|u| u.unit_type.is_worker()) {
        Ok(())
    } else {
        Err(CommandError::NotAWorker(id))
    }
}

fn own_building(engine: &Engine, team: TeamId, id: BuildingId) -> Result<(), CommandError> {
    let building = engine
        .building(id)
        .filter(|b| b.is_alive())
        .ok_or(CommandError::UnknownBuilding(id))?;
    if building.team != team {
        return Err(CommandError::ForeignBuilding(id));
    }
    Ok(())
}

fn apply_move(engine: &mut Engine, team: TeamId, unit_ids: &[UnitId], destination: TilePos) -> Result<(), CommandError> {
    let selected = own_units(engine, team, unit_ids)?;
    let destination = engine.map.clamp(destination);

    let Engine { map, units, .. } = engine;
    for id in selected {
        if let Some(unit) = units.get_mut(&id) {
            unit.order_move(map, destination);
        }
    }
    Ok(())
}

fn apply_attack(
    engine: &mut Engine,
    team: TeamId,
    unit_ids: &[UnitId],
    target_unit: Option<UnitId>,
    target_building: Option<BuildingId>,
) -> Result<(), CommandError> {
    let selected = own_units(engine, team, unit_ids)?;

    let order = match (target_unit, target_building) {
        (Some(target), None) => {
            let enemy = engine
                .unit(target)
                .filter(|u| u.is_alive())
                .ok_or(CommandError::UnknownUnit(target))?;
            if enemy.team == team {
                return Err(CommandError::FriendlyTarget);
            }
            Order::Attacking { target }
        }
        (None, Some(target)) => {
            let enemy = engine
                .building(target)
                .filter(|b| b.is_alive())
                .ok_or(CommandError::UnknownBuilding(target))?;
            if enemy.team == team {
                return Err(CommandError::FriendlyTarget);
            }
            Order::AttackingBuilding { target }
        }
        _ => return Err(CommandError::AmbiguousTarget),
    };

    for id in selected {
        if let Some(unit) = engine.unit_mut(id) {
            unit.issue(order);
        }
    }
    Ok(())
}

fn apply_harvest(engine: &mut Engine, team: TeamId, unit_ids: &[UnitId], node: TilePos) -> Result<(), CommandError> {
    let selected = own_units(engine, team, unit_ids)?;
    if engine.map.resource_at(node).is_none() {
        return Err(CommandError::NotAResource { x: node.x, y: node.y });
    }

    let workers: Vec<UnitId> = selected
        .into_iter()
        .filter(|id| engine.unit(*id).is_some_and(|u| u.unit_type.is_worker()))
        .collect();
    if workers.is_empty() {
        return Err(CommandError::NoWorkers);
    }

    for id in workers {
        if let Some(unit) = engine.unit_mut(id) {
            unit.issue(Order::Gathering { node });
        }
    }
    Ok(())
}

fn apply_build(
    engine: &mut Engine,
    team: TeamId,
    unit_id: UnitId,
    building_type: BuildingType,
    anchor: TilePos,
) -> Result<(), CommandError> {
    own_worker(engine, team, unit_id)?;
    let busy = engine
        .unit(unit_id)
        .is_some_and(|u| !matches!(u.order, Order::Idle | Order::Gathering { .. }));
    if busy {
        return Err(CommandError::WorkerBusy(unit_id));
    }

    let placement = engine.can_place(building_type, anchor);
    if !placement.is_valid() {
        return Err(CommandError::InvalidPlacement(placement));
    }

    let cost = building_type.stats().cost;
    if !engine.try_spend(team, cost) {
        return Err(CommandError::InsufficientResources);
    }

    let building = engine.place_building(building_type, team, anchor, false);
    if let Some(unit) = engine.unit_mut(unit_id) {
        unit.issue(Order::Building { target: building });
    }
    debug!(%team, %building, kind = ?building_type, x = anchor.x, y = anchor.y, "Construction started");
    Ok(())
}

fn apply_build_resume(engine: &mut Engine, team: TeamId, unit_id: UnitId, building_id: BuildingId) -> Result<(), CommandError> {
    own_worker(engine, team, unit_id)?;
    own_building(engine, team, building_id)?;
    if engine.building(building_id).is_some_and(|b| b.built) {
        return Err(CommandError::AlreadyBuilt(building_id));
    }

    if let Some(unit) = engine.unit_mut(unit_id) {
        unit.issue(Order::Building { target: building_id });
    }
    Ok(())
}

fn apply_train(engine: &mut Engine, team: TeamId, building_id: BuildingId, unit_type: UnitType) -> Result<(), CommandError> {
    own_building(engine, team, building_id)?;
    if engine.team_unit_count(team) >= UNIT_CAP {
        return Err(CommandError::UnitCap);
    }

    let balance = engine.resources(team);
    if let Some(building) = engine.building(building_id) {
        building.can_train(unit_type, balance)?;
    }

    // can_train passed, so neither step below can fail.
    let cost = engine
        .building_mut(building_id)
        .ok_or(CommandError::UnknownBuilding(building_id))?
        .train(unit_type)?;
    let spent = engine.try_spend(team, cost);
    debug_assert!(spent, "spend after affordability check failed");
    Ok(())
}

fn apply_stop(engine: &mut Engine, team: TeamId, unit_ids: &[UnitId]) -> Result<(), CommandError> {
    let selected = own_units(engine, team, unit_ids)?;
    for id in selected {
        if let Some(unit) = engine.unit_mut(id) {
            unit.issue(Order::Idle);
        }
    }
    Ok(())
}

// ============================================================================
// External command source
// ============================================================================

/// Why an external command batch produced nothing usable.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Not JSON at all.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// No top-level `commands` array.
    #[error("missing \"commands\" array")]
    MissingCommands,
    /// Every element failed the command schema.
    #[error("no valid commands ({dropped} dropped)")]
    Empty {
        /// Elements that failed to parse.
        dropped: usize,
    },
}

/// Parse `{"commands":[...]}` from an external generator.
///
/// Elements that do not match the command schema are dropped. An invalid
/// document or an empty result is an error so the caller can fall back to
/// its own policy.
pub fn parse_command_batch(json: &str) -> Result<Vec<Command>, BatchError> {
    let document: serde_json::Value = serde_json::from_str(json)?;
    let elements = document
        .get("commands")
        .and_then(serde_json::Value::as_array)
        .ok_or(BatchError::MissingCommands)?;

    let commands: Vec<Command> = elements
        .iter()
        .filter_map(|element| Command::deserialize(element).ok())
        .collect();
    let dropped = elements.len() - commands.len();
    if dropped > 0 {
        debug!(dropped, kept = commands.len(), "Dropped malformed batch commands");
    }

    if commands.is_empty() {
        return Err(BatchError::Empty { dropped });
    }
    Ok(commands)
}

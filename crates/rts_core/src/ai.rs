//! Scripted opponent.
//!
//! A [`ScriptedOpponent`] looks at the engine on a fixed decision interval
//! and emits ordinary [`Command`]s for its team. Those go through the same
//! command processor as player input, so the opponent cannot do anything a
//! player could not.
//!
//! Difficulty is pure data: every behaviour knob lives in [`AiConfig`] and
//! the presets differ only in their numbers.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::commands::Command;
use crate::components::{BuildingId, TeamId, TilePos, UnitId};
use crate::data::{BuildingType, UnitType};
use crate::economy::{ResourceKind, Resources};
use crate::math::{fixed_serde, Fixed};
use crate::pathfinding::nearest_matching;
use crate::simulation::{Engine, UNIT_CAP};
use crate::units::Order;

/// How far from the base to look for a building site.
const SITE_SEARCH_RADIUS: i32 = 12;

/// Minimum Chebyshev gap between a new site and the base anchor.
const SITE_MIN_GAP: i32 = 4;

/// Opponent strength preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// Slow decisions, small army.
    Easy,
    /// The default.
    #[default]
    Normal,
    /// Fast decisions, factory units and a resource head start.
    Hard,
}

/// Behaviour knobs for a scripted opponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiConfig {
    /// Seconds between decisions.
    #[serde(with = "fixed_serde")]
    pub decision_interval: Fixed,
    /// Stop training workers at this many (living plus queued).
    pub worker_cap: usize,
    /// Idle army size that triggers an attack.
    pub army_threshold: usize,
    /// Structures to build, in order.
    pub build_order: Vec<BuildingType>,
    /// Army units to train, cycled in order.
    pub army_mix: Vec<UnitType>,
    /// Credited once when the match starts.
    pub starting_bonus: Resources,
}

impl AiConfig {
    /// Configuration for a difficulty preset.
    #[must_use]
    pub fn preset(difficulty: Difficulty) -> Self {
        match difficulty {
            Difficulty::Easy => Self {
                decision_interval: Fixed::from_num(3),
                worker_cap: 5,
                army_threshold: 8,
                build_order: vec![BuildingType::Barracks],
                army_mix: vec![UnitType::Soldier],
                starting_bonus: Resources::ZERO,
            },
            Difficulty::Normal => Self {
                decision_interval: Fixed::from_num(2),
                worker_cap: 8,
                army_threshold: 6,
                build_order: vec![BuildingType::Barracks],
                army_mix: vec![UnitType::Soldier, UnitType::Soldier, UnitType::Rocket],
                starting_bonus: Resources::ZERO,
            },
            Difficulty::Hard => Self {
                decision_interval: Fixed::ONE,
                worker_cap: 12,
                army_threshold: 5,
                build_order: vec![BuildingType::Barracks, BuildingType::Factory],
                army_mix: vec![UnitType::Soldier, UnitType::Tank, UnitType::Rocket],
                starting_bonus: Resources::new(200, 200),
            },
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self::preset(Difficulty::Normal)
    }
}

/// A computer-controlled team.
#[derive(Debug, Clone)]
pub struct ScriptedOpponent {
    team: TeamId,
    config: AiConfig,
    timer: Fixed,
    mix_cursor: usize,
    bonus_applied: bool,
}

impl ScriptedOpponent {
    /// Opponent playing `team`.
    #[must_use]
    pub fn new(team: TeamId, config: AiConfig) -> Self {
        Self {
            team,
            config,
            timer: Fixed::ZERO,
            mix_cursor: 0,
            bonus_applied: false,
        }
    }

    /// Opponent with a difficulty preset.
    #[must_use]
    pub fn with_difficulty(team: TeamId, difficulty: Difficulty) -> Self {
        Self::new(team, AiConfig::preset(difficulty))
    }

    /// Team this opponent controls.
    #[must_use]
    pub const fn team(&self) -> TeamId {
        self.team
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &AiConfig {
        &self.config
    }

    /// Credit the starting bonus. Only the first call has an effect.
    pub fn apply_starting_bonus(&mut self, engine: &mut Engine) {
        if self.bonus_applied {
            return;
        }
        self.bonus_applied = true;
        if self.config.starting_bonus != Resources::ZERO {
            engine.credit(self.team, self.config.starting_bonus);
            debug!(team = %self.team, bonus = ?self.config.starting_bonus, "AI starting bonus");
        }
    }

    /// Advance the decision timer by `dt` and, when it fires, return this
    /// round's commands. Returns nothing between decisions.
    pub fn decide(&mut self, engine: &Engine, dt: Fixed) -> Vec<Command> {
        self.timer += dt;
        if self.timer < self.config.decision_interval {
            return Vec::new();
        }
        self.timer = Fixed::ZERO;

        if engine.is_ended() {
            return Vec::new();
        }

        let mut plan = Plan {
            budget: engine.resources(self.team),
            headroom: UNIT_CAP.saturating_sub(engine.team_unit_count(self.team)),
            commands: Vec::new(),
        };

        let base = engine
            .buildings_of(self.team)
            .find(|b| b.built && b.building_type == BuildingType::Base)
            .map(|b| (b.id, b.anchor));

        let mut builder: Option<UnitId> = None;
        if let Some((base_id, base_anchor)) = base {
            builder = self.expand(engine, base_anchor, &mut plan);
            self.train_workers(engine, base_id, &mut plan);
        }
        self.send_idle_workers(engine, builder, &mut plan);
        self.train_army(engine, &mut plan);
        self.attack(engine, &mut plan);

        trace!(team = %self.team, commands = plan.commands.len(), "AI decision");
        plan.commands
    }

    fn send_idle_workers(&self, engine: &Engine, reserved: Option<UnitId>, plan: &mut Plan) {
        let balance = engine.resources(self.team);
        let preferred = if balance.wood < balance.minerals {
            ResourceKind::Wood
        } else {
            ResourceKind::Minerals
        };

        for worker in engine
            .units_of(self.team)
            .filter(|u| u.unit_type.is_worker() && u.is_idle() && Some(u.id) != reserved)
        {
            let tile = worker.tile();
            let node = nearest_deposit(engine, tile, preferred)
                .or_else(|| nearest_deposit(engine, tile, other_kind(preferred)));
            if let Some(node) = node {
                plan.commands.push(Command::Harvest {
                    unit_ids: vec![worker.id],
                    x: node.x,
                    y: node.y,
                });
            }
        }
    }

    fn train_workers(&self, engine: &Engine, base: BuildingId, plan: &mut Plan) {
        let Some(building) = engine.building(base) else {
            return;
        };
        let workers = engine
            .units_of(self.team)
            .filter(|u| u.unit_type.is_worker())
            .count()
            + building
                .queue
                .iter()
                .filter(|item| item.unit_type == UnitType::Worker)
                .count();

        if workers < self.config.worker_cap && building.queue.is_empty() {
            plan.train(base, UnitType::Worker);
        }
    }

    /// Place the next missing structure of the build order. Returns the
    /// worker assigned to it.
    fn expand(&self, engine: &Engine, base_anchor: TilePos, plan: &mut Plan) -> Option<UnitId> {
        let next = self.config.build_order.iter().copied().find(|kind| {
            !engine
                .buildings_of(self.team)
                .any(|b| b.building_type == *kind)
        })?;
        let cost = next.stats().cost;
        if !plan.budget.can_afford(cost) {
            return None;
        }

        let builder = engine
            .units_of(self.team)
            .find(|u| {
                u.unit_type.is_worker()
                    && matches!(u.order, Order::Idle | Order::Gathering { .. })
            })?
            .id;

        let site = nearest_matching(engine.map(), base_anchor, SITE_SEARCH_RADIUS, |anchor| {
            anchor.chebyshev(base_anchor) >= SITE_MIN_GAP && engine.can_place(next, anchor).is_valid()
        })?;

        plan.budget.spend(cost);
        plan.commands.push(Command::Build {
            unit_id: builder,
            building_type: next,
            x: site.x,
            y: site.y,
        });
        debug!(team = %self.team, kind = ?next, x = site.x, y = site.y, "AI placing structure");
        Some(builder)
    }

    fn train_army(&mut self, engine: &Engine, plan: &mut Plan) {
        if self.config.army_mix.is_empty() {
            return;
        }
        for building in engine.buildings_of(self.team).filter(|b| b.built && b.queue.len() < 2) {
            let mix = &self.config.army_mix;
            let choice = (0..mix.len())
                .map(|offset| mix[(self.mix_cursor + offset) % mix.len()])
                .find(|kind| building.building_type.can_produce(*kind));
            if let Some(kind) = choice {
                if plan.train(building.id, kind) {
                    self.mix_cursor = (self.mix_cursor + 1) % mix.len();
                }
            }
        }
    }

    fn attack(&self, engine: &Engine, plan: &mut Plan) {
        let army: Vec<UnitId> = engine
            .units_of(self.team)
            .filter(|u| u.unit_type.is_army() && u.is_idle())
            .map(|u| u.id)
            .collect();
        if army.len() < self.config.army_threshold {
            return;
        }

        let Some(rally) = engine.unit(army[0]).map(|u| u.position) else {
            return;
        };

        let target_building = engine
            .buildings()
            .filter(|b| b.team != self.team && b.is_alive())
            .min_by_key(|b| (b.center().distance_squared(rally), b.id))
            .map(|b| b.id);

        let command = if let Some(target) = target_building {
            Command::Attack {
                unit_ids: army,
                target_unit_id: None,
                target_building_id: Some(target),
            }
        } else if let Some(target) = engine
            .units()
            .filter(|u| u.team != self.team && u.is_alive())
            .min_by_key(|u| (u.position.distance_squared(rally), u.id))
            .map(|u| u.id)
        {
            Command::Attack {
                unit_ids: army,
                target_unit_id: Some(target),
                target_building_id: None,
            }
        } else {
            return;
        };

        debug!(team = %self.team, "AI launching attack");
        plan.commands.push(command);
    }
}

/// Commands being assembled in one decision round, with a local view of
/// what they will cost.
struct Plan {
    budget: Resources,
    headroom: usize,
    commands: Vec<Command>,
}

impl Plan {
    fn train(&mut self, building_id: BuildingId, unit_type: UnitType) -> bool {
        let cost = unit_type.stats().cost;
        if self.headroom == 0 || !self.budget.can_afford(cost) {
            return false;
        }
        self.budget.spend(cost);
        self.headroom -= 1;
        self.commands.push(Command::Train { building_id, unit_type });
        true
    }
}

const fn other_kind(kind: ResourceKind) -> ResourceKind {
    match kind {
        ResourceKind::Minerals => ResourceKind::Wood,
        ResourceKind::Wood => ResourceKind::Minerals,
    }
}

fn nearest_deposit(engine: &Engine, from: TilePos, kind: ResourceKind) -> Option<TilePos> {
    engine
        .map()
        .deposits(kind)
        .map(|(pos, _)| pos)
        .min_by_key(|pos| {
            let dx = pos.x - from.x;
            let dy = pos.y - from.y;
            (dx * dx + dy * dy, *pos)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::apply_command;
    use crate::simulation::{EngineConfig, TICK_DT};

    fn run_decision(ai: &mut ScriptedOpponent, engine: &Engine) -> Vec<Command> {
        let interval = ai.config().decision_interval;
        ai.decide(engine, interval)
    }

    #[test]
    fn test_presets_scale_with_difficulty() {
        let easy = AiConfig::preset(Difficulty::Easy);
        let hard = AiConfig::preset(Difficulty::Hard);
        assert!(hard.decision_interval < easy.decision_interval);
        assert!(hard.worker_cap > easy.worker_cap);
        assert!(hard.build_order.contains(&BuildingType::Factory));
        assert_eq!(easy.starting_bonus, Resources::ZERO);
        assert_eq!(AiConfig::default(), AiConfig::preset(Difficulty::Normal));
    }

    #[test]
    fn test_waits_for_decision_interval() {
        let engine = Engine::new(&EngineConfig::default());
        let mut ai = ScriptedOpponent::with_difficulty(TeamId(1), Difficulty::Normal);
        assert!(ai.decide(&engine, TICK_DT).is_empty());
        assert!(!run_decision(&mut ai, &engine).is_empty());
    }

    #[test]
    fn test_starting_bonus_applies_once() {
        let mut engine = Engine::new(&EngineConfig::default());
        let mut ai = ScriptedOpponent::with_difficulty(TeamId(1), Difficulty::Hard);
        ai.apply_starting_bonus(&mut engine);
        ai.apply_starting_bonus(&mut engine);
        assert_eq!(engine.resources(TeamId(1)), Resources::new(400, 300));
    }

    #[test]
    fn test_idle_workers_sent_to_harvest() {
        let engine = Engine::new(&EngineConfig::default());
        let mut ai = ScriptedOpponent::with_difficulty(TeamId(0), Difficulty::Easy);
        let commands = run_decision(&mut ai, &engine);

        // Every starting worker gets exactly one job: harvest or build.
        let jobs = commands
            .iter()
            .filter(|c| matches!(c, Command::Harvest { .. } | Command::Build { .. }))
            .count();
        assert_eq!(jobs, 3);
        assert!(commands.iter().any(|c| matches!(c, Command::Harvest { .. })));
    }

    #[test]
    fn test_commands_pass_the_command_processor() {
        let mut engine = Engine::new(&EngineConfig::default());
        let mut ai = ScriptedOpponent::with_difficulty(TeamId(0), Difficulty::Normal);
        for command in run_decision(&mut ai, &engine) {
            apply_command(&mut engine, TeamId(0), &command).unwrap();
        }

        assert!(engine
            .units_of(TeamId(0))
            .all(|u| matches!(u.order, Order::Gathering { .. } | Order::Building { .. })));
        assert!(engine.resources(TeamId(0)).minerals >= 0);
    }

    #[test]
    fn test_builds_barracks_when_affordable() {
        let mut engine = Engine::new(&EngineConfig::default());
        engine.credit(TeamId(0), Resources::new(1000, 1000));
        let mut ai = ScriptedOpponent::with_difficulty(TeamId(0), Difficulty::Easy);

        let commands = run_decision(&mut ai, &engine);
        let build = commands
            .iter()
            .find(|c| matches!(c, Command::Build { building_type: BuildingType::Barracks, .. }))
            .cloned()
            .unwrap();
        apply_command(&mut engine, TeamId(0), &build).unwrap();

        assert!(engine
            .buildings_of(TeamId(0))
            .any(|b| b.building_type == BuildingType::Barracks && !b.built));
    }

    #[test]
    fn test_attacks_with_idle_army() {
        let mut engine = Engine::new(&EngineConfig::default());
        let base = engine.buildings_of(TeamId(0)).next().unwrap().anchor;
        for i in 0..6 {
            engine.spawn_unit(UnitType::Soldier, TeamId(0), base.offset(6 + i % 3, i / 3));
        }
        let mut ai = ScriptedOpponent::with_difficulty(TeamId(0), Difficulty::Normal);

        let commands = run_decision(&mut ai, &engine);
        let attack = commands
            .iter()
            .find_map(|c| match c {
                Command::Attack {
                    unit_ids,
                    target_building_id,
                    ..
                } => Some((unit_ids.len(), *target_building_id)),
                _ => None,
            })
            .unwrap();
        assert_eq!(attack.0, 6);
        let target = engine.building(attack.1.unwrap()).unwrap();
        assert_eq!(target.team, TeamId(1));
    }
}

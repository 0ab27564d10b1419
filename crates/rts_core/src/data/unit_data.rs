//! Unit catalog.

use serde::{Deserialize, Serialize};

use super::fx;
use crate::economy::Resources;
use crate::math::Fixed;

/// The fixed catalog of unit types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitType {
    /// Gathers resources and constructs buildings.
    Worker,
    /// Basic infantry.
    Soldier,
    /// Heavy armored ground unit.
    Tank,
    /// Long-range artillery.
    Rocket,
    /// Air unit, ignores terrain.
    Flyer,
    /// Naval unit, water only.
    Ship,
}

/// Per-type unit statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitStats {
    /// Maximum health points.
    pub max_health: i32,
    /// Flat damage reduction.
    pub armor: i32,
    /// Damage per shot.
    pub damage: i32,
    /// Weapon range in tiles.
    pub range: Fixed,
    /// Seconds between shots.
    pub attack_cooldown: Fixed,
    /// Movement speed in tiles per second.
    pub speed: Fixed,
    /// Training cost.
    pub cost: Resources,
    /// Training time in seconds.
    pub train_time: Fixed,
    /// Ignores terrain and pathfinding.
    pub flying: bool,
    /// Moves on water only.
    pub naval: bool,
}

static UNIT_TABLE: [UnitStats; 6] = [
    // Worker
    UnitStats {
        max_health: 40,
        armor: 0,
        damage: 4,
        range: fx(3, 2),
        attack_cooldown: fx(1, 1),
        speed: fx(5, 2),
        cost: Resources::new(50, 0),
        train_time: fx(5, 1),
        flying: false,
        naval: false,
    },
    // Soldier
    UnitStats {
        max_health: 80,
        armor: 1,
        damage: 9,
        range: fx(3, 2),
        attack_cooldown: fx(1, 1),
        speed: fx(5, 2),
        cost: Resources::new(60, 20),
        train_time: fx(6, 1),
        flying: false,
        naval: false,
    },
    // Tank
    UnitStats {
        max_health: 220,
        armor: 4,
        damage: 24,
        range: fx(4, 1),
        attack_cooldown: fx(2, 1),
        speed: fx(8, 5),
        cost: Resources::new(150, 50),
        train_time: fx(12, 1),
        flying: false,
        naval: false,
    },
    // Rocket
    UnitStats {
        max_health: 90,
        armor: 1,
        damage: 32,
        range: fx(6, 1),
        attack_cooldown: fx(3, 1),
        speed: fx(2, 1),
        cost: Resources::new(110, 70),
        train_time: fx(10, 1),
        flying: false,
        naval: false,
    },
    // Flyer
    UnitStats {
        max_health: 70,
        armor: 0,
        damage: 12,
        range: fx(3, 1),
        attack_cooldown: fx(6, 5),
        speed: fx(4, 1),
        cost: Resources::new(100, 100),
        train_time: fx(10, 1),
        flying: true,
        naval: false,
    },
    // Ship
    UnitStats {
        max_health: 160,
        armor: 3,
        damage: 20,
        range: fx(5, 1),
        attack_cooldown: fx(2, 1),
        speed: fx(11, 5),
        cost: Resources::new(120, 120),
        train_time: fx(12, 1),
        flying: false,
        naval: true,
    },
];

impl UnitType {
    /// Every unit type, in catalog order.
    pub const ALL: [UnitType; 6] = [
        UnitType::Worker,
        UnitType::Soldier,
        UnitType::Tank,
        UnitType::Rocket,
        UnitType::Flyer,
        UnitType::Ship,
    ];

    /// Catalog entry for this type.
    #[must_use]
    pub fn stats(self) -> &'static UnitStats {
        &UNIT_TABLE[self as usize]
    }

    /// Workers gather, build and never auto-aggro.
    #[must_use]
    pub const fn is_worker(self) -> bool {
        matches!(self, UnitType::Worker)
    }

    /// Combat units (everything but workers).
    #[must_use]
    pub const fn is_army(self) -> bool {
        !self.is_worker()
    }
}

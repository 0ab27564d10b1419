//! Building catalog.

use serde::{Deserialize, Serialize};

use super::fx;
use super::unit_data::UnitType;
use crate::economy::Resources;
use crate::math::Fixed;

/// The fixed catalog of building types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildingType {
    /// Town centre: trains workers, accepts resource deposits.
    Base,
    /// Infantry production.
    Barracks,
    /// Vehicle and air production.
    Factory,
    /// Defensive structure that fires on enemy units.
    Tower,
    /// Naval production; must touch water.
    Dock,
}

/// Weapon of a defensive structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TowerWeapon {
    /// Damage per shot.
    pub damage: i32,
    /// Range in tiles, measured from the footprint centre.
    pub range: Fixed,
    /// Seconds between shots.
    pub cooldown: Fixed,
}

/// Per-type building statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildingStats {
    /// Square footprint edge length in tiles.
    pub size: i32,
    /// Maximum health points.
    pub max_health: i32,
    /// Flat damage reduction.
    pub armor: i32,
    /// Placement cost.
    pub cost: Resources,
    /// Construction time in builder-seconds.
    pub build_time: Fixed,
    /// Unit types this building can train.
    pub produces: &'static [UnitType],
    /// Defensive weapon, if any.
    pub weapon: Option<TowerWeapon>,
}

static BUILDING_TABLE: [BuildingStats; 5] = [
    // Base
    BuildingStats {
        size: 3,
        max_health: 1200,
        armor: 5,
        cost: Resources::new(400, 200),
        build_time: fx(40, 1),
        produces: &[UnitType::Worker],
        weapon: None,
    },
    // Barracks
    BuildingStats {
        size: 2,
        max_health: 600,
        armor: 3,
        cost: Resources::new(150, 100),
        build_time: fx(20, 1),
        produces: &[UnitType::Soldier, UnitType::Rocket],
        weapon: None,
    },
    // Factory
    BuildingStats {
        size: 3,
        max_health: 800,
        armor: 4,
        cost: Resources::new(200, 150),
        build_time: fx(30, 1),
        produces: &[UnitType::Tank, UnitType::Flyer],
        weapon: None,
    },
    // Tower
    BuildingStats {
        size: 1,
        max_health: 400,
        armor: 4,
        cost: Resources::new(100, 100),
        build_time: fx(15, 1),
        produces: &[],
        weapon: Some(TowerWeapon {
            damage: 14,
            range: fx(6, 1),
            cooldown: fx(3, 2),
        }),
    },
    // Dock
    BuildingStats {
        size: 2,
        max_health: 600,
        armor: 3,
        cost: Resources::new(150, 150),
        build_time: fx(20, 1),
        produces: &[UnitType::Ship],
        weapon: None,
    },
];

impl BuildingType {
    /// Every building type, in catalog order.
    pub const ALL: [BuildingType; 5] = [
        BuildingType::Base,
        BuildingType::Barracks,
        BuildingType::Factory,
        BuildingType::Tower,
        BuildingType::Dock,
    ];

    /// Catalog entry for this type.
    #[must_use]
    pub fn stats(self) -> &'static BuildingStats {
        &BUILDING_TABLE[self as usize]
    }

    /// Whether this type can train the given unit type.
    #[must_use]
    pub fn can_produce(self, unit: UnitType) -> bool {
        self.stats().produces.contains(&unit)
    }

    /// Docks must be placed next to water.
    #[must_use]
    pub const fn requires_water_edge(self) -> bool {
        matches!(self, BuildingType::Dock)
    }

    /// Workers return their carry to bases.
    #[must_use]
    pub const fn accepts_deposits(self) -> bool {
        matches!(self, BuildingType::Base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_table() {
        assert!(BuildingType::Base.can_produce(UnitType::Worker));
        assert!(!BuildingType::Base.can_produce(UnitType::Tank));
        assert!(BuildingType::Dock.can_produce(UnitType::Ship));
        assert!(BuildingType::Tower.stats().produces.is_empty());
    }

    #[test]
    fn test_only_tower_has_weapon() {
        for kind in BuildingType::ALL {
            assert_eq!(kind.stats().weapon.is_some(), kind == BuildingType::Tower);
        }
    }
}

//! Immutable stat catalogs for unit and building types.
//!
//! Each type is an enum variant; its stats live in a static table and are
//! looked up once when an entity is constructed. There is no dynamic field
//! copying and no per-type behaviour beyond what the table describes.

mod building_data;
mod unit_data;

pub use building_data::{BuildingStats, BuildingType, TowerWeapon};
pub use unit_data::{UnitStats, UnitType};

use crate::math::Fixed;

/// Compile-time fixed-point rational.
pub(crate) const fn fx(num: i64, den: i64) -> Fixed {
    Fixed::from_bits((num << 32) / den)
}

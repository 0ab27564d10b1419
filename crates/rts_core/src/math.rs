//! Fixed-point math utilities for deterministic simulation.
//!
//! All match simulation uses fixed-point arithmetic so that a restored
//! snapshot resumes bit-for-bit identically to the engine it was taken from.
//! Positions are expressed in tile units: tile `(x, y)` spans
//! `[x, x + 1) × [y, y + 1)` and its centre sits at `(x + 0.5, y + 0.5)`.

use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

/// Fixed-point number type for all simulation math.
///
/// Uses 32 bits for integer part and 32 bits for fractional part.
pub type Fixed = I32F32;

/// One half, used for tile centres.
pub const HALF: Fixed = Fixed::from_bits(1 << 31);

/// √2 (diagonal step cost), `round(√2 · 2³²)`.
pub const SQRT_2: Fixed = Fixed::from_bits(6_074_001_000);

/// √2 − 1 rounded to 0.414, the octile heuristic coefficient.
pub const OCTILE_COEFF: Fixed = Fixed::from_bits(1_778_116_460);

/// Build a fixed-point value from a rational `num / den`.
#[must_use]
pub fn ratio(num: i32, den: i32) -> Fixed {
    Fixed::from_num(num) / Fixed::from_num(den)
}

/// Fixed-point 2D vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vec2Fixed {
    /// X coordinate.
    #[serde(with = "fixed_serde")]
    pub x: Fixed,
    /// Y coordinate.
    #[serde(with = "fixed_serde")]
    pub y: Fixed,
}

/// Serde support for fixed-point numbers.
///
/// Values travel as plain JSON numbers. An `I32F32` whose integer part fits
/// in 21 bits converts to `f64` without loss, which covers every coordinate,
/// timer and progress value the simulation produces, so a serialized engine
/// restores exactly.
pub mod fixed_serde {
    use super::Fixed;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a fixed-point number as a JSON number.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(value.to_num::<f64>())
    }

    /// Deserialize a fixed-point number, rejecting NaN and out-of-range values.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = f64::deserialize(deserializer)?;
        Fixed::checked_from_num(raw)
            .ok_or_else(|| D::Error::custom(format!("fixed-point value out of range: {raw}")))
    }
}

impl Vec2Fixed {
    /// Create a new fixed-point vector.
    #[must_use]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Zero vector.
    pub const ZERO: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
    };

    /// Centre of the tile at integer coordinates.
    #[must_use]
    pub fn tile_center(x: i32, y: i32) -> Self {
        Self::new(Fixed::from_num(x) + HALF, Fixed::from_num(y) + HALF)
    }

    /// Integer tile coordinates containing this point.
    #[must_use]
    pub fn tile(self) -> (i32, i32) {
        (self.x.floor().to_num(), self.y.floor().to_num())
    }

    /// Calculate squared distance (avoids sqrt for comparisons).
    #[must_use]
    pub fn distance_squared(self, other: Self) -> Fixed {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Euclidean distance.
    #[must_use]
    pub fn distance(self, other: Self) -> Fixed {
        fixed_sqrt(self.distance_squared(other))
    }

    /// Dot product of two vectors.
    #[must_use]
    pub fn dot(self, other: Self) -> Fixed {
        self.x * other.x + self.y * other.y
    }

    /// Vector length.
    #[must_use]
    pub fn length(self) -> Fixed {
        fixed_sqrt(self.dot(self))
    }

    /// Scale both components.
    #[must_use]
    pub fn scale(self, factor: Fixed) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }

    /// Normalize vector using fixed-point math.
    #[must_use]
    pub fn normalize(self) -> Self {
        let len_sq = self.dot(self);

        if len_sq == Fixed::ZERO {
            return Self::ZERO;
        }

        let len = fixed_sqrt(len_sq);
        if len == Fixed::ZERO {
            return Self::ZERO;
        }

        Self::new(self.x / len, self.y / len)
    }

    /// Move toward `target` by at most `step`. Returns the new point and
    /// whether the target was reached.
    #[must_use]
    pub fn step_toward(self, target: Self, step: Fixed) -> (Self, bool) {
        let diff = target - self;
        let dist = diff.length();
        if dist <= step {
            (target, true)
        } else {
            (self + diff.normalize().scale(step), false)
        }
    }
}

/// Computes the square root of a fixed-point number using binary search.
#[must_use]
pub fn fixed_sqrt(value: Fixed) -> Fixed {
    if value <= Fixed::ZERO {
        return Fixed::ZERO;
    }

    let mut low = Fixed::ZERO;
    let mut high = if value > Fixed::ONE { value } else { Fixed::ONE };

    for _ in 0..48 {
        let mid = (low + high) / Fixed::from_num(2);
        let mid_sq = mid.saturating_mul(mid);

        if mid_sq <= value {
            low = mid;
        } else {
            high = mid;
        }
    }

    low
}

impl std::ops::Add for Vec2Fixed {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl std::ops::Sub for Vec2Fixed {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

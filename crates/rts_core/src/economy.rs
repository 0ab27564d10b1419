//! Team resource accounting.
//!
//! Every team owns a mineral and a wood counter. Balances only change
//! through [`Resources::spend`] and [`Resources::credit`]; a spend is only
//! legal right after a passing [`Resources::can_afford`] check in the same
//! critical section, which [`Resources::try_spend`] performs atomically.
//!
//! All calculations use integer math for deterministic simulation.

use serde::{Deserialize, Serialize};

/// Kind of harvestable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Mined from mineral tiles.
    Minerals,
    /// Chopped from tree tiles.
    Wood,
}

/// A mineral/wood pair, used both for balances and for costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Resources {
    /// Minerals.
    pub minerals: i32,
    /// Wood.
    pub wood: i32,
}

impl Resources {
    /// Create a new pair.
    #[must_use]
    pub const fn new(minerals: i32, wood: i32) -> Self {
        Self { minerals, wood }
    }

    /// Nothing.
    pub const ZERO: Self = Self::new(0, 0);

    /// Amount of a single kind.
    #[must_use]
    pub const fn get(&self, kind: ResourceKind) -> i32 {
        match kind {
            ResourceKind::Minerals => self.minerals,
            ResourceKind::Wood => self.wood,
        }
    }

    /// Check if this balance covers a cost.
    #[must_use]
    pub const fn can_afford(&self, cost: Resources) -> bool {
        self.minerals >= cost.minerals && self.wood >= cost.wood
    }

    /// Deduct a cost. Callers must have checked [`can_afford`](Self::can_afford)
    /// in the same step; a balance going negative is an integrity fault.
    pub fn spend(&mut self, cost: Resources) {
        debug_assert!(
            self.can_afford(cost),
            "spend without affordability check: balance {:?}, cost {:?}",
            self,
            cost
        );
        self.minerals -= cost.minerals;
        self.wood -= cost.wood;
        if self.minerals < 0 || self.wood < 0 {
            tracing::error!(balance = ?*self, ?cost, "Resource balance went negative");
        }
    }

    /// Check and spend in one step. Returns false (and changes nothing)
    /// when the balance is insufficient.
    pub fn try_spend(&mut self, cost: Resources) -> bool {
        if self.can_afford(cost) {
            self.spend(cost);
            true
        } else {
            false
        }
    }

    /// Add resources. There is no storage ceiling.
    pub fn credit(&mut self, amount: Resources) {
        self.minerals += amount.minerals;
        self.wood += amount.wood;
    }

    /// Add an amount of one kind.
    pub fn credit_kind(&mut self, kind: ResourceKind, amount: i32) {
        match kind {
            ResourceKind::Minerals => self.minerals += amount,
            ResourceKind::Wood => self.wood += amount,
        }
    }
}

impl std::ops::Add for Resources {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.minerals + rhs.minerals, self.wood + rhs.wood)
    }
}

/// What a worker is carrying back to base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Carry {
    /// Amount carried.
    pub amount: i32,
    /// Kind carried, `None` when empty.
    pub kind: Option<ResourceKind>,
}

impl Carry {
    /// Nothing carried.
    pub const EMPTY: Self = Self {
        amount: 0,
        kind: None,
    };

    /// Check if the carry is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.amount <= 0
    }

    /// Convert into a resource pair for crediting.
    #[must_use]
    pub const fn as_resources(&self) -> Resources {
        match self.kind {
            Some(ResourceKind::Minerals) => Resources::new(self.amount, 0),
            Some(ResourceKind::Wood) => Resources::new(0, self.amount),
            None => Resources::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_afford() {
        let balance = Resources::new(100, 50);
        assert!(balance.can_afford(Resources::new(100, 50)));
        assert!(!balance.can_afford(Resources::new(101, 0)));
        assert!(!balance.can_afford(Resources::new(0, 51)));
    }

    #[test]
    fn test_try_spend_is_all_or_nothing() {
        let mut balance = Resources::new(100, 10);
        assert!(!balance.try_spend(Resources::new(50, 20)));
        assert_eq!(balance, Resources::new(100, 10));

        assert!(balance.try_spend(Resources::new(50, 10)));
        assert_eq!(balance, Resources::new(50, 0));
    }

    #[test]
    fn test_credit_has_no_ceiling() {
        let mut balance = Resources::new(i32::MAX - 10, 0);
        balance.credit(Resources::new(5, 1_000_000));
        assert_eq!(balance.minerals, i32::MAX - 5);
        assert_eq!(balance.wood, 1_000_000);
    }

    #[test]
    fn test_carry_as_resources() {
        let carry = Carry {
            amount: 7,
            kind: Some(ResourceKind::Wood),
        };
        assert_eq!(carry.as_resources(), Resources::new(0, 7));
        assert!(Carry::EMPTY.is_empty());
    }
}

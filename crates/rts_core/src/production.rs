//! Production queues for unit-producing buildings.
//!
//! Only the head of the queue advances. Costs are paid when an item is
//! queued, never when it completes.
//!
//! All calculations use fixed-point math for deterministic simulation.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::data::UnitType;
use crate::math::{fixed_serde, Fixed};

/// An item currently in a production queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionItem {
    /// The type of unit being produced.
    pub unit_type: UnitType,
    /// Seconds of production left.
    #[serde(with = "fixed_serde")]
    pub remaining: Fixed,
}

impl ProductionItem {
    /// Create a new production item with the catalog train time.
    #[must_use]
    pub fn new(unit_type: UnitType) -> Self {
        Self {
            unit_type,
            remaining: unit_type.stats().train_time,
        }
    }

    /// Check if production is complete.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.remaining <= Fixed::ZERO
    }
}

/// Production queue of a building.
///
/// The first item in the queue is actively being produced.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductionQueue {
    items: VecDeque<ProductionItem>,
}

impl ProductionQueue {
    /// Maximum number of queued items per building.
    pub const MAX_QUEUE_SIZE: usize = 5;

    /// Create a new empty production queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the queue is full.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.items.len() >= Self::MAX_QUEUE_SIZE
    }

    /// Check if the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get the number of items in the queue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Add an item to the back of the queue.
    pub fn add(&mut self, unit_type: UnitType) -> Result<(), ProductionError> {
        if self.is_full() {
            return Err(ProductionError::QueueFull);
        }
        self.items.push_back(ProductionItem::new(unit_type));
        Ok(())
    }

    /// Get the currently producing item.
    #[must_use]
    pub fn current(&self) -> Option<&ProductionItem> {
        self.items.front()
    }

    /// Iterate over queued items, head first.
    pub fn iter(&self) -> impl Iterator<Item = &ProductionItem> {
        self.items.iter()
    }

    /// Advance the head item by `dt`. Returns the unit type if it finished;
    /// the finished item is removed.
    pub fn advance(&mut self, dt: Fixed) -> Option<UnitType> {
        let head = self.items.front_mut()?;
        head.remaining -= dt;
        if head.is_complete() {
            self.items.pop_front().map(|item| item.unit_type)
        } else {
            None
        }
    }
}

/// Errors that can occur when queueing production.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductionError {
    /// The production queue is full.
    QueueFull,
    /// Cannot afford the unit cost.
    InsufficientResources,
    /// The building cannot produce this unit type.
    CannotProduceUnit,
    /// The building is not yet constructed.
    BuildingNotConstructed,
}

impl std::fmt::Display for ProductionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QueueFull => write!(f, "Production queue is full"),
            Self::InsufficientResources => write!(f, "Insufficient resources"),
            Self::CannotProduceUnit => write!(f, "Building cannot produce this unit type"),
            Self::BuildingNotConstructed => write!(f, "Building is not yet constructed"),
        }
    }
}

impl std::error::Error for ProductionError {}

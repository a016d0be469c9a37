//! Persisted order records.

use chrono::{DateTime, Utc};
use common::{OrderId, OrderItemId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use super::{Money, OrderStatus, ReservationState};

/// Row version of an order, used for optimistic concurrency on status writes.
///
/// A freshly inserted order is at version 1; every status write bumps it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the version of a newly created order.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single order line. The unit price is a snapshot taken at order time,
/// not a live reference to the product's current price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

/// An order together with the items it exclusively owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    /// Sum of `quantity * unit_price` over the items, fixed at creation.
    pub total_price: Money,
    pub status: OrderStatus,
    pub reservation_state: ReservationState,
    /// Number of leading items whose stock was decremented.
    pub reserved_items: u32,
    pub version: Version,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Returns true if the order has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.status == OrderStatus::Cancelled
    }

    /// Returns the items whose stock is still held at the product service
    /// and must be handed back when the order is cancelled.
    pub fn restockable_items(&self) -> impl Iterator<Item = &OrderItem> {
        let held = if self.reservation_state.holds_stock() {
            self.reserved_items as usize
        } else {
            0
        };
        self.items.iter().take(held)
    }

    /// Returns the total number of units across all items.
    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }
}

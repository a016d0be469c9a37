use chrono::{DateTime, Utc};
use common::{OrderId, OrderItemId, ProductId};
use serde::{Deserialize, Serialize};

/// Identifier of a queued restock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RestockId(i64);

impl RestockId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for RestockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stock release that failed during cancellation and must be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRestockTask {
    /// Unique per order line; enqueueing the same key twice is a no-op.
    pub idempotency_key: String,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    /// Error from the attempt that caused the task to be queued.
    pub error: String,
}

impl NewRestockTask {
    /// Builds the task for one order line, keyed on the line's identity.
    pub fn for_item(
        order_id: OrderId,
        item_id: OrderItemId,
        product_id: ProductId,
        quantity: u32,
        error: impl Into<String>,
    ) -> Self {
        Self {
            idempotency_key: format!("restock:{order_id}:{item_id}"),
            order_id,
            product_id,
            quantity,
            error: error.into(),
        }
    }
}

/// A queued restock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestockTask {
    pub id: RestockId,
    pub idempotency_key: String,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

use common::OrderId;
use domain::Version;
use thiserror::Error;

use crate::{OutboxId, RestockId};

/// Errors that can occur when interacting with the order store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The order does not exist (or has been soft-deleted).
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// A status write carried an expected version that no longer matches.
    #[error("Version conflict for order {order_id}: expected version {expected}, found {actual}")]
    VersionConflict {
        order_id: OrderId,
        expected: Version,
        actual: Version,
    },

    /// Reservation progress was written after the order was cancelled or
    /// its stock released.
    #[error("Reservation of order {0} is closed")]
    ReservationClosed(OrderId),

    #[error("Outbox message not found: {0}")]
    OutboxMessageNotFound(OutboxId),

    #[error("Restock task not found: {0}")]
    RestockTaskNotFound(RestockId),

    /// A stored row could not be mapped back into a domain value.
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// The backing store refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for order store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

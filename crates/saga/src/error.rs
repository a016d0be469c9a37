//! Saga error types.

use common::{OrderId, ProductId};
use domain::{OrderError, OrderStatus};
use order_store::StoreError;
use thiserror::Error;

use crate::services::InventoryError;

/// Errors returned by saga operations.
///
/// Publish failures are deliberately absent: they are logged and recorded on
/// the outbox row, never returned to the caller.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The order does not exist.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// The create request was malformed.
    #[error("Validation error: {0}")]
    Validation(#[from] OrderError),

    /// CancelOrder was called on an order that is already cancelled.
    #[error("Order {0} is already cancelled")]
    AlreadyCancelled(OrderId),

    /// The requested status change is not allowed from the current status.
    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// The order changed between read and write.
    #[error("Order {0} was modified concurrently")]
    Conflict(OrderId),

    /// The order store failed.
    #[error("Persistence error: {0}")]
    Persistence(#[source] StoreError),

    /// Stock reservation failed while creating an order.
    #[error("Inventory error for product {product_id}: {source}")]
    Inventory {
        product_id: ProductId,
        #[source]
        source: InventoryError,
    },

    /// The cancellation event could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for SagaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::OrderNotFound(order_id) => SagaError::NotFound(order_id),
            StoreError::VersionConflict { order_id, .. } => SagaError::Conflict(order_id),
            other => SagaError::Persistence(other),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Version;

    #[test]
    fn store_not_found_maps_to_not_found() {
        let err: SagaError = StoreError::OrderNotFound(OrderId::new(3)).into();
        assert!(matches!(err, SagaError::NotFound(id) if id == OrderId::new(3)));
    }

    #[test]
    fn version_conflict_maps_to_conflict() {
        let err: SagaError = StoreError::VersionConflict {
            order_id: OrderId::new(1),
            expected: Version::new(1),
            actual: Version::new(2),
        }
        .into();
        assert!(matches!(err, SagaError::Conflict(_)));
    }

    #[test]
    fn other_store_errors_are_persistence() {
        let err: SagaError = StoreError::Unavailable("down".to_string()).into();
        assert!(matches!(err, SagaError::Persistence(_)));
        assert_eq!(err.to_string(), "Persistence error: Store unavailable: down");
    }
}

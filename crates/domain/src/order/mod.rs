//! Order entities and related types.

mod model;
mod new_order;
mod reservation;
mod state;
mod value_objects;

pub use model::{Order, OrderItem, Version};
pub use new_order::{NewOrder, NewOrderItem, OrderLine};
pub use reservation::ReservationState;
pub use state::OrderStatus;
pub use value_objects::Money;

use common::ProductId;
use thiserror::Error;

/// Errors raised while validating order input.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Invalid quantity.
    #[error("Invalid quantity for product {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity {
        product_id: ProductId,
        quantity: u32,
    },

    /// Unit price was not supplied.
    #[error("Unit price is required for product {product_id}")]
    MissingUnitPrice { product_id: ProductId },

    /// Invalid price.
    #[error("Invalid price for product {product_id}: {price} (must not be negative)")]
    InvalidPrice { product_id: ProductId, price: Money },

    /// Prices are stored with two decimal places.
    #[error("Unit price for product {product_id} has more than two decimal places: {price}")]
    PriceScale { product_id: ProductId, price: Money },

    /// The order total does not fit in a decimal.
    #[error("Order total overflows")]
    TotalOverflow,

    #[error("Unknown order status: {0}")]
    UnknownStatus(String),

    #[error("Unknown reservation state: {0}")]
    UnknownReservationState(String),
}

//! Identifier types shared by every crate in the order service.

mod types;

pub use types::{OrderId, OrderItemId, ProductId, UserId};

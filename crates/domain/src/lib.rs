//! Domain layer for the order service.
//!
//! This crate provides:
//! - `Order` / `OrderItem` records and the `Money` value object
//! - `OrderStatus`, the user-visible status state machine
//! - `ReservationState`, the stock-reservation progress of an order
//! - `NewOrder`, the validated create request that fixes the order total

pub mod order;

pub use order::{
    Money, NewOrder, NewOrderItem, Order, OrderError, OrderItem, OrderLine, OrderStatus,
    ReservationState, Version,
};

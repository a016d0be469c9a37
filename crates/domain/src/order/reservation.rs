//! Stock reservation progress recorded alongside each order.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::OrderError;

/// How far the inventory-reservation step of an order has progressed.
///
/// State transitions:
/// ```text
/// PendingReservation ──┬──► Reserved ──────────┬──► Released
///                      └──► ReservationFailed ─┘
/// ```
/// Paired with the order's `reserved_items` count, which says how many
/// leading items actually had their stock decremented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    /// The order row exists; decrements are in flight (or the process died).
    #[default]
    PendingReservation,

    /// Every item was decremented at the product service.
    Reserved,

    /// A decrement was refused; earlier items remain decremented.
    ReservationFailed,

    /// Stock held by the order has been handed back.
    Released,
}

impl ReservationState {
    /// Returns true if the reconciler should compensate an order in this state.
    pub fn needs_compensation(&self) -> bool {
        matches!(self, ReservationState::ReservationFailed)
    }

    /// Returns true if the order may still hold stock at the product service.
    pub fn holds_stock(&self) -> bool {
        !matches!(self, ReservationState::Released)
    }

    /// Returns the state as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationState::PendingReservation => "pending_reservation",
            ReservationState::Reserved => "reserved",
            ReservationState::ReservationFailed => "reservation_failed",
            ReservationState::Released => "released",
        }
    }
}

impl std::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReservationState {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_reservation" => Ok(ReservationState::PendingReservation),
            "reserved" => Ok(ReservationState::Reserved),
            "reservation_failed" => Ok(ReservationState::ReservationFailed),
            "released" => Ok(ReservationState::Released),
            _ => Err(OrderError::UnknownReservationState(s.to_string())),
        }
    }
}

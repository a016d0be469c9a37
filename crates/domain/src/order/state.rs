//! Order status state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::OrderError;

/// The user-visible status of an order.
///
/// State transitions:
/// ```text
/// pending ──┬──► completed   (UpdateOrderStatus)
///           └──► cancelled   (CancelOrder only)
/// ```
/// Both `completed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Order has been placed; stock reservation may or may not have finished.
    #[default]
    Pending,

    /// Order has been fulfilled (terminal state).
    Completed,

    /// Order was cancelled and its stock released (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// Returns true if `CancelOrder` may move the order to `cancelled`.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if a non-forced `UpdateOrderStatus` may write `next`.
    ///
    /// Writing the current status again is accepted as a no-op, except for
    /// `cancelled`, which is only ever reached through `CancelOrder`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Pending)
                | (OrderStatus::Pending, OrderStatus::Completed)
                | (OrderStatus::Completed, OrderStatus::Completed)
        )
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Returns the status as stored in the database and sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    /// Parses a status case-insensitively, so the legacy `CANCELLED` literal
    /// is accepted alongside `cancelled`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
            _ => Err(OrderError::UnknownStatus(s.to_string())),
        }
    }
}

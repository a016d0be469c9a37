//! Messages the saga emits to other services.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};

use crate::order_fulfillment::{CANCELLED_STATUS, TIMESTAMP_FORMAT};

/// Notification published on `order.cancelled` once an order is cancelled.
///
/// Consumed by the notification service, which e-mails the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub user_email: String,
    /// Always `CANCELLED`.
    pub status: String,
    /// UTC, second precision.
    pub timestamp: String,
}

impl OrderCancelled {
    pub fn new(
        order_id: OrderId,
        user_id: UserId,
        user_email: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            user_id,
            user_email: user_email.into(),
            status: CANCELLED_STATUS.to_string(),
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

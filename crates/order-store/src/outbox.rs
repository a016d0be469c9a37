use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};

/// Identifier of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxId(i64);

impl OutboxId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for OutboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An event to be written in the same transaction as an order status change.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxMessage {
    /// Broker channel the payload is relayed to (e.g. `order.cancelled`).
    pub channel: String,
    pub aggregate_id: OrderId,
    pub payload: serde_json::Value,
}

impl NewOutboxMessage {
    /// Serializes `payload` into a message bound for `channel`.
    pub fn new<T: Serialize>(
        channel: impl Into<String>,
        aggregate_id: OrderId,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            channel: channel.into(),
            aggregate_id,
            payload: serde_json::to_value(payload)?,
        })
    }
}

/// A stored outbox row awaiting (or done with) relay to the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxMessage {
    pub id: OutboxId,
    pub channel: String,
    pub aggregate_id: OrderId,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    /// Number of failed publish attempts so far.
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl OutboxMessage {
    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }
}

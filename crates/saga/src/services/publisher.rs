//! Event publisher trait and implementations.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

use crate::events::OrderCancelled;
use crate::order_fulfillment::ORDER_CANCELLED_CHANNEL;

/// Failure to hand a message to the broker.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The broker could not be reached or refused the message.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// The message could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Fire-and-forget publishing onto a named broker channel.
///
/// `Ok` means the broker accepted the message, not that anyone received it.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes a raw JSON payload on `channel`.
    async fn publish(&self, channel: &str, payload: &serde_json::Value)
    -> Result<(), PublishError>;

    /// Publishes a cancellation notification on `order.cancelled`.
    async fn publish_order_cancelled(&self, event: &OrderCancelled) -> Result<(), PublishError> {
        let payload = serde_json::to_value(event)?;
        self.publish(ORDER_CANCELLED_CHANNEL, &payload).await
    }
}

#[async_trait]
impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    async fn publish(
        &self,
        channel: &str,
        payload: &serde_json::Value,
    ) -> Result<(), PublishError> {
        (**self).publish(channel, payload).await
    }
}

#[derive(Debug, Default)]
struct InMemoryPublisherState {
    published: Vec<(String, serde_json::Value)>,
    fail_on_publish: bool,
}

/// In-memory publisher that records every accepted message.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventPublisher {
    state: Arc<Mutex<InMemoryPublisherState>>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryPublisherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every publish fail until reset.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.lock().fail_on_publish = fail;
    }

    /// Returns every accepted `(channel, payload)` pair, in order.
    pub fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.lock().published.clone()
    }

    /// Returns the payloads accepted on one channel.
    pub fn published_on(&self, channel: &str) -> Vec<serde_json::Value> {
        self.lock()
            .published
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(
        &self,
        channel: &str,
        payload: &serde_json::Value,
    ) -> Result<(), PublishError> {
        let mut state = self.lock();
        if state.fail_on_publish {
            return Err(PublishError::Unavailable("broker unreachable".to_string()));
        }
        state.published.push((channel.to_string(), payload.clone()));
        Ok(())
    }
}

/// Publishes through Postgres `NOTIFY`; subscribers `LISTEN` on the channel.
#[derive(Clone)]
pub struct PgNotifyPublisher {
    pool: PgPool,
}

impl PgNotifyPublisher {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventPublisher for PgNotifyPublisher {
    async fn publish(
        &self,
        channel: &str,
        payload: &serde_json::Value,
    ) -> Result<(), PublishError> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| PublishError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

//! Outbox relay: publishes pending outbox rows until they are delivered or
//! exhaust their attempts.

use std::time::Duration;

use order_store::{OutboxStore, StoreError};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::services::EventPublisher;

/// Shortest tick the background workers run at; `tokio::time::interval`
/// panics on zero.
pub(crate) const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// Rows that failed this many times are parked.
    pub max_attempts: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            batch_size: 100,
            max_attempts: 10,
        }
    }
}

/// Result of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub published: usize,
    pub failed: usize,
}

/// Relays outbox rows to the broker with at-least-once delivery.
pub struct Dispatcher<S, P> {
    store: S,
    publisher: P,
    config: DispatcherConfig,
}

impl<S, P> Dispatcher<S, P>
where
    S: OutboxStore,
    P: EventPublisher,
{
    pub fn new(store: S, publisher: P, config: DispatcherConfig) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    /// Publishes one batch of pending rows.
    #[tracing::instrument(skip(self))]
    pub async fn dispatch_pending(&self) -> Result<DispatchReport, StoreError> {
        let messages = self
            .store
            .pending_messages(self.config.batch_size, self.config.max_attempts)
            .await?;

        let mut report = DispatchReport::default();
        for message in messages {
            match self
                .publisher
                .publish(&message.channel, &message.payload)
                .await
            {
                Ok(()) => {
                    self.store.mark_published(message.id).await?;
                    metrics::counter!("events_published_total").increment(1);
                    report.published += 1;
                }
                Err(error) => {
                    metrics::counter!("event_publish_failures_total").increment(1);
                    self.store
                        .record_publish_failure(message.id, &error.to_string())
                        .await?;

                    if message.attempts + 1 >= self.config.max_attempts {
                        tracing::error!(
                            outbox_id = %message.id,
                            order_id = %message.aggregate_id,
                            %error,
                            "outbox message parked after max attempts"
                        );
                    } else {
                        tracing::warn!(
                            outbox_id = %message.id,
                            attempts = message.attempts + 1,
                            %error,
                            "outbox publish failed"
                        );
                    }
                    report.failed += 1;
                }
            }
        }

        if report.published + report.failed > 0 {
            tracing::debug!(published = report.published, failed = report.failed, "dispatch pass");
        }
        Ok(report)
    }

    /// Polls until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval.max(MIN_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_ms = self.config.poll_interval.as_millis() as u64, "outbox dispatcher started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.dispatch_pending().await {
                        tracing::error!(%error, "outbox dispatch failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("outbox dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryEventPublisher;
    use common::{OrderId, UserId};
    use domain::{Money, NewOrder, NewOrderItem, OrderStatus};
    use order_store::{InMemoryOrderStore, NewOutboxMessage, OrderStore, UpdateOptions};

    async fn store_with_pending_message() -> InMemoryOrderStore {
        let store = InMemoryOrderStore::new();
        let order = store
            .create(
                &NewOrder::new(
                    UserId::new(1),
                    vec![NewOrderItem::new(1u32, 1, Money::from_cents(100))],
                )
                .unwrap(),
            )
            .await
            .unwrap();
        let message = NewOutboxMessage::new(
            "order.cancelled",
            order.id,
            &serde_json::json!({"order_id": order.id}),
        )
        .unwrap();
        store
            .update_status(
                order.id,
                OrderStatus::Cancelled,
                UpdateOptions::new().with_outbox(message),
            )
            .await
            .unwrap();
        store
    }

    fn config(max_attempts: u32) -> DispatcherConfig {
        DispatcherConfig {
            poll_interval: Duration::from_millis(10),
            batch_size: 10,
            max_attempts,
        }
    }

    #[tokio::test]
    async fn test_dispatch_publishes_and_marks() {
        let store = store_with_pending_message().await;
        let publisher = InMemoryEventPublisher::new();
        let dispatcher = Dispatcher::new(store.clone(), publisher.clone(), config(3));

        let report = dispatcher.dispatch_pending().await.unwrap();
        assert_eq!(report, DispatchReport { published: 1, failed: 0 });
        assert_eq!(publisher.published_on("order.cancelled").len(), 1);

        // Nothing left on the second pass.
        let report = dispatcher.dispatch_pending().await.unwrap();
        assert_eq!(report, DispatchReport::default());
        assert!(store.outbox_messages().await[0].is_published());
    }

    #[tokio::test]
    async fn test_failed_messages_are_parked_after_max_attempts() {
        let store = store_with_pending_message().await;
        let publisher = InMemoryEventPublisher::new();
        publisher.set_fail_on_publish(true);
        let dispatcher = Dispatcher::new(store.clone(), publisher.clone(), config(2));

        assert_eq!(dispatcher.dispatch_pending().await.unwrap().failed, 1);
        assert_eq!(dispatcher.dispatch_pending().await.unwrap().failed, 1);
        assert_eq!(dispatcher.dispatch_pending().await.unwrap(), DispatchReport::default());

        let messages = store.outbox_messages().await;
        assert_eq!(messages[0].attempts, 2);
        assert!(!messages[0].is_published());
        assert_eq!(messages[0].aggregate_id, OrderId::new(1));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = store_with_pending_message().await;
        let publisher = InMemoryEventPublisher::new();
        let dispatcher = Dispatcher::new(store, publisher.clone(), config(3));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(dispatcher.run(rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(publisher.published().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_poll_interval_still_runs() {
        let store = store_with_pending_message().await;
        let publisher = InMemoryEventPublisher::new();
        let config = DispatcherConfig {
            poll_interval: Duration::ZERO,
            ..config(3)
        };
        let dispatcher = Dispatcher::new(store, publisher.clone(), config);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(dispatcher.run(rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(publisher.published().len(), 1);
    }
}

//! Background compensation for work the request path left unfinished.
//!
//! Each pass cancels orders whose reservation failed and retries queued
//! restocks.

use std::sync::Arc;
use std::time::Duration;

use domain::ReservationState;
use order_store::{OrderStore, OutboxStore, RestockQueue};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::dispatcher::MIN_INTERVAL;
use crate::error::{Result, SagaError};
use crate::order_saga::OrderSaga;
use crate::services::{EventPublisher, InventoryClient, UserDirectory};

/// Reconciler tuning.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub interval: Duration,
    pub batch_size: usize,
    /// Restock tasks that failed this many times are left alone.
    pub max_attempts: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            batch_size: 50,
            max_attempts: 10,
        }
    }
}

/// Result of one reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub orders_cancelled: usize,
    pub restocks_completed: usize,
    pub restocks_failed: usize,
}

pub struct Reconciler<S, I, P, U> {
    saga: Arc<OrderSaga<S, I, P, U>>,
    config: ReconcilerConfig,
}

impl<S, I, P, U> Reconciler<S, I, P, U>
where
    S: OrderStore + OutboxStore + RestockQueue,
    I: InventoryClient,
    P: EventPublisher,
    U: UserDirectory,
{
    pub fn new(saga: Arc<OrderSaga<S, I, P, U>>, config: ReconcilerConfig) -> Self {
        Self { saga, config }
    }

    /// Runs one pass over stuck orders and due restocks.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let stuck = self
            .saga
            .store()
            .find_pending_with_reservation(ReservationState::ReservationFailed, self.config.batch_size)
            .await?;

        for order in stuck {
            match self.saga.cancel_order(order.id).await {
                Ok(_) => {
                    tracing::info!(order_id = %order.id, "cancelled order with failed reservation");
                    report.orders_cancelled += 1;
                }
                Err(SagaError::AlreadyCancelled(_) | SagaError::Conflict(_)) => {
                    tracing::debug!(order_id = %order.id, "order changed underneath reconciler");
                }
                Err(error) => {
                    tracing::warn!(order_id = %order.id, %error, "failed to compensate order");
                }
            }
        }

        let tasks = self
            .saga
            .store()
            .due_restocks(self.config.batch_size, self.config.max_attempts)
            .await?;

        for task in tasks {
            match self
                .saga
                .inventory()
                .increase_inventory(task.product_id, task.quantity)
                .await
            {
                Ok(()) => {
                    if let Err(error) = self.saga.store().complete_restock(task.id).await {
                        tracing::error!(
                            key = %task.idempotency_key,
                            %error,
                            "restocked but could not complete task, it will be retried"
                        );
                        continue;
                    }
                    tracing::info!(key = %task.idempotency_key, "queued restock completed");
                    report.restocks_completed += 1;
                }
                Err(error) => {
                    metrics::counter!("restock_failures_total").increment(1);
                    if let Err(store_error) = self
                        .saga
                        .store()
                        .record_restock_failure(task.id, &error.to_string())
                        .await
                    {
                        tracing::error!(
                            key = %task.idempotency_key,
                            error = %store_error,
                            "failed to record restock failure"
                        );
                    }
                    tracing::warn!(
                        key = %task.idempotency_key,
                        product_id = %task.product_id,
                        attempts = task.attempts + 1,
                        %error,
                        "queued restock failed"
                    );
                    report.restocks_failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Runs passes until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval.max(MIN_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_ms = self.config.interval.as_millis() as u64, "reconciler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.reconcile_once().await {
                        tracing::error!(%error, "reconcile pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("reconciler stopped");
    }
}

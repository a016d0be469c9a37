//! The order saga: stock reservation on create, compensation on cancel.

use std::time::Instant;

use chrono::Utc;
use common::{OrderId, UserId};
use domain::{NewOrder, NewOrderItem, Order, OrderItem, OrderStatus, ReservationState};
use order_store::{
    NewOutboxMessage, NewRestockTask, OrderStore, OutboxId, OutboxStore, RestockQueue, StoreError,
    UpdateOptions,
};

use crate::error::{Result, SagaError};
use crate::events::OrderCancelled;
use crate::order_fulfillment::ORDER_CANCELLED_CHANNEL;
use crate::services::{EventPublisher, InventoryClient, UserDirectory};

/// Coordinates order persistence with the Product service and the broker.
///
/// There is no distributed transaction. Creation decrements stock item by
/// item after the order row is written and records how far it got;
/// cancellation writes the status and an outbox row together, then hands
/// stock back and publishes. Failures of those last two steps are logged
/// and queued for retry, never returned.
pub struct OrderSaga<S, I, P, U> {
    store: S,
    inventory: I,
    publisher: P,
    users: U,
    fallback_email: String,
}

impl<S, I, P, U> OrderSaga<S, I, P, U>
where
    S: OrderStore + OutboxStore + RestockQueue,
    I: InventoryClient,
    P: EventPublisher,
    U: UserDirectory,
{
    /// Creates a saga over explicit collaborators.
    pub fn new(store: S, inventory: I, publisher: P, users: U) -> Self {
        Self {
            store,
            inventory,
            publisher,
            users,
            fallback_email: String::new(),
        }
    }

    /// Sets the address put on cancellation events when the user lookup fails.
    pub fn with_fallback_email(mut self, email: impl Into<String>) -> Self {
        self.fallback_email = email.into();
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn inventory(&self) -> &I {
        &self.inventory
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Creates an order and reserves its stock.
    ///
    /// The order is persisted as `pending` before any stock call. Items are
    /// then decremented in list order, stopping at the first refusal. A
    /// refusal is returned as [`SagaError::Inventory`], but the order row and
    /// the decrements already made stay in place; the order is marked
    /// `reservation_failed` so the reconciler can compensate it.
    #[tracing::instrument(skip(self, items), fields(%user_id, items = items.len()))]
    pub async fn create_order(&self, user_id: UserId, items: Vec<NewOrderItem>) -> Result<Order> {
        let start = Instant::now();
        let new_order = NewOrder::new(user_id, items)?;

        let order = self.store.create(&new_order).await?;
        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(order_id = %order.id, total = %order.total_price, "order persisted");

        let mut reserved: u32 = 0;
        for item in &order.items {
            if let Err(source) = self
                .inventory
                .decrease_inventory(item.product_id, item.quantity)
                .await
            {
                metrics::counter!("inventory_reservation_failures_total").increment(1);
                tracing::warn!(
                    order_id = %order.id,
                    product_id = %item.product_id,
                    quantity = item.quantity,
                    reserved,
                    error = %source,
                    "stock reservation failed"
                );

                self.mark_reservation_failed(order.id, reserved).await;
                record_duration("create_order", start);
                return Err(SagaError::Inventory {
                    product_id: item.product_id,
                    source,
                });
            }

            reserved += 1;
            if let Err(error) = self
                .store
                .record_reservation(order.id, ReservationState::PendingReservation, reserved)
                .await
            {
                // A cancel that commits first only sees the items recorded
                // before it, so this one is ours to hand back.
                if matches!(error, StoreError::ReservationClosed(_)) {
                    self.restock_item(order.id, item).await;
                }
                record_duration("create_order", start);
                return Err(self.abandon_reservation(order.id, reserved, error).await);
            }
        }

        if let Err(error) = self
            .store
            .record_reservation(order.id, ReservationState::Reserved, reserved)
            .await
        {
            record_duration("create_order", start);
            return Err(self.abandon_reservation(order.id, reserved, error).await);
        }

        record_duration("create_order", start);
        tracing::info!(order_id = %order.id, "order created and stock reserved");

        Ok(self.store.get_by_id(order.id).await?)
    }

    /// Cancels a pending order, hands its stock back and notifies the user.
    ///
    /// Once the status write commits the call succeeds: restock failures are
    /// queued for retry and publish failures are left on the outbox for the
    /// dispatcher.
    #[tracing::instrument(skip(self), fields(%order_id))]
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<Order> {
        let start = Instant::now();
        let order = self.store.get_by_id(order_id).await?;

        if order.is_cancelled() {
            return Err(SagaError::AlreadyCancelled(order_id));
        }
        if !order.status.can_cancel() {
            return Err(SagaError::InvalidTransition {
                order_id,
                from: order.status,
                to: OrderStatus::Cancelled,
            });
        }

        let user_email = self.resolve_email(order.user_id).await;
        let event = OrderCancelled::new(order.id, order.user_id, user_email, Utc::now());
        let message = NewOutboxMessage::new(ORDER_CANCELLED_CHANNEL, order.id, &event)?;

        let update = match self
            .store
            .update_status(
                order_id,
                OrderStatus::Cancelled,
                UpdateOptions::expect_version(order.version).with_outbox(message),
            )
            .await
        {
            Ok(update) => update,
            Err(StoreError::VersionConflict { .. }) => {
                return Err(self.lost_cancel_race(order_id).await);
            }
            Err(error) => return Err(error.into()),
        };
        metrics::counter!("orders_cancelled_total").increment(1);

        // Reservation progress may have moved on since the order was loaded.
        let held = Order {
            reservation_state: update.reservation_state,
            reserved_items: update.reserved_items,
            ..order
        };
        self.release_stock(&held).await;

        if let Some(outbox_id) = update.outbox_id {
            self.publish_now(outbox_id, &event).await;
        }

        record_duration("cancel_order", start);
        tracing::info!("order cancelled");

        Ok(self.store.get_by_id(order_id).await?)
    }

    /// Writes a new status.
    ///
    /// Without `force` only `pending -> completed` changes anything; writing
    /// the current status again is a no-op and every other move is rejected.
    /// With `force` the status is overwritten unconditionally.
    #[tracing::instrument(skip(self), fields(%order_id, %status))]
    pub async fn update_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        force: bool,
    ) -> Result<Order> {
        let order = self.store.get_by_id(order_id).await?;

        if force {
            tracing::warn!(from = %order.status, to = %status, "forced status overwrite");
            self.store
                .update_status(order_id, status, UpdateOptions::new())
                .await?;
            return Ok(self.store.get_by_id(order_id).await?);
        }

        if !order.status.can_transition_to(status) {
            return Err(SagaError::InvalidTransition {
                order_id,
                from: order.status,
                to: status,
            });
        }
        if order.status == status {
            return Ok(order);
        }

        self.store
            .update_status(order_id, status, UpdateOptions::expect_version(order.version))
            .await?;

        Ok(self.store.get_by_id(order_id).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        Ok(self.store.get_by_id(order_id).await?)
    }

    /// Returns every order of a user; an empty list if there are none.
    #[tracing::instrument(skip(self))]
    pub async fn get_orders_by_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self.store.get_by_user(user_id).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_order_details(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        Ok(self.store.get_items(order_id).await?)
    }

    async fn resolve_email(&self, user_id: UserId) -> String {
        match self.users.email_for(user_id).await {
            Ok(email) => email,
            Err(error) => {
                tracing::warn!(%user_id, %error, "user email lookup failed, using fallback address");
                self.fallback_email.clone()
            }
        }
    }

    /// Classifies a lost version check on cancel.
    async fn lost_cancel_race(&self, order_id: OrderId) -> SagaError {
        match self.store.get_by_id(order_id).await {
            Ok(current) if current.is_cancelled() => SagaError::AlreadyCancelled(order_id),
            Ok(_) => SagaError::Conflict(order_id),
            Err(error) => error.into(),
        }
    }

    /// Hands back the stock the order still holds.
    ///
    /// Each failed increase is logged and queued under its idempotency key.
    async fn release_stock(&self, order: &Order) {
        if order.reservation_state == ReservationState::PendingReservation {
            tracing::warn!(
                order_id = %order.id,
                reserved_items = order.reserved_items,
                "cancelling order whose reservation never finished"
            );
        }

        for item in order.restockable_items() {
            self.restock_item(order.id, item).await;
        }

        if let Err(error) = self.store.release_reservation(order.id).await {
            tracing::error!(order_id = %order.id, %error, "failed to record stock release");
        }
    }

    /// Hands one item's stock back, queueing a retry if the increase fails.
    async fn restock_item(&self, order_id: OrderId, item: &OrderItem) {
        let Err(error) = self
            .inventory
            .increase_inventory(item.product_id, item.quantity)
            .await
        else {
            return;
        };

        metrics::counter!("restock_failures_total").increment(1);
        tracing::warn!(
            %order_id,
            product_id = %item.product_id,
            quantity = item.quantity,
            %error,
            "restock failed, queueing retry"
        );

        let task = NewRestockTask::for_item(
            order_id,
            item.id,
            item.product_id,
            item.quantity,
            error.to_string(),
        );
        if let Err(error) = self.store.enqueue_restock(task).await {
            tracing::error!(
                %order_id,
                product_id = %item.product_id,
                %error,
                "failed to queue restock"
            );
        }
    }

    /// Best-effort hand-off to the reconciler: marks the order
    /// `reservation_failed` with the items whose stock it holds.
    async fn mark_reservation_failed(&self, order_id: OrderId, reserved: u32) {
        if let Err(error) = self
            .store
            .record_reservation(order_id, ReservationState::ReservationFailed, reserved)
            .await
        {
            tracing::error!(%order_id, reserved, %error, "failed to record reservation failure");
        }
    }

    /// Classifies a reservation write that failed after `reserved` items
    /// were decremented.
    async fn abandon_reservation(
        &self,
        order_id: OrderId,
        reserved: u32,
        error: StoreError,
    ) -> SagaError {
        match error {
            StoreError::ReservationClosed(_) => {
                tracing::warn!(%order_id, reserved, "order cancelled while reserving stock");
                SagaError::AlreadyCancelled(order_id)
            }
            error => {
                tracing::error!(%order_id, reserved, %error, "failed to record reservation progress");
                self.mark_reservation_failed(order_id, reserved).await;
                error.into()
            }
        }
    }

    /// Tries to deliver the cancellation right away. The outbox row stays
    /// pending if this fails.
    async fn publish_now(&self, outbox_id: OutboxId, event: &OrderCancelled) {
        match self.publisher.publish_order_cancelled(event).await {
            Ok(()) => {
                metrics::counter!("events_published_total").increment(1);
                if let Err(error) = self.store.mark_published(outbox_id).await {
                    tracing::warn!(%outbox_id, %error, "published but could not mark outbox row");
                }
            }
            Err(error) => {
                metrics::counter!("event_publish_failures_total").increment(1);
                tracing::warn!(
                    order_id = %event.order_id,
                    %outbox_id,
                    %error,
                    "cancellation publish failed, left for dispatcher"
                );
                if let Err(error) = self
                    .store
                    .record_publish_failure(outbox_id, &error.to_string())
                    .await
                {
                    tracing::error!(%outbox_id, %error, "failed to record publish failure");
                }
            }
        }
    }
}

fn record_duration(operation: &'static str, start: Instant) {
    metrics::histogram!("saga_duration_seconds", "operation" => operation)
        .record(start.elapsed().as_secs_f64());
}

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, OrderItemId, UserId};
use domain::{NewOrder, Order, OrderItem, OrderStatus, ReservationState, Version};
use tokio::sync::RwLock;

use crate::{
    NewOutboxMessage, NewRestockTask, OutboxId, OutboxMessage, RestockId, RestockTask, Result,
    StoreError,
    store::{OrderStore, OutboxStore, RestockQueue, StatusUpdate, UpdateOptions},
};

#[derive(Debug, Default)]
struct InMemoryState {
    orders: BTreeMap<OrderId, Order>,
    next_order_id: u32,
    next_item_id: u32,
    outbox: Vec<OutboxMessage>,
    restocks: Vec<RestockTask>,
    fail_on_create: bool,
    fail_on_update_status: bool,
    fail_on_reservation: Option<ReservationState>,
    fail_on_complete_restock: bool,
}

/// In-memory order store for testing and local development.
///
/// Provides the same interface as the PostgreSQL implementation, with
/// switches to make writes fail.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns a copy of every outbox row.
    pub async fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.state.read().await.outbox.clone()
    }

    /// Returns a copy of every queued restock.
    pub async fn restock_tasks(&self) -> Vec<RestockTask> {
        self.state.read().await.restocks.clone()
    }

    /// Makes subsequent `create` calls fail.
    pub async fn set_fail_on_create(&self, fail: bool) {
        self.state.write().await.fail_on_create = fail;
    }

    /// Makes subsequent `update_status` calls fail.
    pub async fn set_fail_on_update_status(&self, fail: bool) {
        self.state.write().await.fail_on_update_status = fail;
    }

    /// Makes subsequent `complete_restock` calls fail.
    pub async fn set_fail_on_complete_restock(&self, fail: bool) {
        self.state.write().await.fail_on_complete_restock = fail;
    }

    /// Makes `record_reservation` fail for writes of `state`; `None` clears it.
    pub async fn set_fail_on_reservation(&self, state: Option<ReservationState>) {
        self.state.write().await.fail_on_reservation = state;
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn get_by_id(&self, order_id: OrderId) -> Result<Order> {
        self.state
            .read()
            .await
            .orders
            .get(&order_id)
            .cloned()
            .ok_or(StoreError::OrderNotFound(order_id))
    }

    async fn get_by_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn create(&self, order: &NewOrder) -> Result<Order> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        if state.fail_on_create {
            return Err(StoreError::Unavailable("order insert rejected".to_string()));
        }

        state.next_order_id += 1;
        let order_id = OrderId::new(state.next_order_id);
        let now = Utc::now();

        let mut items = Vec::with_capacity(order.lines().len());
        for line in order.lines() {
            state.next_item_id += 1;
            items.push(OrderItem {
                id: OrderItemId::new(state.next_item_id),
                order_id,
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
            });
        }

        let stored = Order {
            id: order_id,
            user_id: order.user_id(),
            total_price: order.total_price(),
            status: OrderStatus::Pending,
            reservation_state: ReservationState::PendingReservation,
            reserved_items: 0,
            version: Version::first(),
            items,
            created_at: now,
            updated_at: now,
        };
        state.orders.insert(order_id, stored.clone());

        Ok(stored)
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        options: UpdateOptions,
    ) -> Result<StatusUpdate> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        if state.fail_on_update_status {
            return Err(StoreError::Unavailable("status update rejected".to_string()));
        }

        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;

        if let Some(expected) = options.expected_version
            && order.version != expected
        {
            return Err(StoreError::VersionConflict {
                order_id,
                expected,
                actual: order.version,
            });
        }

        let now = Utc::now();
        order.status = status;
        order.version = order.version.next();
        order.updated_at = now;
        let version = order.version;

        let outbox_id = options.outbox.map(|message| {
            let id = OutboxId::new(state.outbox.len() as i64 + 1);
            state.outbox.push(OutboxMessage {
                id,
                channel: message.channel,
                aggregate_id: message.aggregate_id,
                payload: message.payload,
                created_at: now,
                published_at: None,
                attempts: 0,
                last_error: None,
            });
            id
        });

        Ok(StatusUpdate {
            version,
            outbox_id,
            reservation_state: order.reservation_state,
            reserved_items: order.reserved_items,
        })
    }

    async fn get_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .get(&order_id)
            .map(|o| o.items.clone())
            .unwrap_or_default())
    }

    async fn record_reservation(
        &self,
        order_id: OrderId,
        reservation_state: ReservationState,
        reserved_items: u32,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_reservation == Some(reservation_state) {
            return Err(StoreError::Unavailable("reservation write rejected".to_string()));
        }

        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        if order.is_cancelled() || !order.reservation_state.holds_stock() {
            return Err(StoreError::ReservationClosed(order_id));
        }

        order.reservation_state = reservation_state;
        order.reserved_items = reserved_items;
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn release_reservation(&self, order_id: OrderId) -> Result<()> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        order.reservation_state = ReservationState::Released;
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn find_pending_with_reservation(
        &self,
        reservation_state: ReservationState,
        limit: usize,
    ) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .filter(|o| {
                o.status == OrderStatus::Pending && o.reservation_state == reservation_state
            })
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOrderStore {
    async fn get_message(&self, id: OutboxId) -> Result<OutboxMessage> {
        self.state
            .read()
            .await
            .outbox
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or(StoreError::OutboxMessageNotFound(id))
    }

    async fn pending_messages(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxMessage>> {
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|m| !m.is_published() && m.attempts < max_attempts)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, id: OutboxId) -> Result<()> {
        let mut state = self.state.write().await;
        let message = state
            .outbox
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(StoreError::OutboxMessageNotFound(id))?;
        message.published_at = Some(Utc::now());
        Ok(())
    }

    async fn record_publish_failure(&self, id: OutboxId, error: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let message = state
            .outbox
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(StoreError::OutboxMessageNotFound(id))?;
        message.attempts += 1;
        message.last_error = Some(error.to_string());
        Ok(())
    }
}

#[async_trait]
impl RestockQueue for InMemoryOrderStore {
    async fn enqueue_restock(&self, task: NewRestockTask) -> Result<bool> {
        let mut state = self.state.write().await;
        if state
            .restocks
            .iter()
            .any(|t| t.idempotency_key == task.idempotency_key)
        {
            return Ok(false);
        }

        let id = RestockId::new(state.restocks.len() as i64 + 1);
        state.restocks.push(RestockTask {
            id,
            idempotency_key: task.idempotency_key,
            order_id: task.order_id,
            product_id: task.product_id,
            quantity: task.quantity,
            attempts: 1,
            last_error: Some(task.error),
            created_at: Utc::now(),
            completed_at: None,
        });
        Ok(true)
    }

    async fn due_restocks(&self, limit: usize, max_attempts: u32) -> Result<Vec<RestockTask>> {
        let state = self.state.read().await;
        Ok(state
            .restocks
            .iter()
            .filter(|t| t.completed_at.is_none() && t.attempts < max_attempts)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn complete_restock(&self, id: RestockId) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_complete_restock {
            return Err(StoreError::Unavailable("restock completion rejected".to_string()));
        }
        let task = state
            .restocks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(StoreError::RestockTaskNotFound(id))?;
        task.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn record_restock_failure(&self, id: RestockId, error: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let task = state
            .restocks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(StoreError::RestockTaskNotFound(id))?;
        task.attempts += 1;
        task.last_error = Some(error.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::{OrderItemId, ProductId};
    use domain::{Money, NewOrderItem};

    use super::*;

    fn new_order(user: u32) -> NewOrder {
        NewOrder::new(
            UserId::new(user),
            vec![
                NewOrderItem::new(1, 2, Money::from_cents(99999)),
                NewOrderItem::new(2, 1, Money::from_cents(500)),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_assigns_ids_and_pending_status() {
        let store = InMemoryOrderStore::new();
        let order = store.create(&new_order(1)).await.unwrap();

        assert_eq!(order.id, OrderId::new(1));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.reservation_state, ReservationState::PendingReservation);
        assert_eq!(order.version, Version::first());
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.items[0].id, OrderItemId::new(1));
        assert_eq!(order.items[1].order_id, order.id);
        assert_eq!(order.total_price, Money::from_cents(199998 + 500));
    }

    #[tokio::test]
    async fn get_by_id_missing_is_not_found() {
        let store = InMemoryOrderStore::new();
        let result = store.get_by_id(OrderId::new(99)).await;
        assert!(matches!(result, Err(StoreError::OrderNotFound(_))));
    }

    #[tokio::test]
    async fn get_by_user_returns_empty_for_unknown_user() {
        let store = InMemoryOrderStore::new();
        store.create(&new_order(1)).await.unwrap();
        store.create(&new_order(1)).await.unwrap();
        store.create(&new_order(2)).await.unwrap();

        assert_eq!(store.get_by_user(UserId::new(1)).await.unwrap().len(), 2);
        assert!(store.get_by_user(UserId::new(3)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_status_bumps_version() {
        let store = InMemoryOrderStore::new();
        let order = store.create(&new_order(1)).await.unwrap();

        let update = store
            .update_status(order.id, OrderStatus::Completed, UpdateOptions::new())
            .await
            .unwrap();

        assert_eq!(update.version, Version::new(2));
        assert_eq!(update.outbox_id, None);
        let reloaded = store.get_by_id(order.id).await.unwrap();
        assert_eq!(reloaded.status, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn stale_expected_version_conflicts() {
        let store = InMemoryOrderStore::new();
        let order = store.create(&new_order(1)).await.unwrap();

        store
            .update_status(
                order.id,
                OrderStatus::Completed,
                UpdateOptions::expect_version(order.version),
            )
            .await
            .unwrap();

        let result = store
            .update_status(
                order.id,
                OrderStatus::Cancelled,
                UpdateOptions::expect_version(order.version),
            )
            .await;
        assert!(matches!(result, Err(StoreError::VersionConflict { .. })));
        assert_eq!(
            store.get_by_id(order.id).await.unwrap().status,
            OrderStatus::Completed
        );
    }

    #[tokio::test]
    async fn conflicting_update_writes_no_outbox_row() {
        let store = InMemoryOrderStore::new();
        let order = store.create(&new_order(1)).await.unwrap();
        let message =
            NewOutboxMessage::new("order.cancelled", order.id, &serde_json::json!({})).unwrap();

        let result = store
            .update_status(
                order.id,
                OrderStatus::Cancelled,
                UpdateOptions::expect_version(Version::new(5)).with_outbox(message),
            )
            .await;

        assert!(result.is_err());
        assert!(store.outbox_messages().await.is_empty());
    }

    #[tokio::test]
    async fn outbox_lifecycle() {
        let store = InMemoryOrderStore::new();
        let order = store.create(&new_order(1)).await.unwrap();
        let message =
            NewOutboxMessage::new("order.cancelled", order.id, &serde_json::json!({"a": 1}))
                .unwrap();

        let update = store
            .update_status(
                order.id,
                OrderStatus::Cancelled,
                UpdateOptions::new().with_outbox(message),
            )
            .await
            .unwrap();
        let outbox_id = update.outbox_id.unwrap();

        store
            .record_publish_failure(outbox_id, "broker down")
            .await
            .unwrap();
        let pending = store.pending_messages(10, 3).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);

        store.mark_published(outbox_id).await.unwrap();
        assert!(store.pending_messages(10, 3).await.unwrap().is_empty());
        assert!(store.get_message(outbox_id).await.unwrap().is_published());
    }

    #[tokio::test]
    async fn exhausted_outbox_rows_are_parked() {
        let store = InMemoryOrderStore::new();
        let order = store.create(&new_order(1)).await.unwrap();
        let message =
            NewOutboxMessage::new("order.cancelled", order.id, &serde_json::json!({})).unwrap();
        let id = store
            .update_status(
                order.id,
                OrderStatus::Cancelled,
                UpdateOptions::new().with_outbox(message),
            )
            .await
            .unwrap()
            .outbox_id
            .unwrap();

        for _ in 0..2 {
            store.record_publish_failure(id, "down").await.unwrap();
        }
        assert!(store.pending_messages(10, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_reservation_and_find() {
        let store = InMemoryOrderStore::new();
        let a = store.create(&new_order(1)).await.unwrap();
        let b = store.create(&new_order(1)).await.unwrap();

        store
            .record_reservation(a.id, ReservationState::ReservationFailed, 1)
            .await
            .unwrap();
        store
            .record_reservation(b.id, ReservationState::Reserved, 2)
            .await
            .unwrap();

        let stuck = store
            .find_pending_with_reservation(ReservationState::ReservationFailed, 10)
            .await
            .unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].id, a.id);
        assert_eq!(stuck[0].reserved_items, 1);
    }

    #[tokio::test]
    async fn restock_enqueue_is_idempotent() {
        let store = InMemoryOrderStore::new();
        let task = NewRestockTask::for_item(
            OrderId::new(1),
            OrderItemId::new(1),
            ProductId::new(1),
            2,
            "timeout",
        );

        assert!(store.enqueue_restock(task.clone()).await.unwrap());
        assert!(!store.enqueue_restock(task).await.unwrap());

        let due = store.due_restocks(10, 5).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].attempts, 1);

        store.complete_restock(due[0].id).await.unwrap();
        assert!(store.due_restocks(10, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_create_failure() {
        let store = InMemoryOrderStore::new();
        store.set_fail_on_create(true).await;
        assert!(matches!(
            store.create(&new_order(1)).await,
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn status_write_reports_reservation_progress() {
        let store = InMemoryOrderStore::new();
        let order = store.create(&new_order(1)).await.unwrap();
        store
            .record_reservation(order.id, ReservationState::PendingReservation, 1)
            .await
            .unwrap();

        let update = store
            .update_status(
                order.id,
                OrderStatus::Cancelled,
                UpdateOptions::expect_version(order.version),
            )
            .await
            .unwrap();

        assert_eq!(update.reservation_state, ReservationState::PendingReservation);
        assert_eq!(update.reserved_items, 1);
    }

    #[tokio::test]
    async fn reservation_is_closed_once_cancelled_or_released() {
        let store = InMemoryOrderStore::new();
        let cancelled = store.create(&new_order(1)).await.unwrap();
        store
            .update_status(cancelled.id, OrderStatus::Cancelled, UpdateOptions::new())
            .await
            .unwrap();

        assert!(matches!(
            store
                .record_reservation(cancelled.id, ReservationState::Reserved, 2)
                .await,
            Err(StoreError::ReservationClosed(_))
        ));
        assert_eq!(store.get_by_id(cancelled.id).await.unwrap().reserved_items, 0);

        let released = store.create(&new_order(1)).await.unwrap();
        store
            .record_reservation(released.id, ReservationState::PendingReservation, 1)
            .await
            .unwrap();
        store.release_reservation(released.id).await.unwrap();

        assert!(matches!(
            store
                .record_reservation(released.id, ReservationState::Reserved, 2)
                .await,
            Err(StoreError::ReservationClosed(_))
        ));
        let reloaded = store.get_by_id(released.id).await.unwrap();
        assert_eq!(reloaded.reservation_state, ReservationState::Released);
        assert_eq!(reloaded.reserved_items, 1);
    }
}

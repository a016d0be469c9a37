use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::{NewOrder, Order, OrderItem, OrderStatus, ReservationState, Version};

use crate::{
    NewOutboxMessage, NewRestockTask, OutboxId, OutboxMessage, RestockId, RestockTask, Result,
};

/// Options for a status write.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Expected version of the order for optimistic concurrency control.
    /// If None, the write is an unconditional overwrite.
    pub expected_version: Option<Version>,

    /// Event to record in the outbox within the same transaction.
    pub outbox: Option<NewOutboxMessage>,
}

impl UpdateOptions {
    /// Creates options for an unconditional overwrite.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options expecting the order to be at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
            outbox: None,
        }
    }

    /// Adds an outbox message that commits or rolls back with the write.
    pub fn with_outbox(mut self, message: NewOutboxMessage) -> Self {
        self.outbox = Some(message);
        self
    }
}

/// Outcome of a successful status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate {
    /// The order's version after the write.
    pub version: Version,
    /// The outbox row written alongside, if one was requested.
    pub outbox_id: Option<OutboxId>,
    /// Reservation progress as it stood when the write committed.
    pub reservation_state: ReservationState,
    pub reserved_items: u32,
}

/// Persistence for orders and their items.
///
/// No concurrency control is applied beyond the single-row atomicity of the
/// backing store, except where callers opt into a version check through
/// [`UpdateOptions::expect_version`].
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Loads an order with its items.
    ///
    /// Fails with `OrderNotFound` if absent.
    async fn get_by_id(&self, order_id: OrderId) -> Result<Order>;

    /// Loads every order owned by a user, oldest first.
    ///
    /// Returns an empty vec, not an error, if the user has no orders.
    async fn get_by_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Inserts the order and all of its items as one unit, with status
    /// `pending` and reservation state `pending_reservation`.
    ///
    /// Returns the stored order including generated ids.
    async fn create(&self, order: &NewOrder) -> Result<Order>;

    /// Overwrites the status field.
    ///
    /// Does not judge whether the transition is legal; that belongs to the
    /// caller. Fails with `VersionConflict` when `options.expected_version`
    /// is set and stale.
    async fn update_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        options: UpdateOptions,
    ) -> Result<StatusUpdate>;

    /// Loads the items of an order in insertion order.
    async fn get_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>>;

    /// Records how far stock reservation has progressed.
    ///
    /// Only applies while the order is still reserving: once it is cancelled
    /// or its stock released this fails with `ReservationClosed` and writes
    /// nothing.
    async fn record_reservation(
        &self,
        order_id: OrderId,
        state: ReservationState,
        reserved_items: u32,
    ) -> Result<()>;

    /// Marks the order's stock as handed back, keeping `reserved_items`.
    async fn release_reservation(&self, order_id: OrderId) -> Result<()>;

    /// Finds `pending` orders whose reservation is in `state`, oldest first.
    async fn find_pending_with_reservation(
        &self,
        state: ReservationState,
        limit: usize,
    ) -> Result<Vec<Order>>;
}

/// Relay-side access to outbox rows.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Loads one outbox row.
    async fn get_message(&self, id: OutboxId) -> Result<OutboxMessage>;

    /// Returns unpublished rows with fewer than `max_attempts` failures,
    /// in insertion order.
    async fn pending_messages(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxMessage>>;

    /// Marks a row as delivered to the broker.
    async fn mark_published(&self, id: OutboxId) -> Result<()>;

    /// Counts a failed publish attempt.
    async fn record_publish_failure(&self, id: OutboxId, error: &str) -> Result<()>;
}

/// Retry queue for stock releases that failed during cancellation.
#[async_trait]
pub trait RestockQueue: Send + Sync {
    /// Queues a restock. Returns false if a task with the same idempotency
    /// key already exists.
    async fn enqueue_restock(&self, task: NewRestockTask) -> Result<bool>;

    /// Returns incomplete tasks with fewer than `max_attempts` failures.
    async fn due_restocks(&self, limit: usize, max_attempts: u32) -> Result<Vec<RestockTask>>;

    /// Marks a task as done.
    async fn complete_restock(&self, id: RestockId) -> Result<()>;

    /// Counts a failed retry.
    async fn record_restock_failure(&self, id: RestockId, error: &str) -> Result<()>;
}

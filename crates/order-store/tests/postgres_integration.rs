//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p order-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use common::{OrderId, ProductId, UserId};
use domain::{Money, NewOrder, NewOrderItem, OrderStatus, ReservationState, Version};
use order_store::{
    NewOutboxMessage, NewRestockTask, OrderStore, OutboxStore, PostgresOrderStore, RestockQueue,
    StoreError, UpdateOptions,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/001_create_orders.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresOrderStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE order_details, orders, outbox, restock_tasks RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await
        .unwrap();

    PostgresOrderStore::new(pool)
}

fn two_line_order(user: u32) -> NewOrder {
    NewOrder::new(
        UserId::new(user),
        vec![
            NewOrderItem::new(1u32, 2, Money::from_cents(999)),
            NewOrderItem::new(2u32, 1, Money::from_cents(2500)),
        ],
    )
    .unwrap()
}

#[tokio::test]
#[serial]
async fn create_and_load_order() {
    let store = get_test_store().await;

    let created = store.create(&two_line_order(42)).await.unwrap();
    assert_eq!(created.status, OrderStatus::Pending);
    assert_eq!(created.reservation_state, ReservationState::PendingReservation);
    assert_eq!(created.version, Version::first());
    assert_eq!(created.total_price, Money::from_cents(4498));
    assert_eq!(created.items.len(), 2);

    let loaded = store.get_by_id(created.id).await.unwrap();
    assert_eq!(loaded.id, created.id);
    assert_eq!(loaded.user_id, UserId::new(42));
    assert_eq!(loaded.total_price, Money::from_cents(4498));
    assert_eq!(loaded.items, created.items);
}

#[tokio::test]
#[serial]
async fn missing_order_is_not_found() {
    let store = get_test_store().await;

    let result = store.get_by_id(OrderId::new(999)).await;
    assert!(matches!(result, Err(StoreError::OrderNotFound(_))));
}

#[tokio::test]
#[serial]
async fn get_by_user_returns_all_orders_with_items() {
    let store = get_test_store().await;

    store.create(&two_line_order(7)).await.unwrap();
    store.create(&two_line_order(7)).await.unwrap();
    store.create(&two_line_order(8)).await.unwrap();

    let orders = store.get_by_user(UserId::new(7)).await.unwrap();
    assert_eq!(orders.len(), 2);
    assert!(orders.iter().all(|o| o.items.len() == 2));
    assert!(orders[0].id < orders[1].id);

    let none = store.get_by_user(UserId::new(9)).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
#[serial]
async fn soft_deleted_orders_are_invisible() {
    let store = get_test_store().await;
    let order = store.create(&two_line_order(1)).await.unwrap();

    sqlx::query("UPDATE orders SET deleted_at = NOW() WHERE id = $1")
        .bind(order.id.as_i64())
        .execute(store.pool())
        .await
        .unwrap();

    assert!(matches!(
        store.get_by_id(order.id).await,
        Err(StoreError::OrderNotFound(_))
    ));
    assert!(store.get_by_user(UserId::new(1)).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn update_status_bumps_version() {
    let store = get_test_store().await;
    let order = store.create(&two_line_order(1)).await.unwrap();

    let update = store
        .update_status(
            order.id,
            OrderStatus::Completed,
            UpdateOptions::expect_version(order.version),
        )
        .await
        .unwrap();
    assert_eq!(update.version, Version::new(2));
    assert!(update.outbox_id.is_none());

    let loaded = store.get_by_id(order.id).await.unwrap();
    assert_eq!(loaded.status, OrderStatus::Completed);
    assert_eq!(loaded.version, Version::new(2));
}

#[tokio::test]
#[serial]
async fn stale_version_conflicts_and_writes_nothing() {
    let store = get_test_store().await;
    let order = store.create(&two_line_order(1)).await.unwrap();

    store
        .update_status(order.id, OrderStatus::Completed, UpdateOptions::new())
        .await
        .unwrap();

    let message =
        NewOutboxMessage::new("order.cancelled", order.id, &serde_json::json!({"x": 1})).unwrap();
    let result = store
        .update_status(
            order.id,
            OrderStatus::Cancelled,
            UpdateOptions::expect_version(order.version).with_outbox(message),
        )
        .await;

    match result {
        Err(StoreError::VersionConflict {
            expected, actual, ..
        }) => {
            assert_eq!(expected, Version::first());
            assert_eq!(actual, Version::new(2));
        }
        other => panic!("expected version conflict, got {other:?}"),
    }

    let loaded = store.get_by_id(order.id).await.unwrap();
    assert_eq!(loaded.status, OrderStatus::Completed);
    assert!(store.pending_messages(10, 10).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn update_status_on_missing_order_is_not_found() {
    let store = get_test_store().await;

    let result = store
        .update_status(
            OrderId::new(404),
            OrderStatus::Cancelled,
            UpdateOptions::expect_version(Version::first()),
        )
        .await;
    assert!(matches!(result, Err(StoreError::OrderNotFound(_))));
}

#[tokio::test]
#[serial]
async fn outbox_row_commits_with_status_change() {
    let store = get_test_store().await;
    let order = store.create(&two_line_order(3)).await.unwrap();

    let payload = serde_json::json!({"order_id": order.id, "status": "CANCELLED"});
    let message = NewOutboxMessage::new("order.cancelled", order.id, &payload).unwrap();
    let update = store
        .update_status(
            order.id,
            OrderStatus::Cancelled,
            UpdateOptions::new().with_outbox(message),
        )
        .await
        .unwrap();

    let outbox_id = update.outbox_id.unwrap();
    let pending = store.pending_messages(10, 5).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, outbox_id);
    assert_eq!(pending[0].payload, payload);

    store
        .record_publish_failure(outbox_id, "broker down")
        .await
        .unwrap();
    let failed = store.get_message(outbox_id).await.unwrap();
    assert_eq!(failed.attempts, 1);
    assert_eq!(failed.last_error.as_deref(), Some("broker down"));

    store.mark_published(outbox_id).await.unwrap();
    assert!(store.get_message(outbox_id).await.unwrap().is_published());
    assert!(store.pending_messages(10, 5).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn reservation_progress_is_queryable() {
    let store = get_test_store().await;
    let ok = store.create(&two_line_order(1)).await.unwrap();
    let failed = store.create(&two_line_order(1)).await.unwrap();

    store
        .record_reservation(ok.id, ReservationState::Reserved, 2)
        .await
        .unwrap();
    store
        .record_reservation(failed.id, ReservationState::ReservationFailed, 1)
        .await
        .unwrap();

    let stuck = store
        .find_pending_with_reservation(ReservationState::ReservationFailed, 10)
        .await
        .unwrap();
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].id, failed.id);
    assert_eq!(stuck[0].reserved_items, 1);
    assert_eq!(stuck[0].items.len(), 2);
}

#[tokio::test]
#[serial]
async fn restock_enqueue_is_idempotent() {
    let store = get_test_store().await;
    let order = store.create(&two_line_order(1)).await.unwrap();
    let item = &order.items[0];

    let task = || {
        NewRestockTask::for_item(order.id, item.id, ProductId::new(1), 2, "connection refused")
    };

    assert!(store.enqueue_restock(task()).await.unwrap());
    assert!(!store.enqueue_restock(task()).await.unwrap());

    let due = store.due_restocks(10, 5).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].attempts, 1);
    assert_eq!(due[0].quantity, 2);

    store
        .record_restock_failure(due[0].id, "still down")
        .await
        .unwrap();
    assert!(store.due_restocks(10, 2).await.unwrap().is_empty());

    store.complete_restock(due[0].id).await.unwrap();
    assert!(store.due_restocks(10, 5).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn reservation_writes_stop_once_order_is_cancelled() {
    let store = get_test_store().await;
    let order = store.create(&two_line_order(1)).await.unwrap();
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

    let late = store
        .record_reservation(order.id, ReservationState::Reserved, 2)
        .await;
    assert!(matches!(late, Err(StoreError::ReservationClosed(_))));

    store.release_reservation(order.id).await.unwrap();
    let reloaded = store.get_by_id(order.id).await.unwrap();
    assert_eq!(reloaded.reservation_state, ReservationState::Released);
    assert_eq!(reloaded.reserved_items, 1);

    let missing = store
        .record_reservation(OrderId::new(999), ReservationState::Reserved, 1)
        .await;
    assert!(matches!(missing, Err(StoreError::OrderNotFound(_))));
}

//! PostgreSQL integration tests for the stock table, NOTIFY publishing and
//! the saga running on the Postgres stack.
//!
//! Run with:
//!
//! ```bash
//! cargo test -p saga --test postgres_inventory -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use common::{ProductId, UserId};
use domain::{Money, NewOrderItem, OrderStatus};
use futures_util::future::join_all;
use order_store::{OutboxStore, PostgresOrderStore};
use saga::order_fulfillment::ORDER_CANCELLED_CHANNEL;
use saga::{
    EventPublisher, InMemoryUserDirectory, InventoryClient, InventoryError, OrderSaga,
    PgNotifyPublisher, PostgresInventory,
};
use serial_test::serial;
use sqlx::PgPool;
use sqlx::postgres::{PgListener, PgPoolOptions};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

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
            sqlx::raw_sql(include_str!("../../../migrations/002_create_inventories.sql"))
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

async fn get_test_pool() -> PgPool {
    let info = get_container_info().await;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE order_details, orders, outbox, restock_tasks, inventories RESTART IDENTITY CASCADE",
    )
    .execute(&pool)
    .await
    .unwrap();

    pool
}

#[tokio::test]
#[serial]
async fn decrease_and_increase_adjust_stock() {
    let inventory = PostgresInventory::new(get_test_pool().await);
    let product = ProductId::new(1);
    inventory.set_stock(product, 10).await.unwrap();

    inventory.decrease_inventory(product, 4).await.unwrap();
    assert_eq!(inventory.stock(product).await.unwrap(), Some(6));

    inventory.increase_inventory(product, 4).await.unwrap();
    assert_eq!(inventory.stock(product).await.unwrap(), Some(10));
}

#[tokio::test]
#[serial]
async fn decrease_refuses_to_oversell_and_reports_missing_products() {
    let inventory = PostgresInventory::new(get_test_pool().await);
    inventory.set_stock(ProductId::new(1), 1).await.unwrap();

    assert_eq!(
        inventory.decrease_inventory(ProductId::new(1), 2).await,
        Err(InventoryError::InsufficientStock {
            product_id: ProductId::new(1),
            requested: 2
        })
    );
    assert_eq!(inventory.stock(ProductId::new(1)).await.unwrap(), Some(1));

    assert_eq!(
        inventory.decrease_inventory(ProductId::new(2), 1).await,
        Err(InventoryError::ProductNotFound(ProductId::new(2)))
    );
    assert_eq!(
        inventory.increase_inventory(ProductId::new(2), 1).await,
        Err(InventoryError::ProductNotFound(ProductId::new(2)))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn concurrent_decrements_never_exceed_stock() {
    let inventory = PostgresInventory::new(get_test_pool().await);
    let product = ProductId::new(7);
    inventory.set_stock(product, 10).await.unwrap();

    let calls = (0..40).map(|_| {
        let inventory = inventory.clone();
        tokio::spawn(async move { inventory.decrease_inventory(product, 1).await })
    });
    let successes = join_all(calls)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(()))))
        .count();

    assert_eq!(successes, 10);
    assert_eq!(inventory.stock(product).await.unwrap(), Some(0));
}

#[tokio::test]
#[serial]
async fn pg_notify_reaches_listeners() {
    let pool = get_test_pool().await;
    let mut listener = PgListener::connect_with(&pool).await.unwrap();
    listener.listen(ORDER_CANCELLED_CHANNEL).await.unwrap();

    let publisher = PgNotifyPublisher::new(pool);
    let payload = serde_json::json!({"order_id": 5, "status": "CANCELLED"});
    publisher
        .publish(ORDER_CANCELLED_CHANNEL, &payload)
        .await
        .unwrap();

    let notification = tokio::time::timeout(Duration::from_secs(5), listener.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notification.channel(), ORDER_CANCELLED_CHANNEL);
    let received: serde_json::Value = serde_json::from_str(notification.payload()).unwrap();
    assert_eq!(received, payload);
}

#[tokio::test]
#[serial]
async fn saga_round_trip_on_postgres() {
    let pool = get_test_pool().await;
    let store = PostgresOrderStore::new(pool.clone());
    let inventory = PostgresInventory::new(pool.clone());
    inventory.set_stock(ProductId::new(1), 100).await.unwrap();

    let mut listener = PgListener::connect_with(&pool).await.unwrap();
    listener.listen(ORDER_CANCELLED_CHANNEL).await.unwrap();

    let saga = OrderSaga::new(
        store.clone(),
        inventory.clone(),
        PgNotifyPublisher::new(pool.clone()),
        InMemoryUserDirectory::with_fallback("user@example.com"),
    );

    let order = saga
        .create_order(
            UserId::new(1),
            vec![NewOrderItem::new(1u32, 2, Money::from_cents(99999))],
        )
        .await
        .unwrap();
    assert_eq!(order.total_price, Money::from_cents(199998));
    assert_eq!(inventory.stock(ProductId::new(1)).await.unwrap(), Some(98));

    let cancelled = saga.cancel_order(order.id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(inventory.stock(ProductId::new(1)).await.unwrap(), Some(100));

    let notification = tokio::time::timeout(Duration::from_secs(5), listener.recv())
        .await
        .unwrap()
        .unwrap();
    let received: serde_json::Value = serde_json::from_str(notification.payload()).unwrap();
    assert_eq!(received["order_id"], order.id.get());
    assert_eq!(received["user_email"], "user@example.com");

    assert!(store.pending_messages(10, 10).await.unwrap().is_empty());
}

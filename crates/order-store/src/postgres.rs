use std::collections::HashMap;
use std::num::TryFromIntError;

use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::{Money, NewOrder, Order, OrderItem, OrderStatus, ReservationState, Version};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    NewOutboxMessage, NewRestockTask, OutboxId, OutboxMessage, RestockId, RestockTask, Result,
    StoreError,
    store::{OrderStore, OutboxStore, RestockQueue, StatusUpdate, UpdateOptions},
};

const ORDER_COLUMNS: &str = "id, user_id, total_price, status, reservation_state, reserved_items, version, created_at, updated_at";
const ITEM_COLUMNS: &str = "id, order_id, product_id, quantity, unit_price";
const OUTBOX_COLUMNS: &str =
    "id, channel, aggregate_id, payload, created_at, published_at, attempts, last_error";
const RESTOCK_COLUMNS: &str = "id, idempotency_key, order_id, product_id, quantity, attempts, last_error, created_at, completed_at";

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    /// Explains a reservation write that matched no row.
    async fn missing_or_closed(&self, order_id: OrderId) -> StoreError {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM orders WHERE id = $1 AND deleted_at IS NULL)",
        )
        .bind(order_id.as_i64())
        .fetch_one(&self.pool)
        .await;

        match exists {
            Ok(true) => StoreError::ReservationClosed(order_id),
            Ok(false) => StoreError::OrderNotFound(order_id),
            Err(error) => error.into(),
        }
    }

    fn row_to_item(row: &PgRow) -> Result<OrderItem> {
        Ok(OrderItem {
            id: column_id(row, "id")?,
            order_id: column_id(row, "order_id")?,
            product_id: column_id(row, "product_id")?,
            quantity: column_u32(row, "quantity")?,
            unit_price: Money::new(row.try_get::<Decimal, _>("unit_price")?),
        })
    }

    fn row_to_order(row: &PgRow, items: Vec<OrderItem>) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let reservation_state: String = row.try_get("reservation_state")?;

        Ok(Order {
            id: column_id(row, "id")?,
            user_id: column_id(row, "user_id")?,
            total_price: Money::new(row.try_get::<Decimal, _>("total_price")?),
            status: status
                .parse()
                .map_err(|e: domain::OrderError| StoreError::InvalidRow(e.to_string()))?,
            reservation_state: reservation_state
                .parse()
                .map_err(|e: domain::OrderError| StoreError::InvalidRow(e.to_string()))?,
            reserved_items: column_u32(row, "reserved_items")?,
            version: Version::new(row.try_get("version")?),
            items,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_outbox(row: &PgRow) -> Result<OutboxMessage> {
        Ok(OutboxMessage {
            id: OutboxId::new(row.try_get("id")?),
            channel: row.try_get("channel")?,
            aggregate_id: column_id(row, "aggregate_id")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            published_at: row.try_get("published_at")?,
            attempts: column_u32(row, "attempts")?,
            last_error: row.try_get("last_error")?,
        })
    }

    fn row_to_restock(row: &PgRow) -> Result<RestockTask> {
        Ok(RestockTask {
            id: RestockId::new(row.try_get("id")?),
            idempotency_key: row.try_get("idempotency_key")?,
            order_id: column_id(row, "order_id")?,
            product_id: column_id(row, "product_id")?,
            quantity: column_u32(row, "quantity")?,
            attempts: column_u32(row, "attempts")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    /// Loads the items of several orders, grouped by order id.
    async fn load_items(&self, order_ids: &[i64]) -> Result<HashMap<i64, Vec<OrderItem>>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM order_details \
             WHERE order_id = ANY($1) AND deleted_at IS NULL ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(order_ids)
            .fetch_all(&self.pool)
            .await?;

        let mut grouped: HashMap<i64, Vec<OrderItem>> = HashMap::new();
        for row in &rows {
            let order_id: i64 = row.try_get("order_id")?;
            grouped
                .entry(order_id)
                .or_default()
                .push(Self::row_to_item(row)?);
        }
        Ok(grouped)
    }

    /// Attaches items to a batch of order rows, preserving row order.
    async fn hydrate(&self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let ids = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut items = self.load_items(&ids).await?;

        rows.iter()
            .zip(ids)
            .map(|(row, id)| Self::row_to_order(row, items.remove(&id).unwrap_or_default()))
            .collect()
    }
}

fn column_id<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: TryFrom<i64, Error = TryFromIntError>,
{
    let raw: i64 = row.try_get(column)?;
    T::try_from(raw).map_err(|e| StoreError::InvalidRow(format!("{column} = {raw}: {e}")))
}

fn column_u32(row: &PgRow, column: &str) -> Result<u32> {
    let raw: i32 = row.try_get(column)?;
    u32::try_from(raw).map_err(|e| StoreError::InvalidRow(format!("{column} = {raw}: {e}")))
}

fn bind_u32(value: u32, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|e| StoreError::InvalidRow(format!("{what} = {value}: {e}")))
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn get_by_id(&self, order_id: OrderId) -> Result<Order> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND deleted_at IS NULL");
        let row = sqlx::query(&sql)
            .bind(order_id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::OrderNotFound(order_id))?;

        let items = self.get_items(order_id).await?;
        Self::row_to_order(&row, items)
    }

    async fn get_by_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE user_id = $1 AND deleted_at IS NULL ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_i64())
            .fetch_all(&self.pool)
            .await?;

        self.hydrate(rows).await
    }

    async fn create(&self, order: &NewOrder) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO orders (user_id, total_price, status, reservation_state, reserved_items, version)
            VALUES ($1, $2, $3, $4, 0, $5)
            RETURNING id, created_at, updated_at
            "#,
        )
        .bind(order.user_id().as_i64())
        .bind(order.total_price().amount())
        .bind(OrderStatus::Pending.as_str())
        .bind(ReservationState::PendingReservation.as_str())
        .bind(Version::first().as_i64())
        .fetch_one(&mut *tx)
        .await?;

        let raw_id: i64 = row.try_get("id")?;
        let order_id: OrderId = column_id(&row, "id")?;

        let mut items = Vec::with_capacity(order.lines().len());
        for line in order.lines() {
            let item_id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO order_details (order_id, product_id, quantity, unit_price)
                VALUES ($1, $2, $3, $4)
                RETURNING id
                "#,
            )
            .bind(raw_id)
            .bind(line.product_id.as_i64())
            .bind(bind_u32(line.quantity, "quantity")?)
            .bind(line.unit_price.amount())
            .fetch_one(&mut *tx)
            .await?;

            items.push(OrderItem {
                id: item_id
                    .try_into()
                    .map_err(|e| StoreError::InvalidRow(format!("order_details.id: {e}")))?,
                order_id,
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
            });
        }

        tx.commit().await?;

        Ok(Order {
            id: order_id,
            user_id: order.user_id(),
            total_price: order.total_price(),
            status: OrderStatus::Pending,
            reservation_state: ReservationState::PendingReservation,
            reserved_items: 0,
            version: Version::first(),
            items,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        options: UpdateOptions,
    ) -> Result<StatusUpdate> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL AND ($3::BIGINT IS NULL OR version = $3)
            RETURNING version, reservation_state, reserved_items
            "#,
        )
        .bind(order_id.as_i64())
        .bind(status.as_str())
        .bind(options.expected_version.map(|v| v.as_i64()))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(updated) = updated else {
            let current: Option<i64> =
                sqlx::query_scalar("SELECT version FROM orders WHERE id = $1 AND deleted_at IS NULL")
                    .bind(order_id.as_i64())
                    .fetch_optional(&mut *tx)
                    .await?;

            return match (current, options.expected_version) {
                (Some(actual), Some(expected)) => Err(StoreError::VersionConflict {
                    order_id,
                    expected,
                    actual: Version::new(actual),
                }),
                _ => Err(StoreError::OrderNotFound(order_id)),
            };
        };

        let outbox_id = match options.outbox {
            Some(NewOutboxMessage {
                channel,
                aggregate_id,
                payload,
            }) => {
                let id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO outbox (channel, aggregate_id, payload)
                    VALUES ($1, $2, $3)
                    RETURNING id
                    "#,
                )
                .bind(channel)
                .bind(aggregate_id.as_i64())
                .bind(payload)
                .fetch_one(&mut *tx)
                .await?;
                Some(OutboxId::new(id))
            }
            None => None,
        };

        tx.commit().await?;

        let reservation_state: String = updated.try_get("reservation_state")?;
        Ok(StatusUpdate {
            version: Version::new(updated.try_get("version")?),
            outbox_id,
            reservation_state: reservation_state
                .parse()
                .map_err(|e: domain::OrderError| StoreError::InvalidRow(e.to_string()))?,
            reserved_items: column_u32(&updated, "reserved_items")?,
        })
    }

    async fn get_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM order_details \
             WHERE order_id = $1 AND deleted_at IS NULL ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(order_id.as_i64())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_item).collect()
    }

    async fn record_reservation(
        &self,
        order_id: OrderId,
        state: ReservationState,
        reserved_items: u32,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET reservation_state = $2, reserved_items = $3, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
              AND status <> 'cancelled' AND reservation_state <> 'released'
            "#,
        )
        .bind(order_id.as_i64())
        .bind(state.as_str())
        .bind(bind_u32(reserved_items, "reserved_items")?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.missing_or_closed(order_id).await);
        }
        Ok(())
    }

    async fn release_reservation(&self, order_id: OrderId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET reservation_state = $2, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(order_id.as_i64())
        .bind(ReservationState::Released.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order_id));
        }
        Ok(())
    }

    async fn find_pending_with_reservation(
        &self,
        state: ReservationState,
        limit: usize,
    ) -> Result<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE status = $1 AND reservation_state = $2 AND deleted_at IS NULL \
             ORDER BY id ASC LIMIT $3"
        );
        let rows = sqlx::query(&sql)
            .bind(OrderStatus::Pending.as_str())
            .bind(state.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        self.hydrate(rows).await
    }
}

#[async_trait]
impl OutboxStore for PostgresOrderStore {
    async fn get_message(&self, id: OutboxId) -> Result<OutboxMessage> {
        let sql = format!("SELECT {OUTBOX_COLUMNS} FROM outbox WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::OutboxMessageNotFound(id))?;
        Self::row_to_outbox(&row)
    }

    async fn pending_messages(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxMessage>> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox \
             WHERE published_at IS NULL AND attempts < $2 ORDER BY id ASC LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .bind(i64::from(max_attempts))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_outbox).collect()
    }

    async fn mark_published(&self, id: OutboxId) -> Result<()> {
        let result = sqlx::query("UPDATE outbox SET published_at = NOW() WHERE id = $1")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OutboxMessageNotFound(id));
        }
        Ok(())
    }

    async fn record_publish_failure(&self, id: OutboxId, error: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE outbox SET attempts = attempts + 1, last_error = $2 WHERE id = $1")
                .bind(id.as_i64())
                .bind(error)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OutboxMessageNotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl RestockQueue for PostgresOrderStore {
    async fn enqueue_restock(&self, task: NewRestockTask) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO restock_tasks (idempotency_key, order_id, product_id, quantity, attempts, last_error)
            VALUES ($1, $2, $3, $4, 1, $5)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(&task.idempotency_key)
        .bind(task.order_id.as_i64())
        .bind(task.product_id.as_i64())
        .bind(bind_u32(task.quantity, "quantity")?)
        .bind(&task.error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn due_restocks(&self, limit: usize, max_attempts: u32) -> Result<Vec<RestockTask>> {
        let sql = format!(
            "SELECT {RESTOCK_COLUMNS} FROM restock_tasks \
             WHERE completed_at IS NULL AND attempts < $2 ORDER BY id ASC LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .bind(i64::from(max_attempts))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_restock).collect()
    }

    async fn complete_restock(&self, id: RestockId) -> Result<()> {
        let result = sqlx::query("UPDATE restock_tasks SET completed_at = NOW() WHERE id = $1")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RestockTaskNotFound(id));
        }
        Ok(())
    }

    async fn record_restock_failure(&self, id: RestockId, error: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE restock_tasks SET attempts = attempts + 1, last_error = $2 WHERE id = $1",
        )
        .bind(id.as_i64())
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RestockTaskNotFound(id));
        }
        Ok(())
    }
}

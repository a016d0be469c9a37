//! Inventory client backed directly by the Product service's `inventories` table.

use async_trait::async_trait;
use common::ProductId;
use sqlx::PgPool;

use super::inventory::{InventoryClient, InventoryError};

fn transport(err: sqlx::Error) -> InventoryError {
    InventoryError::Transport(err.to_string())
}

fn as_quantity(quantity: u32) -> Result<i32, InventoryError> {
    i32::try_from(quantity)
        .map_err(|_| InventoryError::Transport(format!("quantity {quantity} out of range")))
}

/// Stock adjustments as single conditional statements.
///
/// A decrease only succeeds when the row still holds enough units at the
/// moment of the write, so concurrent decreases can never drive stock
/// negative.
#[derive(Clone)]
pub struct PostgresInventory {
    pool: PgPool,
}

impl PostgresInventory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Sets the on-hand quantity of a product, creating the row if needed.
    pub async fn set_stock(&self, product_id: ProductId, quantity: u32) -> Result<(), InventoryError> {
        sqlx::query(
            r#"
            INSERT INTO inventories (product_id, quantity)
            VALUES ($1, $2)
            ON CONFLICT (product_id) DO UPDATE SET quantity = EXCLUDED.quantity, updated_at = NOW()
            "#,
        )
        .bind(product_id.as_i64())
        .bind(as_quantity(quantity)?)
        .execute(&self.pool)
        .await
        .map_err(transport)?;
        Ok(())
    }

    /// Returns the on-hand quantity of a product, if it exists.
    pub async fn stock(&self, product_id: ProductId) -> Result<Option<u32>, InventoryError> {
        let quantity: Option<i32> =
            sqlx::query_scalar("SELECT quantity FROM inventories WHERE product_id = $1")
                .bind(product_id.as_i64())
                .fetch_optional(&self.pool)
                .await
                .map_err(transport)?;

        Ok(quantity.map(|q| q.max(0) as u32))
    }

    async fn exists(&self, product_id: ProductId) -> Result<bool, InventoryError> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM inventories WHERE product_id = $1)")
            .bind(product_id.as_i64())
            .fetch_one(&self.pool)
            .await
            .map_err(transport)
    }
}

#[async_trait]
impl InventoryClient for PostgresInventory {
    async fn decrease_inventory(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), InventoryError> {
        let result = sqlx::query(
            r#"
            UPDATE inventories
            SET quantity = quantity - $2, updated_at = NOW()
            WHERE product_id = $1 AND quantity >= $2
            "#,
        )
        .bind(product_id.as_i64())
        .bind(as_quantity(quantity)?)
        .execute(&self.pool)
        .await
        .map_err(transport)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        if self.exists(product_id).await? {
            Err(InventoryError::InsufficientStock {
                product_id,
                requested: quantity,
            })
        } else {
            Err(InventoryError::ProductNotFound(product_id))
        }
    }

    async fn increase_inventory(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), InventoryError> {
        let result = sqlx::query(
            r#"
            UPDATE inventories
            SET quantity = quantity + $2, updated_at = NOW()
            WHERE product_id = $1
            "#,
        )
        .bind(product_id.as_i64())
        .bind(as_quantity(quantity)?)
        .execute(&self.pool)
        .await
        .map_err(transport)?;

        if result.rows_affected() == 0 {
            return Err(InventoryError::ProductNotFound(product_id));
        }
        Ok(())
    }
}

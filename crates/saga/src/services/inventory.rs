//! Inventory client trait and implementations.
//!
//! The Product service owns stock. The saga only asks it to decrease or
//! increase a quantity, one call per order line.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use common::ProductId;
use reqwest::{Client, StatusCode};
use thiserror::Error;

/// Outcome of a refused or failed stock adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    /// The Product service refused a decrease that would go below zero.
    #[error("Insufficient stock for product {product_id}: requested {requested}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
    },

    /// The Product service has no such product.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The call did not produce an answer (timeout, connection, bad status).
    #[error("Inventory transport error: {0}")]
    Transport(String),
}

/// Stock adjustment operations offered by the Product service.
///
/// Neither operation is idempotent on the server. Callers that retry must
/// deduplicate themselves.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// Removes `quantity` units from stock, refusing to go below zero.
    async fn decrease_inventory(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), InventoryError>;

    /// Returns `quantity` units to stock.
    async fn increase_inventory(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), InventoryError>;
}

#[async_trait]
impl<T: InventoryClient + ?Sized> InventoryClient for Arc<T> {
    async fn decrease_inventory(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), InventoryError> {
        (**self).decrease_inventory(product_id, quantity).await
    }

    async fn increase_inventory(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), InventoryError> {
        (**self).increase_inventory(product_id, quantity).await
    }
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    stock: HashMap<ProductId, u32>,
    fail_increase_for: HashSet<ProductId>,
    unavailable: bool,
    decrease_calls: Vec<(ProductId, u32)>,
    increase_calls: Vec<(ProductId, u32)>,
}

/// In-memory Product service stock for tests and local runs.
///
/// The check and the decrement happen under one lock, so concurrent
/// decreases can never oversell.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryClient {
    state: Arc<Mutex<InMemoryInventoryState>>,
}

impl InMemoryInventoryClient {
    /// Creates an inventory with no products.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an inventory seeded with the given stock levels.
    pub fn with_stock(stock: impl IntoIterator<Item = (ProductId, u32)>) -> Self {
        let client = Self::new();
        client.lock().stock.extend(stock);
        client
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryInventoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the stock level of a product, creating it if needed.
    pub fn set_stock(&self, product_id: ProductId, quantity: u32) {
        self.lock().stock.insert(product_id, quantity);
    }

    /// Returns the stock level of a product, if it exists.
    pub fn stock(&self, product_id: ProductId) -> Option<u32> {
        self.lock().stock.get(&product_id).copied()
    }

    /// Makes increases for one product fail with a transport error.
    pub fn set_fail_on_increase(&self, product_id: ProductId, fail: bool) {
        let mut state = self.lock();
        if fail {
            state.fail_increase_for.insert(product_id);
        } else {
            state.fail_increase_for.remove(&product_id);
        }
    }

    /// Makes every call fail with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Returns every decrease request received, in order.
    pub fn decrease_calls(&self) -> Vec<(ProductId, u32)> {
        self.lock().decrease_calls.clone()
    }

    /// Returns every increase request received, in order.
    pub fn increase_calls(&self) -> Vec<(ProductId, u32)> {
        self.lock().increase_calls.clone()
    }
}

#[async_trait]
impl InventoryClient for InMemoryInventoryClient {
    async fn decrease_inventory(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), InventoryError> {
        let mut state = self.lock();
        state.decrease_calls.push((product_id, quantity));

        if state.unavailable {
            return Err(InventoryError::Transport("product service unavailable".into()));
        }

        let on_hand = state
            .stock
            .get_mut(&product_id)
            .ok_or(InventoryError::ProductNotFound(product_id))?;

        if *on_hand < quantity {
            return Err(InventoryError::InsufficientStock {
                product_id,
                requested: quantity,
            });
        }

        *on_hand -= quantity;
        Ok(())
    }

    async fn increase_inventory(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), InventoryError> {
        let mut state = self.lock();
        state.increase_calls.push((product_id, quantity));

        if state.unavailable || state.fail_increase_for.contains(&product_id) {
            return Err(InventoryError::Transport("product service unavailable".into()));
        }

        let on_hand = state
            .stock
            .get_mut(&product_id)
            .ok_or(InventoryError::ProductNotFound(product_id))?;
        *on_hand = on_hand.saturating_add(quantity);
        Ok(())
    }
}

/// Product service client over HTTP.
///
/// Calls `POST {base}/products/{id}/inventory/decrease` and `.../increase`
/// with a `{"quantity": n}` body.
#[derive(Debug, Clone)]
pub struct HttpInventoryClient {
    base_url: String,
    http: Client,
}

impl HttpInventoryClient {
    /// Creates a client whose calls give up after `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, InventoryError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InventoryError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn adjust(
        &self,
        product_id: ProductId,
        quantity: u32,
        direction: &str,
    ) -> Result<(), InventoryError> {
        let url = format!(
            "{}/products/{}/inventory/{}",
            self.base_url, product_id, direction
        );

        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "quantity": quantity }))
            .send()
            .await
            .map_err(|e| InventoryError::Transport(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(InventoryError::ProductNotFound(product_id)),
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(InventoryError::InsufficientStock {
                    product_id,
                    requested: quantity,
                })
            }
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(InventoryError::Transport(format!(
                    "{direction} request failed with status {status}: {text}"
                )))
            }
        }
    }
}

#[async_trait]
impl InventoryClient for HttpInventoryClient {
    async fn decrease_inventory(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), InventoryError> {
        self.adjust(product_id, quantity, "decrease").await
    }

    async fn increase_inventory(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), InventoryError> {
        self.adjust(product_id, quantity, "increase").await
    }
}

//! Order saga endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{OrderId, OrderItemId, ProductId, UserId};
use domain::{Money, NewOrderItem, Order, OrderItem, OrderStatus};
use order_store::{OrderStore, OutboxStore, RestockQueue};
use saga::{EventPublisher, InventoryClient, OrderSaga, UserDirectory};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Store bound shared by every handler.
pub trait Store: OrderStore + OutboxStore + RestockQueue + 'static {}

impl<T: OrderStore + OutboxStore + RestockQueue + 'static> Store for T {}

/// The saga as served: generic over the store, with the remote
/// collaborators chosen at startup.
pub type ServiceSaga<S> =
    OrderSaga<S, Arc<dyn InventoryClient>, Arc<dyn EventPublisher>, Arc<dyn UserDirectory>>;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub saga: Arc<ServiceSaga<S>>,
}

impl<S> AppState<S> {
    pub fn new(saga: Arc<ServiceSaga<S>>) -> Self {
        Self { saga }
    }
}

// -- Request types --

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub user_id: UserId,
    pub items: Vec<OrderItemRequest>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRequest {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Option<Money>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    #[serde(default)]
    pub force: bool,
}

// -- Response types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: OrderId,
    pub user_id: UserId,
    pub total_price: Money,
    pub status: OrderStatus,
    pub order_details: Vec<OrderDetailResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetailResponse {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

#[derive(Serialize)]
pub struct OrderEnvelope {
    pub order: OrderResponse,
    pub message: &'static str,
}

#[derive(Serialize)]
pub struct OrdersEnvelope {
    pub orders: Vec<OrderResponse>,
    pub message: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetailsEnvelope {
    pub order_details: Vec<OrderDetailResponse>,
    pub message: &'static str,
}

impl From<OrderItem> for OrderDetailResponse {
    fn from(item: OrderItem) -> Self {
        Self {
            id: item.id,
            order_id: item.order_id,
            product_id: item.product_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
        }
    }
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            total_price: order.total_price,
            status: order.status,
            order_details: order.items.into_iter().map(Into::into).collect(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

fn envelope(order: Order, message: &'static str) -> Json<OrderEnvelope> {
    Json(OrderEnvelope {
        order: order.into(),
        message,
    })
}

// -- Handlers --

/// POST /orders — create an order and reserve its stock.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderEnvelope>), ApiError> {
    let items = req
        .items
        .into_iter()
        .map(|item| NewOrderItem {
            product_id: item.product_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
        })
        .collect();

    let order = state.saga.create_order(req.user_id, items).await?;

    Ok((
        StatusCode::CREATED,
        envelope(order, "Order created and inventory updated"),
    ))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderEnvelope>, ApiError> {
    let order = state.saga.get_order(id).await?;
    Ok(envelope(order, "Order found"))
}

/// GET /users/{user_id}/orders — an empty list when the user has none.
#[tracing::instrument(skip(state))]
pub async fn list_by_user<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<UserId>,
) -> Result<Json<OrdersEnvelope>, ApiError> {
    let orders = state.saga.get_orders_by_user(user_id).await?;
    Ok(Json(OrdersEnvelope {
        orders: orders.into_iter().map(Into::into).collect(),
        message: "Orders found",
    }))
}

/// PUT /orders/{id}/status
#[tracing::instrument(skip(state, req))]
pub async fn update_status<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<OrderId>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<OrderEnvelope>, ApiError> {
    let status: OrderStatus = req
        .status
        .parse()
        .map_err(|e: domain::OrderError| ApiError::BadRequest(e.to_string()))?;

    let order = state
        .saga
        .update_order_status(id, status, req.force)
        .await?;
    Ok(envelope(order, "Status updated"))
}

/// POST /orders/{id}/cancel
#[tracing::instrument(skip(state))]
pub async fn cancel<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderEnvelope>, ApiError> {
    let order = state.saga.cancel_order(id).await?;
    Ok(envelope(order, "Order cancelled successfully"))
}

/// GET /orders/{id}/details
#[tracing::instrument(skip(state))]
pub async fn details<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderDetailsEnvelope>, ApiError> {
    let items = state.saga.get_order_details(id).await?;
    Ok(Json(OrderDetailsEnvelope {
        order_details: items.into_iter().map(Into::into).collect(),
        message: "Order details found",
    }))
}

//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::{InventoryError, SagaError};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Saga operation error.
    Saga(SagaError),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Saga(err) => saga_status(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let message = match &self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Saga(err) => err.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, code, "request failed");
        }

        let body = serde_json::json!({ "error": message, "code": code });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_status(err: &SagaError) -> (StatusCode, &'static str) {
    match err {
        SagaError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        SagaError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
        SagaError::AlreadyCancelled(_) => (StatusCode::CONFLICT, "already_cancelled"),
        SagaError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
        SagaError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        SagaError::Inventory { source, .. } => match source {
            InventoryError::InsufficientStock { .. } => {
                (StatusCode::CONFLICT, "insufficient_stock")
            }
            InventoryError::ProductNotFound(_) => (StatusCode::NOT_FOUND, "product_not_found"),
            InventoryError::Transport(_) => (StatusCode::BAD_GATEWAY, "inventory_unavailable"),
        },
        SagaError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "persistence"),
        SagaError::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

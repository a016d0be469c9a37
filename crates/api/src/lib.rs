//! HTTP surface of the order service.
//!
//! Exposes the six order saga operations as JSON endpoints, plus health and
//! Prometheus metrics, with request tracing from `tower-http`.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    EventPublisher, InMemoryEventPublisher, InMemoryInventoryClient, InMemoryUserDirectory,
    InventoryClient, OrderSaga, UserDirectory,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::orders::{AppState, ServiceSaga, Store};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/status", put(routes::orders::update_status::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route("/orders/{id}/details", get(routes::orders::details::<S>))
        .route("/users/{user_id}/orders", get(routes::orders::list_by_user::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires a saga over `store` and the given remote collaborators.
pub fn build_saga<S: Store>(
    store: S,
    inventory: Arc<dyn InventoryClient>,
    publisher: Arc<dyn EventPublisher>,
    users: Arc<dyn UserDirectory>,
    fallback_email: impl Into<String>,
) -> Arc<ServiceSaga<S>> {
    Arc::new(OrderSaga::new(store, inventory, publisher, users).with_fallback_email(fallback_email))
}

/// Handles on the in-memory collaborators behind [`create_default_state`].
#[derive(Clone)]
pub struct InMemoryServices {
    pub inventory: InMemoryInventoryClient,
    pub publisher: InMemoryEventPublisher,
    pub users: InMemoryUserDirectory,
}

/// Creates application state over `store` with in-memory stock, broker and
/// user directory.
pub fn create_default_state<S: Store>(store: S) -> (Arc<AppState<S>>, InMemoryServices) {
    let services = InMemoryServices {
        inventory: InMemoryInventoryClient::new(),
        publisher: InMemoryEventPublisher::new(),
        users: InMemoryUserDirectory::new(),
    };

    let saga = build_saga(
        store,
        Arc::new(services.inventory.clone()),
        Arc::new(services.publisher.clone()),
        Arc::new(services.users.clone()),
        "",
    );

    (Arc::new(AppState::new(saga)), services)
}

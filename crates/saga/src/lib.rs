//! Order saga for the order service.
//!
//! Creating an order reserves stock at the Product service one item at a
//! time; cancelling it hands the stock back and notifies the notification
//! service on `order.cancelled`. There is no distributed transaction, so:
//!
//! - orders record how far their reservation got (`ReservationState`),
//! - cancellation events go through a transactional outbox relayed by the
//!   [`Dispatcher`],
//! - the [`Reconciler`] cancels orders whose reservation failed and retries
//!   restocks that failed during cancellation.

pub mod dispatcher;
pub mod error;
pub mod events;
pub mod order_fulfillment;
pub mod order_saga;
pub mod reconciler;
pub mod services;

pub use dispatcher::{DispatchReport, Dispatcher, DispatcherConfig};
pub use error::{Result, SagaError};
pub use events::OrderCancelled;
pub use order_saga::OrderSaga;
pub use reconciler::{ReconcileReport, Reconciler, ReconcilerConfig};
pub use services::{
    DirectoryError, EventPublisher, HttpInventoryClient, HttpUserDirectory,
    InMemoryEventPublisher, InMemoryInventoryClient, InMemoryUserDirectory, InventoryClient,
    InventoryError, PgNotifyPublisher, PostgresInventory, PublishError, UserDirectory,
};

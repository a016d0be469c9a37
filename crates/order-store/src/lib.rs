pub mod error;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod restock;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryOrderStore;
pub use outbox::{NewOutboxMessage, OutboxId, OutboxMessage};
pub use postgres::PostgresOrderStore;
pub use restock::{NewRestockTask, RestockId, RestockTask};
pub use store::{OrderStore, OutboxStore, RestockQueue, StatusUpdate, UpdateOptions};

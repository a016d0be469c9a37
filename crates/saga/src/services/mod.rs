//! External collaborators the saga calls: Product service stock, the
//! message broker and the user directory.

pub mod inventory;
pub mod postgres_inventory;
pub mod publisher;
pub mod users;

pub use inventory::{HttpInventoryClient, InMemoryInventoryClient, InventoryClient, InventoryError};
pub use postgres_inventory::PostgresInventory;
pub use publisher::{EventPublisher, InMemoryEventPublisher, PgNotifyPublisher, PublishError};
pub use users::{DirectoryError, HttpUserDirectory, InMemoryUserDirectory, UserDirectory};

pub mod catalog;
pub mod memory;
pub mod memory_queue;
pub mod postgres;
pub mod postgres_queue;

pub use catalog::{CatalogDocument, InMemoryCatalog};
pub use memory::InMemoryStore;
pub use memory_queue::{InMemoryJobQueue, QueueSettings};
pub use postgres::{PgTaskStore, PostgresConfig};
pub use postgres_queue::PgJobQueue;

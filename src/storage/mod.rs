pub mod memory;
pub mod models;
pub mod queue;
pub mod registry;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use queue::{QueueStats, UrlQueue};
pub use registry::{RegistryEntry, RegistryStats, UrlRegistry, UrlStatus};
pub use sqlite::SqliteStore;
pub use store::{CrawlStore, SharedStore, StorageError, StoreResult};

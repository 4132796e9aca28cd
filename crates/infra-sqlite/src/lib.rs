// Reliquary Infrastructure - SQLite Adapter
// Implements: JobStore, IndexService + ModelService (object catalog)

mod catalog;
mod connection;
mod error;
mod job_store;
mod migration;

pub use catalog::{SqliteListing, SqliteObjectCatalog};
pub use connection::create_pool;
pub use job_store::SqliteJobStore;
pub use migration::{current_version, run_migrations};

//! SurrealDB integration for the task queue.
//!
//! This crate provides database connectivity and the [`JobStore`] implementations that the
//! durable queue processor claims and updates jobs through.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod memory;
mod schema;
mod store;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, connect};
pub use memory::InMemoryJobStore;
pub use repositories::JobRepository;
pub use schema::{JOB_TABLE, init_schema};
pub use store::{Expected, JobStore};

/// Connect with the given configuration and make sure the schema exists.
///
/// Each call returns its own handle; callers pass it on explicitly.
pub async fn init(config: &DbConfig) -> Result<Database, DbError> {
    let db = connect(config).await?;
    init_schema(&db).await?;
    Ok(db)
}

//! Data layer module
//!
//! Handles all data persistence:
//! - Key-value store (SQLite or in-memory)
//! - Actor key pairs
//! - Follower relationships

mod followers;
mod keys;
mod store;

pub use followers::{FollowerRecord, FollowerStore, RecordOutcome};
pub use keys::{KeyPair, KeyStore};
pub use store::{KvStore, MemoryStore, SqliteStore};

use std::sync::Arc;

use crate::config::{DatabaseConfig, StorageBackend};
use crate::error::AppError;

/// Open the configured storage backend.
pub async fn open_store(config: &DatabaseConfig) -> Result<Arc<dyn KvStore>, AppError> {
    match config.backend {
        StorageBackend::Sqlite => Ok(Arc::new(SqliteStore::connect(&config.path).await?)),
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; keys and followers are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

//! Persistent host state
//!
//! - [`PluginStore`]: the installed-plugin registry (`plugins-data.json`)
//!   with a coherent in-memory read cache
//! - [`KvStore`]: per-plugin key-value namespaces, favorites and recents in
//!   a redb database

pub mod kv;
pub mod registry;

pub use kv::{Favorite, KvStore, Recent};
pub use registry::PluginStore;

use thiserror::Error;

/// Error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize stored data: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to replace plugin registry: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("Database error: {0}")]
    Database(#[from] redb::Error),

    #[error("Plugin not found: {0}")]
    NotFound(String),
}

macro_rules! impl_from_redb {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StorageError {
                fn from(e: $ty) -> Self {
                    StorageError::Database(e.into())
                }
            }
        )*
    };
}

impl_from_redb!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

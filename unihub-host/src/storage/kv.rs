//! Durable key-value storage backed by redb
//!
//! Each plugin gets its own table (`plugin_<id>`), so one plugin's keys are
//! physically separate from another's. Favorites and recents live in
//! shared tables keyed by plugin id.

use super::StorageError;
use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const FAVORITES_TABLE: TableDefinition<'_, &str, i64> = TableDefinition::new("favorites");
const RECENTS_TABLE: TableDefinition<'_, &str, &str> = TableDefinition::new("recents");

/// Default number of entries returned by [`KvStore::recents`]
pub const DEFAULT_RECENTS_LIMIT: usize = 10;

fn plugin_table_name(plugin_id: &str) -> String {
    format!("plugin_{}", plugin_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
    pub plugin_id: String,
    /// Milliseconds since the Unix epoch
    pub added_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recent {
    pub plugin_id: String,
    /// Milliseconds since the Unix epoch
    pub last_accessed_at: i64,
    pub access_count: u64,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// redb-backed plugin key-value store
pub struct KvStore {
    path: PathBuf,
    db: Database,
}

impl KvStore {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&path)?;

        let txn = db.begin_write()?;
        {
            txn.open_table(FAVORITES_TABLE)?;
            txn.open_table(RECENTS_TABLE)?;
        }
        txn.commit()?;

        tracing::debug!(path = %path.display(), "Opened plugin KV database");
        Ok(Self { path, db })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // Per-plugin namespaces
    // ========================================================================

    pub fn get(
        &self,
        plugin_id: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StorageError> {
        let name = plugin_table_name(plugin_id);
        let definition = TableDefinition::<&str, &str>::new(&name);

        let txn = self.db.begin_read()?;
        let table = match txn.open_table(definition) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let value = match table.get(key)? {
            Some(guard) => Some(serde_json::from_str(guard.value())?),
            None => None,
        };
        Ok(value)
    }

    pub fn set(
        &self,
        plugin_id: &str,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), StorageError> {
        let name = plugin_table_name(plugin_id);
        let definition = TableDefinition::<&str, &str>::new(&name);
        let encoded = serde_json::to_string(value)?;

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(definition)?;
            table.insert(key, encoded.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Returns whether the key existed
    pub fn delete(&self, plugin_id: &str, key: &str) -> Result<bool, StorageError> {
        let name = plugin_table_name(plugin_id);
        let definition = TableDefinition::<&str, &str>::new(&name);

        let txn = self.db.begin_write()?;
        let existed = {
            let mut table = txn.open_table(definition)?;
            let removed = table.remove(key)?;
            removed.is_some()
        };
        txn.commit()?;
        Ok(existed)
    }

    pub fn keys(&self, plugin_id: &str) -> Result<Vec<String>, StorageError> {
        let name = plugin_table_name(plugin_id);
        let definition = TableDefinition::<&str, &str>::new(&name);

        let txn = self.db.begin_read()?;
        let table = match txn.open_table(definition) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in table.iter()? {
            let (key, _) = entry?;
            keys.push(key.value().to_string());
        }
        Ok(keys)
    }

    /// Drop the plugin's whole namespace
    pub fn clear(&self, plugin_id: &str) -> Result<(), StorageError> {
        let name = plugin_table_name(plugin_id);
        let definition = TableDefinition::<&str, &str>::new(&name);

        let txn = self.db.begin_write()?;
        txn.delete_table(definition)?;
        txn.commit()?;
        Ok(())
    }

    // ========================================================================
    // Favorites
    // ========================================================================

    pub fn add_favorite(&self, plugin_id: &str) -> Result<(), StorageError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(FAVORITES_TABLE)?;
            table.insert(plugin_id, now_millis())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn remove_favorite(&self, plugin_id: &str) -> Result<bool, StorageError> {
        let txn = self.db.begin_write()?;
        let existed = {
            let mut table = txn.open_table(FAVORITES_TABLE)?;
            let removed = table.remove(plugin_id)?;
            removed.is_some()
        };
        txn.commit()?;
        Ok(existed)
    }

    pub fn is_favorite(&self, plugin_id: &str) -> Result<bool, StorageError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FAVORITES_TABLE)?;
        let found = table.get(plugin_id)?.is_some();
        Ok(found)
    }

    /// Favorites, most recently added first
    pub fn favorites(&self) -> Result<Vec<Favorite>, StorageError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FAVORITES_TABLE)?;

        let mut favorites = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            favorites.push(Favorite {
                plugin_id: key.value().to_string(),
                added_at: value.value(),
            });
        }
        favorites.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        Ok(favorites)
    }

    // ========================================================================
    // Recents
    // ========================================================================

    /// Record an access, bumping the access count
    pub fn add_recent(&self, plugin_id: &str) -> Result<Recent, StorageError> {
        let txn = self.db.begin_write()?;
        let recent = {
            let mut table = txn.open_table(RECENTS_TABLE)?;
            let previous: Option<Recent> = match table.get(plugin_id)? {
                Some(guard) => serde_json::from_str(guard.value()).ok(),
                None => None,
            };
            let recent = Recent {
                plugin_id: plugin_id.to_string(),
                last_accessed_at: now_millis(),
                access_count: previous.map(|r| r.access_count).unwrap_or(0) + 1,
            };
            let encoded = serde_json::to_string(&recent)?;
            table.insert(plugin_id, encoded.as_str())?;
            recent
        };
        txn.commit()?;
        Ok(recent)
    }

    /// Most recently accessed first
    pub fn recents(&self, limit: usize) -> Result<Vec<Recent>, StorageError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(RECENTS_TABLE)?;

        let mut recents = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            match serde_json::from_str::<Recent>(value.value()) {
                Ok(recent) => recents.push(recent),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable recent entry"),
            }
        }
        recents.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
        recents.truncate(limit);
        Ok(recents)
    }

    pub fn remove_recent(&self, plugin_id: &str) -> Result<(), StorageError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(RECENTS_TABLE)?;
            table.remove(plugin_id)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn clear_recents(&self) -> Result<(), StorageError> {
        let txn = self.db.begin_write()?;
        txn.delete_table(RECENTS_TABLE)?;
        txn.open_table(RECENTS_TABLE)?;
        txn.commit()?;
        Ok(())
    }
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore").field("path", &self.path).finish()
    }
}

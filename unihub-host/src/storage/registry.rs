//! Installed-plugin registry with a write-through-invalidated read cache
//!
//! The JSON file is authoritative. Reads are served from a cached snapshot
//! that is populated lazily; every write drops the snapshot before and
//! after the file is replaced, so a reader never observes a list older
//! than the last completed write. Each drop bumps a generation, and a
//! reader only publishes what it loaded if no drop happened meanwhile.

use super::StorageError;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use unihub_plugin_api::InstalledPluginRecord;

type Snapshot = Arc<Vec<InstalledPluginRecord>>;

#[derive(Default)]
struct CacheSlot {
    generation: u64,
    snapshot: Option<Snapshot>,
}

/// Installed-plugin registry backed by `plugins-data.json`
pub struct PluginStore {
    path: PathBuf,
    cache: RwLock<CacheSlot>,
    write_lock: Mutex<()>,
}

impl PluginStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cache: RwLock::new(CacheSlot::default()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All installed plugins
    pub fn list(&self) -> Vec<InstalledPluginRecord> {
        self.snapshot().as_ref().clone()
    }

    pub fn get(&self, plugin_id: &str) -> Option<InstalledPluginRecord> {
        self.snapshot().iter().find(|r| r.id == plugin_id).cloned()
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.snapshot().iter().any(|r| r.id == plugin_id)
    }

    /// Insert or replace the record with the same id
    pub fn save(&self, record: InstalledPluginRecord) -> Result<(), StorageError> {
        self.update(|records| {
            match records.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => records.push(record),
            }
            Ok(())
        })
    }

    /// Remove a record; returns whether it existed
    pub fn remove(&self, plugin_id: &str) -> Result<bool, StorageError> {
        let mut removed = false;
        self.update(|records| {
            let before = records.len();
            records.retain(|r| r.id != plugin_id);
            removed = records.len() != before;
            Ok(())
        })?;
        Ok(removed)
    }

    /// Flip the enabled flag and return the updated record
    pub fn set_enabled(
        &self,
        plugin_id: &str,
        enabled: bool,
    ) -> Result<InstalledPluginRecord, StorageError> {
        let mut updated = None;
        self.update(|records| {
            let record = records
                .iter_mut()
                .find(|r| r.id == plugin_id)
                .ok_or_else(|| StorageError::NotFound(plugin_id.to_string()))?;
            record.enabled = enabled;
            updated = Some(record.clone());
            Ok(())
        })?;
        updated.ok_or_else(|| StorageError::NotFound(plugin_id.to_string()))
    }

    /// Drop the cached snapshot
    pub fn invalidate(&self) {
        let mut slot = self.cache.write().unwrap_or_else(|e| e.into_inner());
        slot.generation = slot.generation.wrapping_add(1);
        slot.snapshot = None;
    }

    /// Populate the cache ahead of the first read
    pub fn warmup(&self) -> usize {
        self.snapshot().len()
    }

    fn snapshot(&self) -> Snapshot {
        let generation = {
            let slot = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = slot.snapshot.as_ref() {
                return Arc::clone(cached);
            }
            slot.generation
        };

        let records = Arc::new(self.read_from_disk().unwrap_or_default());
        let mut slot = self.cache.write().unwrap_or_else(|e| e.into_inner());
        // A write finished while we were reading; what we hold may predate it
        if slot.generation == generation {
            slot.snapshot = Some(Arc::clone(&records));
        }
        records
    }

    /// Read-modify-write under the writer lock
    fn update<F>(&self, mutate: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut Vec<InstalledPluginRecord>) -> Result<(), StorageError>,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.invalidate();

        let mut records = match self.read_from_disk() {
            Some(records) => records,
            None => {
                self.preserve_corrupt_file();
                Vec::new()
            }
        };
        let result = mutate(&mut records).and_then(|_| self.write_atomic(&records));

        self.invalidate();
        result
    }

    /// `None` when the file exists but cannot be read or parsed
    fn read_from_disk(&self) -> Option<Vec<InstalledPluginRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Some(Vec::new()),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Plugin registry unreadable, treating as empty");
                return None;
            }
        };

        if content.trim().is_empty() {
            return Some(Vec::new());
        }

        match serde_json::from_str(&content) {
            Ok(records) => Some(records),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Plugin registry corrupt, treating as empty");
                None
            }
        }
    }

    fn preserve_corrupt_file(&self) {
        if !self.path.exists() {
            return;
        }
        let mut backup = self.path.clone().into_os_string();
        backup.push(".corrupt");
        let backup = PathBuf::from(backup);
        match fs::copy(&self.path, &backup) {
            Ok(_) => {
                tracing::warn!(backup = %backup.display(), "Preserved corrupt plugin registry")
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to preserve corrupt plugin registry")
            }
        }
    }

    fn write_atomic(&self, records: &[InstalledPluginRecord]) -> Result<(), StorageError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let tmp = tempfile::NamedTempFile::new_in(&parent)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, records)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;

        tracing::debug!(path = %self.path.display(), count = records.len(), "Wrote plugin registry");
        Ok(())
    }
}

impl std::fmt::Debug for PluginStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginStore")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use unihub_plugin_api::{PluginManifest, PluginSource};

    fn record(id: &str, version: &str) -> InstalledPluginRecord {
        InstalledPluginRecord {
            id: id.to_string(),
            version: version.to_string(),
            enabled: true,
            installed_at: "2024-05-01T10:00:00+00:00".to_string(),
            source: PluginSource::Local,
            source_url: None,
            checksum: None,
            metadata: PluginManifest::new(id, id, version, "index.html"),
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = PluginStore::new(temp.path().join("plugins-data.json"));
        assert!(store.list().is_empty());
        assert!(store.get("a").is_none());
    }

    #[test]
    fn test_save_is_visible_to_next_read() {
        let temp = TempDir::new().unwrap();
        let store = PluginStore::new(temp.path().join("plugins-data.json"));

        assert_eq!(store.warmup(), 0);
        store.save(record("a", "1.0.0")).unwrap();
        assert_eq!(store.list().len(), 1);

        store.save(record("a", "1.1.0")).unwrap();
        let list = store.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].version, "1.1.0");

        let reopened = PluginStore::new(store.path());
        assert_eq!(reopened.get("a").unwrap().version, "1.1.0");
    }

    #[test]
    fn test_remove_is_visible_to_next_read() {
        let temp = TempDir::new().unwrap();
        let store = PluginStore::new(temp.path().join("plugins-data.json"));
        store.save(record("a", "1.0.0")).unwrap();
        store.save(record("b", "1.0.0")).unwrap();
        assert_eq!(store.list().len(), 2);

        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        let ids: Vec<String> = store.list().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b".to_string()]);
    }

    #[test]
    fn test_set_enabled() {
        let temp = TempDir::new().unwrap();
        let store = PluginStore::new(temp.path().join("plugins-data.json"));
        store.save(record("a", "1.0.0")).unwrap();

        let updated = store.set_enabled("a", false).unwrap();
        assert!(!updated.enabled);
        assert!(!store.get("a").unwrap().enabled);

        assert!(matches!(
            store.set_enabled("ghost", true),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_external_edit_seen_after_invalidate() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("plugins-data.json");
        let store = PluginStore::new(&path);
        store.save(record("a", "1.0.0")).unwrap();
        assert_eq!(store.list().len(), 1);

        fs::write(&path, "[]").unwrap();
        assert_eq!(store.list().len(), 1);
        store.invalidate();
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_save_visible_while_readers_refill_cache() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let temp = TempDir::new().unwrap();
        let store = PluginStore::new(temp.path().join("plugins-data.json"));
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    while !done.load(Ordering::Relaxed) {
                        store.invalidate();
                        let _ = store.list();
                    }
                });
            }

            for i in 0..300 {
                let id = format!("p{i}");
                store.save(record(&id, "1.0.0")).unwrap();
                assert!(store.get(&id).is_some(), "{id} missing right after save");
                assert!(store.list().iter().any(|r| r.id == id));
            }
            done.store(true, Ordering::Relaxed);
        });

        assert_eq!(store.list().len(), 300);
    }

    #[test]
    fn test_corrupt_file_treated_as_empty_and_preserved() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("plugins-data.json");
        fs::write(&path, "{ this is not json").unwrap();

        let store = PluginStore::new(&path);
        assert!(store.list().is_empty());

        store.save(record("a", "1.0.0")).unwrap();
        assert_eq!(store.list().len(), 1);

        let backup = temp.path().join("plugins-data.json.corrupt");
        assert_eq!(fs::read_to_string(backup).unwrap(), "{ this is not json");
    }

    #[test]
    fn test_file_is_camel_case_json_array() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("plugins-data.json");
        let store = PluginStore::new(&path);
        store.save(record("a", "1.0.0")).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["installedAt"], "2024-05-01T10:00:00+00:00");
        assert_eq!(json[0]["metadata"]["id"], "a");
    }
}

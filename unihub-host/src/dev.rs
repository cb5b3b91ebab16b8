//! Dev-mode registry: per-plugin redirect of the entry to a live URL

use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;
use unihub_plugin_api::{validate_plugin_id, ManifestError};

/// A registered dev redirect
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevEntry {
    pub plugin_id: String,
    pub url: String,
    pub auto_reload: bool,
}

/// Change notification for observers such as the reload watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevEvent {
    Registered(DevEntry),
    Unregistered(String),
}

/// Maps plugin ids to dev-server URLs
pub struct DevModeRegistry {
    entries: RwLock<HashMap<String, DevEntry>>,
    events: broadcast::Sender<DevEvent>,
}

impl DevModeRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            entries: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Register or replace the redirect for a plugin
    ///
    /// The id must be one an installed plugin could have; reserved ids are
    /// rejected.
    pub fn register(
        &self,
        plugin_id: &str,
        url: &str,
        auto_reload: bool,
    ) -> Result<(), ManifestError> {
        validate_plugin_id(plugin_id)?;
        let entry = DevEntry {
            plugin_id: plugin_id.to_string(),
            url: url.to_string(),
            auto_reload,
        };
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(plugin_id.to_string(), entry.clone());
        tracing::info!(plugin = %plugin_id, url = %url, auto_reload, "Registered dev-mode plugin");
        let _ = self.events.send(DevEvent::Registered(entry));
        Ok(())
    }

    /// Remove the redirect; idempotent
    pub fn unregister(&self, plugin_id: &str) {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(plugin_id);
        if removed.is_some() {
            tracing::info!(plugin = %plugin_id, "Unregistered dev-mode plugin");
            let _ = self.events.send(DevEvent::Unregistered(plugin_id.to_string()));
        }
    }

    pub fn is_dev_mode(&self, plugin_id: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(plugin_id)
    }

    pub fn dev_url(&self, plugin_id: &str) -> Option<String> {
        self.get(plugin_id).map(|entry| entry.url)
    }

    pub fn get(&self, plugin_id: &str) -> Option<DevEntry> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(plugin_id)
            .cloned()
    }

    /// All entries, sorted by plugin id
    pub fn entries(&self) -> Vec<DevEntry> {
        let mut entries: Vec<DevEntry> = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.plugin_id.cmp(&b.plugin_id));
        entries
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DevEvent> {
        self.events.subscribe()
    }
}

impl Default for DevModeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DevModeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevModeRegistry")
            .field("entries", &self.entries())
            .finish()
    }
}

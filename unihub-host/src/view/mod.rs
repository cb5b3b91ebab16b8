//! View lifecycle management
//!
//! One isolated surface per open plugin, capped at
//! [`HostConfig::max_cached_views`]. When the cap is reached the
//! least-recently-activated view that is not currently active is destroyed
//! before a new one is created.
//!
//! ```text
//!   Closed ──open──▶ Opening ──create ok──▶ Active ◀──activate── Hidden
//!     ▲                 │                     │                    ▲
//!     │             create failed             └──another opened────┘
//!     └─────────────────┘               close / evict ──▶ Closed
//! ```

mod bounds;
pub mod host;

pub use host::{HeadlessViewHost, RecordingViewHost, SurfaceCall, SurfaceError, ViewHost, ViewSource};

use crate::broker::CapabilityBroker;
use crate::channel::PluginChannel;
use crate::config::HostConfig;
use crate::dev::DevModeRegistry;
use crate::sandbox::PluginSandbox;
use crate::storage::PluginStore;
use bounds::BoundsSender;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use unihub_plugin_api::{validate_plugin_id, ManifestError, Rect, PLUGIN_PROTOCOL};

/// Errors raised while opening a view
#[derive(Debug, Error)]
pub enum ViewError {
    #[error("Plugin {0} is not installed")]
    PluginNotFound(String),

    #[error(transparent)]
    InvalidId(#[from] ManifestError),

    #[error("Plugin {0} is disabled")]
    Disabled(String),

    #[error("Entry '{entry}' of plugin {plugin_id} was not found in its directory")]
    EntryMissing { plugin_id: String, entry: String },

    #[error("Failed to create view for {plugin_id}: {message}")]
    Surface { plugin_id: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewState {
    Opening,
    Active,
    Hidden,
}

/// Snapshot of one materialized view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewInfo {
    pub plugin_id: String,
    pub url: String,
    pub state: ViewState,
    pub bounds: Rect,
    pub last_activated: u64,
}

struct ViewHandle {
    url: String,
    bounds: Rect,
    state: ViewState,
    last_activated: u64,
}

#[derive(Default)]
struct ViewTable {
    views: HashMap<String, ViewHandle>,
    active: Option<String>,
    hidden_for_overlay: Option<String>,
    /// Plugins being uninstalled; they cannot be opened
    retiring: HashSet<String>,
    /// Last rect reported by the shell; new views start with it
    content_bounds: Rect,
    clock: u64,
}

impl ViewTable {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn eviction_candidate(&self) -> Option<String> {
        self.views
            .iter()
            .filter(|(id, _)| self.active.as_deref() != Some(id.as_str()))
            .min_by_key(|(_, view)| view.last_activated)
            .map(|(id, _)| id.clone())
    }
}

/// Maps plugin ids to their materialized surfaces
pub struct ViewManager {
    config: Arc<HostConfig>,
    store: Arc<PluginStore>,
    dev: Arc<DevModeRegistry>,
    broker: Arc<CapabilityBroker>,
    host: Arc<dyn ViewHost>,
    table: Mutex<ViewTable>,
    bounds_tx: BoundsSender,
}

impl ViewManager {
    /// Create the manager and its bounds coalescing task
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: Arc<HostConfig>,
        store: Arc<PluginStore>,
        dev: Arc<DevModeRegistry>,
        broker: Arc<CapabilityBroker>,
        host: Arc<dyn ViewHost>,
    ) -> Arc<Self> {
        let debounce = config.bounds_debounce();
        Arc::new_cyclic(|weak| Self {
            config,
            store,
            dev,
            broker,
            host,
            table: Mutex::new(ViewTable::default()),
            bounds_tx: bounds::spawn_coalescer(weak.clone(), debounce),
        })
    }

    /// Open (or re-activate) the view of a plugin
    pub async fn open(&self, plugin_id: &str) -> Result<ViewInfo, ViewError> {
        // A channel bound to a reserved id would skip every capability check
        validate_plugin_id(plugin_id)?;
        let mut table = self.table.lock().await;

        if table.retiring.contains(plugin_id) {
            return Err(ViewError::PluginNotFound(plugin_id.to_string()));
        }

        if table.views.contains_key(plugin_id) {
            self.activate(&mut table, plugin_id).await;
            return Ok(Self::info(&table, plugin_id));
        }

        let source = self.resolve_source(plugin_id)?;

        while table.views.len() >= self.config.max_cached_views.max(1) {
            let Some(victim) = table.eviction_candidate() else {
                break;
            };
            tracing::info!(plugin = %victim, "Evicting least recently used view");
            table.views.remove(&victim);
            if table.hidden_for_overlay.as_deref() == Some(victim.as_str()) {
                table.hidden_for_overlay = None;
            }
            self.host.destroy(&victim).await;
        }

        let bounds = table.content_bounds;
        table.views.insert(
            plugin_id.to_string(),
            ViewHandle {
                url: source.url().to_string(),
                bounds,
                state: ViewState::Opening,
                last_activated: 0,
            },
        );

        let channel = PluginChannel::connect(Arc::clone(&self.broker), plugin_id);
        if let Err(e) = self.host.create(plugin_id, &source, bounds, channel).await {
            table.views.remove(plugin_id);
            tracing::warn!(plugin = %plugin_id, error = %e, "Failed to create plugin view");
            return Err(ViewError::Surface {
                plugin_id: plugin_id.to_string(),
                message: e.to_string(),
            });
        }

        tracing::info!(plugin = %plugin_id, url = %source.url(), dev = source.is_dev(), "Opened plugin view");
        self.activate(&mut table, plugin_id).await;
        Ok(Self::info(&table, plugin_id))
    }

    /// Destroy a view; idempotent
    pub async fn close(&self, plugin_id: &str) -> bool {
        let mut table = self.table.lock().await;
        self.close_locked(&mut table, plugin_id).await
    }

    /// Close the view and refuse to open it until [`release`](Self::release)
    ///
    /// Used while a plugin is being uninstalled so that no open can slip in
    /// between closing its view and removing its record.
    pub async fn retire(&self, plugin_id: &str) -> bool {
        let mut table = self.table.lock().await;
        table.retiring.insert(plugin_id.to_string());
        self.close_locked(&mut table, plugin_id).await
    }

    pub async fn release(&self, plugin_id: &str) {
        self.table.lock().await.retiring.remove(plugin_id);
    }

    async fn close_locked(&self, table: &mut ViewTable, plugin_id: &str) -> bool {
        if table.views.remove(plugin_id).is_none() {
            return false;
        }
        if table.active.as_deref() == Some(plugin_id) {
            table.active = None;
        }
        if table.hidden_for_overlay.as_deref() == Some(plugin_id) {
            table.hidden_for_overlay = None;
        }
        self.host.destroy(plugin_id).await;
        tracing::info!(plugin = %plugin_id, "Closed plugin view");
        true
    }

    /// Destroy every view
    pub async fn close_all(&self) {
        let mut table = self.table.lock().await;
        let ids: Vec<String> = table.views.drain().map(|(id, _)| id).collect();
        table.active = None;
        table.hidden_for_overlay = None;
        for id in ids {
            self.host.destroy(&id).await;
        }
    }

    /// Queue a bounds update; only the last rect of a burst is applied
    pub fn update_bounds(&self, plugin_id: &str, bounds: Rect) {
        if self.bounds_tx.send((plugin_id.to_string(), bounds)).is_err() {
            tracing::debug!(plugin = %plugin_id, "Bounds coalescer is gone");
        }
    }

    /// Hide the active view while a shell overlay is shown
    pub async fn hide_current_for_overlay(&self) -> Option<String> {
        let mut table = self.table.lock().await;
        let active = table.active.take()?;
        if let Some(view) = table.views.get_mut(&active) {
            view.state = ViewState::Hidden;
        }
        if let Err(e) = self.host.set_visible(&active, false).await {
            tracing::warn!(plugin = %active, error = %e, "Failed to hide view");
        }
        table.hidden_for_overlay = Some(active.clone());
        Some(active)
    }

    /// Show the view hidden by [`hide_current_for_overlay`](Self::hide_current_for_overlay)
    pub async fn restore_after_overlay(&self) -> Option<String> {
        let mut table = self.table.lock().await;
        let hidden = table.hidden_for_overlay.take()?;
        if table.active.is_some() || !table.views.contains_key(&hidden) {
            return None;
        }
        self.activate(&mut table, &hidden).await;
        Some(hidden)
    }

    /// Reload an open view; returns false when it is not open
    pub async fn reload(&self, plugin_id: &str) -> bool {
        let table = self.table.lock().await;
        if !table.views.contains_key(plugin_id) {
            return false;
        }
        match self.host.reload(plugin_id).await {
            Ok(()) => {
                tracing::info!(plugin = %plugin_id, "Reloaded plugin view");
                true
            }
            Err(e) => {
                tracing::warn!(plugin = %plugin_id, error = %e, "Failed to reload view");
                false
            }
        }
    }

    pub async fn active(&self) -> Option<String> {
        self.table.lock().await.active.clone()
    }

    pub async fn is_open(&self, plugin_id: &str) -> bool {
        self.table.lock().await.views.contains_key(plugin_id)
    }

    /// Materialized views, most recently activated first
    pub async fn open_views(&self) -> Vec<ViewInfo> {
        let table = self.table.lock().await;
        let mut views: Vec<ViewInfo> = table
            .views
            .keys()
            .map(|id| Self::info(&table, id))
            .collect();
        views.sort_by(|a, b| b.last_activated.cmp(&a.last_activated));
        views
    }

    pub(crate) async fn apply_bounds(&self, plugin_id: &str, bounds: Rect) {
        let mut table = self.table.lock().await;
        table.content_bounds = bounds;
        let Some(view) = table.views.get_mut(plugin_id) else {
            return;
        };
        view.bounds = bounds;
        if view.state == ViewState::Active {
            if let Err(e) = self.host.set_bounds(plugin_id, bounds).await {
                tracing::warn!(plugin = %plugin_id, error = %e, "Failed to apply view bounds");
            }
        }
    }

    /// Make `plugin_id` the active view, hiding the previous one
    async fn activate(&self, table: &mut ViewTable, plugin_id: &str) {
        if let Some(previous) = table.active.take() {
            if previous != plugin_id {
                if let Some(view) = table.views.get_mut(&previous) {
                    view.state = ViewState::Hidden;
                }
                if let Err(e) = self.host.set_visible(&previous, false).await {
                    tracing::warn!(plugin = %previous, error = %e, "Failed to hide view");
                }
            }
        }

        let stamp = table.tick();
        let Some(view) = table.views.get_mut(plugin_id) else {
            return;
        };
        view.state = ViewState::Active;
        view.last_activated = stamp;
        let bounds = view.bounds;
        table.active = Some(plugin_id.to_string());

        if let Err(e) = self.host.set_bounds(plugin_id, bounds).await {
            tracing::warn!(plugin = %plugin_id, error = %e, "Failed to apply view bounds");
        }
        if let Err(e) = self.host.set_visible(plugin_id, true).await {
            tracing::warn!(plugin = %plugin_id, error = %e, "Failed to show view");
        }
    }

    fn resolve_source(&self, plugin_id: &str) -> Result<ViewSource, ViewError> {
        let record = self.store.get(plugin_id);
        if record.as_ref().is_some_and(|r| !r.enabled) {
            return Err(ViewError::Disabled(plugin_id.to_string()));
        }

        if let Some(url) = self.dev.dev_url(plugin_id) {
            return Ok(ViewSource::Dev { url });
        }

        let record = record.ok_or_else(|| ViewError::PluginNotFound(plugin_id.to_string()))?;

        if let Some(dev) = &record.metadata.dev {
            if let Some(url) = dev.active_url() {
                self.dev.register(plugin_id, url, dev.auto_reload)?;
                return Ok(ViewSource::Dev {
                    url: url.to_string(),
                });
            }
        }

        let entry = record.metadata.entry.as_str();
        let missing = || ViewError::EntryMissing {
            plugin_id: plugin_id.to_string(),
            entry: entry.to_string(),
        };
        let sandbox =
            PluginSandbox::new(self.config.plugin_dir(plugin_id)).map_err(|_| missing())?;
        let path = sandbox.resolve(entry).map_err(|_| missing())?;
        if !path.is_file() {
            return Err(missing());
        }

        let relative = entry.trim_start_matches("./").replace('\\', "/");
        Ok(ViewSource::Packaged {
            url: format!("{}{}/{}", PLUGIN_PROTOCOL, plugin_id, relative),
            path,
        })
    }

    fn info(table: &ViewTable, plugin_id: &str) -> ViewInfo {
        let view = &table.views[plugin_id];
        ViewInfo {
            plugin_id: plugin_id.to_string(),
            url: view.url.clone(),
            state: view.state,
            bounds: view.bounds,
            last_activated: view.last_activated,
        }
    }
}

impl std::fmt::Debug for ViewManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewManager")
            .field("max_cached_views", &self.config.max_cached_views)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::PermissionRegistry;
    use crate::storage::KvStore;
    use std::time::Duration;
    use tempfile::TempDir;
    use unihub_plugin_api::{DevConfig, InstalledPluginRecord, PluginManifest, PluginSource};

    struct Fixture {
        _temp: TempDir,
        config: Arc<HostConfig>,
        store: Arc<PluginStore>,
        dev: Arc<DevModeRegistry>,
        host: Arc<RecordingViewHost>,
        views: Arc<ViewManager>,
    }

    fn fixture(max_cached_views: usize) -> Fixture {
        let temp = TempDir::new().unwrap();
        let mut config = HostConfig::new(temp.path());
        config.max_cached_views = max_cached_views;
        let config = Arc::new(config);
        let store = Arc::new(PluginStore::new(config.registry_path()));
        let kv = Arc::new(KvStore::open(config.kv_path()).unwrap());
        let broker = Arc::new(CapabilityBroker::new(
            config.clone(),
            Arc::new(PermissionRegistry::new()),
            kv,
        ));
        let dev = Arc::new(DevModeRegistry::new());
        let host = Arc::new(RecordingViewHost::new());
        let views = ViewManager::new(
            config.clone(),
            store.clone(),
            dev.clone(),
            broker,
            host.clone(),
        );
        Fixture {
            _temp: temp,
            config,
            store,
            dev,
            host,
            views,
        }
    }

    fn install(fx: &Fixture, id: &str) {
        let dir = fx.config.plugin_dir(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("index.html"), "<html></html>").unwrap();
        fx.store
            .save(InstalledPluginRecord {
                id: id.to_string(),
                version: "1.0.0".into(),
                enabled: true,
                installed_at: "2024-01-01T00:00:00Z".into(),
                source: PluginSource::Local,
                source_url: None,
                checksum: None,
                metadata: PluginManifest::new(id, id, "1.0.0", "index.html"),
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_open_packaged_entry() {
        let fx = fixture(5);
        install(&fx, "a");

        let info = fx.views.open("a").await.unwrap();
        assert_eq!(info.url, "plugin://a/index.html");
        assert_eq!(info.state, ViewState::Active);
        assert_eq!(fx.views.active().await.as_deref(), Some("a"));
        assert!(fx.host.channel("a").unwrap().is_open());
    }

    #[tokio::test]
    async fn test_open_unknown_and_disabled() {
        let fx = fixture(5);
        assert!(matches!(
            fx.views.open("ghost").await,
            Err(ViewError::PluginNotFound(_))
        ));

        install(&fx, "a");
        fx.store.set_enabled("a", false).unwrap();
        assert!(matches!(fx.views.open("a").await, Err(ViewError::Disabled(_))));
        assert!(fx.host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_open_rejects_reserved_and_unsafe_ids() {
        let fx = fixture(5);
        for id in ["builtin", "unknown", "../../escape"] {
            assert!(matches!(fx.views.open(id).await, Err(ViewError::InvalidId(_))), "{id}");
        }
        assert!(fx.host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_retired_plugin_cannot_reopen() {
        let fx = fixture(5);
        install(&fx, "a");
        fx.views.open("a").await.unwrap();

        assert!(fx.views.retire("a").await);
        assert!(!fx.views.is_open("a").await);
        // the record is still there, as it is mid-uninstall
        assert!(fx.store.contains("a"));
        assert!(matches!(fx.views.open("a").await, Err(ViewError::PluginNotFound(_))));

        fx.views.release("a").await;
        assert!(fx.views.open("a").await.is_ok());
    }

    #[tokio::test]
    async fn test_open_requires_entry_file() {
        let fx = fixture(5);
        install(&fx, "a");
        std::fs::remove_file(fx.config.plugin_dir("a").join("index.html")).unwrap();

        assert!(matches!(
            fx.views.open("a").await,
            Err(ViewError::EntryMissing { .. })
        ));
        assert!(!fx.views.is_open("a").await);
    }

    #[tokio::test]
    async fn test_dev_registry_wins() {
        let fx = fixture(5);
        install(&fx, "a");
        fx.dev.register("a", "http://localhost:5173", false).unwrap();

        let info = fx.views.open("a").await.unwrap();
        assert_eq!(info.url, "http://localhost:5173");
    }

    #[tokio::test]
    async fn test_dev_registry_serves_uninstalled_plugin() {
        let fx = fixture(5);
        fx.dev.register("scratch", "http://localhost:3000", false).unwrap();
        let info = fx.views.open("scratch").await.unwrap();
        assert_eq!(info.url, "http://localhost:3000");
    }

    #[tokio::test]
    async fn test_manifest_dev_block_registers() {
        let fx = fixture(5);
        install(&fx, "a");
        let mut record = fx.store.get("a").unwrap();
        record.metadata.dev = Some(DevConfig {
            enabled: true,
            url: Some("http://localhost:5173".into()),
            auto_reload: true,
        });
        fx.store.save(record).unwrap();

        let info = fx.views.open("a").await.unwrap();
        assert_eq!(info.url, "http://localhost:5173");
        assert!(fx.dev.get("a").unwrap().auto_reload);
    }

    #[tokio::test]
    async fn test_reopen_reactivates_without_new_surface() {
        let fx = fixture(5);
        install(&fx, "a");
        install(&fx, "b");

        fx.views.open("a").await.unwrap();
        fx.views.open("b").await.unwrap();
        fx.host.clear();

        fx.views.open("a").await.unwrap();
        let calls = fx.host.calls();
        assert!(!calls.iter().any(|c| matches!(c, SurfaceCall::Create { .. })));
        assert!(calls.contains(&SurfaceCall::SetVisible {
            plugin_id: "b".into(),
            visible: false
        }));
        assert!(calls.contains(&SurfaceCall::SetVisible {
            plugin_id: "a".into(),
            visible: true
        }));
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let fx = fixture(3);
        for id in ["a", "b", "c", "d"] {
            install(&fx, id);
        }

        fx.views.open("a").await.unwrap();
        fx.views.open("b").await.unwrap();
        fx.views.open("c").await.unwrap();
        // "a" becomes most recent; "b" is now the LRU inactive view
        fx.views.open("a").await.unwrap();
        fx.views.open("d").await.unwrap();

        let mut open: Vec<String> = fx
            .views
            .open_views()
            .await
            .into_iter()
            .map(|v| v.plugin_id)
            .collect();
        open.sort();
        assert_eq!(open, vec!["a", "c", "d"]);
        assert!(fx.host.calls().contains(&SurfaceCall::Destroy {
            plugin_id: "b".into()
        }));
        assert_eq!(fx.host.live(), vec!["a", "c", "d"]);
    }

    #[tokio::test]
    async fn test_active_view_is_never_evicted() {
        let fx = fixture(1);
        install(&fx, "a");
        install(&fx, "b");

        fx.views.open("a").await.unwrap();
        fx.views.open("b").await.unwrap();

        assert!(fx.views.is_open("a").await);
        assert!(fx.views.is_open("b").await);
        assert_eq!(fx.views.active().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_failed_create_leaves_no_view() {
        let fx = fixture(5);
        install(&fx, "a");
        install(&fx, "b");
        fx.views.open("a").await.unwrap();
        fx.host.fail_create_for("b");

        assert!(matches!(
            fx.views.open("b").await,
            Err(ViewError::Surface { .. })
        ));
        assert!(!fx.views.is_open("b").await);
        assert_eq!(fx.views.active().await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let fx = fixture(5);
        install(&fx, "a");
        fx.views.open("a").await.unwrap();
        let channel = fx.host.channel("a").unwrap();

        assert!(fx.views.close("a").await);
        assert!(!fx.views.close("a").await);
        assert!(fx.views.active().await.is_none());
        drop(channel);
        assert!(fx.host.channel("a").is_none());
    }

    #[tokio::test]
    async fn test_overlay_hide_and_restore() {
        let fx = fixture(5);
        install(&fx, "a");

        assert!(fx.views.hide_current_for_overlay().await.is_none());
        assert!(fx.views.restore_after_overlay().await.is_none());

        fx.views.open("a").await.unwrap();
        assert_eq!(fx.views.hide_current_for_overlay().await.as_deref(), Some("a"));
        assert!(fx.views.active().await.is_none());
        assert!(fx.views.is_open("a").await);

        assert_eq!(fx.views.restore_after_overlay().await.as_deref(), Some("a"));
        assert_eq!(fx.views.active().await.as_deref(), Some("a"));
        assert!(fx.views.restore_after_overlay().await.is_none());
    }

    #[tokio::test]
    async fn test_reload() {
        let fx = fixture(5);
        install(&fx, "a");
        assert!(!fx.views.reload("a").await);
        fx.views.open("a").await.unwrap();
        assert!(fx.views.reload("a").await);
        assert!(fx.host.calls().contains(&SurfaceCall::Reload {
            plugin_id: "a".into()
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounds_are_coalesced() {
        let fx = fixture(5);
        install(&fx, "a");
        fx.views.open("a").await.unwrap();
        fx.host.clear();

        for width in [100, 200, 300, 400] {
            fx.views.update_bounds("a", Rect::new(0, 40, width, 600));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(fx.config.bounds_debounce() * 2).await;

        let applied: Vec<Rect> = fx
            .host
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                SurfaceCall::SetBounds { bounds, .. } => Some(bounds),
                _ => None,
            })
            .collect();
        assert_eq!(applied, vec![Rect::new(0, 40, 400, 600)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_view_gets_bounds_on_activation() {
        let fx = fixture(5);
        install(&fx, "a");
        install(&fx, "b");
        fx.views.open("a").await.unwrap();
        fx.views.open("b").await.unwrap();

        fx.views.update_bounds("a", Rect::new(0, 0, 800, 600));
        tokio::time::sleep(fx.config.bounds_debounce() * 2).await;
        assert!(!fx.host.calls().contains(&SurfaceCall::SetBounds {
            plugin_id: "a".into(),
            bounds: Rect::new(0, 0, 800, 600)
        }));

        fx.views.open("a").await.unwrap();
        assert!(fx.host.calls().contains(&SurfaceCall::SetBounds {
            plugin_id: "a".into(),
            bounds: Rect::new(0, 0, 800, 600)
        }));
    }
}

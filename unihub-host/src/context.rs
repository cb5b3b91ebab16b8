//! Host context: every service, constructed once and passed explicitly
//!
//! ```text
//!   HostContext
//!   ├── PermissionRegistry ◀──────────────┐
//!   ├── PluginStore   (plugins-data.json)  │ register / revoke
//!   ├── KvStore       (unihub.redb)        │
//!   ├── CapabilityBroker ──checks──────────┤
//!   ├── DevModeRegistry                    │
//!   ├── ViewManager ──▶ ViewHost           │
//!   ├── PluginInstaller ───────────────────┘
//!   ├── ClipboardMonitor
//!   └── DevReloadWatcher (optional)
//! ```

use crate::audit::{AuditSink, NullAuditSink};
use crate::broker::{self, CapabilityBroker, ClipboardBackend, LogNotifier, LogOpener, Notifier, Opener};
use crate::clipboard_monitor::ClipboardMonitor;
use crate::config::HostConfig;
use crate::dev::DevModeRegistry;
use crate::installer::{HttpFetcher, PackageFetcher, PluginInstaller};
use crate::permission::PermissionRegistry;
use crate::storage::{KvStore, PluginStore, StorageError};
use crate::view::{HeadlessViewHost, ViewHost, ViewManager};
use crate::watcher::DevReloadWatcher;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Failed to prepare data directory: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Wired set of host services
pub struct HostContext {
    config: Arc<HostConfig>,
    permissions: Arc<PermissionRegistry>,
    store: Arc<PluginStore>,
    kv: Arc<KvStore>,
    broker: Arc<CapabilityBroker>,
    dev: Arc<DevModeRegistry>,
    views: Arc<ViewManager>,
    installer: Arc<PluginInstaller>,
    clipboard_monitor: ClipboardMonitor,
    _watcher: Option<DevReloadWatcher>,
}

impl HostContext {
    pub fn builder(config: HostConfig) -> HostContextBuilder {
        HostContextBuilder::new(config)
    }

    pub fn config(&self) -> &Arc<HostConfig> {
        &self.config
    }

    pub fn permissions(&self) -> &Arc<PermissionRegistry> {
        &self.permissions
    }

    pub fn store(&self) -> &Arc<PluginStore> {
        &self.store
    }

    pub fn kv(&self) -> &Arc<KvStore> {
        &self.kv
    }

    pub fn broker(&self) -> &Arc<CapabilityBroker> {
        &self.broker
    }

    pub fn dev(&self) -> &Arc<DevModeRegistry> {
        &self.dev
    }

    pub fn views(&self) -> &Arc<ViewManager> {
        &self.views
    }

    pub fn installer(&self) -> &Arc<PluginInstaller> {
        &self.installer
    }

    pub fn clipboard_monitor(&self) -> &ClipboardMonitor {
        &self.clipboard_monitor
    }

    /// Close every view
    pub async fn shutdown(&self) {
        self.views.close_all().await;
        tracing::info!("Host shut down");
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("data_dir", &self.config.data_dir)
            .finish_non_exhaustive()
    }
}

/// Builder for [`HostContext`] with injectable collaborators
pub struct HostContextBuilder {
    config: HostConfig,
    view_host: Option<Arc<dyn ViewHost>>,
    clipboard: Option<Arc<dyn ClipboardBackend>>,
    notifier: Option<Arc<dyn Notifier>>,
    opener: Option<Arc<dyn Opener>>,
    fetcher: Option<Arc<dyn PackageFetcher>>,
    audit: Option<Arc<dyn AuditSink>>,
    http_client: Option<reqwest::Client>,
    watch_dev: bool,
}

impl HostContextBuilder {
    fn new(config: HostConfig) -> Self {
        Self {
            config,
            view_host: None,
            clipboard: None,
            notifier: None,
            opener: None,
            fetcher: None,
            audit: None,
            http_client: None,
            watch_dev: true,
        }
    }

    pub fn view_host(mut self, host: Arc<dyn ViewHost>) -> Self {
        self.view_host = Some(host);
        self
    }

    pub fn clipboard(mut self, clipboard: Arc<dyn ClipboardBackend>) -> Self {
        self.clipboard = Some(clipboard);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Where `system.open_external` and `system.show_in_folder` go; logs only by default
    pub fn opener(mut self, opener: Arc<dyn Opener>) -> Self {
        self.opener = Some(opener);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn PackageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Enable or disable the dev-mode reload watcher (on by default)
    pub fn watch_dev(mut self, enabled: bool) -> Self {
        self.watch_dev = enabled;
        self
    }

    /// Open the stores, wire the services and restore permission grants
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<HostContext, HostError> {
        let config = Arc::new(self.config);
        std::fs::create_dir_all(config.plugins_dir())?;

        let audit = self.audit.unwrap_or_else(|| Arc::new(NullAuditSink));
        let clipboard = self.clipboard.unwrap_or_else(broker::clipboard::default_backend);
        let http = self.http_client.unwrap_or_else(broker::default_http_client);

        let permissions = Arc::new(PermissionRegistry::with_audit(Arc::clone(&audit)));
        let store = Arc::new(PluginStore::new(config.registry_path()));
        let kv = Arc::new(KvStore::open(config.kv_path())?);

        let broker = Arc::new(
            CapabilityBroker::new(Arc::clone(&config), Arc::clone(&permissions), Arc::clone(&kv))
                .with_clipboard(Arc::clone(&clipboard))
                .with_notifier(self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)))
                .with_opener(self.opener.unwrap_or_else(|| Arc::new(LogOpener)))
                .with_audit(Arc::clone(&audit))
                .with_http_client(http.clone()),
        );

        let dev = Arc::new(DevModeRegistry::new());
        let views = ViewManager::new(
            Arc::clone(&config),
            Arc::clone(&store),
            Arc::clone(&dev),
            Arc::clone(&broker),
            self.view_host
                .unwrap_or_else(|| Arc::new(HeadlessViewHost::new())),
        );

        let installer = Arc::new(
            PluginInstaller::new(
                Arc::clone(&config),
                Arc::clone(&store),
                Arc::clone(&permissions),
                Arc::clone(&views),
                Arc::clone(&dev),
            )
            .with_fetcher(
                self.fetcher
                    .unwrap_or_else(|| Arc::new(HttpFetcher::new(http))),
            )
            .with_audit(audit),
        );

        let installed = store.warmup();
        installer.initialize_permissions();

        let watcher = self.watch_dev.then(|| {
            DevReloadWatcher::spawn(
                Arc::clone(&dev),
                Arc::clone(&views),
                config.dev_reload_debounce(),
            )
        });

        let clipboard_monitor = ClipboardMonitor::new(clipboard, config.clipboard_poll_interval());

        tracing::info!(data_dir = %config.data_dir.display(), installed, "Host context ready");

        Ok(HostContext {
            config,
            permissions,
            store,
            kv,
            broker,
            dev,
            views,
            installer,
            clipboard_monitor,
            _watcher: watcher,
        })
    }
}

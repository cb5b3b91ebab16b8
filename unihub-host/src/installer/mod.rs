//! Plugin installation and removal
//!
//! ```text
//!   install:   Downloading ─▶ Extracting ─▶ ManifestValidated ─▶ Registered
//!                   │              │                │
//!                   └──────────────┴────────────────┴──▶ Failed (staging removed)
//!
//!   uninstall: ViewClosed ─▶ Unregistered ─▶ FilesRemoved ─▶ PermissionsRevoked
//! ```
//!
//! Downloads and extraction run outside the install lock. The lock covers
//! the duplicate check, the move into `plugins/<id>` and registration, so two
//! installs of the same id can never both succeed.

mod archive;
mod download;
pub mod icon;
mod manifest;

pub use download::{FetchError, HttpFetcher, PackageFetcher};

use crate::audit::{self, AuditEventType, AuditSink, NullAuditSink};
use crate::config::HostConfig;
use crate::dev::DevModeRegistry;
use crate::permission::PermissionRegistry;
use crate::storage::{PluginStore, StorageError};
use crate::view::ViewManager;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use unihub_plugin_api::{InstalledPluginRecord, ManifestError, PluginSource};

/// Errors raised by install, uninstall and enable/disable
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("{message}")]
    DownloadFailed { attempts: u32, message: String },

    #[error("Invalid plugin archive: {0}")]
    ArchiveInvalid(String),

    #[error("Invalid plugin archive: no package.json or manifest.json found")]
    ManifestMissing,

    #[error("Invalid plugin manifest: {0}")]
    ManifestInvalid(String),

    #[error("Invalid plugin manifest: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Plugin {0} is already installed, uninstall the old version first")]
    DuplicateId(String),

    #[error("Plugin {0} is not installed")]
    NotInstalled(String),

    #[error("Filesystem error during install: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Lifecycle phase reported on the event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum InstallPhase {
    Downloading { url: String, attempt: u32 },
    Extracting,
    ManifestValidated,
    Registered,
    Failed { message: String },
    ViewClosed,
    Unregistered,
    FilesRemoved,
    PermissionsRevoked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallEvent {
    /// Known once the manifest has been read
    pub plugin_id: Option<String>,
    #[serde(flatten)]
    pub phase: InstallPhase,
}

/// Result of a successful install
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallOutcome {
    pub plugin_id: String,
    pub name: String,
    pub version: String,
    pub message: String,
}

/// The install/uninstall state machine
pub struct PluginInstaller {
    config: Arc<HostConfig>,
    store: Arc<PluginStore>,
    permissions: Arc<PermissionRegistry>,
    views: Arc<ViewManager>,
    dev: Arc<DevModeRegistry>,
    fetcher: Arc<dyn PackageFetcher>,
    audit: Arc<dyn AuditSink>,
    lock: Mutex<()>,
    events: broadcast::Sender<InstallEvent>,
}

impl PluginInstaller {
    pub fn new(
        config: Arc<HostConfig>,
        store: Arc<PluginStore>,
        permissions: Arc<PermissionRegistry>,
        views: Arc<ViewManager>,
        dev: Arc<DevModeRegistry>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            store,
            permissions,
            views,
            dev,
            fetcher: Arc::new(HttpFetcher::default()),
            audit: Arc::new(NullAuditSink),
            lock: Mutex::new(()),
            events,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn PackageFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<InstallEvent> {
        self.events.subscribe()
    }

    /// Installed plugins
    pub fn list_plugins(&self) -> Vec<InstalledPluginRecord> {
        self.store.list()
    }

    /// Register grants for every enabled plugin; called once at startup
    pub fn initialize_permissions(&self) -> usize {
        let mut count = 0;
        for record in self.store.list().into_iter().filter(|r| r.enabled) {
            self.permissions
                .register_plugin(&record.id, &record.metadata.permissions);
            count += 1;
        }
        tracing::info!(count, "Initialized plugin permissions");
        count
    }

    /// Download and install a plugin archive
    pub async fn install_from_url(&self, url: &str) -> Result<InstallOutcome, InstallError> {
        let bytes = download::download_with_retry(
            self.fetcher.as_ref(),
            url,
            &self.config.download,
            |attempt| {
                self.emit(
                    None,
                    InstallPhase::Downloading {
                        url: url.to_string(),
                        attempt,
                    },
                )
            },
        )
        .await;

        match bytes {
            Ok(bytes) => self.install_from_buffer(bytes, url).await,
            Err(e) => {
                tracing::error!(url = %url, error = %e, "Plugin download failed");
                self.emit(
                    None,
                    InstallPhase::Failed {
                        message: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    /// Install a plugin archive held in memory
    ///
    /// `source_label` is the url or file name the archive came from.
    pub async fn install_from_buffer(
        &self,
        bytes: Vec<u8>,
        source_label: &str,
    ) -> Result<InstallOutcome, InstallError> {
        let mut plugin_id = None;
        let result = self.install_staged(bytes, source_label, &mut plugin_id).await;
        match &result {
            Ok(outcome) => {
                tracing::info!(plugin = %outcome.plugin_id, version = %outcome.version, source = %source_label, "Plugin installed");
            }
            Err(e) => {
                tracing::error!(source = %source_label, error = %e, "Plugin install failed");
                self.emit(
                    plugin_id,
                    InstallPhase::Failed {
                        message: e.to_string(),
                    },
                );
            }
        }
        result
    }

    async fn install_staged(
        &self,
        bytes: Vec<u8>,
        source_label: &str,
        plugin_id: &mut Option<String>,
    ) -> Result<InstallOutcome, InstallError> {
        let staging_root = self.config.staging_dir();
        std::fs::create_dir_all(&staging_root)?;
        // Removed on drop, whichever way this function exits
        let scratch = tempfile::Builder::new()
            .prefix("install-")
            .tempdir_in(&staging_root)?;

        self.emit(None, InstallPhase::Extracting);
        let checksum = blake3::hash(&bytes).to_hex().to_string();
        let extract_dir = scratch.path().join("package");
        let target = extract_dir.clone();
        tokio::task::spawn_blocking(move || archive::extract_zip(&bytes, &target))
            .await
            .map_err(|e| InstallError::Io(std::io::Error::other(e)))??;

        let package_root = archive::locate_package_root(&extract_dir)?;
        let mut manifest = manifest::read_manifest(&package_root)?;
        manifest.validate()?;
        *plugin_id = Some(manifest.id.clone());
        manifest.icon = icon::resolve_icon(&manifest.id, manifest.icon.as_deref(), manifest.icon_kind);
        self.emit(Some(manifest.id.clone()), InstallPhase::ManifestValidated);

        let _guard = self.lock.lock().await;

        if self.store.contains(&manifest.id) {
            return Err(InstallError::DuplicateId(manifest.id));
        }

        let dest = self.config.plugin_dir(&manifest.id);
        let marked = {
            let target = dest.clone();
            let id = manifest.id.clone();
            tokio::task::spawn_blocking(move || -> Result<usize, InstallError> {
                if target.exists() {
                    tracing::warn!(plugin = %id, "Removing leftover plugin directory");
                    std::fs::remove_dir_all(&target)?;
                }
                archive::promote(&package_root, &target)?;
                Ok(archive::mark_sidecars_executable(&target))
            })
            .await
            .map_err(|e| InstallError::Io(std::io::Error::other(e)))??
        };
        if marked > 0 {
            tracing::debug!(plugin = %manifest.id, count = marked, "Marked sidecars executable");
        }

        let source = PluginSource::from_label(source_label);
        let record = InstalledPluginRecord {
            id: manifest.id.clone(),
            version: manifest.version.clone(),
            enabled: true,
            installed_at: chrono::Utc::now().to_rfc3339(),
            source,
            source_url: (source == PluginSource::Url).then(|| source_label.to_string()),
            checksum: Some(checksum),
            metadata: manifest.clone(),
        };

        if let Err(e) = self.store.save(record) {
            if let Err(cleanup) = std::fs::remove_dir_all(&dest) {
                tracing::warn!(plugin = %manifest.id, error = %cleanup, "Failed to roll back plugin directory");
            }
            return Err(e.into());
        }
        self.permissions
            .register_plugin(&manifest.id, &manifest.permissions);

        audit::emit(
            self.audit.as_ref(),
            audit::lifecycle(
                AuditEventType::PluginInstalled,
                &manifest.id,
                Some(&manifest.version),
                Some(source),
            ),
        );
        self.emit(Some(manifest.id.clone()), InstallPhase::Registered);

        Ok(InstallOutcome {
            message: format!("Plugin {} installed", manifest.name),
            plugin_id: manifest.id,
            name: manifest.name,
            version: manifest.version,
        })
    }

    /// Remove an installed plugin
    pub async fn uninstall_plugin(&self, plugin_id: &str) -> Result<(), InstallError> {
        let _guard = self.lock.lock().await;

        let Some(record) = self.store.get(plugin_id) else {
            return Err(InstallError::NotInstalled(plugin_id.to_string()));
        };
        let id = Some(plugin_id.to_string());

        self.views.retire(plugin_id).await;
        self.emit(id.clone(), InstallPhase::ViewClosed);

        if let Err(e) = self.store.remove(plugin_id) {
            self.views.release(plugin_id).await;
            return Err(e.into());
        }
        self.emit(id.clone(), InstallPhase::Unregistered);

        let dir: PathBuf = self.config.plugin_dir(plugin_id);
        let removal = tokio::task::spawn_blocking(move || {
            if dir.exists() {
                std::fs::remove_dir_all(&dir)
            } else {
                Ok(())
            }
        })
        .await
        .unwrap_or_else(|e| Err(std::io::Error::other(e)));
        if let Err(e) = removal {
            tracing::warn!(plugin = %plugin_id, error = %e, "Failed to remove plugin directory");
        }
        self.emit(id.clone(), InstallPhase::FilesRemoved);

        self.permissions.unregister_plugin(plugin_id);
        self.dev.unregister(plugin_id);
        self.views.release(plugin_id).await;
        self.emit(id, InstallPhase::PermissionsRevoked);

        audit::emit(
            self.audit.as_ref(),
            audit::lifecycle(
                AuditEventType::PluginUninstalled,
                plugin_id,
                Some(&record.version),
                Some(record.source),
            ),
        );
        tracing::info!(plugin = %plugin_id, "Plugin uninstalled");
        Ok(())
    }

    /// Enable or disable a plugin
    ///
    /// Disabling closes its view and revokes its grants.
    pub async fn set_enabled(
        &self,
        plugin_id: &str,
        enabled: bool,
    ) -> Result<InstalledPluginRecord, InstallError> {
        let _guard = self.lock.lock().await;

        let record = self
            .store
            .set_enabled(plugin_id, enabled)
            .map_err(|e| match e {
                StorageError::NotFound(id) => InstallError::NotInstalled(id),
                other => InstallError::Storage(other),
            })?;

        let event_type = if enabled {
            self.permissions
                .register_plugin(plugin_id, &record.metadata.permissions);
            AuditEventType::PluginEnabled
        } else {
            self.views.close(plugin_id).await;
            self.permissions.unregister_plugin(plugin_id);
            AuditEventType::PluginDisabled
        };
        audit::emit(
            self.audit.as_ref(),
            audit::lifecycle(event_type, plugin_id, Some(&record.version), None),
        );
        tracing::info!(plugin = %plugin_id, enabled, "Plugin enabled state changed");
        Ok(record)
    }

    fn emit(&self, plugin_id: Option<String>, phase: InstallPhase) {
        let _ = self.events.send(InstallEvent { plugin_id, phase });
    }
}

impl std::fmt::Debug for PluginInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstaller")
            .field("plugins_dir", &self.config.plugins_dir())
            .finish_non_exhaustive()
    }
}

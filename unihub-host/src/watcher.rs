//! Dev-mode auto reload
//!
//! Watches the directory behind a `file://` dev URL for every dev entry with
//! `autoReload` set, and reloads the plugin's view once a burst of changes
//! has settled.

use crate::dev::{DevEntry, DevEvent, DevModeRegistry};
use crate::view::ViewManager;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Background task reloading dev-mode views on file changes
///
/// The task stops when this handle is dropped or [`shutdown`](Self::shutdown)
/// is called.
pub struct DevReloadWatcher {
    shutdown_tx: mpsc::Sender<()>,
}

impl DevReloadWatcher {
    /// Start watching; must be called from within a tokio runtime
    pub fn spawn(dev: Arc<DevModeRegistry>, views: Arc<ViewManager>, debounce: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (change_tx, mut change_rx) = mpsc::channel::<String>(100);
        let mut dev_events = dev.subscribe();

        tokio::spawn(async move {
            let mut watchers: HashMap<String, RecommendedWatcher> = HashMap::new();
            for entry in dev.entries() {
                track(&mut watchers, &entry, &change_tx);
            }

            let mut pending: HashSet<String> = HashSet::new();
            let mut deadline: Option<tokio::time::Instant> = None;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Dev reload watcher shutting down");
                        break;
                    }

                    event = dev_events.recv() => match event {
                        Ok(DevEvent::Registered(entry)) => {
                            track(&mut watchers, &entry, &change_tx);
                        }
                        Ok(DevEvent::Unregistered(plugin_id)) => {
                            watchers.remove(&plugin_id);
                            pending.remove(&plugin_id);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Dev registry events lagged, resyncing watchers");
                            watchers.clear();
                            for entry in dev.entries() {
                                track(&mut watchers, &entry, &change_tx);
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },

                    Some(plugin_id) = change_rx.recv() => {
                        pending.insert(plugin_id);
                        deadline = Some(tokio::time::Instant::now() + debounce);
                    }

                    _ = async {
                        if let Some(deadline) = deadline {
                            tokio::time::sleep_until(deadline).await;
                        } else {
                            std::future::pending::<()>().await;
                        }
                    } => {
                        deadline = None;
                        for plugin_id in pending.drain() {
                            if views.reload(&plugin_id).await {
                                tracing::info!(plugin = %plugin_id, "Dev plugin reloaded after file change");
                            }
                        }
                    }
                }
            }
        });

        Self { shutdown_tx }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

impl std::fmt::Debug for DevReloadWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevReloadWatcher")
            .field("running", &!self.shutdown_tx.is_closed())
            .finish()
    }
}

/// (Re)start or stop the watcher for one entry
fn track(
    watchers: &mut HashMap<String, RecommendedWatcher>,
    entry: &DevEntry,
    change_tx: &mpsc::Sender<String>,
) {
    watchers.remove(&entry.plugin_id);
    if !entry.auto_reload {
        return;
    }
    let Some(dir) = watch_root(&entry.url) else {
        tracing::debug!(plugin = %entry.plugin_id, url = %entry.url, "Dev url is not a local file, not watching");
        return;
    };

    let tx = change_tx.clone();
    let plugin_id = entry.plugin_id.clone();
    let watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        if let Ok(event) = res {
            if matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                // A full queue already guarantees a reload
                let _ = tx.try_send(plugin_id.clone());
            }
        }
    });

    let mut watcher = match watcher {
        Ok(watcher) => watcher,
        Err(e) => {
            tracing::warn!(plugin = %entry.plugin_id, error = %e, "Failed to create file watcher");
            return;
        }
    };
    if let Err(e) = watcher.watch(&dir, RecursiveMode::Recursive) {
        tracing::warn!(plugin = %entry.plugin_id, dir = %dir.display(), error = %e, "Failed to watch dev directory");
        return;
    }
    tracing::info!(plugin = %entry.plugin_id, dir = %dir.display(), "Watching dev directory");
    watchers.insert(entry.plugin_id.clone(), watcher);
}

/// Directory to watch for a `file://` url
fn watch_root(url: &str) -> Option<PathBuf> {
    let url = reqwest::Url::parse(url).ok()?;
    if url.scheme() != "file" {
        return None;
    }
    let path = url.to_file_path().ok()?;
    if path.is_dir() {
        Some(path)
    } else {
        path.parent().map(|p| p.to_path_buf()).filter(|p| p.is_dir())
    }
}
